//! Cron evaluation for follow subscriptions, in the user's timezone.
//!
//! Follow prompts store standard 5-field expressions; the `cron` crate wants
//! a seconds field, so one is prepended before parsing.

use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::warn;

/// Whether a cron schedule has fired since `last` (in `tz`) as of `now`.
///
/// A schedule that has never fired (`last == None`) is due immediately.
/// Unparseable expressions or timezones are reported and treated as not due
/// so a bad subscription cannot spin the poller.
pub fn cron_due(
    expression: &str,
    tz: &str,
    last: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    let Some(last) = last else {
        return true;
    };

    let tz: Tz = match tz.parse() {
        Ok(tz) => tz,
        Err(_) => {
            warn!(timezone = tz, "unknown timezone; treating cron as not due");
            return false;
        }
    };

    let schedule = match cron::Schedule::from_str(&with_seconds(expression)) {
        Ok(s) => s,
        Err(e) => {
            warn!(expression, "invalid cron expression: {e}");
            return false;
        }
    };

    let last_local = tz.from_utc_datetime(&last.naive_utc());
    match schedule.after(&last_local).next() {
        Some(next_fire) => next_fire.with_timezone(&Utc) <= now,
        None => false,
    }
}

/// Prepend a seconds field to a standard 5-field expression. Expressions
/// that already carry 6 or 7 fields pass through unchanged.
fn with_seconds(expression: &str) -> String {
    let fields = expression.split_whitespace().count();
    if fields == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    }
}
