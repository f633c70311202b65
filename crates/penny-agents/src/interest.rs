//! Time-decayed behavioral interest scoring.

use chrono::{DateTime, Utc};

use penny_store::EngagementRow;

/// Compute an entity's interest from its engagements with exponential
/// half-life decay: each engagement contributes
/// `strength * valence_weight * 0.5^(age_days / half_life_days)`.
/// The result is floored at zero.
pub fn compute_interest_score(
    engagements: &[EngagementRow],
    half_life_days: f64,
    now: DateTime<Utc>,
) -> f64 {
    if half_life_days <= 0.0 {
        return 0.0;
    }
    let score: f64 = engagements
        .iter()
        .map(|e| {
            let age_days = (now - e.created_at).num_seconds().max(0) as f64 / 86_400.0;
            e.strength * e.valence.weight() * 0.5f64.powf(age_days / half_life_days)
        })
        .sum();
    score.max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use penny_store::{EngagementType, EngagementValence};

    fn engagement(
        valence: EngagementValence,
        strength: f64,
        age: Duration,
        now: DateTime<Utc>,
    ) -> EngagementRow {
        EngagementRow {
            id: 0,
            user: "u".into(),
            entity_id: Some(1),
            engagement_type: EngagementType::MessageMention,
            valence,
            strength,
            source_message_id: None,
            created_at: now - age,
        }
    }

    #[test]
    fn fresh_positive_engagement_scores_full_strength() {
        let now = Utc::now();
        let engs = vec![engagement(EngagementValence::Positive, 0.8, Duration::zero(), now)];
        let score = compute_interest_score(&engs, 7.0, now);
        assert!((score - 0.8).abs() < 1e-9);
    }

    #[test]
    fn one_half_life_halves_the_score() {
        let now = Utc::now();
        let engs = vec![engagement(EngagementValence::Positive, 1.0, Duration::days(7), now)];
        let score = compute_interest_score(&engs, 7.0, now);
        assert!((score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn negative_engagements_pull_down_and_floor_at_zero() {
        let now = Utc::now();
        let engs = vec![
            engagement(EngagementValence::Positive, 0.3, Duration::zero(), now),
            engagement(EngagementValence::Negative, 1.0, Duration::zero(), now),
        ];
        assert_eq!(compute_interest_score(&engs, 7.0, now), 0.0);
    }
}
