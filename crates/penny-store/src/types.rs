use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Parse an RFC 3339 timestamp from a TEXT column. Falls back to the Unix
/// epoch on malformed data rather than failing the whole row.
pub(crate) fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| DateTime::<Utc>::UNIX_EPOCH)
}

pub(crate) fn parse_opt_ts(s: Option<String>) -> Option<DateTime<Utc>> {
    s.map(|v| parse_ts(&v))
}

macro_rules! str_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!(concat!("unknown ", stringify!($name), ": {}"), other)),
                }
            }
        }
    };
}

str_enum!(MessageDirection {
    Incoming => "incoming",
    Outgoing => "outgoing",
});

str_enum!(
    /// What caused a search to run. Enrichment-triggered searches are still
    /// extracted but never attributed to a user message.
    SearchTrigger {
        UserMessage => "user_message",
        PennyEnrichment => "penny_enrichment",
        LearnCommand => "learn_command",
    }
);

str_enum!(LearnPromptStatus {
    Active => "active",
    Completed => "completed",
});

str_enum!(EngagementType {
    UserSearch => "user_search",
    MessageMention => "message_mention",
    EmojiReaction => "emoji_reaction",
    ExplicitStatement => "explicit_statement",
    SearchDiscovery => "search_discovery",
});

str_enum!(EngagementValence {
    Positive => "positive",
    Neutral => "neutral",
    Negative => "negative",
});

impl EngagementValence {
    /// Signed contribution factor. Neutral signals still indicate attention,
    /// at half weight.
    pub fn weight(&self) -> f64 {
        match self {
            EngagementValence::Positive => 1.0,
            EngagementValence::Neutral => 0.5,
            EngagementValence::Negative => -1.0,
        }
    }
}

str_enum!(PreferenceType {
    Like => "like",
    Dislike => "dislike",
});

impl PreferenceType {
    pub fn toggled(&self) -> PreferenceType {
        match self {
            PreferenceType::Like => PreferenceType::Dislike,
            PreferenceType::Dislike => PreferenceType::Like,
        }
    }
}

str_enum!(FollowPromptStatus {
    Active => "active",
    Paused => "paused",
});

str_enum!(ResearchStatus {
    AwaitingFocus => "awaiting_focus",
    Pending => "pending",
    InProgress => "in_progress",
    Completed => "completed",
    Failed => "failed",
});

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub direction: MessageDirection,
    pub sender: String,
    pub content: String,
    pub parent_id: Option<i64>,
    pub signal_timestamp: Option<i64>,
    pub external_id: Option<String>,
    pub is_reaction: bool,
    pub processed: bool,
}

#[derive(Debug, Clone)]
pub struct SearchLogRow {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub query: String,
    pub response: String,
    pub extracted: bool,
    pub trigger: SearchTrigger,
    pub learn_prompt_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct LearnPromptRow {
    pub id: i64,
    pub user: String,
    pub prompt_text: String,
    pub status: LearnPromptStatus,
    pub searches_remaining: i64,
    pub created_at: DateTime<Utc>,
    pub announced_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct EntityRow {
    pub id: i64,
    pub user: String,
    pub name: String,
    pub tagline: Option<String>,
    pub embedding: Option<Vec<u8>>,
    pub heat: f64,
    pub heat_cooldown: i64,
    pub created_at: DateTime<Utc>,
    pub last_enriched_at: Option<DateTime<Utc>>,
    pub last_notified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct FactRow {
    pub id: i64,
    pub entity_id: i64,
    pub content: String,
    pub source_url: Option<String>,
    pub source_search_log_id: Option<i64>,
    pub source_message_id: Option<i64>,
    pub learned_at: DateTime<Utc>,
    pub notified_at: Option<DateTime<Utc>>,
    pub embedding: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct EngagementRow {
    pub id: i64,
    pub user: String,
    pub entity_id: Option<i64>,
    pub engagement_type: EngagementType,
    pub valence: EngagementValence,
    pub strength: f64,
    pub source_message_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PreferenceRow {
    pub id: i64,
    pub user: String,
    pub topic: String,
    pub pref_type: PreferenceType,
    pub embedding: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct EventRow {
    pub id: i64,
    pub user: String,
    pub headline: String,
    pub summary: String,
    pub occurred_at: DateTime<Utc>,
    pub discovered_at: DateTime<Utc>,
    pub source_url: Option<String>,
    pub external_id: Option<String>,
    pub notified_at: Option<DateTime<Utc>>,
    pub embedding: Option<Vec<u8>>,
    pub follow_prompt_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct FollowPromptRow {
    pub id: i64,
    pub user: String,
    pub prompt_text: String,
    pub status: FollowPromptStatus,
    /// LLM-generated search terms, stored as a JSON list.
    pub query_terms: String,
    pub cron_expression: String,
    pub timing_description: String,
    pub user_timezone: String,
    pub created_at: DateTime<Utc>,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub last_notified_at: Option<DateTime<Utc>>,
}

impl FollowPromptRow {
    /// Parse the stored JSON query terms, falling back to the prompt text.
    pub fn parsed_query_terms(&self) -> Vec<String> {
        serde_json::from_str::<Vec<String>>(&self.query_terms)
            .ok()
            .filter(|terms| !terms.is_empty())
            .unwrap_or_else(|| vec![self.prompt_text.clone()])
    }
}

#[derive(Debug, Clone)]
pub struct UserInfoRow {
    pub id: i64,
    pub sender: String,
    pub name: String,
    pub location: String,
    pub timezone: String,
    pub date_of_birth: String,
}

#[derive(Debug, Clone)]
pub struct ResearchTaskRow {
    pub id: i64,
    pub user: String,
    pub thread_id: String,
    pub topic: String,
    pub focus: Option<String>,
    pub status: ResearchStatus,
    pub max_iterations: i64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub message_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResearchIterationRow {
    pub id: i64,
    pub research_task_id: i64,
    pub iteration_num: i64,
    pub query: String,
    pub findings: String,
    /// JSON list of source URLs.
    pub sources: String,
    pub timestamp: DateTime<Utc>,
}

impl ResearchIterationRow {
    pub fn parsed_sources(&self) -> Vec<String> {
        serde_json::from_str(&self.sources).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn enum_round_trips() {
        for t in [
            SearchTrigger::UserMessage,
            SearchTrigger::PennyEnrichment,
            SearchTrigger::LearnCommand,
        ] {
            assert_eq!(SearchTrigger::from_str(t.as_str()).unwrap(), t);
        }
        assert!(SearchTrigger::from_str("bogus").is_err());
        assert_eq!(
            ResearchStatus::from_str("awaiting_focus").unwrap(),
            ResearchStatus::AwaitingFocus
        );
    }

    #[test]
    fn preference_toggle_flips() {
        assert_eq!(PreferenceType::Like.toggled(), PreferenceType::Dislike);
        assert_eq!(PreferenceType::Dislike.toggled(), PreferenceType::Like);
    }

    #[test]
    fn query_terms_fall_back_to_prompt_text() {
        let fp = FollowPromptRow {
            id: 1,
            user: "u".into(),
            prompt_text: "ai news".into(),
            status: FollowPromptStatus::Active,
            query_terms: "not json".into(),
            cron_expression: "0 9 * * *".into(),
            timing_description: "daily".into(),
            user_timezone: "UTC".into(),
            created_at: Utc::now(),
            last_polled_at: None,
            last_notified_at: None,
        };
        assert_eq!(fp.parsed_query_terms(), vec!["ai news".to_string()]);
    }
}
