//! Fixed behavioral constants. Tunable intervals and thresholds live in
//! [`crate::config`] so they can be overridden per deployment.

/// Emojis that read as a positive reaction to a message.
pub const LIKE_REACTIONS: &[&str] = &["👍", "❤️", "🔥", "😍", "💯", "🙌"];

/// Emojis that read as a negative reaction to a message.
pub const DISLIKE_REACTIONS: &[&str] = &["👎", "💩", "😡", "🤮"];

/// Messages shorter than this are skipped by the extraction pipeline.
pub const MIN_EXTRACTION_MESSAGE_LENGTH: usize = 10;

/// Entity names longer than this are rejected as LLM noise.
pub const MAX_ENTITY_NAME_LENGTH: usize = 80;

/// Taglines longer than this many words are discarded.
pub const MAX_TAGLINE_WORDS: usize = 10;

// Engagement strengths (0..1). A reaction to a proactive message is a
// stronger signal than one to a direct reply — the user went out of their
// way to respond to something unsolicited.
pub const ENGAGEMENT_STRENGTH_MESSAGE_MENTION: f64 = 0.3;
pub const ENGAGEMENT_STRENGTH_EXPLICIT_STATEMENT: f64 = 0.8;
pub const ENGAGEMENT_STRENGTH_EMOJI_REACTION_NORMAL: f64 = 0.5;
pub const ENGAGEMENT_STRENGTH_EMOJI_REACTION_PROACTIVE: f64 = 0.9;
pub const ENGAGEMENT_STRENGTH_EMOJI_REACTION_PROACTIVE_NEGATIVE: f64 = 1.0;
pub const ENGAGEMENT_STRENGTH_USER_SEARCH: f64 = 0.6;

// Heat contribution weights per engagement type. Applied by the store when
// an engagement row is written: heat += weight * strength * valence_sign.
pub const HEAT_WEIGHT_USER_SEARCH: f64 = 1.0;
pub const HEAT_WEIGHT_MESSAGE_MENTION: f64 = 0.6;
pub const HEAT_WEIGHT_EMOJI_REACTION: f64 = 0.8;
pub const HEAT_WEIGHT_EXPLICIT_STATEMENT: f64 = 1.0;
pub const HEAT_WEIGHT_SEARCH_DISCOVERY: f64 = 0.4;

// Batch limits per extraction pass so one cycle stays bounded.
pub const ENTITY_EXTRACTION_BATCH_LIMIT: usize = 10;
pub const PREFERENCE_BATCH_LIMIT: usize = 20;
pub const EMBEDDING_BACKFILL_BATCH_LIMIT: usize = 32;

/// How many entity matches to consider when linking content to entities.
pub const ENTITY_CONTEXT_TOP_K: usize = 3;

/// A research task waiting for a focus reply auto-starts after this long.
pub const RESEARCH_FOCUS_TIMEOUT_SECONDS: i64 = 120;

/// XML pseudo-tool retries per tool-loop step.
pub const MAX_XML_RETRIES: usize = 3;
