//! Canned user-facing strings. Kept in one place so channels and agents
//! stay consistent and tests can assert on exact text.

pub const FALLBACK_RESPONSE: &str =
    "Sorry, I ran into trouble putting an answer together. Mind trying again?";

pub const AGENT_MODEL_ERROR: &str =
    "Sorry, I couldn't reach my language model just now. Please try again in a bit.";

pub const AGENT_EMPTY_RESPONSE: &str =
    "Sorry, I came up blank on that one. Could you rephrase?";

pub const AGENT_MAX_STEPS: &str =
    "Sorry, that took more digging than I could manage. Want me to try a narrower question?";

pub const COMMAND_ERROR: &str = "Command failed: {error}";

pub const LEARN_COMPLETE_HEADER: &str = "Finished learning about \"{topic}\".";

pub const LEARN_COMPLETE_NO_ENTITIES: &str =
    "I didn't find anything worth keeping this time.";

pub const NEWS_RATE_LIMITED: &str =
    "Heads up: my news source is rate limiting me, so event updates will pause for a while.";

pub const VISION_NOT_CONFIGURED: &str =
    "I can't look at images right now — no vision model is configured.";
