use serde::{Deserialize, Serialize};

/// A message received from any channel transport.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IncomingMessage {
    pub sender: String,
    pub content: String,
    pub quoted_text: Option<String>,
    /// Original platform timestamp (ms since epoch), when the transport has one.
    pub signal_timestamp: Option<i64>,
    pub is_reaction: bool,
    /// External id of the outgoing message being reacted to.
    pub reacted_to_external_id: Option<String>,
    /// Base64-encoded image attachments.
    #[serde(default)]
    pub images: Vec<String>,
}

impl IncomingMessage {
    pub fn is_command(&self) -> bool {
        self.content.trim_start().starts_with('/')
    }
}
