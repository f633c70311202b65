//! Typing indicator loop — refreshes every 4 seconds.
//!
//! Typing status expires after ~5 seconds on both supported transports, so
//! the loop refreshes ahead of that. `TypingHandle::stop()` aborts the loop
//! and sends an explicit off signal.

use std::sync::Arc;
use std::time::Duration;

use crate::channel::MessageChannel;

/// Handle to a background typing indicator task.
pub struct TypingHandle {
    task: tokio::task::JoinHandle<()>,
    channel: Arc<dyn MessageChannel>,
    recipient: String,
}

impl TypingHandle {
    /// Spawn the typing loop for `recipient`: on immediately, then every 4 s.
    pub fn start(channel: Arc<dyn MessageChannel>, recipient: &str) -> Self {
        let loop_channel = Arc::clone(&channel);
        let loop_recipient = recipient.to_string();
        let task = tokio::spawn(async move {
            loop {
                loop_channel.send_typing(&loop_recipient, true).await;
                tokio::time::sleep(Duration::from_secs(4)).await;
            }
        });
        Self {
            task,
            channel,
            recipient: recipient.to_string(),
        }
    }

    /// Abort the loop and clear the indicator.
    pub async fn stop(self) {
        self.task.abort();
        self.channel.send_typing(&self.recipient, false).await;
    }
}
