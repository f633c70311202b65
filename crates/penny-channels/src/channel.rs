use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use penny_store::{KnowledgeStore, MessageDirection, MessageRow};

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Empty message rejected (no text, no attachments)")]
    EmptyMessage,

    #[error("Database error: {0}")]
    Store(#[from] penny_store::StoreError),
}

/// Outbound contract a channel transport implements. Transports retry
/// transient failures internally; a `None` external id means the send
/// ultimately failed.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Identifier used as the sender of outgoing message rows.
    fn sender_id(&self) -> &str;

    /// Send a message. Returns the platform-assigned external id on
    /// success. Implementations must reject empty text unless attachments
    /// are present.
    async fn send_message(
        &self,
        recipient: &str,
        text: &str,
        attachments: &[String],
        quote: Option<&MessageRow>,
    ) -> Result<Option<String>, ChannelError>;

    /// Fire-and-forget typing indicator.
    async fn send_typing(&self, recipient: &str, typing: bool);
}

/// The shared outbound path: log, send, record the external id. Every
/// agent that talks to the user goes through here so outgoing rows and
/// reaction correlation stay consistent.
#[derive(Clone)]
pub struct Outbound {
    channel: Arc<dyn MessageChannel>,
    store: Arc<KnowledgeStore>,
}

impl Outbound {
    pub fn new(channel: Arc<dyn MessageChannel>, store: Arc<KnowledgeStore>) -> Self {
        Self { channel, store }
    }

    pub fn channel(&self) -> &Arc<dyn MessageChannel> {
        &self.channel
    }

    /// Log and send an outgoing message. Returns the database message id
    /// when the transport accepted it.
    pub async fn send_response(
        &self,
        recipient: &str,
        content: &str,
        parent_id: Option<i64>,
        attachments: &[String],
        quote: Option<&MessageRow>,
    ) -> Result<Option<i64>, ChannelError> {
        if content.is_empty() && attachments.is_empty() {
            return Err(ChannelError::EmptyMessage);
        }
        let message_id = self.store.log_message(
            MessageDirection::Outgoing,
            self.channel.sender_id(),
            content,
            parent_id,
            None,
            false,
        )?;
        let external_id = self
            .channel
            .send_message(recipient, content, attachments, quote)
            .await?;
        if let Some(ref ext) = external_id {
            self.store.set_message_external_id(message_id, ext)?;
        }
        info!(recipient, chars = content.len(), "sent response");
        Ok(external_id.map(|_| message_id))
    }

    /// Send without logging. For ephemeral status pings that shouldn't be
    /// part of conversation history.
    pub async fn send_status_message(
        &self,
        recipient: &str,
        content: &str,
    ) -> Result<bool, ChannelError> {
        let external_id = self
            .channel
            .send_message(recipient, content, &[], None)
            .await?;
        Ok(external_id.is_some())
    }

    pub async fn send_typing(&self, recipient: &str, typing: bool) {
        self.channel.send_typing(recipient, typing).await;
    }
}
