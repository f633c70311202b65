//! Signal transport over the signal-cli REST API.
//!
//! Kept deliberately thin: everything interesting happens in the shared
//! dispatch path. This adapter only moves envelopes and messages across
//! HTTP and maps them to the channel contract. Reactions are correlated by
//! Signal's sent timestamp, which doubles as the external message id.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use penny_store::MessageRow;

use crate::channel::{ChannelError, MessageChannel};
use crate::types::IncomingMessage;

const SEND_MAX_ATTEMPTS: u32 = 3;
const SEND_RETRY_BASE: Duration = Duration::from_millis(500);

pub struct SignalChannel {
    http: reqwest::Client,
    api_url: String,
    number: String,
}

#[derive(Deserialize)]
struct WireReceive {
    envelope: Option<WireEnvelope>,
}

#[derive(Deserialize)]
struct WireEnvelope {
    source: Option<String>,
    timestamp: Option<i64>,
    #[serde(rename = "dataMessage")]
    data_message: Option<WireDataMessage>,
}

#[derive(Deserialize)]
struct WireDataMessage {
    message: Option<String>,
    quote: Option<WireQuote>,
    reaction: Option<WireReaction>,
    #[serde(default)]
    attachments: Vec<WireAttachment>,
}

#[derive(Deserialize)]
struct WireQuote {
    text: Option<String>,
}

#[derive(Deserialize)]
struct WireReaction {
    emoji: Option<String>,
    #[serde(rename = "targetSentTimestamp")]
    target_sent_timestamp: Option<i64>,
}

#[derive(Deserialize)]
struct WireAttachment {
    id: Option<String>,
    #[serde(rename = "contentType")]
    content_type: Option<String>,
}

#[derive(Deserialize)]
struct WireSendResponse {
    timestamp: Option<i64>,
}

impl SignalChannel {
    pub fn new(api_url: &str, number: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            number: number.to_string(),
        }
    }

    /// Long-poll one batch of envelopes and map them to the channel
    /// contract. Transport failures return an empty batch after a warning.
    pub async fn receive(&self) -> Vec<IncomingMessage> {
        let url = format!("{}/v1/receive/{}", self.api_url, self.number);
        let resp = match self.http.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("signal receive failed: {e}");
                tokio::time::sleep(Duration::from_secs(5)).await;
                return Vec::new();
            }
        };
        let batch: Vec<WireReceive> = match resp.json().await {
            Ok(b) => b,
            Err(e) => {
                warn!("signal receive parse failed: {e}");
                return Vec::new();
            }
        };

        let mut messages = Vec::new();
        for item in batch {
            if let Some(message) = self.extract_message(item).await {
                messages.push(message);
            }
        }
        messages
    }

    async fn extract_message(&self, item: WireReceive) -> Option<IncomingMessage> {
        let envelope = item.envelope?;
        let sender = envelope.source?;
        let data = envelope.data_message?;

        if let Some(reaction) = data.reaction {
            return Some(IncomingMessage {
                sender,
                content: reaction.emoji.unwrap_or_default(),
                is_reaction: true,
                reacted_to_external_id: reaction.target_sent_timestamp.map(|t| t.to_string()),
                signal_timestamp: envelope.timestamp,
                ..Default::default()
            });
        }

        let content = data.message.unwrap_or_default();
        let mut images = Vec::new();
        for attachment in data.attachments {
            let is_image = attachment
                .content_type
                .as_deref()
                .is_some_and(|c| c.starts_with("image/"));
            if !is_image {
                continue;
            }
            if let Some(id) = attachment.id {
                match self.fetch_attachment(&id).await {
                    Some(b64) => images.push(b64),
                    None => debug!(attachment = id, "skipping unfetchable attachment"),
                }
            }
        }

        if content.is_empty() && images.is_empty() {
            return None;
        }
        Some(IncomingMessage {
            sender,
            content,
            quoted_text: data.quote.and_then(|q| q.text),
            signal_timestamp: envelope.timestamp,
            images,
            ..Default::default()
        })
    }

    async fn fetch_attachment(&self, id: &str) -> Option<String> {
        use base64::Engine;

        let url = format!("{}/v1/attachments/{id}", self.api_url);
        let resp = self.http.get(&url).send().await.ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let bytes = resp.bytes().await.ok()?;
        Some(base64::engine::general_purpose::STANDARD.encode(&bytes))
    }
}

#[async_trait]
impl MessageChannel for SignalChannel {
    fn sender_id(&self) -> &str {
        &self.number
    }

    async fn send_message(
        &self,
        recipient: &str,
        text: &str,
        attachments: &[String],
        _quote: Option<&MessageRow>,
    ) -> Result<Option<String>, ChannelError> {
        if text.is_empty() && attachments.is_empty() {
            return Err(ChannelError::EmptyMessage);
        }

        let mut body = serde_json::json!({
            "message": text,
            "number": self.number,
            "recipients": [recipient],
        });
        if !attachments.is_empty() {
            body["base64_attachments"] = serde_json::json!(attachments);
        }

        let url = format!("{}/v2/send", self.api_url);
        let mut last_error = String::new();
        for attempt in 0..SEND_MAX_ATTEMPTS {
            match self.http.post(&url).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => {
                    let parsed: WireSendResponse = resp
                        .json()
                        .await
                        .map_err(|e| ChannelError::Transport(e.to_string()))?;
                    return Ok(parsed.timestamp.map(|t| t.to_string()));
                }
                Ok(resp) => {
                    last_error = format!("HTTP {}", resp.status());
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }
            warn!(
                attempt = attempt + 1,
                max = SEND_MAX_ATTEMPTS,
                "signal send failed: {last_error}"
            );
            if attempt + 1 < SEND_MAX_ATTEMPTS {
                tokio::time::sleep(SEND_RETRY_BASE * 2u32.pow(attempt)).await;
            }
        }
        Err(ChannelError::Transport(last_error))
    }

    async fn send_typing(&self, recipient: &str, typing: bool) {
        let url = format!("{}/v1/typing-indicator/{}", self.api_url, self.number);
        let body = serde_json::json!({ "recipient": recipient });
        let req = if typing {
            self.http.put(&url).json(&body)
        } else {
            self.http.delete(&url).json(&body)
        };
        if let Err(e) = req.send().await {
            debug!("typing indicator failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_parses_reaction() {
        let raw = serde_json::json!({
            "envelope": {
                "source": "+1555",
                "timestamp": 1700000000123i64,
                "dataMessage": {
                    "reaction": { "emoji": "👍", "targetSentTimestamp": 1699999999000i64 }
                }
            }
        });
        let item: WireReceive = serde_json::from_value(raw).unwrap();
        let envelope = item.envelope.unwrap();
        let reaction = envelope.data_message.unwrap().reaction.unwrap();
        assert_eq!(reaction.emoji.as_deref(), Some("👍"));
        assert_eq!(reaction.target_sent_timestamp, Some(1699999999000));
    }
}
