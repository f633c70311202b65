//! Shared inbound dispatch: every channel transport hands its envelopes
//! here. Reactions become engagements, commands are logged without touching
//! the LLM, and real messages run the foreground agent bracketed by
//! scheduler notifications.

use std::sync::Arc;

use tracing::{debug, info, warn};

use penny_channels::{IncomingMessage, Outbound, TypingHandle};
use penny_core::config::RuntimeConfig;
use penny_core::constants;
use penny_llm::embeddings::{deserialize_embedding, find_similar};
use penny_llm::LlmBackend;
use penny_scheduler::SchedulerHandle;
use penny_store::{
    EngagementType, EngagementValence, KnowledgeStore, MessageDirection, MessageRow,
};

use crate::message::MessageAgent;

pub struct MessageDispatcher {
    store: Arc<KnowledgeStore>,
    outbound: Outbound,
    message_agent: Arc<MessageAgent>,
    scheduler: SchedulerHandle,
    llm: Arc<dyn LlmBackend>,
    embedding_model: Option<String>,
    config: RuntimeConfig,
}

impl MessageDispatcher {
    pub fn new(
        store: Arc<KnowledgeStore>,
        outbound: Outbound,
        message_agent: Arc<MessageAgent>,
        scheduler: SchedulerHandle,
        llm: Arc<dyn LlmBackend>,
        embedding_model: Option<String>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            store,
            outbound,
            message_agent,
            scheduler,
            llm,
            embedding_model,
            config,
        }
    }

    /// Process one incoming envelope end to end.
    pub async fn handle_envelope(&self, message: IncomingMessage) {
        if message.is_reaction {
            if let Err(e) = self.handle_reaction(&message).await {
                warn!("reaction handling failed: {e}");
            }
            return;
        }

        self.scheduler.notify_message();
        info!(sender = %message.sender, "received message");

        if message.is_command() {
            // Commands never reach the LLM and never bracket foreground
            // work; they are logged so the conversation record is complete.
            if let Err(e) = self.store.log_message(
                MessageDirection::Incoming,
                &message.sender,
                &message.content,
                None,
                message.signal_timestamp,
                false,
            ) {
                warn!("failed to log command: {e}");
            }
            return;
        }

        self.dispatch_to_agent(&message).await;
    }

    async fn dispatch_to_agent(&self, message: &IncomingMessage) {
        let typing = TypingHandle::start(Arc::clone(self.outbound.channel()), &message.sender);
        self.scheduler.notify_foreground_start();

        let reply = self
            .message_agent
            .handle(
                &message.sender,
                &message.content,
                message.quoted_text.as_deref(),
                &message.images,
            )
            .await;

        let incoming_id = match self.store.log_message(
            MessageDirection::Incoming,
            &message.sender,
            &message.content,
            None,
            message.signal_timestamp,
            false,
        ) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("failed to log incoming message: {e}");
                None
            }
        };

        let quote = incoming_id.and_then(|id| self.store.get_message(id).ok().flatten());
        let answer = if reply.answer.trim().is_empty() {
            penny_core::responses::FALLBACK_RESPONSE.to_string()
        } else {
            reply.answer
        };
        if let Err(e) = self
            .outbound
            .send_response(
                &message.sender,
                &answer,
                incoming_id,
                &reply.attachments,
                quote.as_ref(),
            )
            .await
        {
            warn!("failed to send reply: {e}");
        }

        typing.stop().await;
        self.scheduler.notify_foreground_end();
    }

    // --- Reactions -----------------------------------------------------

    /// Log the reaction against its parent and extract engagement signal
    /// from it. Reactions never trigger an immediate reply.
    async fn handle_reaction(
        &self,
        message: &IncomingMessage,
    ) -> Result<(), penny_store::StoreError> {
        let Some(external_id) = &message.reacted_to_external_id else {
            warn!("reaction message missing reacted_to_external_id");
            return Ok(());
        };
        let Some(reacted) = self.store.find_message_by_external_id(external_id)? else {
            warn!(external_id, "could not find reacted-to message");
            return Ok(());
        };

        self.store.log_message(
            MessageDirection::Incoming,
            &message.sender,
            &message.content,
            Some(reacted.id),
            message.signal_timestamp,
            true,
        )?;
        info!(sender = %message.sender, emoji = %message.content, parent_id = reacted.id, "logged reaction");

        let Some(valence) = classify_reaction_emoji(&message.content) else {
            return Ok(());
        };
        let is_proactive = self.is_proactive_message(&reacted)?;
        let strength = reaction_strength(valence, is_proactive);

        for (entity_id, _score) in self.find_entities_in_text(&message.sender, &reacted.content).await? {
            self.store.add_engagement(
                &message.sender,
                Some(entity_id),
                EngagementType::EmojiReaction,
                valence,
                strength,
                Some(reacted.id),
            )?;
            debug!(entity_id, "reaction engagement recorded");
        }
        Ok(())
    }

    /// A proactive message is one not sent in reply to user input:
    /// unparented, or parented by another outgoing message.
    fn is_proactive_message(&self, message: &MessageRow) -> Result<bool, penny_store::StoreError> {
        let Some(parent_id) = message.parent_id else {
            return Ok(true);
        };
        Ok(self
            .store
            .get_message(parent_id)?
            .is_some_and(|p| p.direction == MessageDirection::Outgoing))
    }

    async fn find_entities_in_text(
        &self,
        sender: &str,
        content: &str,
    ) -> Result<Vec<(i64, f64)>, penny_store::StoreError> {
        let Some(model) = self.embedding_model.as_deref() else {
            return Ok(Vec::new());
        };
        let entities = self.store.get_user_entities_with_embeddings(sender)?;
        if entities.is_empty() {
            return Ok(Vec::new());
        }
        let query = match self.llm.embed(&[content.to_string()], model).await {
            Ok(mut vecs) if !vecs.is_empty() => vecs.remove(0),
            Ok(_) => return Ok(Vec::new()),
            Err(e) => {
                debug!("reaction embedding failed: {e}");
                return Ok(Vec::new());
            }
        };
        let candidates: Vec<(i64, Vec<f32>)> = entities
            .iter()
            .filter_map(|e| e.embedding.as_deref().map(|b| (e.id, deserialize_embedding(b))))
            .collect();
        Ok(find_similar(
            &query,
            &candidates,
            constants::ENTITY_CONTEXT_TOP_K,
            self.config.entity_context_threshold,
        ))
    }
}

fn classify_reaction_emoji(emoji: &str) -> Option<EngagementValence> {
    if constants::LIKE_REACTIONS.contains(&emoji) {
        return Some(EngagementValence::Positive);
    }
    if constants::DISLIKE_REACTIONS.contains(&emoji) {
        return Some(EngagementValence::Negative);
    }
    None
}

fn reaction_strength(valence: EngagementValence, is_proactive: bool) -> f64 {
    if valence == EngagementValence::Negative && is_proactive {
        return constants::ENGAGEMENT_STRENGTH_EMOJI_REACTION_PROACTIVE_NEGATIVE;
    }
    if is_proactive {
        return constants::ENGAGEMENT_STRENGTH_EMOJI_REACTION_PROACTIVE;
    }
    constants::ENGAGEMENT_STRENGTH_EMOJI_REACTION_NORMAL
}
