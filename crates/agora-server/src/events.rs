//! Processing of inbound client events.

use std::sync::Arc;

use agora_shared::models::{Discussion, DiscussionPatch, DiscussionView, Message, MessagePatch, NewMessage};
use agora_shared::protocol::{Inbound, Outbound};
use agora_shared::types::{ChannelKey, MessageId, UserId};
use agora_shared::ChatError;
use chrono::Utc;
use tracing::debug;

use crate::hub::Hub;
use crate::service::Service;

/// Applies the inbound events of one user's session.
#[derive(Clone)]
pub struct EventProcessor {
    hub: Hub,
    service: Arc<dyn Service>,
    user_id: UserId,
}

impl EventProcessor {
    pub fn new(hub: Hub, service: Arc<dyn Service>, user_id: UserId) -> Self {
        Self {
            hub,
            service,
            user_id,
        }
    }

    pub async fn process(&self, event: Inbound) -> Result<(), ChatError> {
        match event {
            Inbound::Message(new) => self.process_message(new).await,
            Inbound::ReadMessage(id) => self.process_read(id).await,
        }
    }

    async fn process_message(&self, new: NewMessage) -> Result<(), ChatError> {
        new.validate()?;

        let mut discussion = match self.service.get_discussion(new.discussion_id) {
            Ok(discussion) => discussion,
            Err(ChatError::DiscussionNotFound(_)) => return Err(ChatError::InvalidMessage),
            Err(e) => return Err(e),
        };
        if !discussion.has_participant(&self.user_id) {
            return Err(ChatError::NoPermission);
        }

        let now = Utc::now();
        let message = self
            .service
            .create_message(&Message::draft(&new, &self.user_id, now))?;
        self.service.update_discussion(
            discussion.id,
            &DiscussionPatch {
                time: Some(now),
                ..DiscussionPatch::default()
            },
        )?;
        discussion.time = now;

        debug!(
            discussion = %discussion.id,
            message = %message.id,
            sender = %self.user_id,
            "Message stored"
        );

        self.hub
            .broadcast(
                &ChannelKey::Discussion(discussion.id),
                Outbound::Message(message),
            )
            .await;

        let recipients: Vec<UserId> = discussion
            .participants
            .iter()
            .filter(|p| **p != self.user_id)
            .cloned()
            .collect();
        for user_id in &recipients {
            self.service.increment_unread(discussion.id, user_id)?;
        }

        self.push_views(&discussion, &recipients).await
    }

    async fn process_read(&self, id: MessageId) -> Result<(), ChatError> {
        let message = self.service.find_message(id)?;
        if message.sender_id == self.user_id {
            return Err(ChatError::ReadOwnMessage);
        }
        if message.is_read {
            return Err(ChatError::ReadMessage);
        }

        let discussion = self.service.get_discussion(message.discussion_id)?;
        if !discussion.has_participant(&self.user_id) {
            return Err(ChatError::NoPermission);
        }

        // Conditional in the store: a concurrent reader loses with ReadMessage.
        self.service.update_message(id, &MessagePatch::mark_read())?;

        debug!(discussion = %discussion.id, message = %id, reader = %self.user_id, "Message read");

        self.hub
            .broadcast(
                &ChannelKey::Discussion(discussion.id),
                Outbound::ReadMessage(id),
            )
            .await;

        let readers: Vec<UserId> = discussion
            .participants
            .iter()
            .filter(|p| **p != message.sender_id)
            .cloned()
            .collect();
        for user_id in &readers {
            self.service.decrement_unread(discussion.id, user_id)?;
        }

        self.push_views(&discussion, &readers).await
    }

    /// Send each of `users` their refreshed view of `discussion`, from a
    /// single participants query. Views travel on the discussion channel so
    /// they follow the event that caused them.
    async fn push_views(&self, discussion: &Discussion, users: &[UserId]) -> Result<(), ChatError> {
        let participants = self.service.participants(discussion.id)?;
        let key = ChannelKey::Discussion(discussion.id);
        for user_id in users {
            if let Some(view) = DiscussionView::for_user(discussion, &participants, user_id) {
                self.hub
                    .send_to_user_in_channel(&key, user_id, Outbound::Discussion(view))
                    .await;
            }
        }
        Ok(())
    }
}
