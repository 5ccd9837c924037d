//! Orchestration interface the event processor and HTTP layer call into,
//! with a SQLite-backed implementation.

use std::sync::{Mutex, MutexGuard};

use agora_shared::models::{
    Discussion, DiscussionPatch, DiscussionView, Message, MessagePatch, NewDiscussion, Participant,
};
use agora_shared::types::{DiscussionId, MessageId, UserId};
use agora_shared::ChatError;
use agora_store::Database;
use chrono::Utc;

pub trait Service: Send + Sync {
    /// Views of every discussion `user_id` participates in, most recent first.
    fn user_discussions(&self, user_id: &UserId) -> Result<Vec<DiscussionView>, ChatError>;

    /// One discussion as seen by `user_id`. Non-participants get `NoPermission`.
    fn find_discussion(&self, id: DiscussionId, user_id: &UserId) -> Result<DiscussionView, ChatError>;

    fn get_discussion(&self, id: DiscussionId) -> Result<Discussion, ChatError>;

    fn create_discussion(&self, new: &NewDiscussion) -> Result<Discussion, ChatError>;

    fn update_discussion(&self, id: DiscussionId, patch: &DiscussionPatch) -> Result<(), ChatError>;

    /// Delete a discussion with its participants and messages.
    fn delete_discussion(&self, id: DiscussionId) -> Result<(), ChatError>;

    fn participants(&self, id: DiscussionId) -> Result<Vec<Participant>, ChatError>;

    /// Persist a draft and return it with its assigned id.
    fn create_message(&self, draft: &Message) -> Result<Message, ChatError>;

    fn find_message(&self, id: MessageId) -> Result<Message, ChatError>;

    /// Setting the read flag on an already read message fails with `ReadMessage`.
    fn update_message(&self, id: MessageId, patch: &MessagePatch) -> Result<(), ChatError>;

    /// Message history, oldest first.
    fn discussion_messages(&self, id: DiscussionId) -> Result<Vec<Message>, ChatError>;

    fn increment_unread(&self, id: DiscussionId, user_id: &UserId) -> Result<(), ChatError>;

    /// Never goes below zero.
    fn decrement_unread(&self, id: DiscussionId, user_id: &UserId) -> Result<(), ChatError>;
}

/// [`Service`] over a single SQLite connection.
pub struct StoreService {
    db: Mutex<Database>,
}

impl StoreService {
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    fn db(&self) -> Result<MutexGuard<'_, Database>, ChatError> {
        self.db
            .lock()
            .map_err(|_| ChatError::Repository("database lock poisoned".into()))
    }

    fn with_db<T>(
        &self,
        f: impl FnOnce(&Database) -> agora_store::Result<T>,
    ) -> Result<T, ChatError> {
        let db = self.db()?;
        f(&*db).map_err(ChatError::from)
    }
}

impl Service for StoreService {
    fn user_discussions(&self, user_id: &UserId) -> Result<Vec<DiscussionView>, ChatError> {
        self.with_db(|db| {
            let mut views = Vec::new();
            for discussion in db.list_discussions_for_user(user_id)? {
                let participants = db.list_participants(discussion.id)?;
                views.extend(DiscussionView::for_user(&discussion, &participants, user_id));
            }
            Ok(views)
        })
    }

    fn find_discussion(&self, id: DiscussionId, user_id: &UserId) -> Result<DiscussionView, ChatError> {
        let (discussion, participants) =
            self.with_db(|db| Ok((db.get_discussion(id)?, db.list_participants(id)?)))?;
        DiscussionView::for_user(&discussion, &participants, user_id).ok_or(ChatError::NoPermission)
    }

    fn get_discussion(&self, id: DiscussionId) -> Result<Discussion, ChatError> {
        self.with_db(|db| db.get_discussion(id))
    }

    fn create_discussion(&self, new: &NewDiscussion) -> Result<Discussion, ChatError> {
        new.validate()?;
        self.with_db(|db| db.create_discussion(new, Utc::now()))
    }

    fn update_discussion(&self, id: DiscussionId, patch: &DiscussionPatch) -> Result<(), ChatError> {
        self.with_db(|db| db.update_discussion(id, patch))
    }

    fn delete_discussion(&self, id: DiscussionId) -> Result<(), ChatError> {
        if self.with_db(|db| db.delete_discussion(id))? {
            Ok(())
        } else {
            Err(ChatError::DiscussionNotFound(id))
        }
    }

    fn participants(&self, id: DiscussionId) -> Result<Vec<Participant>, ChatError> {
        self.with_db(|db| db.list_participants(id))
    }

    fn create_message(&self, draft: &Message) -> Result<Message, ChatError> {
        self.with_db(|db| db.insert_message(draft))
    }

    fn find_message(&self, id: MessageId) -> Result<Message, ChatError> {
        self.with_db(|db| db.get_message(id))
    }

    fn update_message(&self, id: MessageId, patch: &MessagePatch) -> Result<(), ChatError> {
        self.with_db(|db| db.update_message(id, patch))
    }

    fn discussion_messages(&self, id: DiscussionId) -> Result<Vec<Message>, ChatError> {
        self.with_db(|db| db.list_messages(id))
    }

    fn increment_unread(&self, id: DiscussionId, user_id: &UserId) -> Result<(), ChatError> {
        self.with_db(|db| db.increment_unread(id, user_id))
    }

    fn decrement_unread(&self, id: DiscussionId, user_id: &UserId) -> Result<(), ChatError> {
        self.with_db(|db| db.decrement_unread(id, user_id))
    }
}
