use agora_shared::types::{DiscussionId, MessageId, UserId};
use agora_shared::ChatError;
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Discussion not found: {0}")]
    DiscussionNotFound(DiscussionId),

    #[error("Message not found: {0}")]
    MessageNotFound(MessageId),

    #[error("Participant {user} not found in discussion {discussion}")]
    ParticipantNotFound {
        discussion: DiscussionId,
        user: UserId,
    },

    /// A conditional read-flag update found the message already read.
    #[error("Message already read: {0}")]
    AlreadyRead(MessageId),

    /// An update was requested with no field set.
    #[error("Nothing to update")]
    NothingToUpdate,

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// Chrono parsing error.
    #[error("Timestamp parse error: {0}")]
    ChronoParse(#[from] chrono::ParseError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DiscussionNotFound(id) => ChatError::DiscussionNotFound(id),
            StoreError::MessageNotFound(id) => ChatError::MessageNotFound(id),
            StoreError::ParticipantNotFound { discussion, user } => {
                ChatError::ParticipantNotFound { discussion, user }
            }
            StoreError::AlreadyRead(_) => ChatError::ReadMessage,
            StoreError::NothingToUpdate => ChatError::NothingToUpdate,
            other => ChatError::Repository(other.to_string()),
        }
    }
}
