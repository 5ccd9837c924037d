use thiserror::Error;

use crate::types::{DiscussionId, MessageId, UserId};

/// Errors raised by discussion operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("Discussion not found: {0}")]
    DiscussionNotFound(DiscussionId),

    #[error("Message not found: {0}")]
    MessageNotFound(MessageId),

    #[error("Participant {user} not found in discussion {discussion}")]
    ParticipantNotFound {
        discussion: DiscussionId,
        user: UserId,
    },

    #[error("Message invalid")]
    InvalidMessage,

    #[error("Discussion invalid: {0}")]
    InvalidDiscussion(String),

    #[error("Can't read own message")]
    ReadOwnMessage,

    #[error("Message has already been read")]
    ReadMessage,

    #[error("Nothing to update")]
    NothingToUpdate,

    #[error("No permission")]
    NoPermission,

    #[error("Operating over closed connection")]
    ConnectionClosed,

    #[error("Repository error: {0}")]
    Repository(String),
}

/// Coarse classification used to decide how a failure is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Permission,
    NotFound,
    ConnectionClosed,
    Downstream,
}

impl ChatError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChatError::InvalidMessage
            | ChatError::InvalidDiscussion(_)
            | ChatError::ReadOwnMessage
            | ChatError::ReadMessage
            | ChatError::NothingToUpdate => ErrorKind::Validation,
            ChatError::NoPermission => ErrorKind::Permission,
            ChatError::DiscussionNotFound(_)
            | ChatError::MessageNotFound(_)
            | ChatError::ParticipantNotFound { .. } => ErrorKind::NotFound,
            ChatError::ConnectionClosed => ErrorKind::ConnectionClosed,
            ChatError::Repository(_) => ErrorKind::Downstream,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(ChatError::ReadOwnMessage.kind(), ErrorKind::Validation);
        assert_eq!(ChatError::MessageNotFound(MessageId(1)).kind(), ErrorKind::NotFound);
        assert_eq!(ChatError::Repository("boom".into()).kind(), ErrorKind::Downstream);
        assert_eq!(ChatError::ConnectionClosed.kind(), ErrorKind::ConnectionClosed);
    }
}
