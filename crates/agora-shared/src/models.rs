//! Discussion domain model.
//!
//! Every struct derives `Serialize` and `Deserialize`: the same shapes travel
//! over the socket inside the `data` field of the wire envelope and through
//! the HTTP adapter.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::types::{DiscussionId, MessageId, UserId};

// ---------------------------------------------------------------------------
// Discussion
// ---------------------------------------------------------------------------

/// A conversation, either one-to-one or group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Discussion {
    pub id: DiscussionId,
    pub is_active: bool,
    pub is_group: bool,
    /// Required and non-empty for group discussions only.
    pub name: String,
    pub photo: String,
    /// Creation time, then bumped on every new message.
    pub time: DateTime<Utc>,
    pub participants: Vec<UserId>,
}

impl Discussion {
    pub fn has_participant(&self, user_id: &UserId) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }
}

/// Display fields of a participant, as supplied when a discussion is created.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ParticipantProfile {
    pub user_id: UserId,
    pub first_name: String,
    pub last_name: String,
    pub photo: String,
}

impl ParticipantProfile {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: UserId::new(user_id),
            ..Self::default()
        }
    }
}

/// Request to create a discussion.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NewDiscussion {
    pub is_group: bool,
    pub name: String,
    pub photo: String,
    pub participants: Vec<ParticipantProfile>,
}

impl NewDiscussion {
    /// A one-to-one discussion between two users.
    pub fn direct(a: ParticipantProfile, b: ParticipantProfile) -> Self {
        Self {
            is_group: false,
            participants: vec![a, b],
            ..Self::default()
        }
    }

    /// A named group discussion.
    pub fn group(name: impl Into<String>, participants: Vec<ParticipantProfile>) -> Self {
        Self {
            is_group: true,
            name: name.into(),
            participants,
            ..Self::default()
        }
    }

    /// Add `creator` to the participant list unless already present.
    pub fn with_creator(mut self, creator: &UserId) -> Self {
        if !self.participants.iter().any(|p| &p.user_id == creator) {
            self.participants.push(ParticipantProfile {
                user_id: creator.clone(),
                ..ParticipantProfile::default()
            });
        }
        self
    }

    /// Enforce the discussion invariants: a one-to-one discussion has exactly
    /// two distinct participants, a group discussion has a non-empty name.
    pub fn validate(&self) -> Result<(), ChatError> {
        let mut seen = HashSet::new();
        for participant in &self.participants {
            if participant.user_id.is_empty() {
                return Err(ChatError::InvalidDiscussion("empty participant id".into()));
            }
            if !seen.insert(&participant.user_id) {
                return Err(ChatError::InvalidDiscussion(format!(
                    "duplicate participant {}",
                    participant.user_id
                )));
            }
        }

        if self.is_group {
            if self.name.trim().is_empty() {
                return Err(ChatError::InvalidDiscussion("group name is required".into()));
            }
            if self.participants.is_empty() {
                return Err(ChatError::InvalidDiscussion("group has no participants".into()));
            }
        } else if self.participants.len() != 2 {
            return Err(ChatError::InvalidDiscussion(format!(
                "one-to-one discussion needs 2 participants, got {}",
                self.participants.len()
            )));
        }

        Ok(())
    }
}

/// Changeable fields of a discussion.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscussionPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
}

impl DiscussionPatch {
    pub fn is_empty(&self) -> bool {
        self.is_active.is_none() && self.time.is_none()
    }
}

// ---------------------------------------------------------------------------
// Participant
// ---------------------------------------------------------------------------

/// Per-discussion membership record of one user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub discussion_id: DiscussionId,
    pub user_id: UserId,
    pub first_name: String,
    pub last_name: String,
    pub photo: String,
    /// Messages from others this user has not read yet. Never negative.
    pub unread_messages_cnt: i64,
}

// ---------------------------------------------------------------------------
// Discussion view
// ---------------------------------------------------------------------------

/// A discussion as seen by one participant: the shared metadata plus that
/// participant's own unread counter. This is the `discussion` event payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscussionView {
    pub id: DiscussionId,
    pub user_id: UserId,
    pub is_active: bool,
    pub is_group: bool,
    pub name: String,
    pub photo: String,
    pub time: DateTime<Utc>,
    pub unread_messages_cnt: i64,
    pub participants: Vec<Participant>,
}

impl DiscussionView {
    /// Build the view of `discussion` for `user_id`, or `None` when that user
    /// is not among `participants`.
    pub fn for_user(
        discussion: &Discussion,
        participants: &[Participant],
        user_id: &UserId,
    ) -> Option<Self> {
        let own = participants.iter().find(|p| &p.user_id == user_id)?;
        Some(Self {
            id: discussion.id,
            user_id: user_id.clone(),
            is_active: discussion.is_active,
            is_group: discussion.is_group,
            name: discussion.name.clone(),
            photo: discussion.photo.clone(),
            time: discussion.time,
            unread_messages_cnt: own.unread_messages_cnt,
            participants: participants.to_vec(),
        })
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A persisted message. Only the read flag (and text, through
/// [`MessagePatch`]) changes after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub discussion_id: DiscussionId,
    pub sender_id: UserId,
    pub text: String,
    pub file_path: String,
    pub is_read: bool,
    pub sent_time: DateTime<Utc>,
}

impl Message {
    /// An unsaved, unread message stamped with its sender and send time.
    pub fn draft(new: &NewMessage, sender_id: &UserId, sent_time: DateTime<Utc>) -> Self {
        Self {
            id: MessageId(0),
            discussion_id: new.discussion_id,
            sender_id: sender_id.clone(),
            text: new.text.clone(),
            file_path: new.file_path.clone(),
            is_read: false,
            sent_time,
        }
    }
}

/// Inbound `message` payload sent by a client.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NewMessage {
    pub discussion_id: DiscussionId,
    pub text: String,
    pub file_path: String,
}

impl NewMessage {
    pub fn text(discussion_id: DiscussionId, text: impl Into<String>) -> Self {
        Self {
            discussion_id,
            text: text.into(),
            file_path: String::new(),
        }
    }

    /// A message must reference a discussion and carry text or a file path.
    pub fn validate(&self) -> Result<(), ChatError> {
        if !self.discussion_id.is_set() || (self.text.is_empty() && self.file_path.is_empty()) {
            return Err(ChatError::InvalidMessage);
        }
        Ok(())
    }
}

/// Changeable fields of a message.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessagePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_read: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl MessagePatch {
    pub fn mark_read() -> Self {
        Self {
            is_read: Some(true),
            text: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.is_read.is_none() && self.text.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: &str) -> ParticipantProfile {
        ParticipantProfile::new(id)
    }

    #[test]
    fn test_profile_defaults_and_missing_user_id() {
        let p = profile("a");
        assert_eq!(p.user_id, UserId::from("a"));
        assert!(p.first_name.is_empty() && p.photo.is_empty());

        // A profile without `user_id` deserializes to the empty id, which
        // validation rejects.
        let anonymous: ParticipantProfile =
            serde_json::from_str(r#"{"first_name":"Ann"}"#).unwrap();
        assert!(anonymous.user_id.is_empty());
        let new = NewDiscussion::direct(anonymous, profile("b"));
        assert!(matches!(new.validate(), Err(ChatError::InvalidDiscussion(_))));
    }

    #[test]
    fn test_direct_discussion_needs_two_participants() {
        assert!(NewDiscussion::direct(profile("a"), profile("b")).validate().is_ok());

        let lonely = NewDiscussion {
            participants: vec![profile("a")],
            ..NewDiscussion::default()
        };
        assert!(matches!(lonely.validate(), Err(ChatError::InvalidDiscussion(_))));

        let crowded = NewDiscussion {
            participants: vec![profile("a"), profile("b"), profile("c")],
            ..NewDiscussion::default()
        };
        assert!(matches!(crowded.validate(), Err(ChatError::InvalidDiscussion(_))));
    }

    #[test]
    fn test_group_discussion_needs_name() {
        let unnamed = NewDiscussion::group("  ", vec![profile("a"), profile("b")]);
        assert!(matches!(unnamed.validate(), Err(ChatError::InvalidDiscussion(_))));

        let named = NewDiscussion::group("Algebra", vec![profile("a"), profile("b"), profile("c")]);
        assert!(named.validate().is_ok());
    }

    #[test]
    fn test_duplicate_participants_rejected() {
        let dup = NewDiscussion::direct(profile("a"), profile("a"));
        assert!(matches!(dup.validate(), Err(ChatError::InvalidDiscussion(_))));
    }

    #[test]
    fn test_with_creator_adds_once() {
        let creator = UserId::from("a");
        let d = NewDiscussion::group("g", vec![profile("b")]).with_creator(&creator);
        assert_eq!(d.participants.len(), 2);
        let d = d.with_creator(&creator);
        assert_eq!(d.participants.len(), 2);
    }

    #[test]
    fn test_message_needs_text_or_file() {
        let id = DiscussionId(3);
        assert!(NewMessage::text(id, "hi").validate().is_ok());

        let file_only = NewMessage {
            discussion_id: id,
            text: String::new(),
            file_path: "/files/a.pdf".into(),
        };
        assert!(file_only.validate().is_ok());

        assert_eq!(NewMessage::text(id, "").validate(), Err(ChatError::InvalidMessage));
        assert_eq!(
            NewMessage::text(DiscussionId(0), "hi").validate(),
            Err(ChatError::InvalidMessage)
        );
    }

    #[test]
    fn test_view_for_non_participant_is_none() {
        let discussion = Discussion {
            id: DiscussionId(1),
            is_active: true,
            is_group: false,
            name: String::new(),
            photo: String::new(),
            time: Utc::now(),
            participants: vec![UserId::from("a"), UserId::from("b")],
        };
        let participants = vec![Participant {
            discussion_id: DiscussionId(1),
            user_id: UserId::from("a"),
            first_name: String::new(),
            last_name: String::new(),
            photo: String::new(),
            unread_messages_cnt: 4,
        }];

        let view = DiscussionView::for_user(&discussion, &participants, &UserId::from("a")).unwrap();
        assert_eq!(view.unread_messages_cnt, 4);
        assert!(DiscussionView::for_user(&discussion, &participants, &UserId::from("z")).is_none());
    }

    #[test]
    fn test_patch_emptiness() {
        assert!(MessagePatch::default().is_empty());
        assert!(!MessagePatch::mark_read().is_empty());
        assert!(DiscussionPatch::default().is_empty());
    }
}
