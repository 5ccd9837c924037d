//! JSON wire protocol spoken over a client socket.
//!
//! Every frame is an envelope `{"type": <tag>, "data": <payload>}`. The set of
//! tags is closed: [`EventKind`] names them, [`Inbound`] holds the kinds a
//! client may send and [`Outbound`] the kinds the server pushes.

use serde::{Deserialize, Serialize};

use crate::constants::WARNING_TAG;
use crate::models::{DiscussionView, Message, NewMessage};
use crate::types::{DiscussionId, MessageId};

/// Generic envelope, used where the payload type is not one of the event
/// enums (warnings, and decoding the `data` of a known kind on its own).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope<T> {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventKind {
    Message = 0x01,
    Discussion = 0x02,
    DeleteDiscussion = 0x04,
    ReadMessage = 0x08,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Message,
        EventKind::Discussion,
        EventKind::DeleteDiscussion,
        EventKind::ReadMessage,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            EventKind::Message => "message",
            EventKind::Discussion => "discussion",
            EventKind::DeleteDiscussion => "delete_discussion",
            EventKind::ReadMessage => "read_message",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    /// Whether clients may send this kind. `discussion` and
    /// `delete_discussion` only ever flow server → client.
    pub fn is_decodable(self) -> bool {
        matches!(self, EventKind::Message | EventKind::ReadMessage)
    }
}

/// The event kinds enabled for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventSet(u8);

impl EventSet {
    pub fn all() -> Self {
        Self::of(&EventKind::ALL)
    }

    pub fn of(kinds: &[EventKind]) -> Self {
        Self(kinds.iter().fold(0, |bits, kind| bits | *kind as u8))
    }

    pub fn contains(&self, kind: EventKind) -> bool {
        self.0 & kind as u8 != 0
    }

    /// Decode raw inbound bytes into an event this session handles.
    pub fn recognize_inbound(&self, raw: &[u8]) -> Option<Inbound> {
        let inbound = Inbound::decode(raw).ok()?;
        self.contains(inbound.kind()).then_some(inbound)
    }

    /// Whether this session knows how to send `payload`.
    pub fn recognize_outbound(&self, payload: &Outbound) -> bool {
        self.contains(payload.kind())
    }
}

/// Events a client may send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Inbound {
    Message(NewMessage),
    ReadMessage(MessageId),
}

impl Inbound {
    pub fn decode(raw: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(raw)
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Inbound::Message(_) => EventKind::Message,
            Inbound::ReadMessage(_) => EventKind::ReadMessage,
        }
    }
}

/// Events the server pushes to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Outbound {
    Message(Message),
    Discussion(DiscussionView),
    DeleteDiscussion(DiscussionId),
    ReadMessage(MessageId),
}

impl Outbound {
    pub fn kind(&self) -> EventKind {
        match self {
            Outbound::Message(_) => EventKind::Message,
            Outbound::Discussion(_) => EventKind::Discussion,
            Outbound::DeleteDiscussion(_) => EventKind::DeleteDiscussion,
            Outbound::ReadMessage(_) => EventKind::ReadMessage,
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Warning envelope echoing an inbound payload no enabled event claimed.
pub fn warning(raw: &[u8]) -> serde_json::Result<String> {
    serde_json::to_string(&Envelope {
        kind: WARNING_TAG.to_string(),
        data: format!(
            "Unsupported or invalid event: {}",
            String::from_utf8_lossy(raw)
        ),
    })
}
