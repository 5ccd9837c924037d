//! In-memory transport and fixtures shared by the unit tests.

use std::sync::Arc;
use std::time::Duration;

use agora_shared::models::{Discussion, NewDiscussion, ParticipantProfile};
use agora_shared::protocol::Envelope;
use agora_store::Database;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;

use crate::connection::{Connection, ConnectionError, ConnectionLimits, Frame};
use crate::service::{Service, StoreService};

const PEER_WAIT: Duration = Duration::from_secs(2);

pub fn limits() -> ConnectionLimits {
    ConnectionLimits {
        write_wait: Duration::from_secs(10),
        pong_wait: Duration::from_secs(60),
        max_frame_size: 64 * 1024,
    }
}

/// The far end of an in-memory [`Connection`].
pub struct Peer {
    inbound: mpsc::UnboundedSender<Result<Frame, ConnectionError>>,
    outbound: mpsc::UnboundedReceiver<Frame>,
}

/// A connection wired to a [`Peer`] the test drives.
pub fn pipe(limits: ConnectionLimits) -> (Connection, Peer) {
    let (to_conn, from_peer) = mpsc::unbounded::<Result<Frame, ConnectionError>>();
    let (to_peer, from_conn) = mpsc::unbounded::<Frame>();

    let sink = to_peer.sink_map_err(|_| ConnectionError::Closed);
    let conn = Connection::new(Box::pin(sink), Box::pin(from_peer), limits);

    let peer = Peer {
        inbound: to_conn,
        outbound: from_conn,
    };
    (conn, peer)
}

impl Peer {
    pub fn send(&self, frame: Frame) {
        let _ = self.inbound.unbounded_send(Ok(frame));
    }

    pub fn send_text(&self, text: &str) {
        self.send(Frame::Text(text.to_string()));
    }

    /// Next frame written by the connection, or `None` once it is closed
    /// (or nothing arrives in time).
    pub async fn next_frame(&mut self) -> Option<Frame> {
        tokio::time::timeout(PEER_WAIT, self.outbound.next())
            .await
            .ok()
            .flatten()
    }

    /// Next text frame, skipping keep-alive pings.
    pub async fn next_text(&mut self) -> Option<String> {
        loop {
            match self.next_frame().await? {
                Frame::Text(text) => return Some(text),
                Frame::Ping(_) | Frame::Pong(_) => continue,
                other => panic!("expected a text frame, got {other:?}"),
            }
        }
    }

    /// Next text frame decoded as an envelope with a `T` payload.
    pub async fn next_event<T: DeserializeOwned>(&mut self) -> Envelope<T> {
        let text = self.next_text().await.expect("connection produced no event");
        serde_json::from_str(&text).expect("event is a valid envelope")
    }

    /// Hang up without a close frame.
    pub fn hang_up(&self) {
        self.inbound.close_channel();
    }
}

pub fn service() -> Arc<StoreService> {
    Arc::new(StoreService::new(Database::in_memory().unwrap()))
}

pub fn direct(service: &dyn Service, a: &str, b: &str) -> Discussion {
    service
        .create_discussion(&NewDiscussion::direct(
            ParticipantProfile::new(a),
            ParticipantProfile::new(b),
        ))
        .unwrap()
}
