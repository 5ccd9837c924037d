//! One client socket: an inbound pump decoding and processing events, and an
//! outbound pump draining the hub queue onto the socket.
//!
//! Both pumps share one [`CancellationToken`]; whichever exits first stops the
//! other. [`ClientSession::start`] returns once both are done and the
//! connection has been closed.

use std::sync::Arc;
use std::time::Duration;

use agora_shared::protocol::{self, EventKind, EventSet, Outbound};
use agora_shared::types::{DiscussionId, SessionId, UserId};
use agora_shared::ChatError;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connection::{Connection, ConnectionError, Frame};
use crate::events::EventProcessor;
use crate::hub::Subscriber;

/// Which socket endpoint a session was opened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionScope {
    /// Every discussion of the user; all event kinds.
    AllDiscussions,
    /// One discussion's message stream.
    SingleDiscussion(DiscussionId),
}

impl SessionScope {
    pub fn events(&self) -> EventSet {
        match self {
            SessionScope::AllDiscussions => EventSet::all(),
            SessionScope::SingleDiscussion(_) => {
                EventSet::of(&[EventKind::Message, EventKind::Discussion])
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Running,
    Closing,
    Closed,
}

#[derive(Debug, Error)]
pub enum PumpError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Process(#[from] ChatError),

    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Pump task failed: {0}")]
    Task(String),
}

impl PumpError {
    fn is_closed(&self) -> bool {
        match self {
            PumpError::Connection(e) => e.is_closed(),
            PumpError::Process(ChatError::ConnectionClosed) => true,
            _ => false,
        }
    }
}

/// Every failure a session ended with, other than the socket closing.
#[derive(Debug)]
pub struct SessionError {
    errors: Vec<PumpError>,
}

impl SessionError {
    pub fn errors(&self) -> &[PumpError] {
        &self.errors
    }
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let joined: Vec<String> = self.errors.iter().map(ToString::to_string).collect();
        write!(f, "{}", joined.join(", "))
    }
}

impl std::error::Error for SessionError {}

impl From<ChatError> for SessionError {
    fn from(err: ChatError) -> Self {
        Self {
            errors: vec![PumpError::Process(err)],
        }
    }
}

/// Outside view of a running session.
#[derive(Clone)]
pub struct SessionHandle {
    #[cfg(test)]
    cancel: CancellationToken,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    /// Ask both pumps to stop. Idempotent.
    #[cfg(test)]
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }
}

pub struct ClientSession {
    subscriber: Subscriber,
    queue: mpsc::Receiver<Outbound>,
    backlog: Vec<Outbound>,
    events: EventSet,
    connection: Arc<Connection>,
    processor: EventProcessor,
    ping_period: Duration,
    cancel: CancellationToken,
    state: Arc<watch::Sender<SessionState>>,
}

impl ClientSession {
    pub fn new(
        user_id: UserId,
        scope: SessionScope,
        connection: Connection,
        processor: EventProcessor,
        queue_size: usize,
        ping_period: Duration,
    ) -> Self {
        let (subscriber, queue) = Subscriber::new(user_id, scope, queue_size);
        let (state, _) = watch::channel(SessionState::Created);
        Self {
            subscriber,
            queue,
            backlog: Vec::new(),
            events: scope.events(),
            connection: Arc::new(connection),
            processor,
            ping_period,
            cancel: CancellationToken::new(),
            state: Arc::new(state),
        }
    }

    pub fn id(&self) -> SessionId {
        self.subscriber.id()
    }

    /// The handle the hub registers.
    pub fn subscriber(&self) -> &Subscriber {
        &self.subscriber
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            #[cfg(test)]
            cancel: self.cancel.clone(),
            state: self.state.subscribe(),
        }
    }

    /// Queue payloads to write before anything from the hub.
    pub fn preload(&mut self, payloads: impl IntoIterator<Item = Outbound>) {
        self.backlog.extend(payloads);
    }

    /// Run both pumps to completion and close the connection.
    pub async fn start(self) -> Result<(), SessionError> {
        let ClientSession {
            subscriber,
            queue,
            backlog,
            events,
            connection,
            processor,
            ping_period,
            cancel,
            state,
        } = self;

        state.send_replace(SessionState::Running);
        info!(session = %subscriber.id(), user = %subscriber.user_id(), "Session started");

        let inbound = tokio::spawn(inbound_pump(
            Arc::clone(&connection),
            events,
            processor,
            cancel.clone(),
            Arc::clone(&state),
        ));
        let outbound = tokio::spawn(outbound_pump(
            Arc::clone(&connection),
            events,
            queue,
            backlog,
            ping_period,
            cancel.clone(),
            Arc::clone(&state),
        ));

        let (inbound, outbound) = tokio::join!(inbound, outbound);

        mark_closing(&state);
        connection.close().await;
        state.send_replace(SessionState::Closed);

        let errors: Vec<PumpError> = [inbound, outbound]
            .into_iter()
            .filter_map(|joined| match joined {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e),
                Err(e) => Some(PumpError::Task(e.to_string())),
            })
            .filter(|e| !e.is_closed())
            .collect();

        if errors.is_empty() {
            info!(session = %subscriber.id(), "Session closed");
            Ok(())
        } else {
            let err = SessionError { errors };
            error!(session = %subscriber.id(), error = %err, "Session failed");
            Err(err)
        }
    }
}

fn mark_closing(state: &watch::Sender<SessionState>) {
    state.send_if_modified(|s| {
        if *s == SessionState::Running {
            *s = SessionState::Closing;
            true
        } else {
            false
        }
    });
}

async fn inbound_pump(
    connection: Arc<Connection>,
    events: EventSet,
    processor: EventProcessor,
    cancel: CancellationToken,
    state: Arc<watch::Sender<SessionState>>,
) -> Result<(), PumpError> {
    let _stop = cancel.clone().drop_guard();
    let result = read_loop(&connection, events, &processor, &cancel).await;
    mark_closing(&state);
    result
}

async fn read_loop(
    connection: &Connection,
    events: EventSet,
    processor: &EventProcessor,
    cancel: &CancellationToken,
) -> Result<(), PumpError> {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            frame = connection.receive() => frame?,
        };

        let raw = match frame {
            Frame::Text(text) => text.into_bytes(),
            Frame::Binary(bytes) => bytes,
            Frame::Close => {
                debug!("Peer sent close frame");
                return Ok(());
            }
            Frame::Ping(_) | Frame::Pong(_) => continue,
        };

        match events.recognize_inbound(&raw) {
            Some(event) => {
                debug!(kind = event.kind().tag(), "Processing inbound event");
                if let Err(e) = processor.process(event).await {
                    warn!(error = %e, "Inbound event failed");
                    return Err(e.into());
                }
            }
            None => {
                warn!(size = raw.len(), "Unrecognized inbound payload");
                let warning = protocol::warning(&raw)?;
                connection.send(Frame::Text(warning)).await?;
            }
        }
    }
}

async fn outbound_pump(
    connection: Arc<Connection>,
    events: EventSet,
    queue: mpsc::Receiver<Outbound>,
    backlog: Vec<Outbound>,
    ping_period: Duration,
    cancel: CancellationToken,
    state: Arc<watch::Sender<SessionState>>,
) -> Result<(), PumpError> {
    let _stop = cancel.clone().drop_guard();
    let result = write_loop(&connection, events, queue, backlog, ping_period, &cancel).await;
    mark_closing(&state);
    result
}

async fn write_loop(
    connection: &Connection,
    events: EventSet,
    mut queue: mpsc::Receiver<Outbound>,
    backlog: Vec<Outbound>,
    ping_period: Duration,
    cancel: &CancellationToken,
) -> Result<(), PumpError> {
    for payload in &backlog {
        if cancel.is_cancelled() {
            return Ok(());
        }
        write_payload(connection, events, payload).await?;
    }

    let mut ticker = tokio::time::interval_at(Instant::now() + ping_period, ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            next = queue.recv() => match next {
                Some(payload) => write_payload(connection, events, &payload).await?,
                None => {
                    debug!("Queue closed by hub, closing socket");
                    connection.send(Frame::Close).await?;
                    return Ok(());
                }
            },
            _ = ticker.tick() => connection.send(Frame::Ping(Vec::new())).await?,
        }
    }
}

async fn write_payload(
    connection: &Connection,
    events: EventSet,
    payload: &Outbound,
) -> Result<(), PumpError> {
    if !events.recognize_outbound(payload) {
        debug!(kind = payload.kind().tag(), "Event kind not enabled, skipping");
        return Ok(());
    }
    let text = payload.encode()?;
    connection.send(Frame::Text(text)).await?;
    Ok(())
}
