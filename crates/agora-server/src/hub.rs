//! Channel registry and fan-out.
//!
//! Each channel (`user:<id>` or `discussion:<id>`) is served by one dispatch
//! task that owns the channel's subscriber set and drains a bounded command
//! queue, so deliveries on a channel happen in enqueue order. The registry
//! lock only guards membership bookkeeping and is never taken by a dispatch
//! task. Subscribers a dispatch task evicts are closed there and pruned from
//! the registry on its next mutation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use agora_shared::protocol::Outbound;
use agora_shared::types::{ChannelKey, SessionId, UserId};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::session::SessionScope;

// ---------------------------------------------------------------------------
// Subscriber
// ---------------------------------------------------------------------------

/// Outcome of a non-blocking delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Full,
    Closed,
}

/// The hub-facing half of a session: its identity and outbound queue.
#[derive(Clone)]
pub struct Subscriber {
    inner: Arc<SubscriberInner>,
}

struct SubscriberInner {
    id: SessionId,
    user_id: UserId,
    scope: SessionScope,
    queue: StdMutex<Option<mpsc::Sender<Outbound>>>,
}

impl Subscriber {
    /// Create a subscriber and the receiving end of its queue.
    pub fn new(
        user_id: UserId,
        scope: SessionScope,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let subscriber = Self {
            inner: Arc::new(SubscriberInner {
                id: SessionId::new(),
                user_id,
                scope,
                queue: StdMutex::new(Some(tx)),
            }),
        };
        (subscriber, rx)
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn user_id(&self) -> &UserId {
        &self.inner.user_id
    }

    pub fn scope(&self) -> SessionScope {
        self.inner.scope
    }

    /// Try to enqueue `payload` without waiting.
    pub fn deliver(&self, payload: Outbound) -> Delivery {
        let queue = self.inner.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = queue.as_ref() else {
            return Delivery::Closed;
        };
        match tx.try_send(payload) {
            Ok(()) => Delivery::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Close the queue. Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        self.inner
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.inner
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.inner.id)
            .field("user_id", &self.inner.user_id)
            .field("scope", &self.inner.scope)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

enum ChannelCommand {
    Subscribe(Subscriber),
    Unsubscribe(SessionId),
    Broadcast(Outbound),
    SendToUser { user_id: UserId, payload: Outbound },
}

struct ChannelEntry {
    commands: mpsc::Sender<ChannelCommand>,
    members: HashMap<SessionId, Subscriber>,
}

/// Dispatch loop of one channel. Exits once the registry drops the command
/// sender and the queue is drained.
async fn run_channel(key: ChannelKey, mut commands: mpsc::Receiver<ChannelCommand>) {
    let mut members: HashMap<SessionId, Subscriber> = HashMap::new();

    while let Some(command) = commands.recv().await {
        match command {
            ChannelCommand::Subscribe(subscriber) => {
                members.insert(subscriber.id(), subscriber);
            }
            ChannelCommand::Unsubscribe(id) => {
                members.remove(&id);
            }
            ChannelCommand::Broadcast(payload) => {
                deliver_all(&key, &mut members, &payload, |_| true);
            }
            ChannelCommand::SendToUser { user_id, payload } => {
                deliver_all(&key, &mut members, &payload, |s| s.user_id() == &user_id);
            }
        }
    }

    debug!(channel = %key, "Channel dispatch loop stopped");
}

fn deliver_all(
    key: &ChannelKey,
    members: &mut HashMap<SessionId, Subscriber>,
    payload: &Outbound,
    wanted: impl Fn(&Subscriber) -> bool,
) {
    members.retain(|id, subscriber| {
        if !wanted(subscriber) {
            return true;
        }
        match subscriber.deliver(payload.clone()) {
            Delivery::Delivered => true,
            Delivery::Full => {
                warn!(
                    channel = %key,
                    session = %id,
                    user = %subscriber.user_id(),
                    "Session queue full, evicting slow subscriber"
                );
                subscriber.close();
                false
            }
            Delivery::Closed => {
                debug!(channel = %key, session = %id, "Dropping closed subscriber");
                false
            }
        }
    });
}

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

/// Process-wide registry of channels. Cheap to clone.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    channels: Mutex<HashMap<ChannelKey, ChannelEntry>>,
    channel_queue_size: usize,
}

impl Hub {
    pub fn new(channel_queue_size: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                channels: Mutex::new(HashMap::new()),
                channel_queue_size: channel_queue_size.max(1),
            }),
        }
    }

    /// Subscribe `subscriber` to `key`, starting the channel on first use.
    /// Registering twice is a no-op, and so is registering a closed subscriber.
    pub async fn register_in_channel(&self, key: ChannelKey, subscriber: &Subscriber) {
        let mut channels = self.inner.channels.lock().await;
        prune_closed(&mut channels);

        // `unregister` closes under this lock, so a closed subscriber is gone for good.
        if subscriber.is_closed() {
            debug!(channel = %key, session = %subscriber.id(), "Ignoring closed subscriber");
            return;
        }

        let entry = channels.entry(key.clone()).or_insert_with(|| {
            let (tx, rx) = mpsc::channel(self.inner.channel_queue_size);
            tokio::spawn(run_channel(key.clone(), rx));
            debug!(channel = %key, "Channel started");
            ChannelEntry {
                commands: tx,
                members: HashMap::new(),
            }
        });

        if entry.members.contains_key(&subscriber.id()) {
            return;
        }
        entry.members.insert(subscriber.id(), subscriber.clone());

        let commands = entry.commands.clone();
        if commands
            .send(ChannelCommand::Subscribe(subscriber.clone()))
            .await
            .is_err()
        {
            warn!(channel = %key, "Channel dispatch loop is gone");
        }

        debug!(
            channel = %key,
            session = %subscriber.id(),
            user = %subscriber.user_id(),
            "Session registered"
        );
    }

    /// Remove `subscriber` from every channel and close its queue. Channels
    /// left without subscribers are torn down. Safe to call repeatedly.
    pub async fn unregister(&self, subscriber: &Subscriber) {
        let id = subscriber.id();
        let mut channels = self.inner.channels.lock().await;

        let keys: Vec<ChannelKey> = channels
            .iter()
            .filter(|(_, entry)| entry.members.contains_key(&id))
            .map(|(key, _)| key.clone())
            .collect();

        for key in keys {
            let Some(entry) = channels.get_mut(&key) else {
                continue;
            };
            entry.members.remove(&id);
            let _ = entry.commands.send(ChannelCommand::Unsubscribe(id)).await;

            if entry.members.is_empty() {
                // Dropping the sender stops the dispatch loop once drained.
                channels.remove(&key);
                debug!(channel = %key, "Channel torn down");
            }
        }

        if subscriber.close() {
            debug!(session = %id, user = %subscriber.user_id(), "Session unregistered");
        }
    }

    /// Fan `payload` out to every subscriber of `key`.
    pub async fn broadcast(&self, key: &ChannelKey, payload: Outbound) {
        self.enqueue(key, ChannelCommand::Broadcast(payload)).await;
    }

    /// Deliver `payload` to every session of `user_id` on their personal channel.
    pub async fn send_to_user(&self, user_id: &UserId, payload: Outbound) {
        self.broadcast(&ChannelKey::User(user_id.clone()), payload)
            .await;
    }

    /// Deliver `payload` only to the sessions of `user_id` subscribed to `key`.
    pub async fn send_to_user_in_channel(&self, key: &ChannelKey, user_id: &UserId, payload: Outbound) {
        self.enqueue(
            key,
            ChannelCommand::SendToUser {
                user_id: user_id.clone(),
                payload,
            },
        )
        .await;
    }

    /// Subscribe every all-discussions session of `user_id` to `key`.
    pub async fn join_user_sessions(&self, user_id: &UserId, key: ChannelKey) {
        let sessions: Vec<Subscriber> = {
            let mut channels = self.inner.channels.lock().await;
            prune_closed(&mut channels);
            match channels.get(&ChannelKey::User(user_id.clone())) {
                Some(entry) => entry
                    .members
                    .values()
                    .filter(|s| s.scope() == SessionScope::AllDiscussions)
                    .cloned()
                    .collect(),
                None => return,
            }
        };

        for subscriber in &sessions {
            self.register_in_channel(key.clone(), subscriber).await;
        }
    }

    /// Drop a channel. Its subscribers stay registered elsewhere.
    pub async fn remove_channel(&self, key: &ChannelKey) {
        if self.inner.channels.lock().await.remove(key).is_some() {
            debug!(channel = %key, "Channel removed");
        }
    }

    /// Tear down every channel and close every subscriber queue.
    pub async fn shutdown(&self) {
        let drained: Vec<(ChannelKey, ChannelEntry)> =
            self.inner.channels.lock().await.drain().collect();

        let mut closed = 0;
        for (_, entry) in drained {
            for subscriber in entry.members.values() {
                if subscriber.close() {
                    closed += 1;
                }
            }
        }

        info!(sessions = closed, "Hub shut down");
    }

    pub async fn channel_count(&self) -> usize {
        let mut channels = self.inner.channels.lock().await;
        prune_closed(&mut channels);
        channels.len()
    }

    pub async fn subscriber_count(&self, key: &ChannelKey) -> usize {
        let mut channels = self.inner.channels.lock().await;
        prune_closed(&mut channels);
        channels.get(key).map(|entry| entry.members.len()).unwrap_or(0)
    }

    async fn enqueue(&self, key: &ChannelKey, command: ChannelCommand) {
        let commands = {
            let channels = self.inner.channels.lock().await;
            match channels.get(key) {
                Some(entry) => entry.commands.clone(),
                None => {
                    debug!(channel = %key, "No subscribers, dropping event");
                    return;
                }
            }
        };

        if commands.send(command).await.is_err() {
            debug!(channel = %key, "Channel closed before delivery");
        }
    }
}

/// Drop closed subscribers from the registry and tear down channels left empty.
fn prune_closed(channels: &mut HashMap<ChannelKey, ChannelEntry>) {
    channels.retain(|key, entry| {
        entry.members.retain(|_, subscriber| !subscriber.is_closed());
        if entry.members.is_empty() {
            debug!(channel = %key, "Channel torn down");
            return false;
        }
        true
    });
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(agora_shared::constants::CHANNEL_QUEUE_SIZE)
    }
}
