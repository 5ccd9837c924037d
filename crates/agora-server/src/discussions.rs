//! Discussion lifecycle and session wiring: the operations the HTTP layer
//! exposes, on top of a [`Service`] and the [`Hub`].

use std::sync::Arc;
use std::time::Duration;

use agora_shared::models::{DiscussionView, NewDiscussion};
use agora_shared::protocol::Outbound;
use agora_shared::types::{ChannelKey, DiscussionId, UserId};
use agora_shared::ChatError;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::connection::{Connection, ConnectionLimits};
use crate::events::EventProcessor;
use crate::hub::Hub;
use crate::service::Service;
use crate::session::{ClientSession, SessionError, SessionScope};

/// Per-session knobs taken from [`ServerConfig`].
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub limits: ConnectionLimits,
    pub ping_period: Duration,
    pub queue_size: usize,
}

impl From<&ServerConfig> for SessionSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            limits: config.connection_limits(),
            ping_period: config.ping_period(),
            queue_size: config.session_queue_size,
        }
    }
}

#[derive(Clone)]
pub struct Discussions {
    hub: Hub,
    service: Arc<dyn Service>,
    settings: SessionSettings,
}

impl Discussions {
    pub fn new(hub: Hub, service: Arc<dyn Service>, settings: SessionSettings) -> Self {
        Self {
            hub,
            service,
            settings,
        }
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn settings(&self) -> SessionSettings {
        self.settings
    }

    pub fn user_discussions(&self, user_id: &UserId) -> Result<Vec<DiscussionView>, ChatError> {
        self.service.user_discussions(user_id)
    }

    /// Create a discussion with `creator` as a participant, announce it to
    /// every participant and attach their live sessions to it.
    pub async fn create_discussion(
        &self,
        creator: &UserId,
        new: NewDiscussion,
    ) -> Result<DiscussionView, ChatError> {
        let new = new.with_creator(creator);
        new.validate()?;

        let discussion = self.service.create_discussion(&new)?;
        let participants = self.service.participants(discussion.id)?;
        let key = ChannelKey::Discussion(discussion.id);

        for user_id in &discussion.participants {
            self.hub.join_user_sessions(user_id, key.clone()).await;
            if let Some(view) = DiscussionView::for_user(&discussion, &participants, user_id) {
                self.hub
                    .send_to_user(user_id, Outbound::Discussion(view))
                    .await;
            }
        }

        info!(
            discussion = %discussion.id,
            creator = %creator,
            participants = discussion.participants.len(),
            "Discussion created"
        );

        DiscussionView::for_user(&discussion, &participants, creator).ok_or(ChatError::NoPermission)
    }

    /// Delete a discussion the requester takes part in and tell every
    /// participant about it.
    pub async fn delete_discussion(
        &self,
        requester: &UserId,
        id: DiscussionId,
    ) -> Result<(), ChatError> {
        let discussion = self.service.get_discussion(id)?;
        if !discussion.has_participant(requester) {
            return Err(ChatError::NoPermission);
        }

        self.service.delete_discussion(id)?;

        for user_id in &discussion.participants {
            self.hub
                .send_to_user(user_id, Outbound::DeleteDiscussion(id))
                .await;
        }
        let key = ChannelKey::Discussion(id);
        let detached = self.hub.subscriber_count(&key).await;
        self.hub.remove_channel(&key).await;

        info!(discussion = %id, requester = %requester, sessions = detached, "Discussion deleted");
        Ok(())
    }

    /// Fail early when `user_id` may not open a session with `scope`.
    pub fn check_access(&self, user_id: &UserId, scope: SessionScope) -> Result<(), ChatError> {
        match scope {
            SessionScope::AllDiscussions => Ok(()),
            SessionScope::SingleDiscussion(id) => {
                self.service.find_discussion(id, user_id).map(|_| ())
            }
        }
    }

    /// Build a session: register it with the hub, then preload its backlog.
    ///
    /// Registering first means an event committed while the backlog loads
    /// reaches the queue, at worst duplicating a preloaded item.
    pub async fn open_session(
        &self,
        user_id: UserId,
        scope: SessionScope,
        connection: Connection,
    ) -> Result<ClientSession, ChatError> {
        self.check_access(&user_id, scope)?;

        let processor = EventProcessor::new(self.hub.clone(), self.service.clone(), user_id.clone());
        let mut session = ClientSession::new(
            user_id.clone(),
            scope,
            connection,
            processor,
            self.settings.queue_size,
            self.settings.ping_period,
        );

        let subscriber = session.subscriber().clone();
        if let Err(e) = self.attach(&mut session, &user_id, scope).await {
            self.hub.unregister(&subscriber).await;
            return Err(e);
        }
        Ok(session)
    }

    async fn attach(
        &self,
        session: &mut ClientSession,
        user_id: &UserId,
        scope: SessionScope,
    ) -> Result<(), ChatError> {
        self.hub
            .register_in_channel(ChannelKey::User(user_id.clone()), session.subscriber())
            .await;

        match scope {
            SessionScope::AllDiscussions => {
                for view in self.service.user_discussions(user_id)? {
                    self.hub
                        .register_in_channel(ChannelKey::Discussion(view.id), session.subscriber())
                        .await;
                }
                // Views loaded after every channel is joined are never older
                // than what the queue delivers.
                let views = self.service.user_discussions(user_id)?;
                session.preload(views.into_iter().map(Outbound::Discussion));
            }
            SessionScope::SingleDiscussion(id) => {
                self.hub
                    .register_in_channel(ChannelKey::Discussion(id), session.subscriber())
                    .await;
                let history = self.service.discussion_messages(id)?;
                session.preload(history.into_iter().map(Outbound::Message));
            }
        }
        Ok(())
    }

    /// Serve one socket until it closes.
    pub async fn connect(
        &self,
        user_id: UserId,
        scope: SessionScope,
        connection: Connection,
    ) -> Result<(), SessionError> {
        let session = match self.open_session(user_id.clone(), scope, connection).await {
            Ok(session) => session,
            Err(e) => {
                warn!(user = %user_id, error = %e, "Could not open session");
                return Err(e.into());
            }
        };

        let subscriber = session.subscriber().clone();
        let handle = session.handle();
        let session_id = session.id();

        let result = session.start().await;
        self.hub.unregister(&subscriber).await;
        debug!(session = %session_id, state = ?handle.state(), "Session unregistered");
        result
    }
}

#[cfg(test)]
mod tests {
    use agora_shared::models::{
        Discussion, DiscussionPatch, Message, MessagePatch, NewMessage, Participant,
        ParticipantProfile,
    };
    use agora_shared::protocol::Envelope;
    use agora_shared::types::MessageId;

    use super::*;
    use crate::service::StoreService;
    use crate::testing::{self, limits, pipe, Peer};

    fn settings() -> SessionSettings {
        SessionSettings {
            limits: limits(),
            ping_period: Duration::from_secs(54),
            queue_size: 16,
        }
    }

    fn setup() -> (Discussions, Arc<StoreService>) {
        let service = testing::service();
        let discussions = Discussions::new(Hub::default(), service.clone(), settings());
        (discussions, service)
    }

    /// Store whose history read is immediately followed by another user
    /// sending a message, as if it raced the session being opened.
    struct SendsDuringHistoryRead {
        inner: Arc<StoreService>,
        hub: Hub,
        sender: UserId,
    }

    impl Service for SendsDuringHistoryRead {
        fn user_discussions(&self, user_id: &UserId) -> Result<Vec<DiscussionView>, ChatError> {
            self.inner.user_discussions(user_id)
        }

        fn find_discussion(&self, id: DiscussionId, user_id: &UserId) -> Result<DiscussionView, ChatError> {
            self.inner.find_discussion(id, user_id)
        }

        fn get_discussion(&self, id: DiscussionId) -> Result<Discussion, ChatError> {
            self.inner.get_discussion(id)
        }

        fn create_discussion(&self, new: &NewDiscussion) -> Result<Discussion, ChatError> {
            self.inner.create_discussion(new)
        }

        fn update_discussion(&self, id: DiscussionId, patch: &DiscussionPatch) -> Result<(), ChatError> {
            self.inner.update_discussion(id, patch)
        }

        fn delete_discussion(&self, id: DiscussionId) -> Result<(), ChatError> {
            self.inner.delete_discussion(id)
        }

        fn participants(&self, id: DiscussionId) -> Result<Vec<Participant>, ChatError> {
            self.inner.participants(id)
        }

        fn create_message(&self, draft: &Message) -> Result<Message, ChatError> {
            self.inner.create_message(draft)
        }

        fn find_message(&self, id: MessageId) -> Result<Message, ChatError> {
            self.inner.find_message(id)
        }

        fn update_message(&self, id: MessageId, patch: &MessagePatch) -> Result<(), ChatError> {
            self.inner.update_message(id, patch)
        }

        fn discussion_messages(&self, id: DiscussionId) -> Result<Vec<Message>, ChatError> {
            let history = self.inner.discussion_messages(id)?;

            let draft = Message::draft(
                &NewMessage::text(id, "sent while opening"),
                &self.sender,
                chrono::Utc::now(),
            );
            let message = self.inner.create_message(&draft)?;
            futures::executor::block_on(
                self.hub
                    .broadcast(&ChannelKey::Discussion(id), Outbound::Message(message)),
            );

            Ok(history)
        }

        fn increment_unread(&self, id: DiscussionId, user_id: &UserId) -> Result<(), ChatError> {
            self.inner.increment_unread(id, user_id)
        }

        fn decrement_unread(&self, id: DiscussionId, user_id: &UserId) -> Result<(), ChatError> {
            self.inner.decrement_unread(id, user_id)
        }
    }

    async fn spawn_session(
        discussions: &Discussions,
        user: &str,
        scope: SessionScope,
    ) -> (Peer, tokio::task::JoinHandle<Result<(), SessionError>>) {
        let (conn, peer) = pipe(limits());
        let session = discussions
            .open_session(UserId::from(user), scope, conn)
            .await
            .unwrap();
        let subscriber = session.subscriber().clone();
        let hub = discussions.hub().clone();
        let task = tokio::spawn(async move {
            let result = session.start().await;
            hub.unregister(&subscriber).await;
            result
        });
        (peer, task)
    }

    #[tokio::test]
    async fn test_all_discussions_session_preloads_views() {
        let (discussions, service) = setup();
        let d = testing::direct(service.as_ref(), "a", "b");

        let (mut peer, task) = spawn_session(&discussions, "a", SessionScope::AllDiscussions).await;

        let view: Envelope<DiscussionView> = peer.next_event().await;
        assert_eq!(view.kind, "discussion");
        assert_eq!(view.data.id, d.id);
        assert_eq!(discussions.hub().subscriber_count(&ChannelKey::Discussion(d.id)).await, 1);

        peer.hang_up();
        task.await.unwrap().unwrap();
        assert_eq!(discussions.hub().channel_count().await, 0);
    }

    #[tokio::test]
    async fn test_single_discussion_session_preloads_history() {
        let (discussions, service) = setup();
        let d = testing::direct(service.as_ref(), "a", "b");
        let draft = Message::draft(
            &NewMessage::text(d.id, "earlier"),
            &UserId::from("b"),
            chrono::Utc::now(),
        );
        service.create_message(&draft).unwrap();

        let (mut peer, task) =
            spawn_session(&discussions, "a", SessionScope::SingleDiscussion(d.id)).await;

        let message: Envelope<Message> = peer.next_event().await;
        assert_eq!(message.data.text, "earlier");

        peer.hang_up();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_message_sent_while_opening_is_delivered() {
        let store = testing::service();
        let d = testing::direct(store.as_ref(), "a", "b");
        let hub = Hub::default();
        let service = Arc::new(SendsDuringHistoryRead {
            inner: store.clone(),
            hub: hub.clone(),
            sender: UserId::from("b"),
        });
        let discussions = Discussions::new(hub, service, settings());

        let (mut peer, task) =
            spawn_session(&discussions, "a", SessionScope::SingleDiscussion(d.id)).await;

        let message: Envelope<Message> = peer.next_event().await;
        assert_eq!(message.kind, "message");
        assert_eq!(message.data.text, "sent while opening");
        assert_eq!(store.discussion_messages(d.id).unwrap().len(), 1);

        peer.hang_up();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_single_discussion_requires_participation() {
        let (discussions, service) = setup();
        let d = testing::direct(service.as_ref(), "a", "b");

        let (conn, _peer) = pipe(limits());
        let result = discussions
            .connect(UserId::from("c"), SessionScope::SingleDiscussion(d.id), conn)
            .await;
        assert!(result.is_err());
        assert_eq!(
            discussions.check_access(&UserId::from("c"), SessionScope::SingleDiscussion(d.id)),
            Err(ChatError::NoPermission)
        );
    }

    #[tokio::test]
    async fn test_create_discussion_announces_and_attaches_sessions() {
        let (discussions, _service) = setup();
        let (mut peer_b, task_b) = spawn_session(&discussions, "b", SessionScope::AllDiscussions).await;

        let view = discussions
            .create_discussion(
                &UserId::from("a"),
                NewDiscussion {
                    participants: vec![ParticipantProfile::new("b")],
                    ..NewDiscussion::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(view.user_id, UserId::from("a"));
        assert_eq!(view.participants.len(), 2);

        let announced: Envelope<DiscussionView> = peer_b.next_event().await;
        assert_eq!(announced.data.id, view.id);
        assert_eq!(announced.data.user_id, UserId::from("b"));
        assert_eq!(
            discussions
                .hub()
                .subscriber_count(&ChannelKey::Discussion(view.id))
                .await,
            1
        );

        peer_b.hang_up();
        task_b.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_create_discussion_rejects_invalid() {
        let (discussions, _service) = setup();
        let result = discussions
            .create_discussion(&UserId::from("a"), NewDiscussion::group("", Vec::new()))
            .await;
        assert!(matches!(result, Err(ChatError::InvalidDiscussion(_))));
    }

    #[tokio::test]
    async fn test_delete_discussion() {
        let (discussions, service) = setup();
        let d = testing::direct(service.as_ref(), "a", "b");
        let (mut peer_b, task_b) = spawn_session(&discussions, "b", SessionScope::AllDiscussions).await;
        let _preloaded: Envelope<DiscussionView> = peer_b.next_event().await;

        assert_eq!(
            discussions.delete_discussion(&UserId::from("c"), d.id).await,
            Err(ChatError::NoPermission)
        );

        discussions.delete_discussion(&UserId::from("a"), d.id).await.unwrap();

        let deleted: Envelope<DiscussionId> = peer_b.next_event().await;
        assert_eq!(deleted.kind, "delete_discussion");
        assert_eq!(deleted.data, d.id);
        assert_eq!(
            discussions.hub().subscriber_count(&ChannelKey::Discussion(d.id)).await,
            0
        );
        assert_eq!(
            service.get_discussion(d.id),
            Err(ChatError::DiscussionNotFound(d.id))
        );

        peer_b.hang_up();
        task_b.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_closes_sessions() {
        let (discussions, _service) = setup();
        let (mut peer, task) = spawn_session(&discussions, "a", SessionScope::AllDiscussions).await;

        discussions.hub().shutdown().await;

        assert_eq!(peer.next_frame().await, Some(crate::connection::Frame::Close));
        task.await.unwrap().unwrap();
    }
}
