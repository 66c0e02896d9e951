use obrolan_domain::DomainResult;
use obrolan_domain::error::DomainError;
use obrolan_domain::identity::ActorIdentity;
use obrolan_domain::messages::{MessageService, SendMessageInput};
use serde_json::Value;

use super::hub::{ConnectionId, RealtimeHub, chat_group};
use super::protocol::{
    Ack, ClientFrame, EVENT_AUTH, EVENT_CHAT_JOIN, EVENT_CHAT_LEAVE, EVENT_MESSAGE_READ,
    EVENT_MESSAGE_SEND, ServerEvent,
};
use super::validation::{parse_chat_ref, parse_read, parse_send};
use crate::observability;

/// Credential sources offered during the handshake, highest precedence first.
#[derive(Debug, Clone, Default)]
pub struct HandshakeCredentials {
    pub header: Option<String>,
    pub auth_payload: Option<String>,
    pub query: Option<String>,
}

impl HandshakeCredentials {
    pub fn resolve(&self) -> Option<&str> {
        [&self.header, &self.auth_payload, &self.query]
            .into_iter()
            .filter_map(|candidate| candidate.as_deref())
            .map(str::trim)
            .find(|token| !token.is_empty())
    }
}

/// Extracts the token from an `{"event":"auth","data":{"token":..}}` frame.
pub fn auth_frame_token(frame: &ClientFrame) -> Option<String> {
    if frame.event != EVENT_AUTH {
        return None;
    }
    frame
        .data
        .get("token")
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[derive(Default)]
struct Outcome {
    modified: Option<u64>,
    message_id: Option<String>,
}

/// Command handling for one authenticated connection.
#[derive(Clone)]
pub struct ChannelSession {
    user: ActorIdentity,
    connection_id: ConnectionId,
    hub: RealtimeHub,
    messages: MessageService,
}

impl ChannelSession {
    pub fn new(
        user: ActorIdentity,
        connection_id: ConnectionId,
        hub: RealtimeHub,
        messages: MessageService,
    ) -> Self {
        Self {
            user,
            connection_id,
            hub,
            messages,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Runs one client command. Returns the ack to deliver, if the client asked for one.
    pub async fn handle(&self, frame: ClientFrame) -> Option<Ack> {
        let result = match frame.event.as_str() {
            EVENT_CHAT_JOIN => self.join(&frame.data).await,
            EVENT_CHAT_LEAVE => {
                self.leave(&frame.data).await;
                observability::register_realtime_event("command", EVENT_CHAT_LEAVE, "ok");
                return None;
            }
            EVENT_MESSAGE_SEND => self.send(&frame.data).await,
            EVENT_MESSAGE_READ => self.read(&frame.data).await,
            other => Err(DomainError::invalid(
                "event",
                format!("unsupported event {other}"),
            )),
        };

        let name = match frame.event.as_str() {
            EVENT_CHAT_JOIN | EVENT_MESSAGE_SEND | EVENT_MESSAGE_READ => frame.event.as_str(),
            _ => "unknown",
        };
        match &result {
            Ok(_) => observability::register_realtime_event("command", name, "ok"),
            Err(err) => {
                tracing::warn!(
                    event = %frame.event,
                    user_id = %self.user.user_id,
                    connection_id = self.connection_id,
                    error = %err,
                    "realtime command failed"
                );
                observability::register_realtime_event("command", name, "error");
            }
        }

        let ack = frame.ack?;
        Some(match result {
            Ok(Outcome {
                modified,
                message_id,
            }) => {
                let mut reply = Ack::success(ack);
                if let Some(modified) = modified {
                    reply = reply.with_modified(modified);
                }
                if let Some(message_id) = message_id {
                    reply = reply.with_message_id(message_id);
                }
                reply
            }
            Err(err) => Ack::failure(ack, err),
        })
    }

    async fn join(&self, data: &Value) -> DomainResult<Outcome> {
        let chat_id = parse_chat_ref(data)?;
        let chats = self.messages.chats();
        if !chats.is_member(&chat_id, &self.user.user_id).await? {
            return Err(DomainError::Unauthorized("access denied".into()));
        }
        let group = chat_group(&chat_id);
        self.hub.join(self.connection_id, &group).await;
        // A close that ran between the check and the subscribe has already swept
        // the group, so membership is confirmed again once subscribed.
        let still_member = chats.is_member(&chat_id, &self.user.user_id).await;
        if !matches!(still_member, Ok(true)) {
            self.hub.leave(self.connection_id, &group).await;
            still_member?;
            return Err(DomainError::Unauthorized("access denied".into()));
        }
        tracing::debug!(chat_id = %chat_id, connection_id = self.connection_id, "joined chat");
        Ok(Outcome::default())
    }

    async fn leave(&self, data: &Value) {
        match parse_chat_ref(data) {
            Ok(chat_id) => {
                self.hub
                    .leave(self.connection_id, &chat_group(&chat_id))
                    .await
            }
            Err(err) => tracing::debug!(error = %err, "ignoring malformed chat:leave"),
        }
    }

    async fn send(&self, data: &Value) -> DomainResult<Outcome> {
        let payload = parse_send(data)?;
        let message = self
            .messages
            .send(SendMessageInput {
                chat_id: payload.chat_id,
                sender_id: self.user.user_id.clone(),
                content: payload.content,
                attachment: payload.attachment,
            })
            .await?;
        let message_id = message.message_id.clone();
        let group = chat_group(&message.chat_id);
        let recipients = self
            .hub
            .broadcast(&group, &ServerEvent::MessageNew(message))
            .await;
        observability::register_broadcast("message:new", recipients);
        Ok(Outcome {
            message_id: Some(message_id),
            ..Outcome::default()
        })
    }

    async fn read(&self, data: &Value) -> DomainResult<Outcome> {
        let payload = parse_read(data)?;
        let outcome = self
            .messages
            .mark_read(&payload.chat_id, &self.user.user_id, payload.up_to.clone())
            .await?;
        let event = ServerEvent::MessageRead {
            chat_id: payload.chat_id.clone(),
            user_id: self.user.user_id.clone(),
            up_to: payload.up_to,
            modified: outcome.modified,
        };
        let recipients = self
            .hub
            .broadcast(&chat_group(&payload.chat_id), &event)
            .await;
        observability::register_broadcast("message:read", recipients);
        Ok(Outcome {
            modified: Some(outcome.modified),
            ..Outcome::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use obrolan_domain::chat::{Chat, ChatService, ChatUpdate};
    use obrolan_domain::ports::BoxFuture;
    use obrolan_domain::ports::chat::ChatRepository;
    use obrolan_domain::users::UserProfile;
    use obrolan_infra::repositories::{
        InMemoryChatRepository, InMemoryMessageRepository, InMemoryUserDirectory,
    };
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;

    fn user_id(n: u8) -> String {
        format!("{n:032x}")
    }

    struct Fixture {
        hub: RealtimeHub,
        messages: MessageService,
    }

    impl Fixture {
        async fn new(users: &[u8]) -> Self {
            let directory = InMemoryUserDirectory::new();
            for n in users {
                directory
                    .insert(UserProfile {
                        user_id: user_id(*n),
                        username: format!("user{n}"),
                        email: format!("user{n}@example.com"),
                        is_active: true,
                        is_online: false,
                    })
                    .await
                    .expect("seed user");
            }
            let chats = ChatService::new(
                Arc::new(InMemoryChatRepository::new()),
                Arc::new(directory),
            );
            Self {
                hub: RealtimeHub::new(),
                messages: MessageService::new(Arc::new(InMemoryMessageRepository::new()), chats),
            }
        }

        async fn direct(&self, a: u8, b: u8) -> Chat {
            self.messages
                .chats()
                .create_direct(&user_id(a), &user_id(b))
                .await
                .expect("direct chat")
        }

        async fn connect(&self, n: u8) -> (ChannelSession, mpsc::Receiver<String>) {
            let (tx, rx) = mpsc::channel(64);
            let connection_id = self.hub.register(&user_id(n), tx).await;
            let session = ChannelSession::new(
                ActorIdentity::with_user_id(user_id(n)),
                connection_id,
                self.hub.clone(),
                self.messages.clone(),
            );
            (session, rx)
        }
    }

    fn frame(event: &str, ack: Option<u64>, data: Value) -> ClientFrame {
        ClientFrame {
            event: event.to_string(),
            ack,
            data,
        }
    }

    fn events(rx: &mut mpsc::Receiver<String>) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(raw) = rx.try_recv() {
            frames.push(serde_json::from_str(&raw).expect("json"));
        }
        frames
    }

    #[test]
    fn handshake_prefers_header_then_payload_then_query() {
        let mut credentials = HandshakeCredentials {
            header: Some("from-header".into()),
            auth_payload: Some("from-payload".into()),
            query: Some("from-query".into()),
        };
        assert_eq!(credentials.resolve(), Some("from-header"));
        credentials.header = Some("  ".into());
        assert_eq!(credentials.resolve(), Some("from-payload"));
        credentials.auth_payload = None;
        assert_eq!(credentials.resolve(), Some("from-query"));
        credentials.query = None;
        assert_eq!(credentials.resolve(), None);
    }

    #[test]
    fn reads_token_from_auth_frame_only() {
        let auth = frame(EVENT_AUTH, None, json!({ "token": "abc" }));
        assert_eq!(auth_frame_token(&auth).as_deref(), Some("abc"));
        let other = frame(EVENT_CHAT_JOIN, None, json!({ "token": "abc" }));
        assert_eq!(auth_frame_token(&other), None);
    }

    #[tokio::test]
    async fn join_denied_for_non_member_leaves_no_subscription() {
        let fixture = Fixture::new(&[1, 2, 3]).await;
        let chat = fixture.direct(1, 2).await;
        let (outsider, _rx) = fixture.connect(3).await;

        let ack = outsider
            .handle(frame(EVENT_CHAT_JOIN, Some(1), json!(chat.chat_id)))
            .await
            .expect("ack");

        assert!(!ack.success);
        assert_eq!(ack.kind, Some("authentication"));
        assert_eq!(fixture.hub.group_size(&chat_group(&chat.chat_id)).await, 0);
    }

    // Answers the first membership query from before a concurrent close.
    struct StaleFirstMembership {
        inner: InMemoryChatRepository,
        answered: AtomicBool,
    }

    impl ChatRepository for StaleFirstMembership {
        fn create_chat(&self, chat: &Chat) -> BoxFuture<'_, DomainResult<Chat>> {
            self.inner.create_chat(chat)
        }

        fn find_direct_chat(&self, dedupe_key: &str) -> BoxFuture<'_, DomainResult<Option<Chat>>> {
            self.inner.find_direct_chat(dedupe_key)
        }

        fn get_chat(&self, chat_id: &str) -> BoxFuture<'_, DomainResult<Option<Chat>>> {
            self.inner.get_chat(chat_id)
        }

        fn list_chats_by_user(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<Chat>>> {
            self.inner.list_chats_by_user(user_id)
        }

        fn is_member(&self, chat_id: &str, user_id: &str) -> BoxFuture<'_, DomainResult<bool>> {
            if !self.answered.swap(true, Ordering::SeqCst) {
                return Box::pin(async { Ok(true) });
            }
            self.inner.is_member(chat_id, user_id)
        }

        fn apply_update(
            &self,
            chat_id: &str,
            update: &ChatUpdate,
        ) -> BoxFuture<'_, DomainResult<Option<Chat>>> {
            self.inner.apply_update(chat_id, update)
        }
    }

    #[tokio::test]
    async fn join_racing_a_close_leaves_no_subscription() {
        let directory = InMemoryUserDirectory::new();
        for n in [1, 2] {
            directory
                .insert(UserProfile {
                    user_id: user_id(n),
                    username: format!("user{n}"),
                    email: format!("user{n}@example.com"),
                    is_active: true,
                    is_online: false,
                })
                .await
                .expect("seed user");
        }
        let repository = Arc::new(StaleFirstMembership {
            inner: InMemoryChatRepository::new(),
            answered: AtomicBool::new(true),
        });
        let chats = ChatService::new(repository.clone(), Arc::new(directory));
        let chat = chats
            .create_direct(&user_id(1), &user_id(2))
            .await
            .expect("direct chat");
        chats
            .deactivate(&ActorIdentity::with_user_id(user_id(1)), &chat.chat_id)
            .await
            .expect("closed");
        repository.answered.store(false, Ordering::SeqCst);

        let hub = RealtimeHub::new();
        let (tx, _rx) = mpsc::channel(8);
        let connection_id = hub.register(&user_id(2), tx).await;
        let session = ChannelSession::new(
            ActorIdentity::with_user_id(user_id(2)),
            connection_id,
            hub.clone(),
            MessageService::new(Arc::new(InMemoryMessageRepository::new()), chats),
        );

        let ack = session
            .handle(frame(EVENT_CHAT_JOIN, Some(1), json!(chat.chat_id)))
            .await
            .expect("ack");

        assert!(!ack.success);
        assert_eq!(ack.kind, Some("authentication"));
        assert_eq!(hub.group_size(&chat_group(&chat.chat_id)).await, 0);
    }

    #[tokio::test]
    async fn malformed_join_is_a_validation_failure() {
        let fixture = Fixture::new(&[1]).await;
        let (session, _rx) = fixture.connect(1).await;

        let ack = session
            .handle(frame(EVENT_CHAT_JOIN, Some(9), json!({ "chat_id": "nope" })))
            .await
            .expect("ack");

        assert_eq!(ack.ack, 9);
        assert_eq!(ack.kind, Some("validation"));
        assert_eq!(ack.details[0].field, "chat_id");
    }

    #[tokio::test]
    async fn send_broadcasts_to_joined_members_then_acks() {
        let fixture = Fixture::new(&[1, 2]).await;
        let chat = fixture.direct(1, 2).await;
        let (sender, mut sender_rx) = fixture.connect(1).await;
        let (peer, mut peer_rx) = fixture.connect(2).await;
        for session in [&sender, &peer] {
            let ack = session
                .handle(frame(EVENT_CHAT_JOIN, Some(1), json!(chat.chat_id)))
                .await
                .expect("join ack");
            assert!(ack.success);
        }

        let ack = sender
            .handle(frame(
                EVENT_MESSAGE_SEND,
                Some(2),
                json!({ "chat_id": chat.chat_id, "content": "hello" }),
            ))
            .await
            .expect("send ack");

        assert!(ack.success);
        let message_id = ack.message_id.expect("message id");
        for rx in [&mut sender_rx, &mut peer_rx] {
            let frames = events(rx);
            assert_eq!(frames.len(), 1);
            assert_eq!(frames[0]["event"], "message:new");
            assert_eq!(frames[0]["data"]["message_id"], message_id.as_str());
            assert_eq!(frames[0]["data"]["content"], "hello");
        }
    }

    #[tokio::test]
    async fn invalid_send_is_not_broadcast() {
        let fixture = Fixture::new(&[1, 2]).await;
        let chat = fixture.direct(1, 2).await;
        let (sender, mut rx) = fixture.connect(1).await;
        sender
            .handle(frame(EVENT_CHAT_JOIN, None, json!(chat.chat_id)))
            .await;

        let ack = sender
            .handle(frame(
                EVENT_MESSAGE_SEND,
                Some(3),
                json!({ "chat_id": chat.chat_id }),
            ))
            .await
            .expect("ack");

        assert_eq!(ack.kind, Some("validation"));
        assert_eq!(ack.details[0].field, "content");
        assert!(events(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn read_broadcasts_modified_count() {
        let fixture = Fixture::new(&[1, 2]).await;
        let chat = fixture.direct(1, 2).await;
        let (sender, _sender_rx) = fixture.connect(1).await;
        let (reader, mut reader_rx) = fixture.connect(2).await;
        reader
            .handle(frame(EVENT_CHAT_JOIN, None, json!(chat.chat_id)))
            .await;
        for text in ["one", "two"] {
            sender
                .handle(frame(
                    EVENT_MESSAGE_SEND,
                    None,
                    json!({ "chat_id": chat.chat_id, "content": text }),
                ))
                .await;
        }

        let ack = reader
            .handle(frame(
                EVENT_MESSAGE_READ,
                Some(4),
                json!({ "chat_id": chat.chat_id }),
            ))
            .await
            .expect("ack");
        assert_eq!(ack.modified, Some(2));

        let frames = events(&mut reader_rx);
        let read = frames.last().expect("read event");
        assert_eq!(read["event"], "message:read");
        assert_eq!(read["data"]["user_id"], user_id(2).as_str());
        assert_eq!(read["data"]["modified"], 2);
        assert!(read["data"]["up_to"].is_null());
    }

    #[tokio::test]
    async fn leave_never_acks_and_unsubscribes() {
        let fixture = Fixture::new(&[1, 2]).await;
        let chat = fixture.direct(1, 2).await;
        let (session, _rx) = fixture.connect(1).await;
        session
            .handle(frame(EVENT_CHAT_JOIN, None, json!(chat.chat_id)))
            .await;
        assert_eq!(fixture.hub.group_size(&chat_group(&chat.chat_id)).await, 1);

        let reply = session
            .handle(frame(EVENT_CHAT_LEAVE, Some(5), json!(chat.chat_id)))
            .await;

        assert!(reply.is_none());
        assert_eq!(fixture.hub.group_size(&chat_group(&chat.chat_id)).await, 0);
    }

    #[tokio::test]
    async fn unknown_events_fail_validation() {
        let fixture = Fixture::new(&[1]).await;
        let (session, _rx) = fixture.connect(1).await;

        let ack = session
            .handle(frame("typing", Some(6), Value::Null))
            .await
            .expect("ack");

        assert_eq!(ack.kind, Some("validation"));
        assert_eq!(ack.details[0].field, "event");
        assert!(session.handle(frame("typing", None, Value::Null)).await.is_none());
    }
}
