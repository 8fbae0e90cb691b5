//! Per-connection protocol state machine.
//!
//! A session is born unauthenticated and accepts exactly one frame kind in
//! that state: `authenticate`.  Everything else is answered with an `error`
//! frame while the connection stays open, and a deadline closes connections
//! that never authenticate.  After the handshake the session dispatches
//! subscriptions, keep-alives and message submissions.
//!
//! The transport is abstracted to a stream of [`SocketInput`] so the state
//! machine (including the grace-period deadline) is testable without
//! sockets; `ws.rs` adapts the real WebSocket onto it.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{sleep_until, Instant};

use palaver_shared::{ClientFrame, ServerFrame};
use palaver_store::NewMessage;

use crate::auth::{Identity, IdentityProvider};
use crate::error::RelayError;
use crate::fanout::FanoutRouter;
use crate::presence::PresenceTracker;
use crate::registry::ConnectionRegistry;
use crate::store::SharedStore;

/// Everything a session needs, shared by all sessions of one worker.
#[derive(Clone)]
pub struct SessionContext {
    pub registry: Arc<ConnectionRegistry>,
    pub router: FanoutRouter,
    pub presence: Arc<PresenceTracker>,
    pub provider: Arc<dyn IdentityProvider>,
    pub store: SharedStore,
    pub auth_grace: std::time::Duration,
}

/// What the transport feeds into the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketInput {
    Text(String),
    Closed,
}

/// Whether the connection survives the frame that was just handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Close,
}

pub struct Session {
    ctx: SessionContext,
    conn: palaver_shared::ConnId,
    identity: Option<Identity>,
}

impl Session {
    /// Register a fresh connection and wrap it in a session.
    pub async fn new(ctx: SessionContext, sender: UnboundedSender<ServerFrame>) -> Self {
        let conn = ctx.registry.register(sender).await;
        tracing::debug!(conn = %conn, "connection registered");
        Self {
            ctx,
            conn,
            identity: None,
        }
    }

    pub fn conn(&self) -> palaver_shared::ConnId {
        self.conn
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    pub fn auth_grace(&self) -> std::time::Duration {
        self.ctx.auth_grace
    }

    /// Handle one inbound text frame.
    pub async fn handle_text(&mut self, text: &str) -> Control {
        match serde_json::from_str::<ClientFrame>(text) {
            Ok(frame) => self.handle_frame(frame).await,
            Err(e) => {
                tracing::debug!(conn = %self.conn, error = %e, "malformed frame");
                self.reply(ServerFrame::error("malformed frame")).await;
                Control::Continue
            }
        }
    }

    async fn handle_frame(&mut self, frame: ClientFrame) -> Control {
        let Some(identity) = self.identity else {
            return match frame {
                ClientFrame::Authenticate { credential } => self.authenticate(credential).await,
                _ => {
                    self.reply(ServerFrame::error("authenticate first")).await;
                    Control::Continue
                }
            };
        };

        match frame {
            ClientFrame::Authenticate { .. } => {
                self.reply(ServerFrame::error("already authenticated")).await;
                Control::Continue
            }
            ClientFrame::Subscribe { chat_id } => {
                self.subscribe(chat_id, identity.user_id).await;
                Control::Continue
            }
            ClientFrame::Unsubscribe { chat_id } => {
                self.ctx.registry.unsubscribe(self.conn, chat_id).await;
                self.reply(ServerFrame::UnsubscribeResult { ok: true, chat_id })
                    .await;
                Control::Continue
            }
            ClientFrame::Send {
                chat_id,
                kind,
                content,
                reply_to,
                mentions,
            } => {
                self.submit(NewMessage {
                    chat_id,
                    sender_id: identity.user_id,
                    kind,
                    content,
                    reply_to,
                    mentions: mentions.unwrap_or_default(),
                })
                .await;
                Control::Continue
            }
            ClientFrame::Ping {} => {
                self.reply(ServerFrame::Pong {
                    ts: chrono::Utc::now().timestamp_millis(),
                })
                .await;
                Control::Continue
            }
        }
    }

    async fn authenticate(&mut self, credential: String) -> Control {
        let provider = self.ctx.provider.clone();
        let resolved =
            tokio::task::spawn_blocking(move || provider.validate(&credential)).await;

        let identity = match resolved {
            Ok(identity) => identity,
            Err(e) => {
                tracing::error!(conn = %self.conn, error = %e, "credential validation panicked");
                self.reply(ServerFrame::auth_failed("internal error")).await;
                return Control::Close;
            }
        };

        let Some(identity) = identity else {
            tracing::debug!(conn = %self.conn, "invalid credential");
            self.reply(ServerFrame::auth_failed("invalid credential")).await;
            return Control::Close;
        };
        if !identity.active {
            tracing::debug!(conn = %self.conn, user = %identity.user_id, "suspended identity");
            self.reply(ServerFrame::auth_failed("account suspended")).await;
            return Control::Close;
        }

        let came_online = self.ctx.registry.bind(self.conn, identity.user_id).await;
        if came_online {
            self.ctx.presence.refresh().await;
        }
        tracing::info!(conn = %self.conn, user = %identity.user_id, "authenticated");

        self.reply(ServerFrame::auth_ok(identity.user_id)).await;
        self.identity = Some(identity);
        Control::Continue
    }

    async fn subscribe(&mut self, chat_id: palaver_shared::ChatId, user: palaver_shared::UserId) {
        // Only members who are not banned may join the live topic.
        let ok = match self.ctx.store.member_state(chat_id, user).await {
            Ok(Some(member)) => !member.banned,
            Ok(None) => false,
            Err(e) => {
                tracing::error!(conn = %self.conn, chat = %chat_id, error = %e, "membership lookup failed");
                false
            }
        };

        if ok {
            self.ctx.registry.subscribe(self.conn, chat_id).await;
        }
        self.reply(ServerFrame::SubscribeResult { ok, chat_id }).await;
    }

    async fn submit(&mut self, new: NewMessage) {
        let chat = new.chat_id;
        match self.ctx.store.submit(new).await {
            Ok((message, event)) => {
                // Synchronous fan-out to this worker's subscribers; sibling
                // workers pick the record up from the log.
                let delivered = self.ctx.router.deliver(&event).await;
                tracing::debug!(
                    conn = %self.conn,
                    chat = %chat,
                    message = %message.id,
                    delivered,
                    "message committed"
                );
            }
            Err(e) => {
                if !matches!(&e, RelayError::Store(s) if s.is_authorization()) {
                    tracing::error!(conn = %self.conn, chat = %chat, error = %e, "submission failed");
                }
                self.reply(e.client_frame()).await;
            }
        }
    }

    async fn reply(&self, frame: ServerFrame) {
        self.ctx.router.send_to(self.conn, frame).await;
    }

    /// Tear the connection down.  Always completes; store or snapshot
    /// failures during teardown are logged inside the callees.
    pub async fn close(self) {
        if let Some(user) = self.ctx.registry.release(self.conn).await {
            tracing::debug!(conn = %self.conn, user = %user, "identity went offline");
            self.ctx.presence.refresh().await;
        }
        tracing::debug!(conn = %self.conn, "connection closed");
    }
}

/// Drive a session over a transport stream until it closes.
///
/// Before authentication a deadline arms the grace period; once the session
/// authenticates the deadline is never consulted again.
pub async fn run_session<S>(mut session: Session, mut inputs: S)
where
    S: Stream<Item = SocketInput> + Unpin,
{
    let deadline = Instant::now() + session.auth_grace();

    loop {
        let input = if session.is_authenticated() {
            inputs.next().await
        } else {
            tokio::select! {
                _ = sleep_until(deadline) => {
                    tracing::debug!(conn = %session.conn(), "authentication grace period elapsed");
                    break;
                }
                input = inputs.next() => input,
            }
        };

        match input {
            Some(SocketInput::Text(text)) => {
                if session.handle_text(&text).await == Control::Close {
                    break;
                }
            }
            Some(SocketInput::Closed) | None => break,
        }
    }

    session.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use palaver_shared::{ChatId, ChatKind, MemberRole, UserId};
    use palaver_store::{Database, EventLog, MessageStore, SegmentStore};
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    use crate::auth::testing::StaticIdentityProvider;

    struct Rig {
        ctx: SessionContext,
        chat: ChatId,
        alice: UserId,
        bob: UserId,
        _dir: tempfile::TempDir,
    }

    /// alice is a chat member with credential "tok-alice"; bob has
    /// credential "tok-bob" but is not a member.
    fn rig() -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        let alice = db.create_user("alice", false).unwrap().id;
        let bob = db.create_user("bob", false).unwrap().id;
        let chat = db.create_chat(ChatKind::Group, "general").unwrap();
        db.upsert_member(chat, alice, MemberRole::Member).unwrap();

        let store = SharedStore::new(MessageStore::new(
            db,
            SegmentStore::new(dir.path().join("segments"), 1024 * 1024).unwrap(),
            EventLog::open(dir.path().join("events.ndjson")).unwrap(),
            120,
            Some("w-test".into()),
        ));

        let registry = Arc::new(ConnectionRegistry::new());
        let router = FanoutRouter::new(registry.clone());
        let presence = Arc::new(PresenceTracker::new(
            registry.clone(),
            dir.path().join("online.json"),
        ));
        let provider = Arc::new(StaticIdentityProvider::new([
            (
                "tok-alice".to_string(),
                Identity {
                    user_id: alice,
                    active: true,
                    moderator: false,
                },
            ),
            (
                "tok-bob".to_string(),
                Identity {
                    user_id: bob,
                    active: true,
                    moderator: false,
                },
            ),
            (
                "tok-frozen".to_string(),
                Identity {
                    user_id: bob,
                    active: false,
                    moderator: false,
                },
            ),
        ]));

        Rig {
            ctx: SessionContext {
                registry,
                router,
                presence,
                provider,
                store,
                auth_grace: Duration::from_secs(30),
            },
            chat,
            alice,
            bob,
            _dir: dir,
        }
    }

    async fn session(rig: &Rig) -> (Session, UnboundedReceiver<ServerFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Session::new(rig.ctx.clone(), tx).await, rx)
    }

    async fn authed_session(
        rig: &Rig,
        credential: &str,
    ) -> (Session, UnboundedReceiver<ServerFrame>) {
        let (mut session, mut rx) = session(rig).await;
        let frame = format!(r#"{{"action":"authenticate","credential":"{credential}"}}"#);
        assert_eq!(session.handle_text(&frame).await, Control::Continue);
        rx.try_recv().unwrap(); // auth_result
        (session, rx)
    }

    #[tokio::test]
    async fn pre_auth_frames_get_error_and_stay_open() {
        let rig = rig();
        let (mut session, mut rx) = session(&rig).await;

        let control = session
            .handle_text(r#"{"action":"subscribe","chat_id":1}"#)
            .await;
        assert_eq!(control, Control::Continue);
        assert_eq!(rx.try_recv().unwrap(), ServerFrame::error("authenticate first"));

        // The same connection can still authenticate afterwards.
        let control = session
            .handle_text(r#"{"action":"authenticate","credential":"tok-alice"}"#)
            .await;
        assert_eq!(control, Control::Continue);
        assert_eq!(rx.try_recv().unwrap(), ServerFrame::auth_ok(rig.alice));
        assert!(session.is_authenticated());
    }

    #[tokio::test]
    async fn malformed_json_keeps_the_connection_open() {
        let rig = rig();
        let (mut session, mut rx) = session(&rig).await;

        assert_eq!(session.handle_text("{not json").await, Control::Continue);
        assert_eq!(rx.try_recv().unwrap(), ServerFrame::error("malformed frame"));
    }

    #[tokio::test]
    async fn invalid_credential_closes_the_connection() {
        let rig = rig();
        let (mut session, mut rx) = session(&rig).await;

        let control = session
            .handle_text(r#"{"action":"authenticate","credential":"wrong"}"#)
            .await;
        assert_eq!(control, Control::Close);
        assert_eq!(
            rx.try_recv().unwrap(),
            ServerFrame::auth_failed("invalid credential")
        );
    }

    #[tokio::test]
    async fn suspended_identity_is_turned_away() {
        let rig = rig();
        let (mut session, mut rx) = session(&rig).await;

        let control = session
            .handle_text(r#"{"action":"authenticate","credential":"tok-frozen"}"#)
            .await;
        assert_eq!(control, Control::Close);
        assert_eq!(
            rx.try_recv().unwrap(),
            ServerFrame::auth_failed("account suspended")
        );
        assert_eq!(rig.ctx.registry.online_count().await, 0);
    }

    #[tokio::test]
    async fn subscribe_requires_membership() {
        let rig = rig();
        let (mut bob, mut bob_rx) = authed_session(&rig, "tok-bob").await;

        let frame = format!(r#"{{"action":"subscribe","chat_id":{}}}"#, rig.chat);
        bob.handle_text(&frame).await;
        assert_eq!(
            bob_rx.try_recv().unwrap(),
            ServerFrame::SubscribeResult {
                ok: false,
                chat_id: rig.chat
            }
        );

        let (mut alice, mut alice_rx) = authed_session(&rig, "tok-alice").await;
        alice.handle_text(&frame).await;
        assert_eq!(
            alice_rx.try_recv().unwrap(),
            ServerFrame::SubscribeResult {
                ok: true,
                chat_id: rig.chat
            }
        );
    }

    #[tokio::test]
    async fn send_fans_out_to_subscribers_synchronously() {
        let rig = rig();
        let (mut alice, mut alice_rx) = authed_session(&rig, "tok-alice").await;
        let subscribe = format!(r#"{{"action":"subscribe","chat_id":{}}}"#, rig.chat);
        alice.handle_text(&subscribe).await;
        alice_rx.try_recv().unwrap(); // subscribe_result

        let send = format!(
            r#"{{"action":"send","chat_id":{},"kind":"text","content":"hello"}}"#,
            rig.chat
        );
        alice.handle_text(&send).await;

        let ServerFrame::Event { event } = alice_rx.try_recv().unwrap() else {
            panic!("expected event frame");
        };
        assert_eq!(event.chat_id, Some(rig.chat));
        assert_eq!(event.payload["content"], serde_json::json!("hello"));

        // Committed durably, not just pushed.
        let history = rig
            .ctx
            .store
            .blocking(|s| s.db().messages_for_chat(rig.chat, 10, None))
            .unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn non_member_submission_is_rejected_without_mutation() {
        let rig = rig();
        let (mut bob, mut bob_rx) = authed_session(&rig, "tok-bob").await;

        let send = format!(
            r#"{{"action":"send","chat_id":{},"kind":"text","content":"intrusion"}}"#,
            rig.chat
        );
        bob.handle_text(&send).await;
        assert_eq!(
            bob_rx.try_recv().unwrap(),
            ServerFrame::error("Not a member of this conversation")
        );

        let history = rig
            .ctx
            .store
            .blocking(|s| s.db().messages_for_chat(rig.chat, 10, None))
            .unwrap();
        assert!(history.is_empty());
        let _ = rig.bob;
    }

    #[tokio::test]
    async fn second_authenticate_is_rejected_but_stays_open() {
        let rig = rig();
        let (mut session, mut rx) = authed_session(&rig, "tok-alice").await;

        let control = session
            .handle_text(r#"{"action":"authenticate","credential":"tok-alice"}"#)
            .await;
        assert_eq!(control, Control::Continue);
        assert_eq!(
            rx.try_recv().unwrap(),
            ServerFrame::error("already authenticated")
        );
        assert!(session.is_authenticated());
        assert_eq!(rig.ctx.registry.online_count().await, 1);
    }

    #[tokio::test]
    async fn ping_is_answered_with_pong() {
        let rig = rig();
        let (mut session, mut rx) = authed_session(&rig, "tok-alice").await;

        session.handle_text(r#"{"action":"ping"}"#).await;
        assert!(matches!(rx.try_recv().unwrap(), ServerFrame::Pong { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn grace_period_expiry_closes_the_connection() {
        let rig = rig();
        let (session, _rx) = session(&rig).await;
        let conn = session.conn();

        // No input ever arrives; paused time fast-forwards to the deadline.
        run_session(session, futures::stream::pending()).await;
        assert!(rig.ctx.registry.sender_of(conn).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn just_in_time_auth_outlives_the_deadline() {
        let rig = rig();
        let (session, mut rx) = session(&rig).await;

        let (input_tx, input_rx) = mpsc::unbounded_channel::<SocketInput>();
        input_tx
            .send(SocketInput::Text(
                r#"{"action":"authenticate","credential":"tok-alice"}"#.into(),
            ))
            .unwrap();

        let inputs = Box::pin(futures::stream::unfold(input_rx, |mut rx| async move {
            rx.recv().await.map(|input| (input, rx))
        }));
        let task = tokio::spawn(run_session(session, inputs));

        // The handshake lands before the deadline.
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame, ServerFrame::auth_ok(rig.alice));

        // Well past the grace period the session is still alive.
        tokio::time::advance(Duration::from_secs(120)).await;
        tokio::task::yield_now().await;
        assert_eq!(rig.ctx.registry.online_count().await, 1);

        // Transport closes; teardown completes and presence updates.
        input_tx.send(SocketInput::Closed).unwrap();
        task.await.unwrap();
        assert_eq!(rig.ctx.registry.online_count().await, 0);
    }
}
