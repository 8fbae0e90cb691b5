//! The HTTP/WebSocket surface: `/ws` upgrades into a relay session,
//! `/health` answers liveness probes.  Everything else (registration,
//! friends, uploads, admin) lives in external producers that talk to the
//! store and event log directly.

use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::Response,
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::session::{run_session, Session, SessionContext, SocketInput};

#[derive(Clone)]
pub struct AppState {
    pub ctx: SessionContext,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    online: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        online: state.ctx.presence.online_count().await,
    })
}

async fn ws_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, peer, socket))
}

async fn handle_socket(state: AppState, peer: SocketAddr, socket: WebSocket) {
    tracing::debug!(%peer, "websocket connected");

    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel();
    let session = Session::new(state.ctx, frame_tx).await;

    let (mut ws_tx, ws_rx) = socket.split();

    // Writer: drain the session's outbound queue into the sink.  A send
    // failure means the peer is gone; the reader side tears the session down.
    let writer = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            let json = match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(error = %e, "frame serialization failed");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let inputs = ws_rx.filter_map(|message| async move {
        match message {
            Ok(Message::Text(text)) => Some(SocketInput::Text(text)),
            Ok(Message::Close(_)) | Err(_) => Some(SocketInput::Closed),
            // Pings and pongs are handled by the transport; binary frames
            // are not part of the protocol.
            Ok(_) => None,
        }
    });

    run_session(session, Box::pin(inputs)).await;

    // Session teardown released the connection and with it the last queue
    // sender, so the writer drains any remaining frames (e.g. the final
    // auth_result rejection) and exits on its own.  Never abort it early.
    let _ = writer.await;
    tracing::debug!(%peer, "websocket disconnected");
}

pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "listening for websocket connections");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use palaver_shared::ServerFrame;
    use palaver_store::{Database, EventLog, MessageStore, SegmentStore};

    use crate::auth::testing::StaticIdentityProvider;
    use crate::auth::Identity;
    use crate::fanout::FanoutRouter;
    use crate::presence::PresenceTracker;
    use crate::registry::ConnectionRegistry;
    use crate::store::SharedStore;

    fn ctx(dir: &Path) -> SessionContext {
        let store = SharedStore::new(MessageStore::new(
            Database::open_in_memory().unwrap(),
            SegmentStore::new(dir.join("segments"), 1024 * 1024).unwrap(),
            EventLog::open(dir.join("events.ndjson")).unwrap(),
            120,
            None,
        ));
        let registry = Arc::new(ConnectionRegistry::new());
        SessionContext {
            router: FanoutRouter::new(registry.clone()),
            presence: Arc::new(PresenceTracker::new(
                registry.clone(),
                dir.join("online.json"),
            )),
            registry,
            provider: Arc::new(StaticIdentityProvider::new(
                Vec::<(String, Identity)>::new(),
            )),
            store,
            auth_grace: Duration::from_secs(30),
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn handshake_rejection_is_flushed_before_teardown() {
        let dir = tempfile::tempdir().unwrap();
        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel();
        let session = Session::new(ctx(dir.path()), frame_tx).await;

        // Stand-in for the sink-draining writer task in `handle_socket`:
        // collects everything until the queue closes.
        let writer = tokio::spawn(async move {
            let mut sent = Vec::new();
            while let Some(frame) = frame_rx.recv().await {
                sent.push(frame);
            }
            sent
        });

        let inputs = futures::stream::iter([SocketInput::Text(
            r#"{"action":"authenticate","credential":"wrong"}"#.into(),
        )]);
        run_session(session, Box::pin(inputs)).await;

        // Teardown closed the queue, but awaiting the writer (instead of
        // aborting it) must still surface the final rejection frame.
        let sent = writer.await.unwrap();
        assert_eq!(sent, vec![ServerFrame::auth_failed("invalid credential")]);
    }
}
