//! Fan-out of event records to live connections.
//!
//! Targeted records go to the target topic's subscribers; untargeted records
//! broadcast to every connection.  Delivery is best effort: each connection
//! has its own unbounded queue, and a closed queue means the peer is gone --
//! that connection is released and everyone else is unaffected.

use std::sync::Arc;

use palaver_shared::{ConnId, EventKind, EventRecord, ServerFrame};

use crate::registry::ConnectionRegistry;

#[derive(Clone)]
pub struct FanoutRouter {
    registry: Arc<ConnectionRegistry>,
}

impl FanoutRouter {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Push one event record to its audience.  Returns the number of
    /// connections it was handed to.
    pub async fn deliver(&self, record: &EventRecord) -> usize {
        let targets = match record.chat_id {
            Some(chat) => self.registry.connections_for(chat).await,
            None => self.registry.all_connections().await,
        };

        let frame = frame_for(record);
        self.dispatch(targets, &frame).await
    }

    /// Broadcast a frame to every live connection.
    pub async fn broadcast(&self, frame: ServerFrame) -> usize {
        let targets = self.registry.all_connections().await;
        self.dispatch(targets, &frame).await
    }

    /// Direct reply to one connection.  `false` when it is already gone.
    pub async fn send_to(&self, conn: ConnId, frame: ServerFrame) -> bool {
        let Some(sender) = self.registry.sender_of(conn).await else {
            return false;
        };
        if sender.send(frame).is_err() {
            self.registry.release(conn).await;
            return false;
        }
        true
    }

    async fn dispatch(
        &self,
        targets: Vec<(ConnId, tokio::sync::mpsc::UnboundedSender<ServerFrame>)>,
        frame: &ServerFrame,
    ) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();

        for (conn, sender) in targets {
            if sender.send(frame.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push(conn);
            }
        }

        for conn in dead {
            tracing::debug!(conn = %conn, "dropping connection with closed queue");
            self.registry.release(conn).await;
        }

        delivered
    }
}

/// Wire representation of a log record.  Presence records collapse into the
/// dedicated `presence` frame; everything else travels as an `event` frame.
fn frame_for(record: &EventRecord) -> ServerFrame {
    match record.kind {
        EventKind::Presence => ServerFrame::Presence {
            online: record.payload["online"].as_u64().unwrap_or(0) as usize,
        },
        _ => ServerFrame::Event {
            event: record.clone(),
        },
    }
}
