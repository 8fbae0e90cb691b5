//! The connection registry: the only mutable shared state every inbound
//! frame touches.
//!
//! Three maps behind `tokio::sync::RwLock`: the connection table, topic
//! membership, and the identity index.  Lock order is always connections,
//! then topics, then users; no await happens while a guard is held.
//!
//! Presence semantics are per identity, not per connection: an identity is
//! online while it has at least one live connection, so a second device
//! neither announces a new arrival nor does closing it announce a departure.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::RwLock;

use palaver_shared::{ChatId, ConnId, ServerFrame, UserId};

struct ConnHandle {
    user: Option<UserId>,
    sender: UnboundedSender<ServerFrame>,
    topics: HashSet<ChatId>,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    conns: RwLock<HashMap<ConnId, ConnHandle>>,
    topics: RwLock<HashMap<ChatId, HashSet<ConnId>>>,
    users: RwLock<HashMap<UserId, HashSet<ConnId>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a new, not-yet-authenticated connection.
    pub async fn register(&self, sender: UnboundedSender<ServerFrame>) -> ConnId {
        let id = ConnId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.conns.write().await.insert(
            id,
            ConnHandle {
                user: None,
                sender,
                topics: HashSet::new(),
            },
        );
        id
    }

    /// Bind an authenticated identity to a connection.  Returns `true` when
    /// the identity just came online (this is its first live connection).
    pub async fn bind(&self, conn: ConnId, user: UserId) -> bool {
        {
            let mut conns = self.conns.write().await;
            let Some(handle) = conns.get_mut(&conn) else {
                return false;
            };
            handle.user = Some(user);
        }

        let mut users = self.users.write().await;
        let set = users.entry(user).or_default();
        set.insert(conn);
        set.len() == 1
    }

    /// Add this connection to a conversation topic.
    pub async fn subscribe(&self, conn: ConnId, chat: ChatId) {
        let mut conns = self.conns.write().await;
        let Some(handle) = conns.get_mut(&conn) else {
            return;
        };
        handle.topics.insert(chat);
        drop(conns);

        self.topics.write().await.entry(chat).or_default().insert(conn);
    }

    pub async fn unsubscribe(&self, conn: ConnId, chat: ChatId) {
        let mut conns = self.conns.write().await;
        if let Some(handle) = conns.get_mut(&conn) {
            handle.topics.remove(&chat);
        }
        drop(conns);

        let mut topics = self.topics.write().await;
        if let Some(set) = topics.get_mut(&chat) {
            set.remove(&conn);
            if set.is_empty() {
                topics.remove(&chat);
            }
        }
    }

    /// Senders for every connection subscribed to a topic right now.
    pub async fn connections_for(
        &self,
        chat: ChatId,
    ) -> Vec<(ConnId, UnboundedSender<ServerFrame>)> {
        let topics = self.topics.read().await;
        let Some(subscribers) = topics.get(&chat) else {
            return Vec::new();
        };
        let subscribers: Vec<ConnId> = subscribers.iter().copied().collect();
        drop(topics);

        let conns = self.conns.read().await;
        subscribers
            .into_iter()
            .filter_map(|id| conns.get(&id).map(|h| (id, h.sender.clone())))
            .collect()
    }

    /// Senders for every live connection (broadcast targets).
    pub async fn all_connections(&self) -> Vec<(ConnId, UnboundedSender<ServerFrame>)> {
        self.conns
            .read()
            .await
            .iter()
            .map(|(id, h)| (*id, h.sender.clone()))
            .collect()
    }

    pub async fn sender_of(&self, conn: ConnId) -> Option<UnboundedSender<ServerFrame>> {
        self.conns.read().await.get(&conn).map(|h| h.sender.clone())
    }

    /// Tear a connection down: drop its subscriptions and identity binding.
    /// Returns the identity iff it just went offline (no remaining live
    /// connection), so the caller can refresh presence.
    pub async fn release(&self, conn: ConnId) -> Option<UserId> {
        let handle = self.conns.write().await.remove(&conn)?;

        let mut topics = self.topics.write().await;
        for chat in &handle.topics {
            if let Some(set) = topics.get_mut(chat) {
                set.remove(&conn);
                if set.is_empty() {
                    topics.remove(chat);
                }
            }
        }
        drop(topics);

        let user = handle.user?;
        let mut users = self.users.write().await;
        let Some(set) = users.get_mut(&user) else {
            return None;
        };
        set.remove(&conn);
        if set.is_empty() {
            users.remove(&user);
            Some(user)
        } else {
            None
        }
    }

    /// Distinct identities with at least one live connection, sorted.
    pub async fn online_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.users.read().await.keys().copied().collect();
        users.sort();
        users
    }

    pub async fn online_count(&self) -> usize {
        self.users.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn sender() -> UnboundedSender<ServerFrame> {
        mpsc::unbounded_channel().0
    }

    #[tokio::test]
    async fn presence_tracks_identities_not_connections() {
        let registry = ConnectionRegistry::new();
        let (a, b) = (UserId(1), UserId(2));

        // connect A
        let a1 = registry.register(sender()).await;
        assert!(registry.bind(a1, a).await);
        assert_eq!(registry.online_count().await, 1);

        // connect B
        let b1 = registry.register(sender()).await;
        assert!(registry.bind(b1, b).await);
        assert_eq!(registry.online_count().await, 2);

        // second device for A: no new arrival
        let a2 = registry.register(sender()).await;
        assert!(!registry.bind(a2, a).await);
        assert_eq!(registry.online_count().await, 2);

        // closing A's first device: A still online
        assert_eq!(registry.release(a1).await, None);
        assert_eq!(registry.online_count().await, 2);

        // closing the second device: A goes offline
        assert_eq!(registry.release(a2).await, Some(a));
        assert_eq!(registry.online_count().await, 1);
        assert_eq!(registry.online_users().await, vec![b]);
    }

    #[tokio::test]
    async fn release_drops_all_subscriptions() {
        let registry = ConnectionRegistry::new();
        let conn = registry.register(sender()).await;
        registry.bind(conn, UserId(7)).await;
        registry.subscribe(conn, ChatId(1)).await;
        registry.subscribe(conn, ChatId(2)).await;

        assert_eq!(registry.connections_for(ChatId(1)).await.len(), 1);
        registry.release(conn).await;
        assert!(registry.connections_for(ChatId(1)).await.is_empty());
        assert!(registry.connections_for(ChatId(2)).await.is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_affects_only_one_topic() {
        let registry = ConnectionRegistry::new();
        let conn = registry.register(sender()).await;
        registry.subscribe(conn, ChatId(1)).await;
        registry.subscribe(conn, ChatId(2)).await;

        registry.unsubscribe(conn, ChatId(1)).await;
        assert!(registry.connections_for(ChatId(1)).await.is_empty());
        assert_eq!(registry.connections_for(ChatId(2)).await.len(), 1);
    }

    #[tokio::test]
    async fn unauthenticated_release_reports_no_departure() {
        let registry = ConnectionRegistry::new();
        let conn = registry.register(sender()).await;
        assert_eq!(registry.release(conn).await, None);
    }
}
