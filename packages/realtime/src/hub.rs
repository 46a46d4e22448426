use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bulk_core::{ProgressEvent, UserId};
use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tracing::{debug, info, trace};

/// Identifies one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Per-connection outbound buffer. A full buffer drops new messages.
    pub buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self { buffer: 64 }
    }
}

impl HubConfig {
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }
}

/// Receiving half handed to the transport for one connection.
#[derive(Debug)]
pub struct Subscription {
    pub id: ConnectionId,
    pub user_id: UserId,
    receiver: mpsc::Receiver<ProgressEvent>,
}

impl Subscription {
    /// Next event, or `None` once the hub dropped this connection.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        self.receiver.try_recv().ok()
    }

    /// Next event rendered as the JSON text frame sent to clients.
    pub async fn recv_json(&mut self) -> Option<String> {
        loop {
            let event = self.recv().await?;
            match serde_json::to_string(&event) {
                Ok(text) => return Some(text),
                Err(e) => debug!(error = %e, "Skipping unserializable event"),
            }
        }
    }
}

#[derive(Debug)]
struct Connection {
    sender: mpsc::Sender<ProgressEvent>,
    connected_at: Instant,
    last_heartbeat: Instant,
}

/// Registry of live connections keyed by user.
///
/// Sending never blocks: each connection has a bounded buffer and a message
/// that does not fit is dropped for that connection only.
#[derive(Debug, Default)]
pub struct ProgressHub {
    config: HubConfig,
    connections: RwLock<HashMap<UserId, HashMap<ConnectionId, Connection>>>,
    next_id: AtomicU64,
}

impl ProgressHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a new connection for `user_id`.
    pub fn register_connection(&self, user_id: UserId) -> Subscription {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::channel(self.config.buffer.max(1));
        let now = Instant::now();

        self.connections
            .write()
            .entry(user_id.clone())
            .or_default()
            .insert(
                id,
                Connection {
                    sender,
                    connected_at: now,
                    last_heartbeat: now,
                },
            );

        info!(user_id = %user_id, connection = %id, "Connection registered");
        Subscription {
            id,
            user_id,
            receiver,
        }
    }

    /// Remove a connection. Unknown ids are ignored.
    pub fn unregister_connection(&self, user_id: &UserId, id: ConnectionId) {
        let mut connections = self.connections.write();
        let Some(user_conns) = connections.get_mut(user_id) else {
            return;
        };
        if let Some(conn) = user_conns.remove(&id) {
            info!(
                user_id = %user_id,
                connection = %id,
                connected_secs = conn.connected_at.elapsed().as_secs(),
                "Connection unregistered"
            );
        }
        if user_conns.is_empty() {
            connections.remove(user_id);
        }
    }

    /// Deliver `event` to every connection of `user_id`.
    ///
    /// Returns how many connections accepted it. Closed connections are
    /// removed afterwards.
    pub fn send_to_user(&self, user_id: &UserId, event: &ProgressEvent) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        {
            let connections = self.connections.read();
            let Some(user_conns) = connections.get(user_id) else {
                return 0;
            };

            for (id, conn) in user_conns {
                match conn.sender.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        trace!(user_id = %user_id, connection = %id, "Buffer full, dropping event");
                    }
                    Err(TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }

        for id in closed {
            self.unregister_connection(user_id, id);
        }
        delivered
    }

    /// Refresh the heartbeat of a connection. Returns false if unknown.
    pub fn heartbeat(&self, user_id: &UserId, id: ConnectionId) -> bool {
        let mut connections = self.connections.write();
        match connections.get_mut(user_id).and_then(|c| c.get_mut(&id)) {
            Some(conn) => {
                conn.last_heartbeat = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Drop connections idle longer than `max_idle` or whose receiver is
    /// gone. Returns the number removed.
    pub fn prune_stale(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        let mut connections = self.connections.write();

        connections.retain(|user_id, user_conns| {
            user_conns.retain(|id, conn| {
                let keep = !conn.sender.is_closed()
                    && now.duration_since(conn.last_heartbeat) <= max_idle;
                if !keep {
                    debug!(user_id = %user_id, connection = %id, "Pruning stale connection");
                    removed += 1;
                }
                keep
            });
            !user_conns.is_empty()
        });

        removed
    }

    /// Total live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.read().values().map(HashMap::len).sum()
    }

    pub fn user_connection_count(&self, user_id: &UserId) -> usize {
        self.connections
            .read()
            .get(user_id)
            .map_or(0, HashMap::len)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;
    use bulk_core::{JobId, JobStatus};

    fn event(job: i64, processed: u64) -> ProgressEvent {
        ProgressEvent {
            job_id: JobId(job),
            status: JobStatus::Processing,
            processed_rows: processed,
            total_rows: 10,
            success_count: processed,
            error_count: 0,
            message: format!("{processed} rows"),
        }
    }

    #[tokio::test]
    async fn test_users_are_isolated() {
        let hub = ProgressHub::default();
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");

        let mut a1 = hub.register_connection(alice.clone());
        let mut a2 = hub.register_connection(alice.clone());
        let mut b1 = hub.register_connection(bob.clone());

        assert_eq!(hub.send_to_user(&alice, &event(1, 3)), 2);

        assert_eq!(a1.recv().await.unwrap().processed_rows, 3);
        assert_eq!(a2.recv().await.unwrap().processed_rows, 3);
        assert!(b1.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_unknown_user_is_noop() {
        let hub = ProgressHub::default();
        assert_eq!(hub.send_to_user(&UserId::new("ghost"), &event(1, 0)), 0);
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_full_buffer_drops_without_blocking() {
        let hub = ProgressHub::new(HubConfig::default().with_buffer(2));
        let user = UserId::new("u");
        let mut sub = hub.register_connection(user.clone());

        assert_eq!(hub.send_to_user(&user, &event(1, 1)), 1);
        assert_eq!(hub.send_to_user(&user, &event(1, 2)), 1);
        assert_eq!(hub.send_to_user(&user, &event(1, 3)), 0);

        assert_eq!(sub.recv().await.unwrap().processed_rows, 1);
        assert_eq!(sub.recv().await.unwrap().processed_rows, 2);
        assert!(sub.try_recv().is_none());
        // Full buffers do not unregister.
        assert_eq!(hub.user_connection_count(&user), 1);
    }

    #[tokio::test]
    async fn test_closed_receiver_unregistered_lazily() {
        let hub = ProgressHub::default();
        let user = UserId::new("u");
        let sub = hub.register_connection(user.clone());
        let _keep = hub.register_connection(user.clone());
        drop(sub);

        assert_eq!(hub.user_connection_count(&user), 2);
        assert_eq!(hub.send_to_user(&user, &event(1, 1)), 1);
        assert_eq!(hub.user_connection_count(&user), 1);
    }

    #[tokio::test]
    async fn test_counts_and_unregister() {
        let hub = ProgressHub::default();
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");

        let a = hub.register_connection(alice.clone());
        let _b = hub.register_connection(bob.clone());
        assert_eq!(hub.connection_count(), 2);
        assert_eq!(hub.user_connection_count(&alice), 1);

        hub.unregister_connection(&alice, a.id);
        hub.unregister_connection(&alice, a.id);
        assert_eq!(hub.connection_count(), 1);
        assert_eq!(hub.user_connection_count(&alice), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_stale_connections() {
        let hub = ProgressHub::default();
        let user = UserId::new("u");
        let idle = hub.register_connection(user.clone());
        let active = hub.register_connection(user.clone());

        tokio::time::advance(Duration::from_secs(90)).await;
        assert!(hub.heartbeat(&user, active.id));

        assert_eq!(hub.prune_stale(Duration::from_secs(60)), 1);
        assert_eq!(hub.user_connection_count(&user), 1);
        assert!(!hub.heartbeat(&user, idle.id));
    }

    #[tokio::test]
    async fn test_recv_json_wire_shape() {
        let hub = ProgressHub::default();
        let user = UserId::new("u");
        let mut sub = hub.register_connection(user.clone());

        hub.send_to_user(&user, &event(5, 2));
        let text = sub.recv_json().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["job_id"], 5);
        assert_eq!(value["status"], "processing");
        assert_eq!(value["processed_rows"], 2);
    }
}
