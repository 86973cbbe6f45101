use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

use parley_types::events::GatewayEvent;
use parley_types::models::Message;

pub type ConnectionId = Uuid;

/// A single broadcast target could not be reached.
#[derive(Debug, Error)]
#[error("connection {0} is no longer receiving")]
pub struct DeliveryError(pub ConnectionId);

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub delivered: usize,
    pub failed: usize,
}

struct Connection {
    /// Set by `join`. Only bound connections are room members.
    display_name: Option<String>,
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

/// Tracks live connections and the members of the chat room.
///
/// Cheap to clone; all clones share the same state. The server creates one
/// and hands it to every connection handler.
#[derive(Clone, Default)]
pub struct Hub {
    inner: Arc<HubInner>,
}

#[derive(Default)]
struct HubInner {
    /// connection_id -> outbound channel and bound name
    connections: RwLock<HashMap<ConnectionId, Connection>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly opened transport connection. It receives nothing
    /// until it joins.
    pub async fn attach(&self) -> (ConnectionId, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.connections.write().await.insert(
            conn_id,
            Connection {
                display_name: None,
                tx,
            },
        );
        (conn_id, rx)
    }

    /// Drop a connection entirely. Implies `leave`.
    pub async fn detach(&self, conn_id: ConnectionId) {
        self.inner.connections.write().await.remove(&conn_id);
    }

    /// Bind `display_name` to the connection and make it a room member.
    /// Joining again replaces the name. Returns false for unknown connections.
    pub async fn join(&self, conn_id: ConnectionId, display_name: String) -> bool {
        match self.inner.connections.write().await.get_mut(&conn_id) {
            Some(conn) => {
                conn.display_name = Some(display_name);
                true
            }
            None => false,
        }
    }

    /// Remove room membership. No-op if the connection is not a member.
    ///
    /// Disconnects never come through here: `detach` drops the whole entry,
    /// membership included.
    pub async fn leave(&self, conn_id: ConnectionId) {
        if let Some(conn) = self.inner.connections.write().await.get_mut(&conn_id) {
            conn.display_name = None;
        }
    }

    pub async fn display_name(&self, conn_id: ConnectionId) -> Option<String> {
        self.inner
            .connections
            .read()
            .await
            .get(&conn_id)
            .and_then(|conn| conn.display_name.clone())
    }

    pub async fn member_count(&self) -> usize {
        self.inner
            .connections
            .read()
            .await
            .values()
            .filter(|conn| conn.display_name.is_some())
            .count()
    }

    /// Deliver `message` to every member joined at the time of the call,
    /// the sender included. A failed recipient is counted and skipped.
    pub async fn broadcast(&self, message: &Message) -> FanoutReport {
        let event = GatewayEvent::NewMessage(message.clone());
        let mut report = FanoutReport::default();

        // Held for the whole fan-out: a concurrent join lands either before or after.
        let connections = self.inner.connections.read().await;
        for (conn_id, conn) in connections.iter() {
            if conn.display_name.is_none() {
                continue;
            }
            match deliver(*conn_id, conn, event.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    debug!("Skipping recipient: {}", e);
                    report.failed += 1;
                }
            }
        }

        report
    }
}

fn deliver(conn_id: ConnectionId, conn: &Connection, event: GatewayEvent) -> Result<(), DeliveryError> {
    conn.tx.send(event).map_err(|_| DeliveryError(conn_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(content: &str, sender: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            content: content.to_string(),
            sender: sender.to_string(),
            timestamp: Utc::now(),
        }
    }

    fn expect_message(rx: &mut mpsc::UnboundedReceiver<GatewayEvent>, expected: &Message) {
        match rx.try_recv() {
            Ok(GatewayEvent::NewMessage(got)) => assert_eq!(&got, expected),
            Err(e) => panic!("expected a message, got {:?}", e),
        }
        assert!(rx.try_recv().is_err(), "received more than one event");
    }

    #[tokio::test]
    async fn broadcast_reaches_every_member_including_sender() {
        let hub = Hub::new();
        let (alice, mut alice_rx) = hub.attach().await;
        let (bob, mut bob_rx) = hub.attach().await;
        assert!(hub.join(alice, "alice".into()).await);
        assert!(hub.join(bob, "bob".into()).await);

        let msg = message("hi", "alice");
        let report = hub.broadcast(&msg).await;

        assert_eq!(report, FanoutReport { delivered: 2, failed: 0 });
        expect_message(&mut alice_rx, &msg);
        expect_message(&mut bob_rx, &msg);
    }

    #[tokio::test]
    async fn left_members_are_skipped() {
        let hub = Hub::new();
        let (alice, mut alice_rx) = hub.attach().await;
        let (bob, mut bob_rx) = hub.attach().await;
        hub.join(alice, "alice".into()).await;
        hub.join(bob, "bob".into()).await;

        hub.leave(bob).await;
        let msg = message("still there?", "alice");
        let report = hub.broadcast(&msg).await;

        assert_eq!(report.delivered, 1);
        expect_message(&mut alice_rx, &msg);
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unbound_connections_receive_nothing() {
        let hub = Hub::new();
        let (_lurker, mut lurker_rx) = hub.attach().await;

        let report = hub.broadcast(&message("hello?", "ghost")).await;
        assert_eq!(report, FanoutReport::default());
        assert!(lurker_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn join_then_leave_is_net_no_op() {
        let hub = Hub::new();
        let (alice, _alice_rx) = hub.attach().await;
        let (bob, _bob_rx) = hub.attach().await;
        hub.join(alice, "alice".into()).await;
        assert_eq!(hub.member_count().await, 1);

        hub.join(bob, "bob".into()).await;
        hub.leave(bob).await;

        assert_eq!(hub.member_count().await, 1);
        assert_eq!(hub.display_name(alice).await.as_deref(), Some("alice"));
        assert_eq!(hub.display_name(bob).await, None);
    }

    #[tokio::test]
    async fn leave_and_detach_are_idempotent() {
        let hub = Hub::new();
        let (conn, _rx) = hub.attach().await;
        hub.leave(conn).await;
        hub.leave(conn).await;
        hub.detach(conn).await;
        hub.detach(conn).await;
        hub.leave(Uuid::new_v4()).await;
        assert_eq!(hub.member_count().await, 0);
    }

    #[tokio::test]
    async fn rejoin_updates_name_without_duplicating_membership() {
        let hub = Hub::new();
        let (conn, mut rx) = hub.attach().await;
        hub.join(conn, "alice".into()).await;
        hub.join(conn, "alicia".into()).await;

        assert_eq!(hub.member_count().await, 1);
        assert_eq!(hub.display_name(conn).await.as_deref(), Some("alicia"));

        let msg = message("once", "alicia");
        hub.broadcast(&msg).await;
        expect_message(&mut rx, &msg);
    }

    #[tokio::test]
    async fn duplicate_display_names_are_distinct_members() {
        let hub = Hub::new();
        let (a, _a_rx) = hub.attach().await;
        let (b, _b_rx) = hub.attach().await;
        hub.join(a, "sam".into()).await;
        hub.join(b, "sam".into()).await;
        assert_eq!(hub.member_count().await, 2);
    }

    #[tokio::test]
    async fn join_unknown_connection_is_rejected() {
        let hub = Hub::new();
        assert!(!hub.join(Uuid::new_v4(), "nobody".into()).await);
        assert_eq!(hub.member_count().await, 0);
    }

    #[tokio::test]
    async fn dead_recipient_does_not_block_others() {
        let hub = Hub::new();
        let (gone, gone_rx) = hub.attach().await;
        let (alive, mut alive_rx) = hub.attach().await;
        hub.join(gone, "gone".into()).await;
        hub.join(alive, "alive".into()).await;
        drop(gone_rx);

        let msg = message("anyone?", "alive");
        let report = hub.broadcast(&msg).await;

        assert_eq!(report, FanoutReport { delivered: 1, failed: 1 });
        expect_message(&mut alive_rx, &msg);
    }

    #[tokio::test]
    async fn detached_connection_is_gone() {
        let hub = Hub::new();
        let (conn, _rx) = hub.attach().await;
        hub.join(conn, "alice".into()).await;
        hub.detach(conn).await;

        assert_eq!(hub.member_count().await, 0);
        assert_eq!(hub.display_name(conn).await, None);
        assert!(!hub.join(conn, "alice".into()).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_joins_are_never_lost() {
        let hub = Hub::new();
        let mut handles = Vec::new();
        for i in 0..32 {
            let hub = hub.clone();
            handles.push(tokio::spawn(async move {
                let (conn, rx) = hub.attach().await;
                hub.join(conn, format!("user{}", i)).await;
                hub.broadcast(&message("ping", "load")).await;
                rx
            }));
        }

        let mut receivers = Vec::new();
        for handle in handles {
            receivers.push(handle.await.unwrap());
        }

        assert_eq!(hub.member_count().await, 32);
        // Every member had joined before its own broadcast, so it saw at least that one
        for rx in &mut receivers {
            assert!(rx.try_recv().is_ok());
        }
    }
}
