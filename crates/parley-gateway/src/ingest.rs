use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, warn};

use parley_db::{AppendError, Database, ValidationError};
use parley_types::models::Message;

use crate::hub::{ConnectionId, FanoutReport, Hub};

/// Where the `sender` of an ingested message comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SenderPolicy {
    /// Trust the `sender` field carried by each `sendMessage` event.
    #[default]
    Payload,
    /// Always use the display name bound by the connection's `join`.
    Session,
}

#[derive(Debug, Error)]
#[error("unknown sender policy '{0}' (expected 'payload' or 'session')")]
pub struct UnknownSenderPolicy(pub String);

impl FromStr for SenderPolicy {
    type Err = UnknownSenderPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "payload" => Ok(Self::Payload),
            "session" => Ok(Self::Session),
            _ => Err(UnknownSenderPolicy(s.to_string())),
        }
    }
}

/// What happened to one inbound `sendMessage` event. Nothing here is ever
/// reported back to the sending client.
#[derive(Debug)]
pub enum IngestOutcome {
    Broadcast {
        message: Message,
        report: FanoutReport,
    },
    /// The connection has not joined the room yet.
    Unbound,
    Rejected(ValidationError),
    StoreFailed,
}

/// Persists inbound messages, then fans them out through the hub.
#[derive(Clone)]
pub struct IngestHandler {
    db: Arc<Database>,
    hub: Hub,
    policy: SenderPolicy,
}

impl IngestHandler {
    pub fn new(db: Arc<Database>, hub: Hub, policy: SenderPolicy) -> Self {
        Self { db, hub, policy }
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Store first, broadcast only once the write has succeeded.
    pub async fn handle_send(&self, conn_id: ConnectionId, content: String, sender: String) -> IngestOutcome {
        let Some(bound_name) = self.hub.display_name(conn_id).await else {
            debug!("Dropping message from unbound connection {}", conn_id);
            return IngestOutcome::Unbound;
        };

        let sender = match self.policy {
            SenderPolicy::Payload => sender,
            SenderPolicy::Session => bound_name,
        };

        // Run blocking DB insert off the async runtime
        let db = self.db.clone();
        let result = tokio::task::spawn_blocking(move || db.append_message(&content, &sender, None)).await;

        let message = match result {
            Ok(Ok(message)) => message,
            Ok(Err(AppendError::Validation(e))) => {
                warn!("Rejected message from connection {}: {}", conn_id, e);
                return IngestOutcome::Rejected(e);
            }
            Ok(Err(AppendError::Store(e))) => {
                error!("Failed to persist message from connection {}: {}", conn_id, e);
                return IngestOutcome::StoreFailed;
            }
            Err(e) => {
                error!("spawn_blocking join error: {}", e);
                return IngestOutcome::StoreFailed;
            }
        };

        let report = self.hub.broadcast(&message).await;
        debug!(
            "Message {} from {} delivered to {} connection(s), {} failed",
            message.id, message.sender, report.delivered, report.failed
        );

        IngestOutcome::Broadcast { message, report }
    }
}
