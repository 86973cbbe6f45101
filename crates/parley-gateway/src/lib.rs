pub mod connection;
pub mod hub;
pub mod ingest;

pub use hub::{ConnectionId, DeliveryError, FanoutReport, Hub};
pub use ingest::{IngestHandler, IngestOutcome, SenderPolicy};
