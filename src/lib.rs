pub mod config;
pub mod domain;
pub mod ingest;
pub mod observability;
pub mod production;
pub mod store;
pub mod wire;

#[cfg(test)]
mod stateright;

pub use domain::{Record, RecordFields};
pub use ingest::{ClientConfig, StreamDecoder};
pub use production::{ImportClient, ImportServer, ServerConfig};
pub use store::TransactionCoordinator;
