//! Client-side ingest pipeline
//!
//! ```text
//! source file ──► StreamDecoder ──► IngestSender ══ channel ══ IngestReceiver ──► forward()
//!                 (blocking thread, pump.rs)                                      (sender + receiver tasks)
//! ```

pub mod channel;
pub mod config;
pub mod decoder;
pub mod forwarder;
pub mod pump;

pub use channel::{channel, HandoffError, IngestReceiver, IngestSender};
pub use config::ClientConfig;
pub use decoder::{ParseError, StreamDecoder, MAX_RECORD_BYTES};
pub use forwarder::{forward, ForwardReport};
pub use pump::{spawn_decoder, IngestError};
