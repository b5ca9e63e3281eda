//! Messages exchanged by the import client and server.
//!
//! ```text
//! client → server   {"type":"upsert","ports":{"AEAJM":{"name":"Ajman",...}}}
//!                   {"type":"end"}
//!                   {"type":"cancel","reason":"..."}
//! server → client   {"type":"response","failed_items_number":0,"message":"..."}
//!                   {"type":"error","message":"..."}
//! ```
//!
//! The client marks a complete stream with an `end` frame. A connection that
//! closes without one was abandoned and its records are discarded. The server
//! answers with exactly one message and closes the connection.

use crate::domain::{Record, RecordFields};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A batch of records keyed by id. The client sends one record per request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpsertRequest {
    pub ports: BTreeMap<String, RecordFields>,
}

impl UpsertRequest {
    pub fn single(record: Record) -> Self {
        let (id, fields) = record.into_parts();
        let mut ports = BTreeMap::new();
        ports.insert(id, fields);
        UpsertRequest { ports }
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn into_records(self) -> impl Iterator<Item = Record> {
        self.ports
            .into_iter()
            .map(|(id, fields)| Record::new(id, fields))
    }
}

/// Final outcome of an upsert stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertResponse {
    pub failed_items_number: u64,
    pub message: String,
}

impl UpsertResponse {
    pub const SUCCESS_MESSAGE: &'static str = "operation completed successfully";
    pub const PARTIAL_MESSAGE: &'static str = "operation didn't complete successfully";

    pub fn from_failed_count(failed_items_number: u64) -> Self {
        let message = if failed_items_number == 0 {
            Self::SUCCESS_MESSAGE
        } else {
            Self::PARTIAL_MESSAGE
        };
        UpsertResponse {
            failed_items_number,
            message: message.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed_items_number == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Upsert(UpsertRequest),
    /// Every record has been sent; the server commits
    End,
    /// Abandon the stream; the server aborts the open transaction
    Cancel { reason: String },
}

impl ClientMessage {
    pub fn upsert_one(record: Record) -> Self {
        ClientMessage::Upsert(UpsertRequest::single(record))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Response(UpsertResponse),
    Error { message: String },
}
