//! Wire protocol: newline-delimited JSON over TCP

mod codec;
mod message;

pub use codec::{
    JsonLinesCodec, WireError, DEFAULT_MAX_FRAME_BYTES, MAX_FRAME_BYTES_MAX, MAX_FRAME_BYTES_MIN,
};
pub use message::{ClientMessage, ServerMessage, UpsertRequest, UpsertResponse};

/// Codec used by the server: reads client frames, writes server frames
pub type ServerCodec = JsonLinesCodec<ClientMessage, ServerMessage>;
/// Codec used by the client: reads server frames, writes client frames
pub type ClientCodec = JsonLinesCodec<ServerMessage, ClientMessage>;
