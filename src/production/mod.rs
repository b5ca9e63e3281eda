mod client;
mod connection;
mod server;
mod server_config;
mod session;

pub use client::{ImportClient, ImportError, ImportReport};
pub use connection::ConnectionHandler;
pub use server::{BoundServer, ImportServer};
pub use server_config::ServerConfig;
pub use session::{Session, SessionError};
