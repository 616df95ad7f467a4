//! Framed loopback wire protocol: codec, typed messages, blocking client.

pub mod client;
pub mod error;
pub mod frame;
pub mod message;

pub use client::ServiceClient;
pub use error::ProtoError;
pub use frame::{FRAME_MAGIC, HEADER_LEN, MAX_FRAME_LEN, PROTOCOL_VERSION};
pub use message::{LogFrame, ServiceMessage, ServiceStatus, SocketMessage};
