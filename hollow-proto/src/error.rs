//! Error types for the wire protocol.

use thiserror::Error;

/// Transport and envelope errors. All of these are fatal to the current
/// connection only; callers close the socket and the peer keeps serving.
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("I/O error during {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("bad frame magic 0x{found:08x}")]
    BadMagic { found: u32 },

    #[error("protocol version mismatch: peer sent {found}, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("frame length {len} exceeds limit")]
    FrameTooLarge { len: u64 },

    #[error("connection closed mid-frame")]
    Truncated,

    #[error("message JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid base64 echo payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("message kind '{kind}' is not a request")]
    NotARequest { kind: &'static str },

    #[error("connection closed before '{expected}' reply arrived")]
    MissingReply { expected: &'static str },

    #[error("unexpected reply kind '{kind}'")]
    UnexpectedReply { kind: String },
}

pub(crate) fn io_err(context: &'static str, source: std::io::Error) -> ProtoError {
    ProtoError::Io { context, source }
}
