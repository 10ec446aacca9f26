//! Error type shared by the framing, dispatch and supervision layers.

use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    #[error("not connected to player")]
    NotConnected,

    #[error("already connected to player")]
    AlreadyConnected,

    #[error("dial {path:?}: {source}")]
    Dial {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("timed out waiting for player")]
    Timeout,

    /// The player closed the connection (EOF or reset).
    #[error("connection closed by player")]
    Closed,

    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("decode property {property}: {reason}")]
    Decode { property: String, reason: String },

    /// The player answered with a non-success error field.
    #[error("player error: {0}")]
    Command(String),

    /// The dispatcher was torn down before the response arrived.
    #[error("dispatcher disconnected before response")]
    Disconnected,

    #[error("no observer for property {0}")]
    UnknownObserver(String),

    #[error("no subscription {id} for property {property}")]
    UnknownSubscription { property: String, id: u64 },

    #[error("liveness probe failed: {0}")]
    Probe(String),

    #[error("player process: {0}")]
    Process(String),
}

impl IpcError {
    /// True when a frame read failed in a way that ends the session.
    ///
    /// Malformed frames are protocol errors: the reader stays usable and the
    /// next frame can still be decoded.
    pub fn is_fatal_read(&self) -> bool {
        !matches!(self, IpcError::Json(_) | IpcError::Decode { .. })
    }

    /// True when the peer went away cleanly.
    pub fn is_closed(&self) -> bool {
        matches!(self, IpcError::Closed)
    }
}
