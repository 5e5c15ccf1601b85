//! Error types for nvim-rpc.

use std::time::Duration;

use rmpv::Value;
use thiserror::Error;

use crate::protocol::DecodeError;

/// Main error type for all RPC operations.
#[derive(Debug, Error)]
pub enum RpcError {
    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// MsgPack serialization error (typed values).
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error (typed values).
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// A raw msgpack value could not be read.
    #[error("MsgPack value decode error: {0}")]
    ValueDecode(#[from] rmpv::decode::Error),

    /// A raw msgpack value could not be written.
    #[error("MsgPack value encode error: {0}")]
    Encode(String),

    /// A single inbound frame had an invalid shape.
    #[error("Frame decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Unrecoverable protocol violation (stream is torn down).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The peer answered with a non-nil error field.
    #[error("Remote error from '{method}': {error}")]
    Remote {
        /// Method of the failed call.
        method: String,
        /// Error value exactly as sent by the peer.
        error: Value,
    },

    /// Connection closed, either by I/O failure or explicit shutdown.
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// No response arrived within the call timeout.
    #[error("Call to '{method}' timed out after {timeout:?}")]
    Timeout {
        /// Method of the timed out call.
        method: String,
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// Pending call limit reached.
    #[error("Too many pending calls (limit {0})")]
    TooManyPending(usize),

    /// An atomic batch stopped at a failing call.
    #[error("Atomic call failed at index {index}: {error}")]
    PartialBatchFailure {
        /// Index of the failing call within the batch.
        index: usize,
        /// Error value reported for the failing call.
        error: Value,
        /// Results of the calls that succeeded before the failure.
        results: Vec<Value>,
    },

    /// Failure reported by a registered handler.
    #[error("Handler error: {0}")]
    Handler(String),

    /// Backpressure timeout - write buffer full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,
}

impl RpcError {
    /// Returns the peer's error value for [`RpcError::Remote`].
    pub fn remote_value(&self) -> Option<&Value> {
        match self {
            RpcError::Remote { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Whether this error means the connection is gone.
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, RpcError::ConnectionClosed(_))
    }
}

/// Result type alias using RpcError.
pub type Result<T> = std::result::Result<T, RpcError>;
