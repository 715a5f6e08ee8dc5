//! Error types for the bluekit library
//!
//! This module defines the transport-level error type. Each protocol layer
//! (scanning, GATT client, GATT server) defines its own error enum alongside
//! its state machine and converts from `TransportError` where it surfaces.

use thiserror::Error;

/// Errors reported by a [`Transport`](crate::transport::Transport)
/// implementation.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("peer is not connected")]
    NotConnected,

    #[error("peer is not known to the radio")]
    UnknownPeer,

    #[error("radio is busy")]
    Busy,

    #[error("radio operation timed out")]
    Timeout,

    #[error("operation not supported by this transport")]
    Unsupported,
}
