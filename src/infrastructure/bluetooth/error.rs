//! Error types for the keyboard link

use crate::domain::models::LinkState;
use crate::infrastructure::bluetooth::transport::AdapterState;
use thiserror::Error;

/// Failures of the link layer.
///
/// None of these are fatal: connection problems end up in the status string,
/// send problems drop the command with a log line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("Bluetooth adapter unavailable: {0:?}")]
    AdapterUnavailable(AdapterState),

    #[error("Failed to connect: {0}")]
    ConnectFailed(String),

    #[error("Disconnected unexpectedly: {0}")]
    UnexpectedDisconnect(String),

    #[error("Link busy: {0:?}")]
    Busy(LinkState),

    #[error("No connected device")]
    NotConnected,

    #[error("Write characteristic not found")]
    NoWriteChannel,

    #[error("Failed to encode payload: {0}")]
    EncodingFailed(String),

    #[error("Characteristic supports neither write mode")]
    UnsupportedWriteMode,

    #[error("Transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, LinkError>;
