//! Error types for fleetsh-exec

use std::time::Duration;

use thiserror::Error;

/// Errors raised by a transport while reaching an endpoint or moving bytes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    /// Failed to connect to remote host
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Command timed out
    #[error("command timed out after {timeout:?}")]
    Timeout {
        /// Timeout duration that was exceeded
        timeout: Duration,
    },

    /// SSH key error
    #[error("SSH key error: {0}")]
    SshKeyError(String),

    /// Process spawn error
    #[error("failed to spawn process: {0}")]
    SpawnError(String),

    /// I/O error during execution
    #[error("I/O error: {0}")]
    IoError(String),

    /// Connection not established
    #[error("not connected")]
    NotConnected,

    /// File transfer failed
    #[error("file transfer failed: {0}")]
    Transfer(String),

    /// Endpoint string could not be parsed
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}
