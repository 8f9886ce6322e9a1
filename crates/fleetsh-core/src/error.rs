//! Core error types for fleetsh-core

use fleetsh_exec::ExecError;
use thiserror::Error;

/// A command ran to completion but exited non-zero
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{host}: `{command}` exited with status {exit_code}: {}", .stderr.trim_end())]
pub struct CommandError {
    /// Exit status reported by the process (-1 when killed by a signal)
    pub exit_code: i32,
    /// Captured standard error
    pub stderr: String,
    /// Rendered command line, without the state prelude
    pub command: String,
    /// Identity of the connection that ran it
    pub host: String,
}

/// Errors that can occur while executing commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Remote or local command exited non-zero
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Invalid or unsupported option
    #[error("configuration error: {0}")]
    Config(String),

    /// Command is neither registered nor allowed on this connection
    #[error("command not available: {0}")]
    UnknownCommand(String),

    /// Transport failure, including authentication, passed through as-is
    #[error(transparent)]
    Transport(#[from] ExecError),

    /// A parallel member task panicked or was cancelled
    #[error("task for {host} failed: {reason}")]
    TaskFailed {
        /// Member whose task failed
        host: String,
        /// Join error text
        reason: String,
    },
}

impl CoreError {
    /// The `CommandError` inside, if this is one
    #[must_use]
    pub fn as_command(&self) -> Option<&CommandError> {
        match self {
            CoreError::Command(e) => Some(e),
            _ => None,
        }
    }

    /// Exit code carried by a command failure
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.as_command().map(|e| e.exit_code)
    }
}
