//! fleetsh-exec: transports for running shell scripts
//!
//! Provides the `Transport` trait with a local `sh -c` implementation and an
//! SSH implementation (russh, with SFTP for file transfer).

pub mod error;
pub mod keys;
pub mod local;
pub mod result;
pub mod ssh;
pub mod traits;

pub use error::ExecError;
pub use keys::{KeyError, KeySource, ResolvedKey};
pub use local::LocalShell;
pub use result::{CommandOutput, Endpoint};
pub use ssh::SshSession;
pub use traits::Transport;
