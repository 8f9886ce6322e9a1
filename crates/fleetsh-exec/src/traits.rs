//! Transport trait shared by local and SSH execution

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ExecError;
use crate::keys::KeySource;
use crate::result::CommandOutput;

/// Runs fully rendered shell scripts on one endpoint and moves file bytes
///
/// A transport knows nothing about working directories, environment overlays
/// or quoting; callers hand it the final script text.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run a script and collect its complete output
    async fn run(&self, script: &str) -> Result<CommandOutput, ExecError>;

    /// Run a script, failing with `ExecError::Timeout` once `timeout` elapses
    async fn run_with_timeout(
        &self,
        script: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, ExecError>;

    /// Write `contents` to `path` on the endpoint, replacing any existing file
    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), ExecError>;

    /// Read the whole file at `path` on the endpoint
    async fn read_file(&self, path: &str) -> Result<Vec<u8>, ExecError>;

    /// Tear down any session state held by the transport
    async fn disconnect(&self) -> Result<(), ExecError> {
        Ok(())
    }

    /// Append keys to the credential set used on the next connect
    fn add_keys(&self, _keys: &[KeySource]) {}

    /// Whether a session is currently established
    fn is_connected(&self) -> bool;

    /// Short transport name used in logs
    fn transport_type(&self) -> &'static str;
}
