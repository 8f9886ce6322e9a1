//! Local command execution using `tokio::process`

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, instrument};

use crate::error::ExecError;
use crate::result::CommandOutput;
use crate::traits::Transport;

/// Local shell transport
///
/// Runs scripts through `sh -c` on this machine so that quoting and
/// metacharacters behave exactly as they would over SSH.
#[derive(Debug, Clone, Default)]
pub struct LocalShell;

impl LocalShell {
    /// Create a new local shell transport
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    #[instrument(skip(self), level = "debug")]
    async fn execute(&self, script: &str) -> Result<CommandOutput, ExecError> {
        let start = Instant::now();

        debug!(script = %script, "executing local script");

        let child = Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecError::SpawnError(e.to_string()))?;

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ExecError::IoError(e.to_string()))?;

        let duration = start.elapsed();

        let status = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        debug!(status = status, duration = ?duration, "local script completed");

        Ok(CommandOutput {
            status,
            stdout,
            stderr,
            duration,
        })
    }
}

#[async_trait]
impl Transport for LocalShell {
    async fn run(&self, script: &str) -> Result<CommandOutput, ExecError> {
        self.execute(script).await
    }

    #[instrument(skip(self, script), level = "debug")]
    async fn run_with_timeout(
        &self,
        script: &str,
        timeout_duration: Duration,
    ) -> Result<CommandOutput, ExecError> {
        let start = Instant::now();

        match timeout(timeout_duration, self.execute(script)).await {
            Ok(result) => result,
            Err(_) => {
                error!(
                    script = %script,
                    timeout = ?timeout_duration,
                    elapsed = ?start.elapsed(),
                    "local script timed out"
                );
                Err(ExecError::Timeout {
                    timeout: timeout_duration,
                })
            }
        }
    }

    #[instrument(skip(self, contents), level = "debug")]
    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), ExecError> {
        tokio::fs::write(path, contents)
            .await
            .map_err(|e| ExecError::Transfer(format!("{path}: {e}")))
    }

    #[instrument(skip(self), level = "debug")]
    async fn read_file(&self, path: &str) -> Result<Vec<u8>, ExecError> {
        tokio::fs::read(path)
            .await
            .map_err(|e| ExecError::Transfer(format!("{path}: {e}")))
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn transport_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_success() {
        let shell = LocalShell::new();
        let result = shell.run("echo hello").await.unwrap();

        assert!(result.success());
        assert_eq!(result.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_failure() {
        let shell = LocalShell::new();
        let result = shell.run("exit 42").await.unwrap();

        assert!(!result.success());
        assert_eq!(result.status, 42);
    }

    #[tokio::test]
    async fn test_run_timeout() {
        let shell = LocalShell::new();
        let result = shell
            .run_with_timeout("sleep 5", Duration::from_millis(100))
            .await;

        assert!(matches!(result, Err(ExecError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_run_with_stderr() {
        let shell = LocalShell::new();
        let result = shell.run("echo error >&2").await.unwrap();

        assert!(result.success());
        assert_eq!(result.stderr.trim(), "error");
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        let path = path.to_str().unwrap();

        let shell = LocalShell::new();
        shell.write_file(path, b"\x00\x01binary").await.unwrap();
        assert_eq!(shell.read_file(path).await.unwrap(), b"\x00\x01binary");
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let shell = LocalShell::new();
        let err = shell.read_file("/nonexistent/fleetsh/file").await.unwrap_err();
        assert!(matches!(err, ExecError::Transfer(_)));
    }
}
