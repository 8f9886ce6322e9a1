//! `LocalExecutor`: the command surface on this machine

use crate::aggregate::ResultAggregate;
use crate::command_line::Arg;
use crate::config::ConnectionOptions;
use crate::connection::Connection;
use crate::error::CoreError;

/// Runs registered commands locally with the same contract as a remote
/// `Connection`
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    conn: Connection,
}

impl LocalExecutor {
    /// Safe-mode local executor
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(&ConnectionOptions::default())
    }

    #[must_use]
    pub fn with_options(options: &ConnectionOptions) -> Self {
        Self {
            conn: Connection::local(options),
        }
    }

    /// Run a registered command
    ///
    /// # Errors
    /// Same as `Connection::execute`
    pub async fn run(&self, name: &str, args: &[Arg]) -> Result<ResultAggregate, CoreError> {
        self.conn.execute(name, args).await
    }

    /// Underlying connection
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Underlying connection, for `cd`, environment and safe-mode changes
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_echo() {
        let result = LocalExecutor::new().run("echo", &["hello".into()]).await.unwrap();
        assert_eq!(result, "hello");
        assert_eq!(result.producer().name(), "local");
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let err = LocalExecutor::new().run("false", &[]).await.unwrap_err();
        assert_eq!(err.exit_code(), Some(1));
    }

    #[tokio::test]
    async fn test_working_directory() {
        let mut local = LocalExecutor::new();
        local.connection_mut().cd("/");
        let result = local.run("pwd", &[]).await.unwrap();
        assert_eq!(result, "/");
    }
}
