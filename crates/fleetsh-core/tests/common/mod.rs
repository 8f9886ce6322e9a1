#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use fleetsh_exec::error::ExecError;
use fleetsh_exec::keys::KeySource;
use fleetsh_exec::result::CommandOutput;
use fleetsh_exec::traits::Transport;
use tokio::sync::Barrier;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Transport double that answers every script with its own name
#[derive(Default)]
pub struct MockTransport {
    pub name: String,
    pub delay: Duration,
    pub failure: Option<(i32, String)>,
    pub barrier: Option<Arc<Barrier>>,
    pub finished: Option<Arc<Mutex<Vec<String>>>>,
    pub scripts: Mutex<Vec<String>>,
    pub keys: Mutex<Vec<KeySource>>,
    pub files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MockTransport {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self, status: i32, stderr: &str) -> Self {
        self.failure = Some((status, stderr.to_string()));
        self
    }

    pub fn with_barrier(mut self, barrier: Arc<Barrier>) -> Self {
        self.barrier = Some(barrier);
        self
    }

    pub fn recording_completion(mut self, finished: Arc<Mutex<Vec<String>>>) -> Self {
        self.finished = Some(finished);
        self
    }

    pub fn scripts(&self) -> Vec<String> {
        self.scripts.lock().unwrap().clone()
    }

    pub fn keys(&self) -> Vec<KeySource> {
        self.keys.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn run(&self, script: &str) -> Result<CommandOutput, ExecError> {
        self.scripts.lock().unwrap().push(script.to_string());

        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }
        tokio::time::sleep(self.delay).await;

        if let Some(finished) = &self.finished {
            finished.lock().unwrap().push(self.name.clone());
        }

        let (status, stdout, stderr) = match &self.failure {
            Some((status, stderr)) => (*status, String::new(), stderr.clone()),
            None => (0, format!("{}\n", self.name), String::new()),
        };

        Ok(CommandOutput {
            status,
            stdout,
            stderr,
            duration: self.delay,
        })
    }

    async fn run_with_timeout(
        &self,
        script: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, ExecError> {
        tokio::time::timeout(timeout, self.run(script))
            .await
            .map_err(|_| ExecError::Timeout { timeout })?
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), ExecError> {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), contents.to_vec());
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, ExecError> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| ExecError::Transfer(format!("{path}: no such file")))
    }

    fn add_keys(&self, keys: &[KeySource]) {
        self.keys.lock().unwrap().extend_from_slice(keys);
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn transport_type(&self) -> &'static str {
        "mock"
    }
}
