//! SSH transport using the russh crate, with SFTP for file transfer

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use russh::keys::ssh_key;
use russh::keys::{PrivateKeyWithHashAlg, load_secret_key};
use russh::{ChannelMsg, Disconnect, client};
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::OpenFlags;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use crate::error::ExecError;
use crate::keys::{KeySource, default_identities};
use crate::result::{CommandOutput, Endpoint};
use crate::traits::Transport;

/// Resolve `source` and parse the private key it holds
fn load_identity(source: &KeySource) -> Result<ssh_key::PrivateKey, ExecError> {
    let resolved = source
        .resolve()
        .map_err(|e| ExecError::SshKeyError(e.to_string()))?;
    load_secret_key(resolved.path(), None)
        .map_err(|e| ExecError::SshKeyError(format!("{}: {e}", resolved.path().display())))
}

/// SSH client handler for russh
#[derive(Debug)]
struct SshClientHandler;

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Accept all server keys (like StrictHostKeyChecking=no)
        Ok(true)
    }
}

/// One SSH session to a single host
///
/// The session is established on first use and reused for every later
/// script; the session lock serializes scripts so they run in call order.
pub struct SshSession {
    endpoint: Endpoint,
    user: String,
    keys: StdMutex<Vec<KeySource>>,
    password: Option<String>,
    session: Mutex<Option<client::Handle<SshClientHandler>>>,
    connected: AtomicBool,
}

impl std::fmt::Debug for SshSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshSession")
            .field("endpoint", &self.endpoint)
            .field("user", &self.user)
            .field("keys", &self.key_snapshot())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl SshSession {
    /// Create a session handle; nothing touches the network until first use
    pub fn new(endpoint: Endpoint, user: impl Into<String>, keys: Vec<KeySource>) -> Self {
        Self {
            endpoint,
            user: user.into(),
            keys: StdMutex::new(keys),
            password: None,
            session: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    /// Try password authentication after every key has been rejected
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Endpoint this session talks to
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn key_snapshot(&self) -> Vec<KeySource> {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[instrument(skip(self), fields(host = %self.endpoint.host))]
    async fn connect(&self) -> Result<(), ExecError> {
        let mut session_lock = self.session.lock().await;

        if session_lock.is_some() {
            return Ok(());
        }

        info!(
            host = %self.endpoint.host,
            port = self.endpoint.port(),
            user = %self.user,
            "connecting to SSH"
        );

        let config = Arc::new(client::Config::default());

        let mut session = client::connect(
            config,
            (&self.endpoint.host[..], self.endpoint.port()),
            SshClientHandler,
        )
        .await
        .map_err(|e| ExecError::ConnectionFailed(e.to_string()))?;

        self.authenticate(&mut session).await?;

        info!(host = %self.endpoint.host, "SSH connected and authenticated");

        *session_lock = Some(session);
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn authenticate(
        &self,
        session: &mut client::Handle<SshClientHandler>,
    ) -> Result<(), ExecError> {
        let mut keys = self.key_snapshot();
        if keys.is_empty() {
            keys = default_identities();
        }

        let mut last_failure = String::from("no authentication method available");
        let mut key_error = None;
        let mut offered = false;

        for source in &keys {
            let key_pair = match load_identity(source) {
                Ok(key_pair) => key_pair,
                Err(e) => {
                    warn!(key = ?source, error = %e, "skipping unusable key");
                    key_error = Some(e);
                    continue;
                }
            };
            offered = true;

            let hash_alg = session
                .best_supported_rsa_hash()
                .await
                .ok()
                .flatten()
                .flatten();
            let auth_res = session
                .authenticate_publickey(
                    &self.user,
                    PrivateKeyWithHashAlg::new(Arc::new(key_pair), hash_alg),
                )
                .await
                .map_err(|e| ExecError::AuthenticationFailed(e.to_string()))?;

            if auth_res.success() {
                debug!(key = ?source, "public key accepted");
                return Ok(());
            }
            last_failure = format!("public key rejected: {source:?}");
        }

        if let Some(password) = &self.password {
            let auth_res = session
                .authenticate_password(&self.user, password)
                .await
                .map_err(|e| ExecError::AuthenticationFailed(e.to_string()))?;
            if auth_res.success() {
                return Ok(());
            }
            last_failure = "password rejected".to_string();
        }

        match key_error {
            Some(e) if !offered && self.password.is_none() => Err(e),
            _ => Err(ExecError::AuthenticationFailed(last_failure)),
        }
    }

    #[instrument(skip(self, script), fields(host = %self.endpoint.host))]
    async fn execute_remote(&self, script: &str) -> Result<CommandOutput, ExecError> {
        let session_lock = self.session.lock().await;
        let session = session_lock.as_ref().ok_or(ExecError::NotConnected)?;

        debug!(script = %script, "executing remote script");

        let start = Instant::now();

        let mut channel = session
            .channel_open_session()
            .await
            .map_err(|e| ExecError::IoError(e.to_string()))?;

        channel
            .exec(true, script)
            .await
            .map_err(|e| ExecError::IoError(e.to_string()))?;

        let mut status = -1;
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        // exit-status may arrive after EOF, so drain until the channel closes
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
                ChannelMsg::ExtendedData { data, ext: 1 } => stderr.extend_from_slice(&data),
                ChannelMsg::ExitStatus { exit_status } => {
                    status = exit_status.cast_signed();
                }
                _ => {}
            }
        }

        let duration = start.elapsed();
        let stdout = String::from_utf8_lossy(&stdout).to_string();
        let stderr = String::from_utf8_lossy(&stderr).to_string();

        debug!(status = status, duration = ?duration, "remote script completed");

        Ok(CommandOutput {
            status,
            stdout,
            stderr,
            duration,
        })
    }

    async fn open_sftp(&self) -> Result<SftpSession, ExecError> {
        self.connect().await?;

        let session_lock = self.session.lock().await;
        let session = session_lock.as_ref().ok_or(ExecError::NotConnected)?;

        let channel = session
            .channel_open_session()
            .await
            .map_err(|e| ExecError::IoError(e.to_string()))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| ExecError::Transfer(e.to_string()))?;

        SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| ExecError::Transfer(e.to_string()))
    }
}

#[async_trait]
impl Transport for SshSession {
    async fn run(&self, script: &str) -> Result<CommandOutput, ExecError> {
        self.connect().await?;
        self.execute_remote(script).await
    }

    #[instrument(skip(self, script), fields(host = %self.endpoint.host))]
    async fn run_with_timeout(
        &self,
        script: &str,
        timeout_duration: Duration,
    ) -> Result<CommandOutput, ExecError> {
        let start = Instant::now();

        // Ensure connection first (outside of timeout)
        self.connect().await?;

        match timeout(timeout_duration, self.execute_remote(script)).await {
            Ok(result) => result,
            Err(_) => {
                error!(
                    script = %script,
                    timeout = ?timeout_duration,
                    elapsed = ?start.elapsed(),
                    "remote script timed out"
                );
                Err(ExecError::Timeout {
                    timeout: timeout_duration,
                })
            }
        }
    }

    #[instrument(skip(self, contents), fields(host = %self.endpoint.host))]
    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), ExecError> {
        let sftp = self.open_sftp().await?;

        let mut file = sftp
            .open_with_flags(
                path,
                OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE,
            )
            .await
            .map_err(|e| ExecError::Transfer(format!("{path}: {e}")))?;
        file.write_all(contents)
            .await
            .map_err(|e| ExecError::Transfer(format!("{path}: {e}")))?;
        file.flush()
            .await
            .map_err(|e| ExecError::Transfer(format!("{path}: {e}")))?;
        file.shutdown()
            .await
            .map_err(|e| ExecError::Transfer(format!("{path}: {e}")))?;

        debug!(path = %path, bytes = contents.len(), "uploaded file");
        Ok(())
    }

    #[instrument(skip(self), fields(host = %self.endpoint.host))]
    async fn read_file(&self, path: &str) -> Result<Vec<u8>, ExecError> {
        let sftp = self.open_sftp().await?;

        let mut file = sftp
            .open_with_flags(path, OpenFlags::READ)
            .await
            .map_err(|e| ExecError::Transfer(format!("{path}: {e}")))?;

        let mut contents = Vec::new();
        file.read_to_end(&mut contents)
            .await
            .map_err(|e| ExecError::Transfer(format!("{path}: {e}")))?;

        debug!(path = %path, bytes = contents.len(), "downloaded file");
        Ok(contents)
    }

    async fn disconnect(&self) -> Result<(), ExecError> {
        let mut session_lock = self.session.lock().await;

        if let Some(session) = session_lock.take() {
            self.connected.store(false, Ordering::Release);
            session
                .disconnect(Disconnect::ByApplication, "", "English")
                .await
                .map_err(|e| ExecError::IoError(e.to_string()))?;
            info!(host = %self.endpoint.host, "SSH disconnected");
        }
        Ok(())
    }

    fn add_keys(&self, keys: &[KeySource]) {
        let mut current = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        for key in keys {
            if !current.contains(key) {
                current.push(key.clone());
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn transport_type(&self) -> &'static str {
        "ssh"
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        if self.session.get_mut().is_some() {
            debug!(host = %self.endpoint.host, "dropping live SSH session");
        }
    }
}
