//! `Connection`: one execution endpoint plus its shell state
//!
//! A connection carries a working directory and an environment overlay that
//! persist across commands. Transports are stateless per script, so every
//! dispatch prepends a `cd`/`export` prelude that re-applies that state.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fleetsh_exec::{Endpoint, KeySource, LocalShell, SshSession, Transport};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use crate::aggregate::{CommandOutcome, Producer, ResultAggregate};
use crate::command_line::{Arg, CommandLineBuilder, quote, quote_path, split_tilde};
use crate::config::ConnectionOptions;
use crate::error::{CommandError, CoreError};
use crate::registry::CommandRegistry;
use crate::transfer::{TransferSink, TransferSource};

/// Identity reported for local connections
pub const LOCAL_HOST: &str = "local";

/// Handle to one endpoint
///
/// Clones share the underlying session but own their directory, environment
/// and allowed-command state.
#[derive(Clone)]
pub struct Connection {
    host: String,
    transport: Arc<dyn Transport>,
    safe: bool,
    info: bool,
    timeout: Option<Duration>,
    cwd: Option<String>,
    env: Vec<(String, String)>,
    allowed: BTreeSet<String>,
    os_type: Arc<OnceCell<String>>,
    home: Arc<OnceCell<String>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.host)
            .field("transport", &self.transport.transport_type())
            .field("safe", &self.safe)
            .field("cwd", &self.cwd)
            .field("env", &self.env)
            .field("allowed", &self.allowed)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Connection to `[user@]host[:port]` over SSH
    ///
    /// Nothing touches the network until the first command. The options'
    /// user and port only fill in what the endpoint leaves out.
    ///
    /// # Errors
    /// Returns `CoreError::Config` if the endpoint cannot be parsed
    pub fn ssh(endpoint: &str, options: &ConnectionOptions) -> Result<Self, CoreError> {
        let mut endpoint: Endpoint = endpoint
            .parse()
            .map_err(|e: fleetsh_exec::ExecError| CoreError::Config(e.to_string()))?;

        let user = endpoint
            .user
            .clone()
            .or_else(|| options.user.clone())
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_else(|| "root".to_string());
        endpoint.user = Some(user.clone());

        endpoint.port = endpoint.port.or(options.port);

        let host = endpoint.to_string();
        let mut session = SshSession::new(endpoint, user, options.key_sources());
        if let Some(password) = &options.password {
            session = session.with_password(password.clone());
        }

        Ok(Self::with_transport(host, Arc::new(session), options))
    }

    /// Connection running commands on this machine through `sh -c`
    #[must_use]
    pub fn local(options: &ConnectionOptions) -> Self {
        Self::with_transport(LOCAL_HOST, Arc::new(LocalShell::new()), options)
    }

    /// Connection over any transport
    pub fn with_transport(
        host: impl Into<String>,
        transport: Arc<dyn Transport>,
        options: &ConnectionOptions,
    ) -> Self {
        Self {
            host: host.into(),
            transport,
            safe: options.safe,
            info: options.info,
            timeout: options.timeout(),
            cwd: None,
            env: Vec::new(),
            allowed: BTreeSet::new(),
            os_type: Arc::new(OnceCell::new()),
            home: Arc::new(OnceCell::new()),
        }
    }

    /// Connection identity
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Whether arguments are quoted
    #[must_use]
    pub fn is_safe(&self) -> bool {
        self.safe
    }

    pub fn enable_safe_mode(&mut self) {
        self.safe = true;
    }

    /// Let the shell interpret arguments (globs, `$VARS`, pipes, redirects)
    pub fn disable_safe_mode(&mut self) {
        self.safe = false;
    }

    /// Whether the transport holds a live session
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Working directory commands run in, `None` for the login default
    #[must_use]
    pub fn current_dir(&self) -> Option<&str> {
        self.cwd.as_deref()
    }

    /// Change this handle's working directory
    pub fn cd(&mut self, path: &str) {
        let path = self.resolve_path(path);
        debug!(host = %self.host, path = %path, "changing directory");
        self.cwd = Some(path);
    }

    /// Go back to the login directory
    pub fn cd_home(&mut self) {
        self.cwd = None;
    }

    /// A handle on the same session whose working directory is `path`
    ///
    /// `self` keeps its own directory.
    #[must_use]
    pub fn change_directory(&self, path: &str) -> Connection {
        let mut scoped = self.clone();
        scoped.cd(path);
        scoped
    }

    /// Add `name=value` to the environment overlay
    ///
    /// Setting an existing name replaces it and moves it to the end.
    ///
    /// # Errors
    /// Returns `CoreError::Config` if `name` is not a valid shell identifier
    pub fn set_environment_variable(
        &mut self,
        name: &str,
        value: impl Into<String>,
    ) -> Result<(), CoreError> {
        if !is_valid_env_name(name) {
            return Err(CoreError::Config(format!(
                "invalid environment variable name: {name:?}"
            )));
        }

        self.env.retain(|(n, _)| n != name);
        self.env.push((name.to_string(), value.into()));
        Ok(())
    }

    /// Overlay entries in application order
    #[must_use]
    pub fn environment_overlay(&self) -> &[(String, String)] {
        &self.env
    }

    /// Remote environment as `NAME=value`, overlay entries last
    ///
    /// # Errors
    /// Returns an error if `env` cannot be run
    pub async fn environment(&self) -> Result<Vec<String>, CoreError> {
        let listing = self.dispatch("env".to_string()).await?;

        let mut vars: Vec<String> = listing
            .stdout_lines()
            .into_iter()
            .filter(|line| match line.split_once('=') {
                Some((name, _)) => !self.env.iter().any(|(n, _)| n == name),
                None => true,
            })
            .map(str::to_string)
            .collect();

        vars.extend(self.env.iter().map(|(n, v)| format!("{n}={v}")));
        Ok(vars)
    }

    /// Append keys used the next time the session authenticates
    pub fn add_private_keys<I, P>(&self, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let keys: Vec<KeySource> = paths.into_iter().map(|p| KeySource::Path(p.into())).collect();
        debug!(host = %self.host, count = keys.len(), "adding private keys");
        self.transport.add_keys(&keys);
    }

    /// Registered commands plus the ones allowed on this handle
    #[must_use]
    pub fn available_commands(&self) -> BTreeSet<String> {
        let mut names = CommandRegistry::global().names();
        names.extend(self.allowed.iter().cloned());
        names
    }

    /// Whether `name` can be executed on this handle
    #[must_use]
    pub fn can(&self, name: &str) -> bool {
        self.allowed.contains(name) || CommandRegistry::global().contains(name)
    }

    /// Run a registered (or allowed) command
    ///
    /// # Errors
    /// `CoreError::UnknownCommand` for names that are not available,
    /// `CoreError::Command` for a non-zero exit, `CoreError::Transport` when
    /// the endpoint cannot be reached
    #[instrument(skip(self, args), fields(host = %self.host))]
    pub async fn execute(&self, name: &str, args: &[Arg]) -> Result<ResultAggregate, CoreError> {
        if let Some(handler) = CommandRegistry::global().resolve(name) {
            return handler.invoke(self, args).await;
        }

        if self.allowed.contains(name) {
            return self.run_program(name, args).await;
        }

        Err(CoreError::UnknownCommand(name.to_string()))
    }

    /// Opt this handle into a command missing from the registry, then run it
    ///
    /// Later `execute` calls on this handle (and its clones) accept `name`.
    ///
    /// # Errors
    /// Same as `execute`
    pub async fn allow_command(
        &mut self,
        name: &str,
        args: &[Arg],
    ) -> Result<ResultAggregate, CoreError> {
        if self.allowed.insert(name.to_string()) {
            info!(host = %self.host, command = %name, "allowing unregistered command");
        }
        self.run_program(name, args).await
    }

    /// Render `program args` with this handle's quoting mode and run it
    ///
    /// # Errors
    /// Same as `execute`, minus `UnknownCommand`
    pub async fn run_program(
        &self,
        program: &str,
        args: &[Arg],
    ) -> Result<ResultAggregate, CoreError> {
        let line = CommandLineBuilder::build(program, args, self.safe);
        self.dispatch(line).await
    }

    /// Upload files or buffers into `destination_dir`
    ///
    /// Returns the remote paths written, in source order.
    ///
    /// # Errors
    /// Returns an error if a source cannot be read or the transfer fails
    #[instrument(skip(self, sources), fields(host = %self.host))]
    pub async fn upload(
        &self,
        sources: &[TransferSource],
        destination_dir: &str,
    ) -> Result<Vec<String>, CoreError> {
        let dir = self.expand_tilde(&self.resolve_path(destination_dir)).await?;
        let mut written = Vec::with_capacity(sources.len());

        for source in sources {
            let target = join_path(&dir, &source.file_name()?);
            let bytes = source.read().await?;
            self.transport.write_file(&target, &bytes).await?;
            debug!(host = %self.host, path = %target, bytes = bytes.len(), "uploaded");
            written.push(target);
        }

        Ok(written)
    }

    /// Download `remote_path` into `sink`, returning the byte count
    ///
    /// # Errors
    /// Returns an error if the transfer fails or the sink cannot be written
    #[instrument(skip(self, sink), fields(host = %self.host))]
    pub async fn download(
        &self,
        remote_path: &str,
        sink: &mut TransferSink,
    ) -> Result<usize, CoreError> {
        let path = self.expand_tilde(&self.resolve_path(remote_path)).await?;
        let contents = self.transport.read_file(&path).await?;
        let len = contents.len();
        sink.store(contents).await?;
        Ok(len)
    }

    /// Kernel name reported by `uname -s`, cached per session
    ///
    /// # Errors
    /// Returns an error if `uname` fails
    pub async fn os_type(&self) -> Result<String, CoreError> {
        self.os_type
            .get_or_try_init(|| async {
                let result = self.dispatch("uname -s".to_string()).await?;
                Ok::<_, CoreError>(result.stdout())
            })
            .await
            .cloned()
    }

    /// Close the underlying session; the next command reconnects
    ///
    /// # Errors
    /// Returns `CoreError::Transport` if the session does not close cleanly
    pub async fn disconnect(&self) -> Result<(), CoreError> {
        self.transport.disconnect().await?;
        Ok(())
    }

    /// Back-reference stamped on results from this handle
    #[must_use]
    pub fn producer(&self) -> Producer {
        Producer::Connection {
            host: self.host.clone(),
            transport: Arc::downgrade(&self.transport),
        }
    }

    fn resolve_path(&self, path: &str) -> String {
        match &self.cwd {
            Some(cwd) if !path.starts_with('/') && !path.starts_with('~') => join_path(cwd, path),
            _ => path.to_string(),
        }
    }

    /// Replace a leading `~` or `~user` with the directory the shell names
    ///
    /// File transfer does not go through a shell, so it never sees `~`.
    async fn expand_tilde(&self, path: &str) -> Result<String, CoreError> {
        let Some((prefix, rest)) = split_tilde(path) else {
            return Ok(path.to_string());
        };

        let dir = if prefix == "~" {
            self.home
                .get_or_try_init(|| self.shell_word(prefix))
                .await?
                .clone()
        } else {
            self.shell_word(prefix).await?
        };

        Ok(format!("{dir}{rest}"))
    }

    async fn shell_word(&self, word: &str) -> Result<String, CoreError> {
        let line = format!("printf '%s' {word}");
        let output = self.transport.run(&line).await?;
        if !output.success() {
            return Err(CommandError {
                exit_code: output.status,
                stderr: output.stderr,
                command: line,
                host: self.host.clone(),
            }
            .into());
        }
        Ok(output.stdout.trim_end_matches('\n').to_string())
    }

    fn render_script(&self, line: &str) -> String {
        let mut script = String::new();

        if let Some(dir) = &self.cwd {
            script.push_str("cd ");
            script.push_str(&quote_path(dir));
            script.push_str(" && ");
        }
        for (name, value) in &self.env {
            script.push_str(&format!("export {name}={} && ", quote(value)));
        }

        script.push_str(line);
        script
    }

    async fn dispatch(&self, line: String) -> Result<ResultAggregate, CoreError> {
        let script = self.render_script(&line);

        if self.info {
            info!(host = %self.host, command = %line, "running command");
        } else {
            debug!(host = %self.host, command = %line, "running command");
        }

        let output = match self.timeout {
            Some(timeout) => self.transport.run_with_timeout(&script, timeout).await?,
            None => self.transport.run(&script).await?,
        };

        if !output.success() {
            warn!(
                host = %self.host,
                command = %line,
                status = output.status,
                "command failed"
            );
            return Err(CommandError {
                exit_code: output.status,
                stderr: output.stderr,
                command: line,
                host: self.host.clone(),
            }
            .into());
        }

        Ok(ResultAggregate::Scalar(CommandOutcome::from_output(
            line,
            output,
            self.producer(),
        )))
    }
}

fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{name}", dir.trim_end_matches('/'))
    }
}

fn is_valid_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}
