//! `HostGroup`: broadcast one command to many connections
//!
//! Results come back in member order whatever order members finish in, and a
//! failing member never stops its siblings: its error lands in a `Failed`
//! slot tagged with the member's identity.

use std::path::PathBuf;

use tracing::{error, info, instrument, warn};

use crate::aggregate::{Producer, ResultAggregate};
use crate::command_line::Arg;
use crate::config::{ConnectionOptions, GroupConfig};
use crate::connection::Connection;
use crate::error::CoreError;
use crate::registry::CommandRegistry;

/// A member to add: a bare endpoint or an existing connection
#[derive(Debug, Clone)]
pub enum Member {
    /// `[user@]host[:port]`, connected with the group's defaults
    Host(String),
    /// Connection used as is
    Connection(Connection),
}

impl From<&str> for Member {
    fn from(host: &str) -> Self {
        Member::Host(host.to_string())
    }
}

impl From<String> for Member {
    fn from(host: String) -> Self {
        Member::Host(host)
    }
}

impl From<Connection> for Member {
    fn from(conn: Connection) -> Self {
        Member::Connection(conn)
    }
}

/// Named, ordered set of connections
#[derive(Debug, Clone)]
pub struct HostGroup {
    name: String,
    defaults: ConnectionOptions,
    members: Vec<Connection>,
    parallel: bool,
}

impl HostGroup {
    /// Empty sequential group; `defaults` apply to members added by hostname
    pub fn new(name: impl Into<String>, defaults: ConnectionOptions) -> Self {
        Self {
            name: name.into(),
            defaults,
            members: Vec::new(),
            parallel: false,
        }
    }

    /// Group described by a `[[group]]` config entry
    ///
    /// # Errors
    /// Returns `CoreError::Config` if a host cannot be parsed
    pub fn from_config(group: &GroupConfig, defaults: &ConnectionOptions) -> Result<Self, CoreError> {
        let options = group.options.clone().unwrap_or_else(|| defaults.clone());
        let mut host_group = Self::new(group.name.clone(), options);
        host_group.set_parallel(group.parallel);
        host_group.add_connections(group.hosts.iter().map(String::as_str))?;
        Ok(host_group)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Members in execution order
    #[must_use]
    pub fn members(&self) -> &[Connection] {
        &self.members
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    #[must_use]
    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    /// Run members concurrently (`true`) or one after another
    pub fn set_parallel(&mut self, parallel: bool) {
        self.parallel = parallel;
    }

    /// Append members; hostnames become connections with the group defaults
    ///
    /// # Errors
    /// Returns `CoreError::Config` if a hostname cannot be parsed; members
    /// before it are kept
    pub fn add_connections<I, M>(&mut self, members: I) -> Result<(), CoreError>
    where
        I: IntoIterator<Item = M>,
        M: Into<Member>,
    {
        for member in members {
            let conn = match member.into() {
                Member::Host(host) => Connection::ssh(&host, &self.defaults)?,
                Member::Connection(conn) => {
                    conn.add_private_keys(self.defaults.keys.iter().cloned());
                    conn
                }
            };
            info!(group = %self.name, host = %conn.host(), "adding member");
            self.members.push(conn);
        }
        Ok(())
    }

    /// Append one member by hostname
    ///
    /// # Errors
    /// Returns `CoreError::Config` if the hostname cannot be parsed
    pub fn add_host(&mut self, host: &str) -> Result<(), CoreError> {
        self.add_connections([host])
    }

    /// Append one existing connection
    pub fn add_connection(&mut self, conn: Connection) {
        conn.add_private_keys(self.defaults.keys.iter().cloned());
        info!(group = %self.name, host = %conn.host(), "adding member");
        self.members.push(conn);
    }

    /// Add keys to every current member and to members added later
    pub fn add_private_keys<I, P>(&mut self, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let paths: Vec<PathBuf> = paths.into_iter().map(Into::into).collect();
        for member in &self.members {
            member.add_private_keys(paths.iter().cloned());
        }
        for path in paths {
            if !self.defaults.keys.contains(&path) {
                self.defaults.keys.push(path);
            }
        }
    }

    /// Change every member's working directory
    pub fn cd(&mut self, path: &str) {
        for member in &mut self.members {
            member.cd(path);
        }
    }

    /// Set an overlay variable on every member
    ///
    /// # Errors
    /// Returns `CoreError::Config` if `name` is not a valid shell identifier
    pub fn set_environment_variable(&mut self, name: &str, value: &str) -> Result<(), CoreError> {
        for member in &mut self.members {
            member.set_environment_variable(name, value)?;
        }
        Ok(())
    }

    /// Back-reference stamped on fan-out results
    #[must_use]
    pub fn producer(&self) -> Producer {
        Producer::Group {
            name: self.name.clone(),
        }
    }

    /// Run `name` on every member and collect one child per member
    ///
    /// # Errors
    /// Returns `CoreError::UnknownCommand` if no member can run `name`;
    /// member failures are reported inside the aggregate
    #[instrument(skip(self, args), fields(group = %self.name, parallel = self.parallel))]
    pub async fn execute(&self, name: &str, args: &[Arg]) -> Result<ResultAggregate, CoreError> {
        if !CommandRegistry::global().contains(name) && !self.members.iter().any(|m| m.can(name)) {
            return Err(CoreError::UnknownCommand(name.to_string()));
        }

        info!(
            group = %self.name,
            command = %name,
            members = self.members.len(),
            parallel = self.parallel,
            "starting fan-out"
        );

        let children = if self.parallel {
            self.execute_parallel(name, args).await
        } else {
            self.execute_sequential(name, args).await
        };

        let failed = children.iter().filter(|c| c.error().is_some()).count();
        info!(
            group = %self.name,
            command = %name,
            total = children.len(),
            failed = failed,
            "fan-out finished"
        );

        Ok(ResultAggregate::Many {
            producer: self.producer(),
            children,
        })
    }

    async fn execute_sequential(&self, name: &str, args: &[Arg]) -> Vec<ResultAggregate> {
        let mut children = Vec::with_capacity(self.members.len());

        for member in &self.members {
            let child = match member.execute(name, args).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(host = %member.host(), error = %e, "member failed");
                    ResultAggregate::Failed {
                        producer: member.producer(),
                        error: e,
                    }
                }
            };
            children.push(child);
        }

        children
    }

    async fn execute_parallel(&self, name: &str, args: &[Arg]) -> Vec<ResultAggregate> {
        let handles: Vec<_> = self
            .members
            .iter()
            .map(|member| {
                let conn = member.clone();
                let name = name.to_string();
                let args = args.to_vec();
                let handle = tokio::spawn(async move { conn.execute(&name, &args).await });
                (member, handle)
            })
            .collect();

        // Await in member order so results keep it regardless of completion order
        let mut children = Vec::with_capacity(handles.len());
        for (member, handle) in handles {
            let child = match handle.await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    warn!(host = %member.host(), error = %e, "member failed");
                    ResultAggregate::Failed {
                        producer: member.producer(),
                        error: e,
                    }
                }
                Err(e) => {
                    error!(host = %member.host(), error = %e, "member task panicked");
                    ResultAggregate::Failed {
                        producer: member.producer(),
                        error: CoreError::TaskFailed {
                            host: member.host().to_string(),
                            reason: e.to_string(),
                        },
                    }
                }
            };
            children.push(child);
        }

        children
    }

    /// Disconnect every member, reporting the first failure after trying all
    ///
    /// # Errors
    /// Returns the first member's disconnect error
    pub async fn disconnect(&self) -> Result<(), CoreError> {
        let mut first_error = None;
        for member in &self.members {
            if let Err(e) = member.disconnect().await {
                warn!(host = %member.host(), error = %e, "disconnect failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
