//! Raw command output and endpoint addressing

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ExecError;

/// Output of one script execution, exactly as the transport collected it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Exit status code (0 for success, -1 when killed by a signal)
    pub status: i32,
    /// stdout output
    pub stdout: String,
    /// stderr output
    pub stderr: String,
    /// Time taken to execute
    pub duration: Duration,
}

impl CommandOutput {
    /// Check if command succeeded (exit code 0)
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Network location of an SSH endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host address
    pub host: String,
    /// Port as written; `None` means the SSH default
    #[serde(default)]
    pub port: Option<u16>,
    /// Username, `None` defers to the caller's default
    pub user: Option<String>,
}

/// Port used when the endpoint does not name one
pub const DEFAULT_SSH_PORT: u16 = 22;

impl Endpoint {
    /// Create an endpoint on the default port
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            user: None,
        }
    }

    /// Set username
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Port to dial, falling back to `DEFAULT_SSH_PORT`
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_SSH_PORT)
    }

    /// Set custom port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

impl FromStr for Endpoint {
    type Err = ExecError;

    /// Parse `[user@]host[:port]`; IPv6 hosts use brackets (`[::1]:2222`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ExecError::InvalidEndpoint(s.to_string());

        let (user, rest) = match s.rsplit_once('@') {
            Some((user, rest)) if !user.is_empty() => (Some(user.to_string()), rest),
            Some(_) => return Err(invalid()),
            None => (None, s),
        };

        let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            let (host, tail) = bracketed.split_once(']').ok_or_else(invalid)?;
            let port = match tail {
                "" => None,
                t => Some(t.strip_prefix(':').ok_or_else(invalid)?),
            };
            (host, port)
        } else {
            match rest.split_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (rest, None),
            }
        };

        if host.is_empty() {
            return Err(invalid());
        }

        let port = port
            .map(|p| p.parse::<u16>().map_err(|_| invalid()))
            .transpose()?;

        Ok(Self {
            host: host.to_string(),
            port,
            user,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(user) = &self.user {
            write!(f, "{user}@")?;
        }
        if self.host.contains(':') {
            write!(f, "[{}]", self.host)?;
        } else {
            f.write_str(&self.host)?;
        }
        if let Some(port) = self.port
            && port != DEFAULT_SSH_PORT
        {
            write!(f, ":{port}")?;
        }
        Ok(())
    }
}
