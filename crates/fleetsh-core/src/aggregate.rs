//! `ResultAggregate`: the outcome of one command, or of a fan-out
//!
//! A single result prints, compares and iterates exactly like the plain
//! command output; a fan-out result is a sequence of per-member results that
//! still knows which group produced it.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use fleetsh_exec::{CommandOutput, Transport};

use crate::error::CoreError;

/// Weak back-reference to whatever produced a result
#[derive(Clone)]
pub enum Producer {
    /// A single connection
    Connection {
        /// Connection identity (`user@host[:port]` or `local`)
        host: String,
        /// Transport the command ran on; dangles once the connection is gone
        transport: Weak<dyn Transport>,
    },
    /// A host group fan-out
    Group {
        /// Group name
        name: String,
    },
}

impl Producer {
    /// Host or group name
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Producer::Connection { host, .. } => host,
            Producer::Group { name } => name,
        }
    }

    /// Whether this is a group
    #[must_use]
    pub fn is_group(&self) -> bool {
        matches!(self, Producer::Group { .. })
    }

    /// The originating transport, if it is still alive
    #[must_use]
    pub fn transport(&self) -> Option<Arc<dyn Transport>> {
        match self {
            Producer::Connection { transport, .. } => transport.upgrade(),
            Producer::Group { .. } => None,
        }
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Producer::Connection { host, .. } => f.debug_tuple("Connection").field(host).finish(),
            Producer::Group { name } => f.debug_tuple("Group").field(name).finish(),
        }
    }
}

impl PartialEq for Producer {
    fn eq(&self, other: &Self) -> bool {
        self.is_group() == other.is_group() && self.name() == other.name()
    }
}

impl Eq for Producer {}

/// Captured outcome of one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    command: String,
    stdout: Vec<String>,
    stderr: Vec<String>,
    exit_code: i32,
    duration: Duration,
    producer: Producer,
}

impl CommandOutcome {
    /// Split transport output into lines
    #[must_use]
    pub fn from_output(command: impl Into<String>, output: CommandOutput, producer: Producer) -> Self {
        Self {
            command: command.into(),
            stdout: output.stdout.lines().map(str::to_string).collect(),
            stderr: output.stderr.lines().map(str::to_string).collect(),
            exit_code: output.status,
            duration: output.duration,
            producer,
        }
    }

    /// Rendered command line
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Wall time the command took
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

/// One command's result or a group's per-member results
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultAggregate {
    /// Exactly one command outcome
    Scalar(CommandOutcome),
    /// One child per group member, in member order
    Many {
        /// Coordinating group
        producer: Producer,
        /// Member results
        children: Vec<ResultAggregate>,
    },
    /// A fan-out member that failed
    Failed {
        /// Member that failed
        producer: Producer,
        /// What went wrong
        error: CoreError,
    },
}

impl ResultAggregate {
    /// Exit code; for a fan-out, the first non-zero member code
    ///
    /// Failures without a process exit code report -1.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            ResultAggregate::Scalar(outcome) => outcome.exit_code,
            ResultAggregate::Failed { error, .. } => error.exit_code().unwrap_or(-1),
            ResultAggregate::Many { children, .. } => children
                .iter()
                .map(ResultAggregate::exit_code)
                .find(|code| *code != 0)
                .unwrap_or(0),
        }
    }

    /// Whether every contained command succeeded
    #[must_use]
    pub fn is_success(&self) -> bool {
        match self {
            ResultAggregate::Scalar(outcome) => outcome.exit_code == 0,
            ResultAggregate::Failed { .. } => false,
            ResultAggregate::Many { children, .. } => children.iter().all(Self::is_success),
        }
    }

    /// Standard output lines, across members for a fan-out
    #[must_use]
    pub fn stdout_lines(&self) -> Vec<&str> {
        match self {
            ResultAggregate::Scalar(outcome) => outcome.stdout.iter().map(String::as_str).collect(),
            ResultAggregate::Failed { .. } => Vec::new(),
            ResultAggregate::Many { children, .. } => {
                children.iter().flat_map(Self::stdout_lines).collect()
            }
        }
    }

    /// Standard error lines, across members for a fan-out
    #[must_use]
    pub fn stderr_lines(&self) -> Vec<&str> {
        match self {
            ResultAggregate::Scalar(outcome) => outcome.stderr.iter().map(String::as_str).collect(),
            ResultAggregate::Failed { error, .. } => match error {
                CoreError::Command(e) => e.stderr.lines().collect(),
                _ => Vec::new(),
            },
            ResultAggregate::Many { children, .. } => {
                children.iter().flat_map(Self::stderr_lines).collect()
            }
        }
    }

    /// Standard output joined by newlines; a single line comes back as is
    #[must_use]
    pub fn stdout(&self) -> String {
        self.stdout_lines().join("\n")
    }

    /// Standard error joined by newlines
    #[must_use]
    pub fn stderr(&self) -> String {
        self.stderr_lines().join("\n")
    }

    /// Number of elements when used as a sequence
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            ResultAggregate::Many { children, .. } => children.len(),
            _ => 1,
        }
    }

    /// Only a fan-out over an empty group is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First element of the sequence
    #[must_use]
    pub fn first(&self) -> Option<&ResultAggregate> {
        self.iter().next()
    }

    /// Element at `index`
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ResultAggregate> {
        self.iter().nth(index)
    }

    /// Iterate as a sequence: itself once, or each member's result
    pub fn iter(&self) -> Iter<'_> {
        match self {
            ResultAggregate::Many { children, .. } => Iter::Many(children.iter()),
            single => Iter::Single(Some(single)),
        }
    }

    /// Connection or group that produced this result
    #[must_use]
    pub fn producer(&self) -> &Producer {
        match self {
            ResultAggregate::Scalar(outcome) => &outcome.producer,
            ResultAggregate::Many { producer, .. } | ResultAggregate::Failed { producer, .. } => {
                producer
            }
        }
    }

    /// The single command outcome, if this is one
    #[must_use]
    pub fn outcome(&self) -> Option<&CommandOutcome> {
        match self {
            ResultAggregate::Scalar(outcome) => Some(outcome),
            _ => None,
        }
    }

    /// The error of a failed member slot
    #[must_use]
    pub fn error(&self) -> Option<&CoreError> {
        match self {
            ResultAggregate::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Every failed member with its identity, depth first
    #[must_use]
    pub fn errors(&self) -> Vec<(&Producer, &CoreError)> {
        match self {
            ResultAggregate::Scalar(_) => Vec::new(),
            ResultAggregate::Failed { producer, error } => vec![(producer, error)],
            ResultAggregate::Many { children, .. } => {
                children.iter().flat_map(Self::errors).collect()
            }
        }
    }

    /// Turn the first failed member into an error
    ///
    /// # Errors
    /// Returns the error of the first `Failed` slot, if any
    pub fn into_result(self) -> Result<Self, CoreError> {
        if let Some((_, error)) = self.errors().first() {
            return Err((*error).clone());
        }
        Ok(self)
    }
}

impl fmt::Display for ResultAggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultAggregate::Scalar(outcome) => f.write_str(&outcome.stdout.join("\n")),
            ResultAggregate::Failed { .. } => Ok(()),
            ResultAggregate::Many { children, .. } => {
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str("\n")?;
                    }
                    write!(f, "{child}")?;
                }
                Ok(())
            }
        }
    }
}

impl PartialEq<str> for ResultAggregate {
    fn eq(&self, other: &str) -> bool {
        self.to_string() == other
    }
}

impl PartialEq<&str> for ResultAggregate {
    fn eq(&self, other: &&str) -> bool {
        self.to_string() == *other
    }
}

impl PartialEq<String> for ResultAggregate {
    fn eq(&self, other: &String) -> bool {
        self.to_string() == *other
    }
}

/// Iterator over a `ResultAggregate` used as a sequence
#[derive(Debug)]
pub enum Iter<'a> {
    #[doc(hidden)]
    Single(Option<&'a ResultAggregate>),
    #[doc(hidden)]
    Many(std::slice::Iter<'a, ResultAggregate>),
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a ResultAggregate;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Iter::Single(item) => item.take(),
            Iter::Many(children) => children.next(),
        }
    }
}

impl<'a> IntoIterator for &'a ResultAggregate {
    type Item = &'a ResultAggregate;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
