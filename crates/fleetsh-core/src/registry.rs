//! `CommandRegistry`: process-wide table of callable command names
//!
//! Every connection consults the global table at dispatch time, so a name
//! registered once is callable on every existing and future connection.
//! Registration belongs to setup; racing it against a running fan-out has no
//! defined ordering.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::debug;

use crate::aggregate::ResultAggregate;
use crate::command_line::Arg;
use crate::connection::Connection;
use crate::error::CoreError;

/// Commands every connection can run without opting in
///
/// Destructive commands such as `rm` are left out; use
/// `Connection::allow_command` for those.
pub const DEFAULT_COMMANDS: &[&str] = &[
    "awk", "basename", "bash", "cat", "chmod", "cp", "curl", "cut", "date", "df", "dirname",
    "du", "echo", "env", "false", "file", "find", "git", "grep", "gunzip", "gzip", "head",
    "hostname", "id", "ln", "ls", "mkdir", "mv", "printenv", "ps", "pwd", "readlink", "sed",
    "sh", "sleep", "sort", "stat", "tail", "tar", "test", "touch", "tr", "true", "uname", "uniq",
    "uptime", "wc", "which", "whoami",
];

static GLOBAL: LazyLock<CommandRegistry> = LazyLock::new(CommandRegistry::with_defaults);

/// Behaviour behind a registered command name
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Run the command on `conn`
    async fn invoke(&self, conn: &Connection, args: &[Arg]) -> Result<ResultAggregate, CoreError>;
}

/// Runs a program, optionally with fixed leading arguments (`ll` → `ls -l`)
#[derive(Debug, Clone)]
pub struct ProgramCommand {
    program: String,
    leading_args: Vec<Arg>,
}

impl ProgramCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_args(mut self, args: impl IntoIterator<Item = Arg>) -> Self {
        self.leading_args.extend(args);
        self
    }
}

#[async_trait]
impl CommandHandler for ProgramCommand {
    async fn invoke(&self, conn: &Connection, args: &[Arg]) -> Result<ResultAggregate, CoreError> {
        if self.leading_args.is_empty() {
            return conn.run_program(&self.program, args).await;
        }

        let mut all_args = self.leading_args.clone();
        all_args.extend_from_slice(args);
        conn.run_program(&self.program, &all_args).await
    }
}

/// Name → handler table
#[derive(Default)]
pub struct CommandRegistry {
    entries: RwLock<HashMap<String, Arc<dyn CommandHandler>>>,
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("names", &self.names())
            .finish()
    }
}

impl CommandRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `DEFAULT_COMMANDS`
    #[must_use]
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        for name in DEFAULT_COMMANDS {
            registry.register_program(*name, *name);
        }
        registry
    }

    /// The process-wide registry used by every connection
    pub fn global() -> &'static CommandRegistry {
        &GLOBAL
    }

    /// Bind `name` to `handler`, replacing any previous binding
    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn CommandHandler>) {
        let name = name.into();
        debug!(command = %name, "registering command");
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, handler);
    }

    /// Bind `name` to running `program`
    pub fn register_program(&self, name: impl Into<String>, program: impl Into<String>) {
        self.register(name, Arc::new(ProgramCommand::new(program)));
    }

    /// Handler bound to `name`
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn CommandHandler>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Whether `name` is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// All registered names
    #[must_use]
    pub fn names(&self) -> BTreeSet<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_exclude_rm() {
        let registry = CommandRegistry::with_defaults();
        assert!(registry.contains("ls"));
        assert!(registry.contains("pwd"));
        assert!(!registry.contains("rm"));
        assert_eq!(registry.names().len(), DEFAULT_COMMANDS.len());
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = CommandRegistry::new();
        assert!(registry.resolve("ll").is_none());

        registry.register(
            "ll",
            Arc::new(ProgramCommand::new("ls").with_args([Arg::flag("l")])),
        );

        assert!(registry.resolve("ll").is_some());
        assert_eq!(registry.names(), BTreeSet::from(["ll".to_string()]));
    }

    #[test]
    fn test_last_registration_wins() {
        let registry = CommandRegistry::new();
        let python2: Arc<dyn CommandHandler> = Arc::new(ProgramCommand::new("python2"));
        let python3: Arc<dyn CommandHandler> = Arc::new(ProgramCommand::new("python3"));

        registry.register("py", python2.clone());
        registry.register("py", python3.clone());

        assert_eq!(registry.names().len(), 1);
        let resolved = registry.resolve("py").unwrap();
        assert!(Arc::ptr_eq(&resolved, &python3));
        assert!(!Arc::ptr_eq(&resolved, &python2));
    }

    #[test]
    fn test_global_is_shared() {
        assert!(std::ptr::eq(CommandRegistry::global(), CommandRegistry::global()));
        assert!(CommandRegistry::global().contains("echo"));
    }
}
