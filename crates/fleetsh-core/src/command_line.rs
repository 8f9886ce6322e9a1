//! Shell command line rendering
//!
//! Safe mode quotes every token so the shell passes it to the program
//! untouched. Unsafe mode joins tokens as typed, leaving expansion, globbing,
//! pipes and redirects to the shell.

use std::borrow::Cow;
use std::fmt;

use shell_escape::unix::escape;

/// One command argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    /// Short flag, rendered as `-name` (`Flag("la")` → `-la`)
    Flag(String),
    /// Long flag, rendered as `--name`
    Long(String),
    /// Positional argument
    Positional(String),
    /// Inserted verbatim in both modes
    Raw(String),
}

impl Arg {
    /// Short flag
    pub fn flag(name: impl Into<String>) -> Self {
        Arg::Flag(name.into())
    }

    /// Long flag
    pub fn long(name: impl Into<String>) -> Self {
        Arg::Long(name.into())
    }

    /// Verbatim text that is never quoted
    pub fn raw(text: impl Into<String>) -> Self {
        Arg::Raw(text.into())
    }

    fn token(&self) -> Cow<'_, str> {
        match self {
            Arg::Flag(name) => Cow::Owned(format!("-{name}")),
            Arg::Long(name) => Cow::Owned(format!("--{name}")),
            Arg::Positional(value) | Arg::Raw(value) => Cow::Borrowed(value),
        }
    }

    fn render(&self, safe: bool) -> Cow<'_, str> {
        match self {
            Arg::Raw(value) => Cow::Borrowed(value),
            _ if safe => escape(self.token()),
            _ => self.token(),
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token())
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Positional(value.to_string())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Positional(value)
    }
}

impl From<&String> for Arg {
    fn from(value: &String) -> Self {
        Arg::Positional(value.clone())
    }
}

macro_rules! numeric_arg {
    ($($t:ty),*) => {
        $(impl From<$t> for Arg {
            fn from(value: $t) -> Self {
                Arg::Positional(value.to_string())
            }
        })*
    };
}

numeric_arg!(i32, i64, u16, u32, u64, usize, f64);

/// Quote a single value for the shell regardless of mode
#[must_use]
pub fn quote(value: &str) -> Cow<'_, str> {
    escape(Cow::Borrowed(value))
}

/// Split a leading `~` or `~user` off `path`
///
/// Returns the tilde prefix and the remainder (empty or starting with `/`).
#[must_use]
pub fn split_tilde(path: &str) -> Option<(&str, &str)> {
    let rest = path.strip_prefix('~')?;
    let end = rest.find('/').unwrap_or(rest.len());
    let user = &rest[..end];
    if !user
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return None;
    }
    Some(path.split_at(end + 1))
}

/// Quote a path, leaving a leading `~` or `~user` for the shell to expand
#[must_use]
pub fn quote_path(path: &str) -> Cow<'_, str> {
    match split_tilde(path) {
        Some((prefix, "")) => Cow::Borrowed(prefix),
        Some((prefix, "/")) => Cow::Owned(format!("{prefix}/")),
        Some((prefix, rest)) => Cow::Owned(format!("{prefix}/{}", quote(&rest[1..]))),
        None => quote(path),
    }
}

/// Renders command name plus arguments into one shell line
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandLineBuilder;

impl CommandLineBuilder {
    /// Render `command` with `args`, quoting everything in safe mode
    #[must_use]
    pub fn build(command: &str, args: &[Arg], safe: bool) -> String {
        let mut line = if safe {
            quote(command).into_owned()
        } else {
            command.to_string()
        };

        for arg in args {
            line.push(' ');
            line.push_str(&arg.render(safe));
        }

        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_path_leaves_tilde_unquoted() {
        assert_eq!(quote_path("~"), "~");
        assert_eq!(quote_path("~/"), "~/");
        assert_eq!(quote_path("~/logs"), "~/logs");
        assert_eq!(quote_path("~/my logs"), "~/'my logs'");
        assert_eq!(quote_path("~deploy/app"), "~deploy/app");
        assert_eq!(quote_path("/var/my logs"), "'/var/my logs'");
    }

    #[test]
    fn test_quote_path_quotes_tilde_lookalikes() {
        assert_eq!(quote_path("~$(id)/x"), "'~$(id)/x'");
        assert_eq!(split_tilde("logs/~"), None);
        assert_eq!(split_tilde("~web/a/b"), Some(("~web", "/a/b")));
    }

    #[test]
    fn test_flags() {
        let line = CommandLineBuilder::build(
            "ls",
            &[Arg::flag("l"), Arg::flag("a"), Arg::long("color=never")],
            true,
        );
        assert_eq!(line, "ls -l -a --color=never");
    }

    #[test]
    fn test_safe_mode_quotes_metacharacters() {
        let args: Vec<Arg> = ["$HOME", "|", ">", "*", "a b", ""]
            .into_iter()
            .map(Arg::from)
            .collect();
        let line = CommandLineBuilder::build("echo", &args, true);
        assert_eq!(line, "echo '$HOME' '|' '>' '*' 'a b' ''");
    }

    #[test]
    fn test_safe_mode_escapes_single_quote() {
        let line = CommandLineBuilder::build("echo", &["it's".into()], true);
        assert_eq!(line, r"echo 'it'\''s'");
    }

    #[test]
    fn test_unsafe_mode_is_verbatim() {
        let args: Vec<Arg> = ["$HOME", "|", "wc", "-l"].into_iter().map(Arg::from).collect();
        let line = CommandLineBuilder::build("echo", &args, false);
        assert_eq!(line, "echo $HOME | wc -l");
    }

    #[test]
    fn test_raw_is_never_quoted() {
        let line = CommandLineBuilder::build("ls", &[Arg::raw("*.log")], true);
        assert_eq!(line, "ls *.log");
    }

    #[test]
    fn test_numbers_and_command_name() {
        let line = CommandLineBuilder::build("my cmd", &[3i32.into(), 42u64.into()], true);
        assert_eq!(line, "'my cmd' 3 42");
    }
}
