use std::{
    ffi::{OsStr, OsString},
    fmt,
    path::PathBuf,
    process::Stdio,
};

use tokio::process::Command;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    /// `<shell> -c <line>`
    Shell { shell: PathBuf, line: String },
    Exec { program: PathBuf, args: Vec<OsString> },
}

/// An external command the engine can launch. Compilation happens elsewhere;
/// this is always something directly runnable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    kind: Kind,
}

impl CommandLine {
    pub const DEFAULT_SHELL: &str = "/bin/sh";

    pub fn shell(shell: impl Into<PathBuf>, line: impl Into<String>) -> Self {
        Self {
            kind: Kind::Shell {
                shell: shell.into(),
                line: line.into(),
            },
        }
    }

    /// `sh -c <line>` with the default shell.
    pub fn sh(line: impl Into<String>) -> Self {
        Self::shell(Self::DEFAULT_SHELL, line)
    }

    pub fn exec(program: impl Into<PathBuf>) -> Self {
        Self {
            kind: Kind::Exec {
                program: program.into(),
                args: Vec::new(),
            },
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.push_arg(arg.as_ref());
        self
    }

    /// Copy of `self` with trailing arguments. For shell commands the
    /// arguments are quoted and appended to the command line.
    pub fn with_args<I, S>(&self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = self.clone();
        for a in extra {
            cmd.push_arg(a.as_ref());
        }
        cmd
    }

    fn push_arg(&mut self, arg: &OsStr) {
        match &mut self.kind {
            Kind::Shell { line, .. } => {
                line.push(' ');
                line.push_str(&shell_quote(&arg.to_string_lossy()));
            }
            Kind::Exec { args, .. } => args.push(arg.to_owned()),
        }
    }

    /// Short name used in error messages.
    pub fn program_name(&self) -> String {
        match &self.kind {
            Kind::Shell { line, .. } => line.clone(),
            Kind::Exec { program, .. } => program.to_string_lossy().into_owned(),
        }
    }

    /// Builds a tokio command with all three standard streams piped.
    ///
    /// The child becomes the leader of a fresh process group so that it can
    /// be killed together with everything it spawns.
    pub(crate) fn to_command(&self) -> Command {
        let mut cmd = match &self.kind {
            Kind::Shell { shell, line } => {
                let mut c = Command::new(shell);
                c.arg("-c").arg(line);
                c
            }
            Kind::Exec { program, args } => {
                let mut c = Command::new(program);
                c.args(args);
                c
            }
        };
        #[cfg(unix)]
        cmd.process_group(0);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Kind::Shell { line, .. } => write!(f, "{}", line),
            Kind::Exec { program, args } => {
                write!(f, "{}", shell_quote(&program.to_string_lossy()))?;
                for a in args {
                    write!(f, " {}", shell_quote(&a.to_string_lossy()))?;
                }
                Ok(())
            }
        }
    }
}

/// Quotes `s` for POSIX shells unless it is obviously safe.
///
/// ```
/// use pjudge_core::testing::shell_quote;
///
/// assert_eq!(shell_quote("data/1.in"), "data/1.in");
/// assert_eq!(shell_quote("a b"), "'a b'");
/// assert_eq!(shell_quote("it's"), r#"'it'"'"'s'"#);
/// assert_eq!(shell_quote(""), "''");
/// ```
pub fn shell_quote(s: &str) -> String {
    let is_safe = |c: char| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c);
    if !s.is_empty() && s.chars().all(is_safe) {
        return s.to_owned();
    }
    // terminate '  ->  enclose ' with "  ->  restart '
    format!("'{}'", s.replace('\'', r#"'"'"'"#))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn with_args_quotes_into_shell_line() {
        let cmd = CommandLine::sh("./checker").with_args(["in put", "out"]);
        assert_eq!(cmd.to_string(), "./checker 'in put' out");

        let cmd = CommandLine::exec("./checker").with_args(["in put", "out"]);
        assert_eq!(cmd.to_string(), "./checker 'in put' out");
    }

    #[test]
    fn with_args_leaves_original_untouched() {
        let base = CommandLine::exec("gen");
        let with_seed = base.with_args(["42"]);
        assert_eq!(base.to_string(), "gen");
        assert_eq!(with_seed.to_string(), "gen 42");
    }
}
