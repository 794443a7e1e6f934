//! Process runner: start an executable, capture stdout as lines, report the
//! exit code.
//!
//! Everything that leaves the process goes through the [`Executor`] trait so
//! the protocol adapter and the scripting host can be exercised against
//! scripted responses in tests.
use std::fmt;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use serde::Deserialize;

use crate::error::ProcessError;

/// How an [`EnvVar`] combines with the value inherited from the parent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvVarMode {
    #[default]
    /// Replace the inherited value.
    Override,
    /// Put the value in front of the inherited value.
    Prepend,
    /// Put the value after the inherited value.
    Append,
}

/// An environment variable applied to a single process invocation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EnvVar {
    /// Variable name.
    pub name: String,
    /// Value to apply.
    pub value: String,
    /// How the value combines with the inherited one.
    #[serde(default)]
    pub mode: EnvVarMode,
    /// Separator used by [`EnvVarMode::Prepend`] and [`EnvVarMode::Append`].
    #[serde(default)]
    pub separator: String,
}

impl EnvVar {
    /// An environment variable that replaces the inherited value.
    #[must_use]
    pub fn with_override(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            mode: EnvVarMode::Override,
            separator: String::new(),
        }
    }

    /// Resolve the final value given the inherited one.
    #[must_use]
    pub fn resolve(&self, inherited: Option<&str>) -> String {
        let inherited = inherited.unwrap_or_default();
        match self.mode {
            EnvVarMode::Override => self.value.clone(),
            EnvVarMode::Prepend => merge_with_separator(&self.value, inherited, &self.separator),
            EnvVarMode::Append => merge_with_separator(inherited, &self.value, &self.separator),
        }
    }
}

/// Join two strings with `separator`, never doubling it and never adding it
/// when either side already carries it.
#[must_use]
pub fn merge_with_separator(first: &str, second: &str, separator: &str) -> String {
    if separator.is_empty() {
        return format!("{first}{second}");
    }
    let first_ends = first.ends_with(separator);
    let second_starts = second.starts_with(separator);
    if first_ends && second_starts {
        format!("{first}{}", second.get(separator.len()..).unwrap_or_default())
    } else if first_ends || second_starts {
        format!("{first}{second}")
    } else {
        format!("{first}{separator}{second}")
    }
}

/// A single process to run to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInvocation {
    /// Executable to start.
    pub program: PathBuf,
    /// Arguments, passed verbatim.
    pub args: Vec<String>,
    /// Data written to standard input, which is then closed.
    pub input: Option<String>,
    /// Environment adjustments.
    pub env: Vec<EnvVar>,
}

impl ProcessInvocation {
    /// Create an invocation with no arguments.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            input: None,
            env: Vec::new(),
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the data written to standard input.
    #[must_use]
    pub fn input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    /// Add environment adjustments.
    #[must_use]
    pub fn env(mut self, vars: &[EnvVar]) -> Self {
        self.env.extend_from_slice(vars);
        self
    }

    /// The full command line, as reported in failures.
    #[must_use]
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            return self.program.display().to_string();
        }
        format!("{} {}", self.program.display(), self.args.join(" "))
    }
}

impl fmt::Display for ProcessInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecResult {
    /// Standard output split into lines (UTF-8, lossy).
    pub stdout_lines: Vec<String>,
    /// Standard error as a single string.
    pub stderr: String,
    /// Exit code; `None` when terminated by a signal.
    pub code: Option<i32>,
}

impl ExecResult {
    /// Whether the process exited with code 0.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Standard output lines that are not blank.
    #[must_use]
    pub fn non_empty_lines(&self) -> Vec<&str> {
        self.stdout_lines
            .iter()
            .map(String::as_str)
            .filter(|line| !line.trim().is_empty())
            .collect()
    }

    /// Fail with [`ProcessError::Failed`] unless the exit code is 0.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Failed`] carrying the exit code and the full
    /// command line of `invocation`.
    pub fn check(self, invocation: &ProcessInvocation) -> Result<Self, ProcessError> {
        if self.success() {
            return Ok(self);
        }
        Err(ProcessError::Failed {
            exit_code: self.code.unwrap_or(-1),
            command_line: invocation.command_line(),
            stderr: self.stderr.trim().to_string(),
        })
    }
}

/// Abstraction over process execution.
pub trait Executor: Send + Sync + fmt::Debug {
    /// Run `invocation` to completion and capture its output. A non-zero
    /// exit code is **not** an error at this level.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Spawn`] if the process cannot be started or
    /// its pipes cannot be driven.
    fn execute(&self, invocation: &ProcessInvocation) -> Result<ExecResult, ProcessError>;

    /// Locate `program` on `PATH`.
    fn which(&self, program: &str) -> Option<PathBuf>;
}

/// [`Executor`] that starts real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemExecutor;

impl SystemExecutor {
    fn spawn_error(invocation: &ProcessInvocation, err: std::io::Error) -> ProcessError {
        ProcessError::Spawn {
            command_line: invocation.command_line(),
            source: Arc::new(err),
        }
    }
}

impl Executor for SystemExecutor {
    fn execute(&self, invocation: &ProcessInvocation) -> Result<ExecResult, ProcessError> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if invocation.input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });
        for var in &invocation.env {
            let inherited = std::env::var(&var.name).ok();
            cmd.env(&var.name, var.resolve(inherited.as_deref()));
        }

        tracing::debug!(command = %invocation, "starting process");
        let mut child = cmd
            .spawn()
            .map_err(|e| Self::spawn_error(invocation, e))?;

        // Feed stdin from a separate thread so a child that fills its stdout
        // pipe before reading all input cannot deadlock us.
        let writer = match (child.stdin.take(), invocation.input.clone()) {
            (Some(mut stdin), Some(input)) => Some(std::thread::spawn(move || {
                stdin.write_all(input.as_bytes())
                // stdin dropped here, closing the pipe
            })),
            _ => None,
        };

        let output = child
            .wait_with_output()
            .map_err(|e| Self::spawn_error(invocation, e))?;

        if let Some(handle) = writer {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    tracing::debug!(command = %invocation, "process closed stdin early");
                }
                Ok(Err(e)) => return Err(Self::spawn_error(invocation, e)),
                Err(_) => {
                    return Err(Self::spawn_error(
                        invocation,
                        std::io::Error::other("stdin writer thread panicked"),
                    ));
                }
            }
        }

        let result = ExecResult {
            stdout_lines: String::from_utf8_lossy(&output.stdout)
                .lines()
                .map(str::to_string)
                .collect(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            code: output.status.code(),
        };
        tracing::debug!(
            command = %invocation,
            code = ?result.code,
            lines = result.stdout_lines.len(),
            "process exited"
        );
        Ok(result)
    }

    fn which(&self, program: &str) -> Option<PathBuf> {
        which::which(program).ok()
    }
}

/// Resolve `program` to an absolute path: existing paths are canonicalized,
/// bare names are looked up on `PATH` through `executor`.
#[must_use]
pub fn locate(executor: &dyn Executor, program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 || program.is_absolute() {
        return dunce::canonicalize(program).ok();
    }
    executor.which(&program.to_string_lossy())
}
