//! External command invocation.
//!
//! Every backend tool (LVM, mkfs, mount, rsync) is run through a
//! [`CommandRunner`] so call sites see a typed [`Outcome`] instead of raw
//! exit codes.

use std::io;
use std::path::Path;
use std::process::Command;

use lvthin_common::{ThinError, ThinResult};

/// Exit status LVM reports when the requested object does not exist.
pub const LVM_NOT_FOUND_STATUS: i32 = 5;

/// Result of running an external command to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Zero exit status.
    Success {
        /// Captured standard output.
        stdout: String,
    },
    /// The tool reported that the object it was asked about does not exist.
    NotFound {
        /// Combined standard output and error.
        output: String,
    },
    /// Any other non-zero exit, or death by signal.
    Failure {
        /// Exit code, if the process exited normally.
        code: Option<i32>,
        /// Combined standard output and error.
        output: String,
    },
}

impl Outcome {
    /// Classify an exit code and captured streams.
    #[must_use]
    pub fn from_parts(code: Option<i32>, stdout: &str, stderr: &str) -> Self {
        match code {
            Some(0) => Self::Success {
                stdout: stdout.to_string(),
            },
            Some(LVM_NOT_FOUND_STATUS) => Self::NotFound {
                output: combine(stdout, stderr),
            },
            code => Self::Failure {
                code,
                output: combine(stdout, stderr),
            },
        }
    }

    /// Whether the command succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Captured output regardless of outcome.
    #[must_use]
    pub fn output(&self) -> &str {
        match self {
            Self::Success { stdout } => stdout,
            Self::NotFound { output } | Self::Failure { output, .. } => output,
        }
    }

    /// Standard output of a successful run, or a backend error for `operation`.
    ///
    /// # Errors
    ///
    /// Returns [`ThinError::Backend`] carrying the captured output when the
    /// command did not succeed.
    pub fn into_stdout(self, operation: impl Into<String>) -> ThinResult<String> {
        match self {
            Self::Success { stdout } => Ok(stdout),
            Self::NotFound { output } | Self::Failure { output, .. } => {
                Err(ThinError::backend(operation, output))
            }
        }
    }
}

fn combine(stdout: &str, stderr: &str) -> String {
    let mut output = String::with_capacity(stdout.len() + stderr.len());
    output.push_str(stdout);
    output.push_str(stderr);
    output
}

/// `path` as a command argument.
///
/// # Errors
///
/// Returns a filesystem error if `path` is not valid UTF-8, since it
/// could not be passed on unchanged.
pub fn path_arg(path: &Path) -> ThinResult<&str> {
    path.to_str().ok_or_else(|| {
        ThinError::filesystem(
            "Refusing non-UTF-8 path",
            path,
            io::Error::from(io::ErrorKind::InvalidInput),
        )
    })
}

/// Runs external programs to completion.
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, blocking until it exits.
    ///
    /// # Errors
    ///
    /// Returns an error only when the program could not be started; a
    /// non-zero exit is reported through the [`Outcome`].
    fn run(&self, program: &str, args: &[&str]) -> ThinResult<Outcome>;
}

/// Runs commands on the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> ThinResult<Outcome> {
        tracing::trace!(program, ?args, "Running command");

        let output = Command::new(program).args(args).output().map_err(|e| {
            ThinError::Internal {
                message: format!("Failed to execute {program}: {e}"),
            }
        })?;

        let outcome = Outcome::from_parts(
            output.status.code(),
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
        );

        if !outcome.is_success() {
            tracing::debug!(program, ?args, output = outcome.output(), "Command failed");
        }
        Ok(outcome)
    }
}
