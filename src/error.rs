//! Error taxonomy shared by every operation in the crate.

use std::fmt;
use std::io;
use std::process::ExitStatus;
use std::time::Duration;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ShellError>;

/// Failure conditions surfaced by this crate.
///
/// Callers are expected to branch on the variant: a command that exited
/// non-zero, a binary that could not be launched, and a deadline that
/// expired are three different situations and are never folded together.
#[derive(Debug)]
pub enum ShellError {
    /// The caller passed arguments that can never be valid.
    Usage(String),
    /// A `$VAR` reference points at a variable that is not set.
    MissingEnv(String),
    /// The command ran to completion and exited non-zero.
    CommandFailed {
        command: String,
        status: ExitStatus,
    },
    /// The command binary could not be found or launched.
    CommandNotFound {
        command: String,
        source: io::Error,
    },
    /// The operation did not complete within the caller's deadline.
    Timeout {
        operation: String,
        limit: Duration,
    },
    /// The target process exited between observation and use.
    NoSuchProcess { pid: u32 },
    /// A wildcard expansion produced a result count outside the
    /// requested bounds.
    FileMatch(FileMatchError),
    /// Underlying OS failure.
    Io(io::Error),
}

impl fmt::Display for ShellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usage(msg) => write!(f, "{msg}"),
            Self::MissingEnv(name) => {
                write!(f, "environment variable {name} not found")
            }
            Self::CommandFailed { command, status } => {
                write!(f, "command failed with {status}: {command}")
            }
            Self::CommandNotFound { command, source } => {
                write!(f, "command not found ({source}): {command}")
            }
            Self::Timeout { operation, limit } => {
                write!(f, "timeout expired after {limit:?} while {operation}")
            }
            Self::NoSuchProcess { pid } => write!(f, "process {pid} no longer exists"),
            Self::FileMatch(err) => fmt::Display::fmt(err, f),
            Self::Io(err) => fmt::Display::fmt(err, f),
        }
    }
}

impl std::error::Error for ShellError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::CommandNotFound { source, .. } => Some(source),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ShellError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<FileMatchError> for ShellError {
    fn from(err: FileMatchError) -> Self {
        Self::FileMatch(err)
    }
}

/// A wildcard expansion returned too few or too many results.
///
/// This is plain data on purpose: the fields, not the rendered message,
/// are the contract, so the condition survives being shipped across a
/// process boundary and rebuilt on the other side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMatchError {
    /// The pattern as the caller wrote it, before env resolution.
    pub pattern: String,
    pub min_results: usize,
    pub max_results: Option<usize>,
    /// How many results were seen before the contract was violated.
    pub got_results: usize,
    /// True when iteration stopped early, so `got_results` is a lower
    /// bound rather than the full count.
    pub maybe_extra_results: bool,
}

impl fmt::Display for FileMatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "File match '{}' produced ", self.pattern)?;
        if self.maybe_extra_results {
            write!(f, "at least ")?;
        }
        write!(f, "{} results; expected", self.got_results)?;
        match self.max_results {
            None => write!(f, " at least {}", self.min_results),
            Some(max) if max == self.min_results => write!(f, " exactly {max}"),
            Some(max) if self.min_results > 0 => {
                write!(f, " between {} and {max}", self.min_results)
            }
            Some(max) => write!(f, " up to {max}"),
        }
    }
}

impl std::error::Error for FileMatchError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn match_error(
        min_results: usize,
        max_results: Option<usize>,
        got_results: usize,
        maybe_extra_results: bool,
    ) -> FileMatchError {
        FileMatchError {
            pattern: "test*.txt".to_string(),
            min_results,
            max_results,
            got_results,
            maybe_extra_results,
        }
    }

    #[test]
    fn file_match_display_at_least() {
        assert_eq!(
            match_error(2, None, 1, false).to_string(),
            "File match 'test*.txt' produced 1 results; expected at least 2"
        );
    }

    #[test]
    fn file_match_display_exactly() {
        assert_eq!(
            match_error(3, Some(3), 5, false).to_string(),
            "File match 'test*.txt' produced 5 results; expected exactly 3"
        );
    }

    #[test]
    fn file_match_display_between() {
        assert_eq!(
            match_error(1, Some(4), 7, false).to_string(),
            "File match 'test*.txt' produced 7 results; expected between 1 and 4"
        );
    }

    #[test]
    fn file_match_display_up_to_with_early_stop() {
        assert_eq!(
            match_error(0, Some(2), 3, true).to_string(),
            "File match 'test*.txt' produced at least 3 results; expected up to 2"
        );
    }

    #[test]
    fn file_match_fields_survive_rebuild() {
        let original = match_error(1, Some(9), 12, true);
        let rebuilt = FileMatchError {
            pattern: original.pattern.clone(),
            ..original.clone()
        };
        assert_eq!(original, rebuilt);
        assert_eq!(original.to_string(), rebuilt.to_string());
    }

    #[test]
    fn error_variants_are_distinguishable() {
        let not_found = ShellError::CommandNotFound {
            command: "missing".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        let timeout = ShellError::Timeout {
            operation: "running command".to_string(),
            limit: Duration::from_secs(1),
        };
        assert!(matches!(not_found, ShellError::CommandNotFound { .. }));
        assert!(matches!(timeout, ShellError::Timeout { .. }));
        assert!(matches!(
            ShellError::NoSuchProcess { pid: 1 },
            ShellError::NoSuchProcess { pid: 1 }
        ));
    }
}
