//! Unified error types for the rtbox workspace.
//!
//! Every library crate returns [`RtboxError`] so that a lifecycle call can
//! surface a control-file rejection, a ledger problem, or a refused
//! transition through one `Result` type.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum RtboxError {
    /// An I/O operation failed. Control-file rejections from the kernel land
    /// here with their errno intact.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// The requested state change is not in the transition table.
    #[error("invalid state transition from {from} to {to}")]
    InvalidTransition {
        /// Status of the current state.
        from: String,
        /// Status of the requested state.
        to: String,
    },

    /// The container's init process is still alive.
    #[error("container still running")]
    Running,

    /// The container is paused while its process is still alive.
    #[error("container paused")]
    Paused,

    /// The kernel stored a different `cpu.shares` value than was written.
    #[error("the {bound} allowed cpu-shares is {value}")]
    SharesOutOfRange {
        /// Either `"maximum"` or `"minimum"`.
        bound: &'static str,
        /// Value read back from the control file.
        value: u64,
    },

    /// A real-time runtime ledger could not be interpreted.
    #[error("corrupt real-time ledger at {path}: {reason}")]
    LedgerCorrupt {
        /// Ledger file path.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// A key/value control file contained a line that could not be parsed.
    #[error("unable to parse {file} in {path}: bad line {line:?}")]
    Parse {
        /// Cgroup directory.
        path: PathBuf,
        /// Control file name.
        file: String,
        /// Offending line.
        line: String,
    },

    /// A lifecycle hook failed.
    #[error("hook {path} failed: {message}")]
    Hook {
        /// Hook executable.
        path: PathBuf,
        /// Failure description.
        message: String,
    },

    /// An operation on a process failed.
    #[error("process {pid}: {message}")]
    Process {
        /// Target process id.
        pid: i32,
        /// Failure description.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl RtboxError {
    /// Wraps an I/O error together with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns the raw OS error code when this is an I/O error.
    #[must_use]
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Io { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    /// Returns whether this is an I/O error of kind `NotFound`.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, RtboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_error_names_both_states() {
        let err = RtboxError::InvalidTransition {
            from: "paused".into(),
            to: "created".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid state transition from paused to created"
        );
    }

    #[test]
    fn shares_error_cites_read_back_value() {
        let err = RtboxError::SharesOutOfRange {
            bound: "maximum",
            value: 256,
        };
        assert_eq!(err.to_string(), "the maximum allowed cpu-shares is 256");
    }

    #[test]
    fn io_error_exposes_errno() {
        let err = RtboxError::io("/sys/fs/cgroup/x", std::io::Error::from_raw_os_error(22));
        assert_eq!(err.raw_os_error(), Some(22));
        assert!(!err.is_not_found());
    }
}
