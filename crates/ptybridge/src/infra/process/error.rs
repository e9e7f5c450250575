use std::io;

use ptybridge_common::ErrorCategory;
use thiserror::Error;

use crate::infra::hub::HubError;

#[derive(Debug, Error)]
pub enum SubprocessError {
    #[error("Command not found: {program}")]
    NotFound { program: String },
    #[error("Permission denied running {program}")]
    PermissionDenied { program: String },
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to open {stream} pipe for child process")]
    Pipe { stream: &'static str },
    #[error(transparent)]
    Hub(#[from] HubError),
    #[error("Child stdin is closed")]
    StdinClosed,
    #[error("Failed to write to child stdin: {0}")]
    StdinWrite(#[source] io::Error),
}

impl SubprocessError {
    pub fn from_spawn(program: &str, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => SubprocessError::NotFound {
                program: program.to_string(),
            },
            io::ErrorKind::PermissionDenied => SubprocessError::PermissionDenied {
                program: program.to_string(),
            },
            _ => SubprocessError::Spawn {
                program: program.to_string(),
                source,
            },
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            SubprocessError::NotFound { .. } => ErrorCategory::NotFound,
            SubprocessError::PermissionDenied { .. }
            | SubprocessError::Spawn { .. }
            | SubprocessError::Pipe { .. }
            | SubprocessError::StdinWrite(_) => ErrorCategory::External,
            SubprocessError::StdinClosed => ErrorCategory::Busy,
            SubprocessError::Hub(err) => err.category(),
        }
    }

    pub fn suggestion(&self) -> String {
        match self {
            SubprocessError::NotFound { .. } => {
                "Command not found. Check if the command exists and is in PATH.".to_string()
            }
            SubprocessError::PermissionDenied { .. } => {
                "Permission denied. Check file permissions.".to_string()
            }
            SubprocessError::Spawn { .. } | SubprocessError::Pipe { .. } => {
                "Process spawn failed. Check system resource limits (ulimit -n).".to_string()
            }
            SubprocessError::StdinClosed | SubprocessError::StdinWrite(_) => {
                "The child process is no longer accepting input.".to_string()
            }
            SubprocessError::Hub(err) => err.suggestion(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, SubprocessError::Pipe { .. })
    }

    pub fn exit_code(&self) -> i32 {
        self.category().exit_code()
    }

    /// Input can no longer reach the child.
    pub fn is_stdin_unavailable(&self) -> bool {
        matches!(
            self,
            SubprocessError::StdinClosed | SubprocessError::StdinWrite(_)
        )
    }
}
