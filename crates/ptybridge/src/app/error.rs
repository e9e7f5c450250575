use ptybridge_common::ErrorCategory;
use thiserror::Error;

use crate::domain::InvalidReconnectId;
use crate::domain::InvalidWorkspaceRef;
use crate::infra::terminal::TerminalError;
use crate::usecases::SessionError;
use crate::usecases::ports::RemoteError;

/// Failures of a remote terminal invocation.
#[derive(Debug, Error)]
pub enum RptyError {
    #[error(transparent)]
    InvalidReconnectId(#[from] InvalidReconnectId),
    #[error(transparent)]
    InvalidTarget(#[from] InvalidWorkspaceRef),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Terminal(#[from] TerminalError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl RptyError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            RptyError::InvalidReconnectId(_) | RptyError::InvalidTarget(_) => {
                ErrorCategory::InvalidInput
            }
            RptyError::Remote(err) => err.category(),
            RptyError::Terminal(err) => err.category(),
            RptyError::Session(err) => err.category(),
        }
    }

    pub fn suggestion(&self) -> String {
        match self {
            RptyError::InvalidReconnectId(_) => {
                "Pass the UUID printed when the session closed, e.g. --reconnect 8b1f0c1e-6a43-4f0e-9a55-27c3f2a1d0b4"
                    .to_string()
            }
            RptyError::InvalidTarget(_) => {
                "Use [owner/]workspace[.agent], e.g. alice/dev.main".to_string()
            }
            RptyError::Remote(err) => err.suggestion(),
            RptyError::Terminal(err) => err.suggestion(),
            RptyError::Session(err) => err.suggestion(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            RptyError::InvalidReconnectId(_) | RptyError::InvalidTarget(_) => false,
            RptyError::Remote(err) => err.is_retryable(),
            RptyError::Terminal(err) => err.is_retryable(),
            RptyError::Session(err) => err.is_retryable(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.category().exit_code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ReconnectId;
    use crate::domain::WorkspaceRef;

    #[test]
    fn test_invalid_reconnect_id_exits_usage() {
        let err: RptyError = "not-a-uuid".parse::<ReconnectId>().unwrap_err().into();
        assert_eq!(err.exit_code(), 64);
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("not-a-uuid"));
    }

    #[test]
    fn test_invalid_target_exits_usage() {
        let err: RptyError = "/dev".parse::<WorkspaceRef>().unwrap_err().into();
        assert_eq!(err.exit_code(), 64);
    }

    #[test]
    fn test_remote_errors_keep_their_exit_codes() {
        let not_found: RptyError = RemoteError::ContainerNotFound {
            container: "web".to_string(),
            available: vec!["db".to_string()],
        }
        .into();
        assert_eq!(not_found.exit_code(), 69);

        let unreachable: RptyError = RemoteError::AgentUnreachable {
            waited: std::time::Duration::from_secs(1),
            last_status: "connecting",
        }
        .into();
        assert_eq!(unreachable.exit_code(), 75);

        let dial: RptyError = RemoteError::Dial("refused".to_string()).into();
        assert_eq!(dial.exit_code(), 74);
        assert!(dial.is_retryable());
    }
}
