use std::time::Duration;

use ptybridge_common::ErrorCategory;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Invalid server URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("Workspace '{workspace}' not found")]
    WorkspaceNotFound { workspace: String },
    #[error("Workspace '{workspace}' has no agents")]
    NoAgents { workspace: String },
    #[error("Agent '{agent}' not found in workspace '{workspace}' (available: {})", .available.join(", "))]
    AgentNotFound {
        workspace: String,
        agent: String,
        available: Vec<String>,
    },
    #[error("Workspace '{workspace}' has multiple agents, pick one of: {}", .available.join(", "))]
    AmbiguousAgent {
        workspace: String,
        available: Vec<String>,
    },
    #[error("Container '{container}' not found (available: {})", .available.join(", "))]
    ContainerNotFound {
        container: String,
        available: Vec<String>,
    },
    #[error("Agent has no running containers")]
    NoContainers,
    #[error("Not authorized: {0}")]
    Unauthorized(String),
    #[error("Agent did not become reachable within {waited:?} (last status: {last_status})")]
    AgentUnreachable {
        waited: Duration,
        last_status: &'static str,
    },
    #[error("Remote API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Request failed: {0}")]
    Transport(String),
    #[error("Failed to open terminal connection: {0}")]
    Dial(String),
    #[error("Cancelled")]
    Cancelled,
}

impl RemoteError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            RemoteError::InvalidUrl { .. }
            | RemoteError::AmbiguousAgent { .. }
            | RemoteError::Unauthorized(_) => ErrorCategory::InvalidInput,
            RemoteError::WorkspaceNotFound { .. }
            | RemoteError::NoAgents { .. }
            | RemoteError::AgentNotFound { .. }
            | RemoteError::ContainerNotFound { .. }
            | RemoteError::NoContainers => ErrorCategory::NotFound,
            RemoteError::AgentUnreachable { .. } => ErrorCategory::Timeout,
            RemoteError::Api { .. } | RemoteError::Transport(_) | RemoteError::Dial(_) => {
                ErrorCategory::External
            }
            RemoteError::Cancelled => ErrorCategory::Internal,
        }
    }

    pub fn suggestion(&self) -> String {
        match self {
            RemoteError::InvalidUrl { .. } => {
                "Pass the deployment URL with --url, e.g. https://dev.example.com".to_string()
            }
            RemoteError::WorkspaceNotFound { .. } => {
                "Check the workspace name and owner ([owner/]workspace).".to_string()
            }
            RemoteError::NoAgents { .. } => {
                "Start the workspace so its agent can register.".to_string()
            }
            RemoteError::AgentNotFound { .. } | RemoteError::AmbiguousAgent { .. } => {
                "Select an agent with workspace.agent".to_string()
            }
            RemoteError::ContainerNotFound { .. } => {
                "Pass an exact container ID or friendly name to --container.".to_string()
            }
            RemoteError::NoContainers => {
                "Drop --container or start a container on the agent.".to_string()
            }
            RemoteError::Unauthorized(_) => {
                "Check the session token (--token or PTYBRIDGE_SESSION_TOKEN).".to_string()
            }
            RemoteError::AgentUnreachable { .. } => {
                "Raise --agent-wait or check that the workspace is running.".to_string()
            }
            RemoteError::Api { .. } | RemoteError::Transport(_) | RemoteError::Dial(_) => {
                "Check network connectivity to the deployment and retry.".to_string()
            }
            RemoteError::Cancelled => "Interrupted before the session started.".to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Transport(_)
            | RemoteError::Dial(_)
            | RemoteError::AgentUnreachable { .. } => true,
            RemoteError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.category().exit_code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_variants_exit_unavailable() {
        let err = RemoteError::ContainerNotFound {
            container: "db".to_string(),
            available: vec!["web".to_string(), "cache".to_string()],
        };
        assert_eq!(err.exit_code(), 69);
        assert!(err.to_string().contains("web, cache"));
        assert_eq!(RemoteError::NoContainers.exit_code(), 69);
    }

    #[test]
    fn test_unreachable_agent_is_timeout() {
        let err = RemoteError::AgentUnreachable {
            waited: Duration::from_secs(5),
            last_status: "connecting",
        };
        assert_eq!(err.category(), ErrorCategory::Timeout);
        assert_eq!(err.exit_code(), 75);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_ambiguous_agent_is_input_error() {
        let err = RemoteError::AmbiguousAgent {
            workspace: "dev".to_string(),
            available: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.exit_code(), 64);
        assert!(err.to_string().contains("a, b"));
    }

    #[test]
    fn test_server_errors_are_retryable() {
        let err = RemoteError::Api {
            status: 502,
            message: "bad gateway".to_string(),
        };
        assert!(err.is_retryable());
        let err = RemoteError::Api {
            status: 400,
            message: "bad request".to_string(),
        };
        assert!(!err.is_retryable());
    }
}
