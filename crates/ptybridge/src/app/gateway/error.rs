use ptybridge_common::ErrorCategory;
use thiserror::Error;

use crate::infra::process::SubprocessError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("No command given; pass one after --, e.g. stdio-sse -- tee")]
    MissingCommand,
    #[error("Invalid listen address: {message}")]
    InvalidListen { message: String },
    #[error("Gateway I/O error ({operation}): {source}")]
    Io {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Subprocess(#[from] SubprocessError),
}

impl GatewayError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            GatewayError::MissingCommand | GatewayError::InvalidListen { .. } => {
                ErrorCategory::InvalidInput
            }
            GatewayError::Io { .. } => ErrorCategory::External,
            GatewayError::Subprocess(err) => err.category(),
        }
    }

    pub fn suggestion(&self) -> String {
        match self {
            GatewayError::MissingCommand => {
                "Example: ptybridge stdio-sse --port 8080 -- tee".to_string()
            }
            GatewayError::InvalidListen { .. } => {
                "Use a loopback --host, or pass --allow-remote to expose the gateway.".to_string()
            }
            GatewayError::Io { operation, .. } if *operation == "bind" => {
                "The port may be in use; pick another --port or use --port 0.".to_string()
            }
            GatewayError::Io { .. } => "Check system resource limits and retry.".to_string(),
            GatewayError::Subprocess(err) => err.suggestion(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Io { .. } => true,
            GatewayError::Subprocess(err) => err.is_retryable(),
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
    fn test_input_errors_exit_usage() {
        assert_eq!(GatewayError::MissingCommand.exit_code(), 64);
        let err = GatewayError::InvalidListen {
            message: "nope".to_string(),
        };
        assert_eq!(err.exit_code(), 64);
    }

    #[test]
    fn test_bind_failure_suggests_another_port() {
        let err = GatewayError::Io {
            operation: "bind",
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        assert_eq!(err.exit_code(), 74);
        assert!(err.suggestion().contains("--port"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_subprocess_errors_keep_their_category() {
        let err = GatewayError::from(SubprocessError::NotFound {
            program: "nope".to_string(),
        });
        assert_eq!(err.exit_code(), 69);
    }
}
