use ptybridge_common::ErrorCategory;
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HubError {
    #[error("Broadcast hub is closed")]
    Closed,
}

impl HubError {
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::Internal
    }

    pub fn suggestion(&self) -> String {
        "The session is shutting down; start a new one.".to_string()
    }

    pub fn is_retryable(&self) -> bool {
        false
    }

    pub fn exit_code(&self) -> i32 {
        self.category().exit_code()
    }
}
