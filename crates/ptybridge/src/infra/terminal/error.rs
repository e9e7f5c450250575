use std::io;

use ptybridge_common::ErrorCategory;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("Failed to enter raw mode: {0}")]
    RawMode(#[source] io::Error),
    #[error("Failed to restore terminal mode: {0}")]
    Restore(#[source] io::Error),
}

impl TerminalError {
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::External
    }

    pub fn suggestion(&self) -> String {
        match self {
            TerminalError::RawMode(_) => {
                "Run from an interactive terminal or redirect stdin/stdout.".to_string()
            }
            TerminalError::Restore(_) => "Run 'reset' to restore your terminal.".to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        false
    }

    pub fn exit_code(&self) -> i32 {
        self.category().exit_code()
    }
}
