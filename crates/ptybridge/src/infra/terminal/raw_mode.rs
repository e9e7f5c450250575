use std::io;
use std::io::IsTerminal;
use std::sync::Arc;

use tracing::warn;

use crate::domain::TerminalSize;
use crate::usecases::ports::SizeReader;
use crate::usecases::ports::TerminalMode;

use super::TerminalError;

/// The process's controlling terminal, via crossterm.
#[derive(Debug, Default, Clone, Copy)]
pub struct CrosstermTerminal;

impl CrosstermTerminal {
    /// Raw mode and resize tracking only apply when both ends are terminals.
    pub fn is_interactive() -> bool {
        io::stdin().is_terminal() && io::stdout().is_terminal()
    }

    /// Current size when stdout is a terminal, else 80x24.
    pub fn initial_size(&self) -> TerminalSize {
        if io::stdout().is_terminal() {
            self.size().unwrap_or_default()
        } else {
            TerminalSize::FALLBACK
        }
    }
}

impl TerminalMode for CrosstermTerminal {
    fn enter_raw(&self) -> io::Result<()> {
        crossterm::terminal::enable_raw_mode()
    }

    fn restore(&self) -> io::Result<()> {
        crossterm::terminal::disable_raw_mode()
    }
}

impl SizeReader for CrosstermTerminal {
    fn size(&self) -> Option<TerminalSize> {
        match crossterm::terminal::size() {
            Ok((width, height)) if width > 0 && height > 0 => {
                Some(TerminalSize::new(width, height))
            }
            _ => None,
        }
    }
}

/// Holds the terminal in raw mode; restores it exactly once on drop,
/// including during unwinding.
#[must_use = "RawModeGuard must be held for the duration of the session"]
pub struct RawModeGuard {
    mode: Arc<dyn TerminalMode>,
    active: bool,
}

impl RawModeGuard {
    pub fn enter(mode: Arc<dyn TerminalMode>) -> Result<Self, TerminalError> {
        mode.enter_raw().map_err(TerminalError::RawMode)?;
        Ok(Self { mode, active: true })
    }

    pub fn restore(&mut self) -> Result<(), TerminalError> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        self.mode.restore().map_err(TerminalError::Restore)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(err) = self.restore() {
            warn!(error = %err, "terminal left in raw mode");
        }
    }
}
