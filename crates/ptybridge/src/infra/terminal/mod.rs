mod error;
mod raw_mode;
mod resize;
mod stdin;

pub use error::TerminalError;
pub use raw_mode::{CrosstermTerminal, RawModeGuard};
#[cfg(unix)]
pub use resize::SignalResizeSource;
pub use resize::{PollResizeSource, RESIZE_POLL_INTERVAL, platform_resize_source};
pub use stdin::spawn_stdin_reader;
