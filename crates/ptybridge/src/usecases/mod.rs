mod connect;
mod input;
mod resize;
mod session;
mod usage;

pub use connect::{
    AGENT_POLL_INTERVAL, ConnectInput, ConnectOutput, ConnectUseCase, ConnectUseCaseImpl,
};
pub use input::KeystrokeDecoder;
pub use resize::ResizeDebouncer;
pub use session::{ResizeFeed, SessionEnd, SessionError, SessionIo, run_session};
pub use usage::{USAGE_APP_DISABLED, USAGE_HEARTBEAT_INTERVAL, UsageHeartbeat};
pub mod ports;
