//! Value types shared by both transports.

mod types;

pub use types::AgentStatus;
pub use types::AgentTarget;
pub use types::Container;
pub use types::ControlEvent;
pub use types::InvalidReconnectId;
pub use types::InvalidWorkspaceRef;
pub use types::ReconnectId;
pub use types::StreamChunk;
pub use types::StreamTag;
pub use types::TerminalSize;
pub use types::WorkspaceRef;
