mod mock_remote;
mod mock_terminal;

pub use mock_remote::MockRemoteApi;
pub use mock_terminal::{FixedSizeReader, ManualResizeSource, MockTerminalMode};
