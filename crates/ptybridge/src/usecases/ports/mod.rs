pub mod errors;
pub mod remote_api;
pub mod resize_source;
pub mod terminal_mode;
#[cfg(test)]
pub(crate) mod test_support;

pub use errors::RemoteError;
pub use remote_api::{
    ConnectionCloser, DialRequest, FrameWriteError, FrameWriter, RemoteApi, RemoteConnection,
    TransportEnd,
};
pub use resize_source::{ResizeSource, SizeReader};
pub use terminal_mode::TerminalMode;
