use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::TerminalSize;

/// Emits whenever the caller should re-check the terminal geometry.
///
/// A notification does not imply the size changed; consumers compare against
/// the last size they reported. The channel closes once `cancel` fires.
pub trait ResizeSource: Send {
    fn notifications(self: Box<Self>, cancel: CancellationToken) -> mpsc::Receiver<()>;
}

pub trait SizeReader: Send + Sync {
    /// Current geometry, or `None` when it cannot be queried.
    fn size(&self) -> Option<TerminalSize>;
}
