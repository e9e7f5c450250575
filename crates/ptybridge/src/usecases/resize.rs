use crate::domain::ControlEvent;
use crate::domain::TerminalSize;

/// Suppresses resize frames for geometry the remote side already knows.
#[derive(Debug)]
pub struct ResizeDebouncer {
    last: Option<TerminalSize>,
}

impl ResizeDebouncer {
    /// `reported` is the size sent with the dial, if any.
    pub fn new(reported: Option<TerminalSize>) -> Self {
        Self { last: reported }
    }

    pub fn observe(&mut self, size: TerminalSize) -> Option<ControlEvent> {
        if self.last == Some(size) {
            return None;
        }
        self.last = Some(size);
        Some(ControlEvent::resize(size))
    }
}
