//! Terminal fakes for session tests.

use std::io;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::TerminalSize;
use crate::usecases::ports::ResizeSource;
use crate::usecases::ports::SizeReader;
use crate::usecases::ports::TerminalMode;

#[derive(Default)]
pub struct MockTerminalMode {
    entered: AtomicUsize,
    restored: AtomicUsize,
}

impl MockTerminalMode {
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    pub fn restored(&self) -> usize {
        self.restored.load(Ordering::SeqCst)
    }
}

impl TerminalMode for MockTerminalMode {
    fn enter_raw(&self) -> io::Result<()> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn restore(&self) -> io::Result<()> {
        self.restored.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FixedSizeReader {
    size: Mutex<Option<TerminalSize>>,
}

impl FixedSizeReader {
    pub fn new(size: TerminalSize) -> Self {
        Self {
            size: Mutex::new(Some(size)),
        }
    }

    pub fn set(&self, size: TerminalSize) {
        *self.size.lock().unwrap() = Some(size);
    }
}

impl SizeReader for FixedSizeReader {
    fn size(&self) -> Option<TerminalSize> {
        *self.size.lock().unwrap()
    }
}

/// Resize source whose ticks are pushed by the test.
pub struct ManualResizeSource {
    rx: mpsc::Receiver<()>,
}

impl ManualResizeSource {
    pub fn new() -> (Self, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel(16);
        (Self { rx }, tx)
    }
}

impl ResizeSource for ManualResizeSource {
    fn notifications(self: Box<Self>, cancel: CancellationToken) -> mpsc::Receiver<()> {
        let (tx, rx) = mpsc::channel(16);
        let mut ticks = self.rx;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    tick = ticks.recv() => match tick {
                        Some(()) => {
                            if tx.send(()).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });
        rx
    }
}
