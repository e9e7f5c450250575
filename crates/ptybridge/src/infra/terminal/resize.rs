//! Resize notification sources.
//!
//! Unix delivers SIGWINCH; elsewhere a fixed-interval poll stands in and
//! always fires, leaving change detection to the consumer. Both coalesce: a
//! notification already waiting in the channel covers any that follow.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::usecases::ports::ResizeSource;

pub const RESIZE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Returns the resize source for the current platform.
pub fn platform_resize_source() -> Box<dyn ResizeSource> {
    #[cfg(unix)]
    {
        Box::new(SignalResizeSource)
    }
    #[cfg(not(unix))]
    {
        Box::new(PollResizeSource::new(RESIZE_POLL_INTERVAL))
    }
}

/// Returns `false` once the consumer has gone away.
fn notify(tx: &mpsc::Sender<()>) -> bool {
    !matches!(tx.try_send(()), Err(TrySendError::Closed(())))
}

#[derive(Debug, Clone, Copy)]
pub struct PollResizeSource {
    interval: Duration,
}

impl PollResizeSource {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl ResizeSource for PollResizeSource {
    fn notifications(self: Box<Self>, cancel: CancellationToken) -> mpsc::Receiver<()> {
        let (tx, rx) = mpsc::channel(1);
        let interval = self.interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately; the dial already carried
            // the current size.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if !notify(&tx) {
                            break;
                        }
                    }
                }
            }
        });
        rx
    }
}

#[cfg(unix)]
pub use signal::SignalResizeSource;

#[cfg(unix)]
mod signal {
    use signal_hook::consts::SIGWINCH;
    use signal_hook::iterator::Signals;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;
    use tracing::debug;
    use tracing::warn;

    use super::notify;
    use crate::usecases::ports::ResizeSource;

    /// SIGWINCH-driven notifications from a dedicated thread.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct SignalResizeSource;

    impl ResizeSource for SignalResizeSource {
        fn notifications(self: Box<Self>, cancel: CancellationToken) -> mpsc::Receiver<()> {
            let (tx, rx) = mpsc::channel(1);

            let mut signals = match Signals::new([SIGWINCH]) {
                Ok(signals) => signals,
                Err(err) => {
                    warn!(error = %err, "cannot watch SIGWINCH, resize tracking disabled");
                    return rx;
                }
            };
            let handle = signals.handle();

            let spawned = std::thread::Builder::new()
                .name("resize-signal".to_string())
                .spawn(move || {
                    for _ in signals.forever() {
                        if !notify(&tx) {
                            break;
                        }
                    }
                    debug!("resize signal watcher stopped");
                });
            if let Err(err) = spawned {
                warn!(error = %err, "failed to spawn resize watcher");
                handle.close();
                return rx;
            }

            tokio::spawn(async move {
                cancel.cancelled().await;
                handle.close();
            });
            rx
        }
    }
}
