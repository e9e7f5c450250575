//! Process signal handling.
//!
//! The first SIGINT or SIGTERM cancels the invocation's root token; teardown
//! then runs through the same path as any other session end.

use thiserror::Error;
#[cfg(not(unix))]
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("Failed to set up signal handling: {0}")]
    Setup(String),
}

#[cfg(unix)]
pub use unix::SignalHandler;

#[cfg(unix)]
mod unix {
    use signal_hook::consts::SIGINT;
    use signal_hook::consts::SIGTERM;
    use signal_hook::iterator::Handle;
    use signal_hook::iterator::Signals;
    use std::thread;
    use tokio_util::sync::CancellationToken;
    use tracing::info;

    use super::SignalError;

    pub struct SignalHandler {
        handle: Handle,
        _thread: thread::JoinHandle<()>,
    }

    impl SignalHandler {
        pub fn setup(cancel: CancellationToken) -> Result<Self, SignalError> {
            let mut signals = Signals::new([SIGINT, SIGTERM])
                .map_err(|e| SignalError::Setup(e.to_string()))?;
            let handle = signals.handle();

            let thread = thread::Builder::new()
                .name("signal-handler".to_string())
                .spawn(move || {
                    if let Some(sig) = signals.forever().next() {
                        info!(signal = sig, "Received signal, ending session");
                        cancel.cancel();
                    }
                })
                .map_err(|e| {
                    SignalError::Setup(format!("failed to spawn signal handler: {}", e))
                })?;

            Ok(Self {
                handle,
                _thread: thread,
            })
        }
    }

    impl Drop for SignalHandler {
        fn drop(&mut self) {
            self.handle.close();
        }
    }
}

#[cfg(not(unix))]
pub struct SignalHandler {
    task: tokio::task::JoinHandle<()>,
}

#[cfg(not(unix))]
impl SignalHandler {
    /// Must be called inside a Tokio runtime.
    pub fn setup(cancel: CancellationToken) -> Result<Self, SignalError> {
        let task = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl-C, ending session");
                cancel.cancel();
            }
        });
        Ok(Self { task })
    }
}

#[cfg(not(unix))]
impl Drop for SignalHandler {
    fn drop(&mut self) {
        self.task.abort();
    }
}
