//! The I/O loops of an attached remote terminal.
//!
//! Three duties run concurrently until the session ends: keystrokes are
//! framed as `{"data": ...}`, geometry changes as `{"width", "height"}`, and
//! connection output is copied verbatim to the local writer. All frames go
//! through the connection's single writer so frames from one source keep
//! their order.

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::domain::ControlEvent;
use crate::domain::TerminalSize;
use crate::usecases::input::KeystrokeDecoder;
use crate::usecases::ports::FrameWriter;
use crate::usecases::ports::ResizeSource;
use crate::usecases::ports::SizeReader;
use crate::usecases::resize::ResizeDebouncer;
use ptybridge_common::ErrorCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The remote side closed the connection.
    RemoteClosed,
    /// The invocation was cancelled (signal or timeout).
    Cancelled,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to write terminal output: {0}")]
    Output(#[source] std::io::Error),
}

impl SessionError {
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::External
    }

    pub fn suggestion(&self) -> String {
        "Local stdout closed; reconnect with the same --reconnect id to resume.".to_string()
    }

    pub fn is_retryable(&self) -> bool {
        true
    }

    pub fn exit_code(&self) -> i32 {
        self.category().exit_code()
    }
}

pub struct ResizeFeed {
    pub source: Box<dyn ResizeSource>,
    pub size_reader: Arc<dyn SizeReader>,
    /// Size already reported with the dial.
    pub reported: TerminalSize,
}

pub struct SessionIo<W> {
    pub input: mpsc::Receiver<Bytes>,
    pub output: W,
    pub resize: Option<ResizeFeed>,
}

/// Runs the session until the remote closes, `cancel` fires or local output
/// fails. Background duties are stopped before this returns.
pub async fn run_session<W>(
    writer: FrameWriter,
    mut remote_output: mpsc::Receiver<Bytes>,
    io: SessionIo<W>,
    cancel: &CancellationToken,
) -> Result<SessionEnd, SessionError>
where
    W: AsyncWrite + Unpin + Send,
{
    let duties = cancel.child_token();
    let SessionIo {
        input,
        mut output,
        resize,
    } = io;

    let mut tasks: Vec<JoinHandle<()>> = Vec::with_capacity(2);
    tasks.push(tokio::spawn(forward_input(
        input,
        writer.clone(),
        duties.clone(),
    )));
    if let Some(feed) = resize {
        tasks.push(tokio::spawn(forward_resizes(feed, writer, duties.clone())));
    }

    let result = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break Ok(SessionEnd::Cancelled),
            chunk = remote_output.recv() => match chunk {
                Some(chunk) => {
                    if let Err(err) = write_output(&mut output, &chunk).await {
                        break Err(SessionError::Output(err));
                    }
                }
                None => break Ok(SessionEnd::RemoteClosed),
            },
        }
    };

    duties.cancel();
    for task in tasks {
        if let Err(err) = task.await {
            warn!(error = %err, "session task ended abnormally");
        }
    }
    result
}

async fn write_output<W>(output: &mut W, chunk: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    output.write_all(chunk).await?;
    output.flush().await
}

async fn forward_input(
    mut input: mpsc::Receiver<Bytes>,
    writer: FrameWriter,
    cancel: CancellationToken,
) {
    let mut decoder = KeystrokeDecoder::new();
    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return,
            chunk = input.recv() => chunk,
        };
        let text = match chunk {
            Some(bytes) => decoder.push(&bytes),
            None => {
                // Local EOF leaves the remote terminal running.
                if let Some(rest) = decoder.finish()
                    && let Err(err) = writer.send(&ControlEvent::data(rest)).await
                {
                    debug!(error = %err, "dropping buffered input, connection closed");
                }
                debug!("local input closed");
                return;
            }
        };
        if let Some(text) = text
            && let Err(err) = writer.send(&ControlEvent::data(text)).await
        {
            debug!(error = %err, "dropping input, connection closed");
            return;
        }
    }
}

async fn forward_resizes(feed: ResizeFeed, writer: FrameWriter, cancel: CancellationToken) {
    let ResizeFeed {
        source,
        size_reader,
        reported,
    } = feed;
    let mut ticks = source.notifications(cancel.clone());
    let mut debouncer = ResizeDebouncer::new(Some(reported));

    loop {
        let tick = tokio::select! {
            _ = cancel.cancelled() => return,
            tick = ticks.recv() => tick,
        };
        if tick.is_none() {
            return;
        }
        let Some(size) = size_reader.size() else {
            continue;
        };
        if let Some(event) = debouncer.observe(size) {
            debug!(%size, "terminal resized");
            if writer.send(&event).await.is_err() {
                return;
            }
        }
    }
}
