//! Child process with piped stdio, feeding a [`BroadcastHub`].
//!
//! A supervisor task owns the child. Teardown, whether the child exits on its
//! own or the session token is cancelled, runs in this order: stdin is closed
//! to new writes, the output readers stop, then the hub is closed. On
//! cancellation the child is then asked to terminate and is killed if it is
//! still running after [`PROCESS_EXIT_GRACE`].

mod error;

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::process::Child;
use tokio::process::ChildStdin;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::domain::StreamTag;
use crate::infra::hub::BroadcastHub;
use crate::infra::hub::Publisher;

pub use error::SubprocessError;

pub const PROCESS_EXIT_GRACE: Duration = Duration::from_secs(5);
pub const MAX_LINE_BYTES: usize = 64 * 1024;
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl ProcessSpec {
    /// Splits `argv` into program and arguments; `None` when empty.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    /// The child exited on its own.
    Exited(Option<i32>),
    /// The child exited after being asked to terminate.
    Terminated(Option<i32>),
    /// The child ignored termination and was killed.
    Killed,
    /// The exit status could not be collected.
    Unknown,
}

/// Shared write handle to the child's stdin.
///
/// Closing never waits behind a blocked write: an in-flight write observes
/// the closing token, gives up the pipe and fails with
/// [`SubprocessError::StdinClosed`].
#[derive(Clone)]
pub struct StdinHandle {
    pipe: Arc<Mutex<Option<ChildStdin>>>,
    closing: CancellationToken,
}

impl StdinHandle {
    fn new(stdin: ChildStdin) -> Self {
        Self {
            pipe: Arc::new(Mutex::new(Some(stdin))),
            closing: CancellationToken::new(),
        }
    }

    /// Writes `data` verbatim. Fails once teardown has started or the child
    /// closed its end; a failed pipe is closed for all later writers.
    pub async fn write(&self, data: &[u8]) -> Result<(), SubprocessError> {
        let mut guard = tokio::select! {
            biased;
            _ = self.closing.cancelled() => return Err(SubprocessError::StdinClosed),
            guard = self.pipe.lock() => guard,
        };
        let stdin = guard.as_mut().ok_or(SubprocessError::StdinClosed)?;
        let written = tokio::select! {
            biased;
            _ = self.closing.cancelled() => None,
            written = write_and_flush(stdin, data) => Some(written),
        };
        match written {
            Some(Ok(())) => Ok(()),
            Some(Err(err)) => {
                guard.take();
                Err(SubprocessError::StdinWrite(err))
            }
            None => {
                guard.take();
                debug!(bytes = data.len(), "stdin write abandoned, pipe closing");
                Err(SubprocessError::StdinClosed)
            }
        }
    }

    pub async fn close(&self) {
        self.closing.cancel();
        if self.pipe.lock().await.take().is_some() {
            debug!("child stdin closed");
        }
    }

    pub async fn is_open(&self) -> bool {
        !self.closing.is_cancelled() && self.pipe.lock().await.is_some()
    }
}

async fn write_and_flush(stdin: &mut ChildStdin, data: &[u8]) -> std::io::Result<()> {
    stdin.write_all(data).await?;
    stdin.flush().await
}

pub struct ManagedProcess {
    pid: Option<u32>,
    stdin: StdinHandle,
    supervisor: JoinHandle<ProcessExit>,
}

impl ManagedProcess {
    /// Starts `spec` and begins publishing its output to `hub`.
    ///
    /// Cancelling `cancel` tears the process down; a natural exit cancels it
    /// too, after buffered output has reached the hub's subscribers.
    pub fn spawn(
        spec: &ProcessSpec,
        hub: &BroadcastHub,
        cancel: CancellationToken,
    ) -> Result<Self, SubprocessError> {
        let stdout_publisher = hub.publisher(StreamTag::Stdout)?;
        let stderr_publisher = hub.publisher(StreamTag::Stderr)?;

        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| SubprocessError::from_spawn(&spec.program, err))?;

        let stdin = child
            .stdin
            .take()
            .ok_or(SubprocessError::Pipe { stream: "stdin" })?;
        let stdout = child
            .stdout
            .take()
            .ok_or(SubprocessError::Pipe { stream: "stdout" })?;
        let stderr = child
            .stderr
            .take()
            .ok_or(SubprocessError::Pipe { stream: "stderr" })?;

        let pid = child.id();
        info!(pid, cmd = %spec.program, args = ?spec.args, "started child process");

        let stdin = StdinHandle::new(stdin);
        let readers_cancel = CancellationToken::new();
        let readers = vec![
            tokio::spawn(pump_lines(stdout, stdout_publisher, readers_cancel.clone())),
            tokio::spawn(pump_lines(stderr, stderr_publisher, readers_cancel.clone())),
        ];

        let supervisor = tokio::spawn(supervise(Supervision {
            child,
            stdin: stdin.clone(),
            readers,
            readers_cancel,
            hub: hub.clone(),
            cancel,
        }));

        Ok(Self {
            pid,
            stdin,
            supervisor,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn stdin(&self) -> StdinHandle {
        self.stdin.clone()
    }

    /// Waits for teardown to complete.
    pub async fn wait(self) -> ProcessExit {
        match self.supervisor.await {
            Ok(exit) => exit,
            Err(err) => {
                warn!(error = %err, "process supervisor failed");
                ProcessExit::Unknown
            }
        }
    }
}

struct Supervision {
    child: Child,
    stdin: StdinHandle,
    readers: Vec<JoinHandle<()>>,
    readers_cancel: CancellationToken,
    hub: BroadcastHub,
    cancel: CancellationToken,
}

async fn supervise(mut s: Supervision) -> ProcessExit {
    let pid = s.child.id();
    tokio::select! {
        status = s.child.wait() => {
            let exit = match status {
                Ok(status) => ProcessExit::Exited(status.code()),
                Err(err) => {
                    warn!(pid, error = %err, "failed to collect child status");
                    ProcessExit::Unknown
                }
            };
            info!(pid, ?exit, "child process exited");
            s.stdin.close().await;
            // Pipes hit EOF once the child is gone, so readers finish on their
            // own after forwarding what was still buffered.
            join_readers(&mut s.readers, &s.readers_cancel, READER_DRAIN_TIMEOUT).await;
            s.hub.close();
            s.hub.drained().await;
            s.cancel.cancel();
            exit
        }
        _ = s.cancel.cancelled() => {
            debug!(pid, "session cancelled, stopping child process");
            s.stdin.close().await;
            s.readers_cancel.cancel();
            join_readers(&mut s.readers, &s.readers_cancel, READER_DRAIN_TIMEOUT).await;
            s.hub.close();
            let exit = terminate(&mut s.child, PROCESS_EXIT_GRACE).await;
            info!(pid, ?exit, "child process stopped");
            exit
        }
    }
}

async fn join_readers(
    readers: &mut Vec<JoinHandle<()>>,
    readers_cancel: &CancellationToken,
    timeout: Duration,
) {
    let all = futures_util::future::join_all(readers.iter_mut());
    if tokio::time::timeout(timeout, all).await.is_err() {
        debug!("output readers still busy, stopping them");
        readers_cancel.cancel();
        for reader in readers.iter() {
            reader.abort();
        }
    }
    readers.clear();
}

/// Asks the child to exit, then kills it if it is still running after `grace`.
async fn terminate(child: &mut Child, grace: Duration) -> ProcessExit {
    if let Ok(Some(status)) = child.try_wait() {
        return ProcessExit::Exited(status.code());
    }

    if !request_exit(child) {
        return kill(child).await;
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => ProcessExit::Terminated(status.code()),
        Ok(Err(err)) => {
            warn!(error = %err, "failed to wait for child process");
            kill(child).await
        }
        Err(_) => {
            warn!(grace_ms = grace.as_millis() as u64, "child ignored termination, killing");
            kill(child).await
        }
    }
}

#[cfg(unix)]
fn request_exit(child: &Child) -> bool {
    let Some(pid) = child.id() else {
        return false;
    };
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: `pid` belongs to a child we have not reaped yet, so it cannot
    // have been recycled for an unrelated process.
    unsafe { libc::kill(pid, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
fn request_exit(_child: &Child) -> bool {
    false
}

async fn kill(child: &mut Child) -> ProcessExit {
    if let Err(err) = child.start_kill() {
        debug!(error = %err, "kill failed, child may already be gone");
    }
    match child.wait().await {
        Ok(_) => ProcessExit::Killed,
        Err(err) => {
            warn!(error = %err, "failed to reap killed child");
            ProcessExit::Unknown
        }
    }
}

async fn pump_lines<R>(reader: R, publisher: Publisher, cancel: CancellationToken)
where
    R: AsyncRead + Unpin,
{
    let tag = publisher.tag();
    let mut reader = BufReader::new(reader);
    let mut line = Vec::with_capacity(256);

    loop {
        line.clear();
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            read = read_line_bounded(&mut reader, &mut line) => read,
        };
        match read {
            Ok(0) => break,
            Ok(_) => {
                let text = trim_line_ending(&line);
                if tag == StreamTag::Stderr {
                    debug!(line = %String::from_utf8_lossy(text), "child stderr");
                }
                publisher.publish(Bytes::copy_from_slice(text));
            }
            Err(err) => {
                debug!(%tag, error = %err, "output reader stopped");
                break;
            }
        }
    }
    debug!(%tag, "output reader finished");
}

/// Reads through the next newline, or at most [`MAX_LINE_BYTES`].
async fn read_line_bounded<R>(reader: &mut BufReader<R>, line: &mut Vec<u8>) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    reader
        .take(MAX_LINE_BYTES as u64)
        .read_until(b'\n', line)
        .await
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
