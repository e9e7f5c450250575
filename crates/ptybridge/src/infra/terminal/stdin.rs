use std::io;
use std::io::Read;

use bytes::Bytes;
use tokio::sync::mpsc;

const STDIN_CHANNEL_CAPACITY: usize = 64;
const STDIN_READ_BUFFER: usize = 4096;

/// Reads stdin on a dedicated thread, forwarding bytes as they arrive.
///
/// The channel closes on EOF or a read error. The thread is not joined: a
/// blocking read cannot be interrupted, and it ends with the process.
pub fn spawn_stdin_reader() -> mpsc::Receiver<Bytes> {
    let (tx, rx) = mpsc::channel(STDIN_CHANNEL_CAPACITY);
    let span = tracing::debug_span!("stdin_reader");
    let builder = std::thread::Builder::new().name("session-stdin".to_string());
    if let Err(err) = builder.spawn(move || {
        let _guard = span.enter();
        let mut stdin = io::stdin();
        let mut buf = [0u8; STDIN_READ_BUFFER];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.blocking_send(Bytes::copy_from_slice(&buf[..n])).is_err() {
                        break;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    tracing::debug!(error = %err, "stdin read failed");
                    break;
                }
            }
        }
    }) {
        tracing::warn!(error = %err, "Failed to spawn stdin reader");
    }
    rx
}
