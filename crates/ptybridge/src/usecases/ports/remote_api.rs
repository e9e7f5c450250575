use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::domain::AgentStatus;
use crate::domain::AgentTarget;
use crate::domain::Container;
use crate::domain::ControlEvent;
use crate::domain::ReconnectId;
use crate::domain::TerminalSize;
use crate::domain::WorkspaceRef;

use super::RemoteError;

const CONNECTION_QUEUE_CAPACITY: usize = 64;
const PUMP_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Parameters of a reconnecting terminal dial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialRequest {
    pub agent_id: Uuid,
    pub reconnect: ReconnectId,
    pub command: String,
    pub container: Option<String>,
    pub container_user: Option<String>,
    pub size: TerminalSize,
}

/// Remote deployment operations a terminal session needs.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn resolve_agent(&self, target: &WorkspaceRef) -> Result<AgentTarget, RemoteError>;

    async fn agent_status(&self, agent_id: Uuid) -> Result<AgentStatus, RemoteError>;

    async fn list_containers(&self, agent_id: Uuid) -> Result<Vec<Container>, RemoteError>;

    async fn dial(&self, request: &DialRequest) -> Result<RemoteConnection, RemoteError>;

    async fn report_usage(
        &self,
        workspace_id: Uuid,
        agent_id: Uuid,
        app_name: &str,
    ) -> Result<(), RemoteError>;
}

/// Client half of an open terminal connection.
///
/// Frames written through [`FrameWriter`] and output read from `output` both
/// pass through a single transport task, which is the only writer to the
/// underlying socket.
pub struct RemoteConnection {
    pub writer: FrameWriter,
    pub output: mpsc::Receiver<Bytes>,
    pub closer: ConnectionCloser,
}

/// Transport half, driven by whatever owns the socket.
pub struct TransportEnd {
    pub frames: mpsc::Receiver<Bytes>,
    pub output: mpsc::Sender<Bytes>,
    pub closed: CancellationToken,
}

impl RemoteConnection {
    pub fn pair() -> (RemoteConnection, TransportEnd) {
        let (frame_tx, frame_rx) = mpsc::channel(CONNECTION_QUEUE_CAPACITY);
        let (output_tx, output_rx) = mpsc::channel(CONNECTION_QUEUE_CAPACITY);
        let closed = CancellationToken::new();
        let connection = RemoteConnection {
            writer: FrameWriter { tx: frame_tx },
            output: output_rx,
            closer: ConnectionCloser {
                token: closed.clone(),
                pump: None,
            },
        };
        let transport = TransportEnd {
            frames: frame_rx,
            output: output_tx,
            closed,
        };
        (connection, transport)
    }

    pub fn with_pump(mut self, pump: JoinHandle<()>) -> Self {
        self.closer.pump = Some(pump);
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameWriteError {
    #[error("Failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Connection closed")]
    Closed,
}

#[derive(Clone)]
pub struct FrameWriter {
    tx: mpsc::Sender<Bytes>,
}

impl FrameWriter {
    pub async fn send(&self, event: &ControlEvent) -> Result<(), FrameWriteError> {
        let frame = event.encode()?;
        self.tx
            .send(frame)
            .await
            .map_err(|_| FrameWriteError::Closed)
    }
}

pub struct ConnectionCloser {
    token: CancellationToken,
    pump: Option<JoinHandle<()>>,
}

impl ConnectionCloser {
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Signals the transport to close and waits briefly for it to finish.
    pub async fn close(mut self) {
        self.token.cancel();
        if let Some(pump) = self.pump.take() {
            match tokio::time::timeout(PUMP_CLOSE_TIMEOUT, pump).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => debug!(error = %err, "connection task ended abnormally"),
                Err(_) => debug!("connection task did not finish in time"),
            }
        }
    }
}

impl Drop for ConnectionCloser {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_reach_transport_in_order() {
        let (connection, mut transport) = RemoteConnection::pair();
        connection
            .writer
            .send(&ControlEvent::data("a"))
            .await
            .unwrap();
        connection
            .writer
            .send(&ControlEvent::resize(TerminalSize::new(10, 5)))
            .await
            .unwrap();

        assert_eq!(
            transport.frames.recv().await.unwrap(),
            Bytes::from_static(b"{\"data\":\"a\"}\n")
        );
        assert_eq!(
            transport.frames.recv().await.unwrap(),
            Bytes::from_static(b"{\"width\":10,\"height\":5}\n")
        );
    }

    #[tokio::test]
    async fn test_close_cancels_transport_and_joins_pump() {
        let (connection, transport) = RemoteConnection::pair();
        let closed = transport.closed.clone();
        let pump = tokio::spawn(async move {
            transport.closed.cancelled().await;
        });
        let connection = connection.with_pump(pump);
        connection.closer.close().await;
        assert!(closed.is_cancelled());
    }

    #[tokio::test]
    async fn test_writer_fails_once_transport_is_gone() {
        let (connection, transport) = RemoteConnection::pair();
        drop(transport);
        let err = connection
            .writer
            .send(&ControlEvent::data("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, FrameWriteError::Closed));
    }
}
