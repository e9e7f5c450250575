//! Single task owning the WebSocket: it writes queued control frames and
//! forwards received output until either side closes.

use bytes::Bytes;
use futures_util::SinkExt;
use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::usecases::ports::TransportEnd;

pub(super) async fn run<S>(stream: WebSocketStream<S>, transport: TransportEnd)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut sink, mut source) = stream.split();
    let TransportEnd {
        mut frames,
        output,
        closed,
    } = transport;

    loop {
        tokio::select! {
            _ = closed.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            frame = frames.recv() => match frame {
                Some(frame) => {
                    if let Err(err) = sink.send(Message::Binary(frame.to_vec())).await {
                        debug!(error = %err, "terminal connection write failed");
                        break;
                    }
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            message = source.next() => match message {
                Some(Ok(Message::Binary(data))) => {
                    if output.send(Bytes::from(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Text(text))) => {
                    if output.send(Bytes::from(text.into_bytes())).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "terminal connection closed by server");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(error = %err, "terminal connection read failed");
                    break;
                }
                None => break,
            },
        }
    }
    closed.cancel();
}
