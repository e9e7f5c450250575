//! HTTP/SSE gateway around a child process.
//!
//! `POST /` writes the request body to the child's stdin and then streams
//! output; `GET /` only streams. Output is framed as `event: stdout|stderr`
//! with the line as `data:`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::Json;
use axum::extract::ConnectInfo;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::HeaderName;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use axum::http::header;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::response::sse::Event;
use axum::response::sse::KeepAlive;
use axum::response::sse::Sse;
use axum::routing::get;
use bytes::Bytes;
use futures_util::Stream;
use futures_util::stream;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::Any;
use tower_http::cors::CorsLayer;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::domain::StreamChunk;
use crate::infra::hub::BroadcastHub;
use crate::infra::hub::Subscription;
use crate::infra::process::ManagedProcess;
use crate::infra::process::ProcessExit;
use crate::infra::process::ProcessSpec;
use crate::infra::process::StdinHandle;

mod error;
pub use error::GatewayError;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;
pub const SERVER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

const X_ACCEL_BUFFERING: &str = "x-accel-buffering";

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub timeout: Option<Duration>,
    pub allow_remote: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            timeout: None,
            allow_remote: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayOutcome {
    pub exit: ProcessExit,
    pub timed_out: bool,
}

struct GatewayState {
    hub: BroadcastHub,
    stdin: StdinHandle,
    session: CancellationToken,
}

pub struct RunningGateway {
    local_addr: SocketAddr,
    hub: BroadcastHub,
    process: ManagedProcess,
    server: JoinHandle<()>,
    timeout_task: Option<JoinHandle<()>>,
    timed_out: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl RunningGateway {
    /// Binds the listener, starts the child and begins serving.
    ///
    /// The session ends when `cancel` fires, the child exits or the optional
    /// timeout elapses; [`RunningGateway::wait`] then performs teardown.
    pub async fn start(
        config: &GatewayConfig,
        spec: &ProcessSpec,
        cancel: CancellationToken,
    ) -> Result<Self, GatewayError> {
        let (listener, local_addr) = bind_listener(config)?;
        let listener = TcpListener::from_std(listener).map_err(|e| GatewayError::Io {
            operation: "register listener",
            source: e,
        })?;

        let hub = BroadcastHub::new();
        let process = ManagedProcess::spawn(spec, &hub, cancel.clone())?;

        let timed_out = Arc::new(AtomicBool::new(false));
        let timeout_task = config
            .timeout
            .map(|limit| spawn_timeout(limit, cancel.clone(), Arc::clone(&timed_out)));

        let state = Arc::new(GatewayState {
            hub: hub.clone(),
            stdin: process.stdin(),
            session: cancel.clone(),
        });
        let app = build_router(state);

        let server_cancel = cancel.clone();
        let server = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(cancel.clone().cancelled_owned());
        let server = tokio::spawn(async move {
            if let Err(err) = server.await {
                error!(error = %err, "gateway server failed");
                server_cancel.cancel();
            }
        });

        info!(url = %format_http_url(&local_addr), pid = process.pid(), "gateway listening");

        Ok(Self {
            local_addr,
            hub,
            process,
            server,
            timeout_task,
            timed_out,
            cancel,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn url(&self) -> String {
        format_http_url(&self.local_addr)
    }

    /// Waits for the session to end, then shuts down: the server stops
    /// (bounded by [`SERVER_SHUTDOWN_TIMEOUT`]) while the child is stopped in
    /// parallel, and the hub is closed only after both.
    pub async fn wait(self) -> GatewayOutcome {
        let RunningGateway {
            hub,
            process,
            server,
            timeout_task,
            timed_out,
            cancel,
            ..
        } = self;

        cancel.cancelled().await;
        info!("gateway session ended, shutting down");

        let (_, exit) = tokio::join!(stop_server(server), process.wait());
        hub.close();
        if let Some(task) = timeout_task {
            task.abort();
        }

        GatewayOutcome {
            exit,
            timed_out: timed_out.load(Ordering::SeqCst),
        }
    }
}

async fn stop_server(mut server: JoinHandle<()>) {
    match tokio::time::timeout(SERVER_SHUTDOWN_TIMEOUT, &mut server).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!(error = %err, "gateway server task failed"),
        Err(_) => {
            warn!(
                timeout_ms = SERVER_SHUTDOWN_TIMEOUT.as_millis() as u64,
                "gateway shutdown timed out; aborting"
            );
            server.abort();
        }
    }
}

fn spawn_timeout(
    limit: Duration,
    cancel: CancellationToken,
    timed_out: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(limit) => {
                info!(timeout_ms = limit.as_millis() as u64, "session timeout reached");
                timed_out.store(true, Ordering::SeqCst);
                cancel.cancel();
            }
        }
    })
}

fn build_router(state: Arc<GatewayState>) -> axum::Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    axum::Router::new()
        .route("/", get(stream_handler).post(input_handler))
        .layer(cors)
        .with_state(state)
}

async fn stream_handler(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let subscription = state.hub.subscribe();
    sse_response(&state, subscription, peer, &headers)
}

async fn input_handler(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // Subscribe first so output caused by this input is not missed.
    let subscription = state.hub.subscribe();
    if let Err(err) = state.stdin.write(&body).await {
        warn!(%peer, error = %err, "rejecting input");
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "stdin unavailable");
    }
    sse_response(&state, subscription, peer, &headers)
}

fn sse_response(
    state: &GatewayState,
    subscription: Subscription,
    peer: SocketAddr,
    headers: &HeaderMap,
) -> Response {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();
    info!(%peer, user_agent = %user_agent, subscriber = subscription.id(), "client connected");

    let stream = chunk_stream(
        subscription,
        state.session.clone(),
        ConnectionLog {
            peer,
            session_ended: false,
        },
    );
    let mut response = Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response();

    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        HeaderName::from_static(X_ACCEL_BUFFERING),
        HeaderValue::from_static("no"),
    );
    response
}

/// Logs how a streaming connection ended when its stream is dropped.
struct ConnectionLog {
    peer: SocketAddr,
    session_ended: bool,
}

impl Drop for ConnectionLog {
    fn drop(&mut self) {
        if self.session_ended {
            info!(peer = %self.peer, "stream closed, session ended");
        } else {
            info!(peer = %self.peer, "client disconnected");
        }
    }
}

struct StreamState {
    subscription: Subscription,
    session: CancellationToken,
    draining: bool,
    log: ConnectionLog,
}

/// Streams chunks until the hub ends the subscription or the session is
/// cancelled; on cancellation whatever is already queued is still sent.
fn chunk_stream(
    subscription: Subscription,
    session: CancellationToken,
    log: ConnectionLog,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let state = StreamState {
        subscription,
        session,
        draining: false,
        log,
    };
    stream::unfold(state, |mut st| async move {
        let chunk = if st.draining {
            st.subscription.try_recv()
        } else {
            tokio::select! {
                biased;
                chunk = st.subscription.recv() => chunk,
                _ = st.session.cancelled() => {
                    st.draining = true;
                    st.subscription.try_recv()
                }
            }
        };
        match chunk {
            Some(chunk) => Some((Ok(chunk_event(&chunk)), st)),
            None => {
                st.log.session_ended = true;
                None
            }
        }
    })
}

fn chunk_event(chunk: &StreamChunk) -> Event {
    Event::default()
        .event(chunk.tag.as_str())
        .data(sse_data(&chunk.data))
}

/// SSE treats a bare CR as a line break, so interior CRs become separate
/// `data:` lines rather than corrupting the frame.
fn sse_data(line: &[u8]) -> String {
    String::from_utf8_lossy(line).replace('\r', "\n")
}

#[derive(Serialize)]
struct ErrorResponse<'a> {
    error: &'a str,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(ErrorResponse { error: message })).into_response()
}

fn bind_listener(
    config: &GatewayConfig,
) -> Result<(std::net::TcpListener, SocketAddr), GatewayError> {
    let mut addrs = (config.host.as_str(), config.port)
        .to_socket_addrs()
        .map_err(|e| GatewayError::InvalidListen {
            message: format!("{}: {e}", config.host),
        })?;
    let addr = addrs.next().ok_or_else(|| GatewayError::InvalidListen {
        message: format!("{}: no resolved address", config.host),
    })?;

    if !config.allow_remote && !addr.ip().is_loopback() {
        return Err(GatewayError::InvalidListen {
            message: format!("refusing to bind non-loopback address {addr} without --allow-remote"),
        });
    }

    let listener = std::net::TcpListener::bind(addr).map_err(|e| GatewayError::Io {
        operation: "bind",
        source: e,
    })?;
    listener
        .set_nonblocking(true)
        .map_err(|e| GatewayError::Io {
            operation: "set non-blocking",
            source: e,
        })?;
    let local_addr = listener.local_addr().map_err(|e| GatewayError::Io {
        operation: "read local address",
        source: e,
    })?;
    Ok((listener, local_addr))
}

fn format_http_url(addr: &SocketAddr) -> String {
    let host = match addr.ip() {
        std::net::IpAddr::V4(ip) => ip.to_string(),
        std::net::IpAddr::V6(ip) => format!("[{ip}]"),
    };
    format!("http://{}:{}/", host, addr.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(host: &str, allow_remote: bool) -> GatewayConfig {
        GatewayConfig {
            host: host.to_string(),
            port: 0,
            timeout: None,
            allow_remote,
        }
    }

    #[test]
    fn test_bind_refuses_non_loopback_without_opt_in() {
        let err = bind_listener(&config("0.0.0.0", false)).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidListen { .. }));
        assert!(err.to_string().contains("--allow-remote"));
    }

    #[test]
    fn test_bind_loopback_ephemeral_port() {
        let (_listener, addr) = bind_listener(&config("127.0.0.1", false)).unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn test_bind_rejects_unresolvable_host() {
        let err = bind_listener(&config("not a host name", false)).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidListen { .. }));
    }

    #[test]
    fn test_format_http_url_brackets_ipv6() {
        let v4: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let v6: SocketAddr = "[::1]:9000".parse().unwrap();
        assert_eq!(format_http_url(&v4), "http://127.0.0.1:8080/");
        assert_eq!(format_http_url(&v6), "http://[::1]:9000/");
    }

    #[test]
    fn test_sse_data_splits_carriage_returns() {
        assert_eq!(sse_data(b"50%\r100%"), "50%\n100%");
        assert_eq!(sse_data(b"plain"), "plain");
        assert_eq!(sse_data(b"bad \xff byte"), "bad \u{FFFD} byte");
    }

    #[tokio::test]
    async fn test_missing_program_releases_listener() {
        let spec = ProcessSpec {
            program: "definitely-not-a-real-binary-ptybridge".to_string(),
            args: Vec::new(),
        };
        let err = RunningGateway::start(&config("127.0.0.1", false), &spec, CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            GatewayError::Subprocess(crate::infra::process::SubprocessError::NotFound { .. })
        ));
    }
}
