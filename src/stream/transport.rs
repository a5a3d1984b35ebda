//! Event-stream transport boundary.
//!
//! A [`SseConnector`] opens connections; a [`SseConnection`] yields raw
//! [`TransportEvent`]s and reports a browser-style [`ReadyState`]. The
//! production implementation is [`HttpSseConnector`], which speaks SSE over a
//! long-lived `reqwest` response.

use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::{EventStreamError, Eventsource};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::{Client, RequestBuilder, Url};
use thiserror::Error;
use tracing::debug;

/// Readiness of a transport connection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closed,
}

/// Raw event observed on a connection.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TransportEvent {
    /// The server accepted the stream.
    Open,
    /// An SSE event. `event` is `"message"` when the producer did not tag it.
    Message { event: String, data: String },
    /// The stream failed or ended. Inspect [`SseConnection::ready_state`] to
    /// tell the two apart.
    Error,
}

/// Options applied when opening a connection.
#[derive(Clone, Debug)]
pub struct ConnectOptions {
    /// Longest tolerated silence on the wire before the connection is
    /// considered broken.
    pub heartbeat_timeout: Duration,
    /// Whether ambient credentials (cookies) should accompany the request.
    pub with_credentials: bool,
}

/// Errors raised while constructing a connection.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("invalid stream url: {0}")]
    InvalidUrl(String),
}

/// Opens event-stream connections.
#[async_trait]
pub trait SseConnector: Send + Sync {
    async fn connect(
        &self,
        url: &Url,
        options: &ConnectOptions,
    ) -> Result<Box<dyn SseConnection>, TransportError>;
}

/// One open event stream.
#[async_trait]
pub trait SseConnection: Send {
    /// Waits for the next event. `None` means the connection is finished and
    /// will produce nothing further.
    async fn next_event(&mut self) -> Option<TransportEvent>;

    fn ready_state(&self) -> ReadyState;

    /// Releases the underlying stream and marks the connection closed.
    fn close(&mut self);
}

/// SSE over HTTP using `reqwest` and `eventsource-stream`.
#[derive(Clone, Debug)]
pub struct HttpSseConnector {
    http: Client,
}

impl HttpSseConnector {
    pub fn new() -> Result<Self, TransportError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(TransportError::Client)?;
        Ok(Self { http })
    }

    pub fn with_client(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl SseConnector for HttpSseConnector {
    async fn connect(
        &self,
        url: &Url,
        options: &ConnectOptions,
    ) -> Result<Box<dyn SseConnection>, TransportError> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(TransportError::InvalidUrl(format!(
                "unsupported scheme {}",
                url.scheme()
            )));
        }

        // reqwest has no per-request cookie switch; with_credentials relies on
        // the client's cookie configuration.
        let request = self
            .http
            .get(url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");

        Ok(Box::new(HttpSseConnection {
            phase: Phase::Pending(request),
            heartbeat_timeout: options.heartbeat_timeout,
            state: ReadyState::Connecting,
        }))
    }
}

type EventStream =
    BoxStream<'static, Result<eventsource_stream::Event, EventStreamError<reqwest::Error>>>;

enum Phase {
    Pending(RequestBuilder),
    Streaming(EventStream),
    Finished,
}

struct HttpSseConnection {
    phase: Phase,
    heartbeat_timeout: Duration,
    state: ReadyState,
}

impl HttpSseConnection {
    fn fail(&mut self, state: ReadyState) -> Option<TransportEvent> {
        self.phase = Phase::Finished;
        self.state = state;
        Some(TransportEvent::Error)
    }
}

#[async_trait]
impl SseConnection for HttpSseConnection {
    async fn next_event(&mut self) -> Option<TransportEvent> {
        match std::mem::replace(&mut self.phase, Phase::Finished) {
            Phase::Finished => None,
            Phase::Pending(request) => {
                let response = match request.send().await {
                    Ok(response) => response,
                    Err(err) => {
                        debug!(event = "sse_request_failed", error = %err);
                        return self.fail(ReadyState::Connecting);
                    }
                };
                let status = response.status();
                if !status.is_success() {
                    debug!(event = "sse_bad_status", status = status.as_u16());
                    return self.fail(ReadyState::Closed);
                }
                self.phase = Phase::Streaming(response.bytes_stream().eventsource().boxed());
                self.state = ReadyState::Open;
                Some(TransportEvent::Open)
            }
            Phase::Streaming(mut stream) => {
                match tokio::time::timeout(self.heartbeat_timeout, stream.next()).await {
                    Ok(Some(Ok(event))) => {
                        self.phase = Phase::Streaming(stream);
                        Some(TransportEvent::Message {
                            event: event.event,
                            data: event.data,
                        })
                    }
                    Ok(Some(Err(err))) => {
                        debug!(event = "sse_read_failed", error = %err);
                        self.fail(ReadyState::Connecting)
                    }
                    Ok(None) => self.fail(ReadyState::Closed),
                    Err(_) => {
                        debug!(
                            event = "sse_heartbeat_timeout",
                            heartbeat_ms = self.heartbeat_timeout.as_millis() as u64
                        );
                        self.fail(ReadyState::Connecting)
                    }
                }
            }
        }
    }

    fn ready_state(&self) -> ReadyState {
        self.state
    }

    fn close(&mut self) {
        self.phase = Phase::Finished;
        self.state = ReadyState::Closed;
    }
}
