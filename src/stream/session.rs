//! Single streamed chat reply.
//!
//! `StreamSession` drives one event-stream connection to completion: it
//! routes events to the thinking/content callbacks, enforces the idle timeout
//! and settles exactly once. The transport signals both a finished reply and a
//! broken connection through the same error event, so the outcome is decided
//! from the connection state and whether any payload arrived:
//!
//! - closed after at least one payload: success
//! - closed before any payload: [`StreamError::ClosedWithoutData`]
//! - error while not closed: [`StreamError::ConnectionError`]

use std::fmt;
use std::sync::Arc;

use reqwest::Url;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::stream::client::{StreamError, StreamOptions};
use crate::stream::proto::{Channel, ChannelEvent};
use crate::stream::transport::{ReadyState, SseConnection, SseConnector, TransportEvent};

/// Receives the text of one channel, in arrival order.
pub type ChannelCallback = Box<dyn FnMut(String) + Send>;

/// Cloneable handle that stops a running session.
///
/// Closing is a caller decision, so the session settles with `Ok(())`.
#[derive(Clone, Debug, Default)]
pub struct StreamCloser {
    token: CancellationToken,
}

impl StreamCloser {
    pub fn close(&self) {
        self.token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}

pub struct StreamSession {
    url: Url,
    connector: Arc<dyn SseConnector>,
    options: StreamOptions,
    on_thinking: ChannelCallback,
    on_content: ChannelCallback,
    closer: StreamCloser,
    connection: Option<Box<dyn SseConnection>>,
    has_received_data: bool,
}

impl StreamSession {
    pub(crate) fn new(
        url: Url,
        connector: Arc<dyn SseConnector>,
        options: StreamOptions,
        on_thinking: ChannelCallback,
        on_content: ChannelCallback,
    ) -> Self {
        Self {
            url,
            connector,
            options,
            on_thinking,
            on_content,
            closer: StreamCloser::default(),
            connection: None,
            has_received_data: false,
        }
    }

    /// Returns a handle that can stop this session from another task.
    pub fn closer(&self) -> StreamCloser {
        self.closer.clone()
    }

    /// Stops the session. Equivalent to `self.closer().close()`.
    pub fn close(&self) {
        self.closer.close();
    }

    /// Connects and delivers events until the session settles.
    pub async fn finish(mut self) -> Result<(), StreamError> {
        let token = self.closer.token.clone();
        let mut idle = Box::pin(tokio::time::sleep(self.options.idle_timeout));

        let result = match self.connect(&token, idle.as_mut()).await {
            Some(result) => result,
            None => loop {
                let Some(connection) = self.connection.as_mut() else {
                    break Err(StreamError::ConnectionError);
                };

                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        info!(event = "sse_closed_by_caller");
                        break Ok(());
                    }
                    _ = idle.as_mut() => break Err(self.timed_out()),
                    next = connection.next_event() => match next {
                        Some(TransportEvent::Open) => debug!(event = "sse_open"),
                        Some(TransportEvent::Message { event, data }) => {
                            let Some(channel_event) = ChannelEvent::from_raw(&event, &data) else {
                                if Channel::from_event_name(&event).is_none() {
                                    debug!(event = "sse_event_ignored", name = %event);
                                }
                                continue;
                            };
                            self.has_received_data = true;
                            idle.as_mut()
                                .reset(Instant::now() + self.options.idle_timeout);
                            self.dispatch(channel_event);
                        }
                        Some(TransportEvent::Error) | None => break self.end_of_stream(),
                    },
                }
            },
        };

        drop(idle);
        self.release();
        result
    }

    /// Returns `Some` when the session settled before a connection existed.
    async fn connect(
        &mut self,
        token: &CancellationToken,
        idle: std::pin::Pin<&mut tokio::time::Sleep>,
    ) -> Option<Result<(), StreamError>> {
        let connector = Arc::clone(&self.connector);
        let url = self.url.clone();
        let connect_options = self.options.connect_options();
        debug!(event = "sse_connecting", path = url.path());

        tokio::select! {
            biased;
            connected = connector.connect(&url, &connect_options) => match connected {
                Ok(connection) => {
                    self.connection = Some(connection);
                    None
                }
                Err(err) => {
                    warn!(event = "sse_setup_failed", error = %err);
                    Some(Err(StreamError::from(err)))
                }
            },
            _ = token.cancelled() => Some(Ok(())),
            _ = idle => Some(Err(self.timed_out())),
        }
    }

    fn dispatch(&mut self, event: ChannelEvent) {
        match event.channel {
            Channel::Thinking => {
                debug!(event = "sse_thinking", bytes = event.payload.len());
                (self.on_thinking)(event.payload);
            }
            Channel::Content => {
                debug!(event = "sse_content", bytes = event.payload.len());
                (self.on_content)(event.payload);
            }
        }
    }

    fn end_of_stream(&self) -> Result<(), StreamError> {
        let ready_state = self
            .connection
            .as_ref()
            .map_or(ReadyState::Closed, |connection| connection.ready_state());

        match (ready_state, self.has_received_data) {
            (ReadyState::Closed, true) => {
                info!(event = "sse_completed");
                Ok(())
            }
            (ReadyState::Closed, false) => {
                warn!(event = "sse_closed_without_data");
                Err(StreamError::ClosedWithoutData)
            }
            (state, received) => {
                warn!(
                    event = "sse_connection_error",
                    ready_state = ?state,
                    received_data = received
                );
                Err(StreamError::ConnectionError)
            }
        }
    }

    fn timed_out(&self) -> StreamError {
        warn!(
            event = "sse_timeout",
            idle_ms = self.options.idle_timeout.as_millis() as u64,
            received_data = self.has_received_data
        );
        StreamError::Timeout {
            after: self.options.idle_timeout,
        }
    }

    fn release(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            if connection.ready_state() != ReadyState::Closed {
                connection.close();
            }
        }
    }
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("path", &self.url.path())
            .field("closed", &self.closer.is_closed())
            .field("has_received_data", &self.has_received_data)
            .finish_non_exhaustive()
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.release();
    }
}
