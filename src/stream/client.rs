//! Streaming chat client.
//!
//! The client validates a [`StreamRequest`], reads the bearer credential,
//! builds the transport URL and hands everything to a [`StreamSession`].
//! Credentials travel as a query parameter because the event-stream transport
//! cannot carry custom headers.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::{debug, warn};

use crate::credentials::CredentialStore;
use crate::stream::proto::StreamRequest;
use crate::stream::session::{ChannelCallback, StreamSession};
use crate::stream::transport::{ConnectOptions, HttpSseConnector, SseConnector, TransportError};

/// Timing defaults for stream sessions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StreamDefaults;

impl StreamDefaults {
    /// Matches the server-side generation timeout.
    pub const IDLE_TIMEOUT: Duration = Duration::from_secs(180);
    pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(120);
}

#[derive(Clone, Debug)]
pub struct StreamOptions {
    /// Session fails with [`StreamError::Timeout`] when no payload arrives for
    /// this long. Also bounds the wait for the initial connection.
    pub idle_timeout: Duration,
    /// Silence the transport tolerates before reporting a broken stream.
    pub heartbeat_timeout: Duration,
    pub with_credentials: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            idle_timeout: StreamDefaults::IDLE_TIMEOUT,
            heartbeat_timeout: StreamDefaults::HEARTBEAT_TIMEOUT,
            with_credentials: true,
        }
    }
}

impl StreamOptions {
    pub(crate) fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            heartbeat_timeout: self.heartbeat_timeout,
            with_credentials: self.with_credentials,
        }
    }
}

/// Terminal failures of a stream session.
#[derive(Debug, Error)]
pub enum StreamError {
    /// No credential was available; no connection was attempted.
    #[error("unauthorized: sign in again")]
    Unauthorized,

    /// No payload arrived within the idle timeout.
    #[error("stream timed out after {}ms without data", .after.as_millis())]
    Timeout { after: Duration },

    /// The stream ended before delivering any payload.
    #[error("connection closed without data")]
    ClosedWithoutData,

    /// The transport reported an error while the stream was still live.
    #[error("connection failed, check the network and retry")]
    ConnectionError,

    /// The stream could not be constructed.
    #[error("stream setup failed: {0}")]
    SetupError(String),
}

impl From<TransportError> for StreamError {
    fn from(err: TransportError) -> Self {
        Self::SetupError(err.to_string())
    }
}

/// Entry point for streamed chat replies.
#[derive(Clone)]
pub struct ChatStreamClient {
    base_url: String,
    credentials: Arc<dyn CredentialStore>,
    connector: Arc<dyn SseConnector>,
    options: StreamOptions,
}

impl ChatStreamClient {
    /// Creates a client backed by the HTTP SSE transport.
    pub fn new(
        base_url: impl Into<String>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, StreamError> {
        let connector = HttpSseConnector::new()?;
        Ok(Self::with_connector(base_url, credentials, Arc::new(connector)))
    }

    /// Creates a client with an explicit transport connector.
    pub fn with_connector(
        base_url: impl Into<String>,
        credentials: Arc<dyn CredentialStore>,
        connector: Arc<dyn SseConnector>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end().trim_end_matches('/').to_string(),
            credentials,
            connector,
            options: StreamOptions::default(),
        }
    }

    pub fn with_options(mut self, options: StreamOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &StreamOptions {
        &self.options
    }

    /// Prepares a session for `request`.
    ///
    /// Fails fast with [`StreamError::Unauthorized`] when no credential is
    /// stored and with [`StreamError::SetupError`] for invalid requests. The
    /// transport is not touched until the returned session is driven.
    pub fn open_stream<T, C>(
        &self,
        request: StreamRequest,
        on_thinking: T,
        on_content: C,
    ) -> Result<StreamSession, StreamError>
    where
        T: FnMut(String) + Send + 'static,
        C: FnMut(String) + Send + 'static,
    {
        let Some(credential) = self.credentials.get() else {
            warn!(event = "sse_missing_credential", path = %request.endpoint_path);
            return Err(StreamError::Unauthorized);
        };
        validate_request(&request)?;

        let url = build_stream_url(&self.base_url, &request, &credential)?;
        debug!(
            event = "sse_session_prepared",
            path = %request.endpoint_path,
            conversation_id = %request.conversation_id
        );

        let on_thinking: ChannelCallback = Box::new(on_thinking);
        let on_content: ChannelCallback = Box::new(on_content);
        Ok(StreamSession::new(
            url,
            Arc::clone(&self.connector),
            self.options.clone(),
            on_thinking,
            on_content,
        ))
    }

    /// Opens a stream and waits for it to finish.
    pub async fn stream_chat<T, C>(
        &self,
        request: StreamRequest,
        on_thinking: T,
        on_content: C,
    ) -> Result<(), StreamError>
    where
        T: FnMut(String) + Send + 'static,
        C: FnMut(String) + Send + 'static,
    {
        self.open_stream(request, on_thinking, on_content)?
            .finish()
            .await
    }

    pub async fn simple_chat_stream<T, C>(
        &self,
        message: impl Into<String>,
        on_thinking: T,
        on_content: C,
    ) -> Result<(), StreamError>
    where
        T: FnMut(String) + Send + 'static,
        C: FnMut(String) + Send + 'static,
    {
        self.stream_chat(StreamRequest::simple(message), on_thinking, on_content)
            .await
    }

    pub async fn memory_chat_stream<T, C>(
        &self,
        conversation_id: impl Into<String>,
        message: impl Into<String>,
        on_thinking: T,
        on_content: C,
    ) -> Result<(), StreamError>
    where
        T: FnMut(String) + Send + 'static,
        C: FnMut(String) + Send + 'static,
    {
        let request = StreamRequest::memory(conversation_id, message);
        self.stream_chat(request, on_thinking, on_content).await
    }

    pub async fn agent_chat_stream<T, C>(
        &self,
        conversation_id: impl Into<String>,
        message: impl Into<String>,
        on_thinking: T,
        on_content: C,
    ) -> Result<(), StreamError>
    where
        T: FnMut(String) + Send + 'static,
        C: FnMut(String) + Send + 'static,
    {
        let request = StreamRequest::agent(conversation_id, message);
        self.stream_chat(request, on_thinking, on_content).await
    }
}

fn validate_request(request: &StreamRequest) -> Result<(), StreamError> {
    if request.message.trim().is_empty() {
        return Err(StreamError::SetupError("message must not be empty".to_string()));
    }
    if request.conversation_id.trim().is_empty() {
        return Err(StreamError::SetupError(
            "conversation id must not be empty".to_string(),
        ));
    }
    if !request.endpoint_path.starts_with('/') {
        return Err(StreamError::SetupError(format!(
            "endpoint path must start with '/': {}",
            request.endpoint_path
        )));
    }
    Ok(())
}

pub(crate) fn build_stream_url(
    base_url: &str,
    request: &StreamRequest,
    credential: &SecretString,
) -> Result<Url, StreamError> {
    let mut url = Url::parse(&format!("{base_url}{}", request.endpoint_path))
        .map_err(|err| StreamError::SetupError(format!("invalid stream url: {err}")))?;
    url.query_pairs_mut()
        .append_pair("conversationId", &request.conversation_id)
        .append_pair("message", &request.message)
        .append_pair("Authorization", credential.expose_secret());
    Ok(url)
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::{build_stream_url, validate_request, StreamError};
    use crate::stream::proto::StreamRequest;

    #[test]
    fn url_carries_request_fields_and_credential() {
        let url = build_stream_url(
            "http://localhost:8080/api",
            &StreamRequest::memory("c-1", "garlic & oil?"),
            &SecretString::new("tok en".to_string()),
        )
        .expect("build url");

        assert_eq!(url.path(), "/api/chat/memory/stream/sse");
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("conversationId".to_string(), "c-1".to_string()),
                ("message".to_string(), "garlic & oil?".to_string()),
                ("Authorization".to_string(), "tok en".to_string()),
            ]
        );
        assert!(!url.as_str().contains("garlic & oil"));
    }

    #[test]
    fn malformed_base_url_is_a_setup_error() {
        let err = build_stream_url(
            "not a url",
            &StreamRequest::simple("hello"),
            &SecretString::new("t".to_string()),
        )
        .expect_err("malformed url");
        assert!(matches!(err, StreamError::SetupError(_)));
    }

    #[test]
    fn empty_message_is_rejected() {
        let err = validate_request(&StreamRequest::simple("   ")).expect_err("empty message");
        assert!(matches!(err, StreamError::SetupError(_)));
    }

    #[test]
    fn empty_conversation_is_rejected() {
        let err = validate_request(&StreamRequest::memory("", "hi")).expect_err("empty id");
        assert!(matches!(err, StreamError::SetupError(_)));
    }
}
