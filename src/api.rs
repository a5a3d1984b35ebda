use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method, StatusCode, Url};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::credentials::CredentialStore;

const ERROR_BODY_SNIPPET_LEN: usize = 220;
const SUCCESS_CODE: i64 = 200;
const UNAUTHORIZED_CODE: i64 = 401;
pub const LOCAL_BASE_URL: &str = "http://localhost:8080";
/// Environment variable holding the API base URL.
pub const BASE_URL_ENV: &str = "COOKBOOK_BASE_API";

/// Reads the API base URL from `COOKBOOK_BASE_API`, falling back to the local
/// development server.
pub fn base_url_from_env() -> String {
    std::env::var(BASE_URL_ENV)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| LOCAL_BASE_URL.to_string())
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ApiDefaults;

impl ApiDefaults {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    /// Long enough for non-streamed agent replies.
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);
}

#[derive(Clone, Debug)]
pub struct ApiClientOptions {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for ApiClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: ApiDefaults::CONNECT_TIMEOUT,
            request_timeout: ApiDefaults::REQUEST_TIMEOUT,
        }
    }
}

/// Uniform failure shape reported to the notifier.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ApiFailure {
    /// Envelope code or HTTP status; `None` for network failures.
    pub code: Option<i64>,
    pub message: String,
}

/// Single sink for user-visible API failures.
pub trait ApiNotifier: Send + Sync {
    fn notify_failure(&self, failure: &ApiFailure);

    /// Called after a 401 once the credential has been removed.
    fn reauthenticate(&self);
}

/// Notifier that only logs.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

impl ApiNotifier for TracingNotifier {
    fn notify_failure(&self, failure: &ApiFailure) {
        warn!(event = "api_failure", code = ?failure.code, message = %failure.message);
    }

    fn reauthenticate(&self) {
        warn!(event = "api_reauthenticate");
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ApiRequest {
    pub path: String,
    /// Appended to `path` one segment at a time, percent-encoded.
    pub segments: Vec<String>,
    pub method: Method,
    pub params: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            segments: Vec::new(),
            method,
            params: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn segment(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body).map_err(|err| ApiError::Parse(err.to_string()))?;
        self.body = Some(value);
        Ok(self)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ApiEnvelope<T> {
    pub code: Option<i64>,
    pub message: Option<String>,
    pub data: Option<T>,
}

/// Chat memory entry returned by `/chat/memory/list`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRecord {
    pub conversation_id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub create_time: Option<String>,
    #[serde(default)]
    pub update_time: Option<String>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized, sign in again")]
    Unauthorized,

    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("http status {status}: {message}")]
    HttpStatus { status: StatusCode, message: String },

    #[error("api code {code}: {message}")]
    Envelope { code: i64, message: String },

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("invalid request url: {0}")]
    InvalidUrl(String),
}

/// Request/response client for the non-streaming API.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    credentials: Arc<dyn CredentialStore>,
    notifier: Arc<dyn ApiNotifier>,
    request_timeout: Duration,
}

impl ApiClient {
    pub fn new(
        base_url: impl Into<String>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, ApiError> {
        Self::with_options(base_url, credentials, ApiClientOptions::default())
    }

    pub fn with_options(
        base_url: impl Into<String>,
        credentials: Arc<dyn CredentialStore>,
        options: ApiClientOptions,
    ) -> Result<Self, ApiError> {
        let http = Client::builder()
            .connect_timeout(options.connect_timeout)
            .build()
            .map_err(ApiError::Transport)?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end().trim_end_matches('/').to_string(),
            credentials,
            notifier: Arc::new(TracingNotifier),
            request_timeout: options.request_timeout,
        })
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn ApiNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Ask mode: one-shot answer without conversation memory.
    pub async fn simple_chat(&self, message: &str) -> Result<Option<Value>, ApiError> {
        self.request(ApiRequest::get("/chat/simple").param("message", message))
            .await
    }

    pub async fn chat_with_memory(
        &self,
        conversation_id: &str,
        message: &str,
    ) -> Result<Option<Value>, ApiError> {
        self.request(
            ApiRequest::get("/chat/memory")
                .param("conversationId", conversation_id)
                .param("message", message),
        )
        .await
    }

    pub async fn agent_chat(
        &self,
        conversation_id: &str,
        message: &str,
    ) -> Result<Option<Value>, ApiError> {
        self.request(
            ApiRequest::get("/agent/yicook")
                .param("conversationId", conversation_id)
                .param("message", message),
        )
        .await
    }

    /// Drops the server-side memory of a conversation.
    pub async fn clear_memory(&self, conversation_id: &str) -> Result<(), ApiError> {
        self.request::<Value>(ApiRequest::delete("/chat/memory").segment(conversation_id))
            .await
            .map(|_| ())
    }

    pub async fn conversation_list(&self) -> Result<Vec<MemoryRecord>, ApiError> {
        Ok(self
            .request(ApiRequest::get("/chat/memory/list"))
            .await?
            .unwrap_or_default())
    }

    /// Sends `request` and unwraps the `{ code, message, data }` envelope.
    ///
    /// Every failure is reported to the notifier before it is returned. A 401,
    /// either as HTTP status or envelope code, also removes the stored
    /// credential.
    pub async fn request<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
    ) -> Result<Option<T>, ApiError> {
        match self.send(&request).await {
            Ok(data) => Ok(data),
            Err(err) => {
                self.report(&err);
                Err(err)
            }
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<Option<T>, ApiError> {
        let endpoint = self.endpoint_url(request)?;
        debug!(event = "api_request", method = %request.method, path = %request.path);

        let mut builder = self
            .http
            .request(request.method.clone(), endpoint)
            .timeout(self.request_timeout);
        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        if let Some(body) = request.body.as_ref() {
            builder = builder.json(body);
        }
        if let Some(credential) = self.credentials.get() {
            builder = builder.header("Authorization", credential.expose_secret());
        }

        let response = builder.send().await.map_err(ApiError::Transport)?;
        let status = response.status();
        let body = response.text().await.map_err(ApiError::Transport)?;

        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            return Err(ApiError::HttpStatus {
                status,
                message: status_message(status, &body),
            });
        }

        parse_envelope(&body)
    }

    fn endpoint_url(&self, request: &ApiRequest) -> Result<Url, ApiError> {
        let raw = format!("{}{}", self.base_url, request.path);
        let mut url = Url::parse(&raw).map_err(|err| ApiError::InvalidUrl(format!("{raw}: {err}")))?;
        if !request.segments.is_empty() {
            url.path_segments_mut()
                .map_err(|()| ApiError::InvalidUrl(format!("{raw}: cannot carry path segments")))?
                .extend(&request.segments);
        }
        Ok(url)
    }

    fn report(&self, err: &ApiError) {
        let failure = failure_for(err);
        self.notifier.notify_failure(&failure);

        if matches!(err, ApiError::Unauthorized) {
            self.credentials.remove();
            self.notifier.reauthenticate();
        } else if let ApiError::Transport(source) = err {
            error!(event = "api_transport_error", error = %source);
        }
    }
}

fn parse_envelope<T: DeserializeOwned>(body: &str) -> Result<Option<T>, ApiError> {
    if body.trim().is_empty() {
        return Ok(None);
    }

    // `data` is decoded only once `code` reports success.
    let envelope: ApiEnvelope<Value> =
        serde_json::from_str(body).map_err(|err| ApiError::Parse(err.to_string()))?;

    match envelope.code {
        Some(SUCCESS_CODE) | None => match envelope.data {
            None | Some(Value::Null) => Ok(None),
            Some(data) => serde_json::from_value(data)
                .map(Some)
                .map_err(|err| ApiError::Parse(err.to_string())),
        },
        Some(UNAUTHORIZED_CODE) => Err(ApiError::Unauthorized),
        Some(code) => Err(ApiError::Envelope {
            code,
            message: envelope
                .message
                .filter(|message| !message.is_empty())
                .unwrap_or_else(|| "request failed".to_string()),
        }),
    }
}

fn failure_for(err: &ApiError) -> ApiFailure {
    match err {
        ApiError::Unauthorized => ApiFailure {
            code: Some(UNAUTHORIZED_CODE),
            message: "unauthorized, sign in again".to_string(),
        },
        ApiError::Transport(_) => ApiFailure {
            code: None,
            message: "network connection failed, check the network".to_string(),
        },
        ApiError::HttpStatus { status, message } => ApiFailure {
            code: Some(i64::from(status.as_u16())),
            message: message.clone(),
        },
        ApiError::Envelope { code, message } => ApiFailure {
            code: Some(*code),
            message: message.clone(),
        },
        ApiError::Parse(detail) => ApiFailure {
            code: None,
            message: format!("unexpected response: {detail}"),
        },
        ApiError::InvalidUrl(detail) => ApiFailure {
            code: None,
            message: detail.clone(),
        },
    }
}

fn status_message(status: StatusCode, body: &str) -> String {
    match status {
        StatusCode::FORBIDDEN => "access denied".to_string(),
        StatusCode::NOT_FOUND => "requested resource does not exist".to_string(),
        StatusCode::INTERNAL_SERVER_ERROR => "server error".to_string(),
        _ => summarize_error_body(body),
    }
}

fn summarize_error_body(body: &str) -> String {
    #[derive(Debug, Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        error: Option<String>,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = parsed.message.or(parsed.error) {
            return message;
        }
    }

    if body.trim().is_empty() {
        return "request failed".to_string();
    }
    body.chars().take(ERROR_BODY_SNIPPET_LEN).collect()
}
