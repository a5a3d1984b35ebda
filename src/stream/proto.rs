use serde_json::Value;

/// Payload the server sends to mark the end of a reply.
pub const END_MARKER: &str = "[DONE]";

/// Event name used by producers that do not tag their events.
pub const DEFAULT_EVENT: &str = "message";
pub const THINKING_EVENT: &str = "thinking";
pub const CONTENT_EVENT: &str = "content";

pub const SIMPLE_STREAM_PATH: &str = "/chat/simple/stream/sse";
pub const MEMORY_STREAM_PATH: &str = "/chat/memory/stream/sse";
pub const AGENT_STREAM_PATH: &str = "/agent/yicook/stream/sse";

/// Conversation id the simple route uses for every request.
pub const SIMPLE_CONVERSATION_ID: &str = "simple";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Channel {
    Thinking,
    Content,
}

impl Channel {
    /// Maps an SSE event name onto a channel. Unknown names map to `None`.
    pub fn from_event_name(name: &str) -> Option<Self> {
        match name {
            "" | DEFAULT_EVENT | CONTENT_EVENT => Some(Self::Content),
            THINKING_EVENT => Some(Self::Thinking),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChannelEvent {
    pub channel: Channel,
    pub payload: String,
}

impl ChannelEvent {
    /// Builds a channel event from a raw SSE event.
    ///
    /// Returns `None` for unknown event names and for no-op payloads.
    pub fn from_raw(event_name: &str, data: &str) -> Option<Self> {
        let channel = Channel::from_event_name(event_name)?;
        if is_noop_payload(data) {
            return None;
        }
        Some(Self {
            channel,
            payload: extract_payload(data),
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StreamRequest {
    pub endpoint_path: String,
    pub conversation_id: String,
    pub message: String,
}

impl StreamRequest {
    pub fn new(
        endpoint_path: impl Into<String>,
        conversation_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            endpoint_path: endpoint_path.into(),
            conversation_id: conversation_id.into(),
            message: message.into(),
        }
    }

    /// Stateless question against the shared `simple` conversation.
    pub fn simple(message: impl Into<String>) -> Self {
        Self::new(SIMPLE_STREAM_PATH, SIMPLE_CONVERSATION_ID, message)
    }

    /// Chat that keeps server-side memory for `conversation_id`.
    pub fn memory(conversation_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(MEMORY_STREAM_PATH, conversation_id, message)
    }

    /// Tool-using cookbook agent.
    pub fn agent(conversation_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(AGENT_STREAM_PATH, conversation_id, message)
    }
}

pub fn is_noop_payload(data: &str) -> bool {
    data.is_empty() || data == END_MARKER
}

/// Pulls the text out of an event payload.
///
/// JSON objects yield their `content` field, then `data`; anything else is
/// forwarded unchanged. Empty fields fall through to the next candidate.
pub fn extract_payload(data: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(data) else {
        return data.to_string();
    };

    ["content", "data"]
        .iter()
        .filter_map(|field| value.get(field))
        .find_map(field_text)
        .unwrap_or_else(|| data.to_string())
}

fn field_text(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::String(text) if text.is_empty() => None,
        Value::String(text) => Some(text.clone()),
        Value::Number(number) if number.as_f64() == Some(0.0) => None,
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        extract_payload, is_noop_payload, Channel, ChannelEvent, StreamRequest,
        AGENT_STREAM_PATH, MEMORY_STREAM_PATH, SIMPLE_STREAM_PATH,
    };

    #[test]
    fn sentinels_are_noops() {
        assert!(is_noop_payload(""));
        assert!(is_noop_payload("[DONE]"));
        assert!(!is_noop_payload("[DONE] "));
        assert!(ChannelEvent::from_raw("content", "[DONE]").is_none());
        assert!(ChannelEvent::from_raw("thinking", "").is_none());
    }

    #[test]
    fn content_field_wins_over_data() {
        assert_eq!(
            extract_payload(r#"{"content":"Try garlic and olive oil","data":"x"}"#),
            "Try garlic and olive oil"
        );
    }

    #[test]
    fn data_field_used_when_content_missing() {
        assert_eq!(extract_payload(r#"{"data":"simmer 10 minutes"}"#), "simmer 10 minutes");
    }

    #[test]
    fn empty_content_falls_through_to_data() {
        assert_eq!(extract_payload(r#"{"content":"","data":"salt"}"#), "salt");
    }

    #[test]
    fn plain_text_is_forwarded_verbatim() {
        assert_eq!(extract_payload("parsing query"), "parsing query");
        assert_eq!(extract_payload("{not json"), "{not json");
    }

    #[test]
    fn json_without_known_fields_is_forwarded_raw() {
        let raw = r#"{"step":3}"#;
        assert_eq!(extract_payload(raw), raw);
        assert_eq!(extract_payload("42"), "42");
        assert_eq!(extract_payload(r#""quoted""#), r#""quoted""#);
    }

    #[test]
    fn non_string_fields_are_rendered_as_json() {
        assert_eq!(extract_payload(r#"{"data":{"step":1}}"#), r#"{"step":1}"#);
        assert_eq!(extract_payload(r#"{"content":7}"#), "7");
    }

    #[test]
    fn event_names_route_to_channels() {
        assert_eq!(Channel::from_event_name("message"), Some(Channel::Content));
        assert_eq!(Channel::from_event_name("content"), Some(Channel::Content));
        assert_eq!(Channel::from_event_name("thinking"), Some(Channel::Thinking));
        assert_eq!(Channel::from_event_name("ping"), None);
        assert!(ChannelEvent::from_raw("ping", "hello").is_none());
    }

    #[test]
    fn route_constructors_use_fixed_paths() {
        let simple = StreamRequest::simple("hello");
        assert_eq!(simple.endpoint_path, SIMPLE_STREAM_PATH);
        assert_eq!(simple.conversation_id, "simple");

        assert_eq!(StreamRequest::memory("c1", "hi").endpoint_path, MEMORY_STREAM_PATH);
        assert_eq!(StreamRequest::agent("c1", "hi").endpoint_path, AGENT_STREAM_PATH);
    }
}
