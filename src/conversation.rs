//! In-memory conversation state.
//!
//! [`ConversationBook`] keeps the thread list, per-thread messages and the
//! current selection. Server memory records are folded into it with
//! [`ConversationBook::load_records`] and [`ConversationBook::load_history`].
//! Nothing here is persisted.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::api::{ApiClient, ApiError, MemoryRecord};

pub const DEFAULT_TITLE: &str = "New chat";
const TITLE_MAX_CHARS: usize = 30;
const ID_PREFIX_CHARS: usize = 8;
const USER_RECORD_KIND: &str = "USER";

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

#[derive(Clone, Debug, Default)]
pub struct ConversationBook {
    conversations: Vec<Conversation>,
    messages: HashMap<String, Vec<ChatMessage>>,
    current: Option<String>,
}

impl ConversationBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn current(&self) -> Option<&Conversation> {
        let id = self.current.as_deref()?;
        self.find(id)
    }

    pub fn current_messages(&self) -> &[ChatMessage] {
        match self.current.as_deref() {
            Some(id) => self.messages(id),
            None => &[],
        }
    }

    pub fn messages(&self, conversation_id: &str) -> &[ChatMessage] {
        self.messages
            .get(conversation_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn find(&self, conversation_id: &str) -> Option<&Conversation> {
        self.conversations
            .iter()
            .find(|conversation| conversation.id == conversation_id)
    }

    /// Title shown for a conversation: its first user message. Without local
    /// messages the id prefix stands in; with only assistant messages the
    /// default title does.
    pub fn display_title(&self, conversation_id: &str) -> String {
        if self.messages(conversation_id).is_empty() {
            return id_prefix(conversation_id);
        }
        self.first_user_message(conversation_id)
            .map(title_from)
            .unwrap_or_else(|| DEFAULT_TITLE.to_string())
    }

    /// Starts a new conversation, makes it current and puts it first.
    pub fn create_conversation(&mut self, title: Option<&str>) -> &Conversation {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        self.conversations.insert(
            0,
            Conversation {
                id: id.clone(),
                title: title.unwrap_or(DEFAULT_TITLE).to_string(),
                create_time: now,
                update_time: now,
            },
        );
        self.messages.insert(id.clone(), Vec::new());
        self.current = Some(id);
        debug!(event = "conversation_created", count = self.conversations.len());
        &self.conversations[0]
    }

    /// Makes `conversation_id` current. Returns `true` when it has no local
    /// messages yet and its history should be loaded.
    pub fn switch_to(&mut self, conversation_id: &str) -> bool {
        self.current = Some(conversation_id.to_string());
        self.messages(conversation_id).is_empty()
    }

    /// Appends a message and returns its id.
    pub fn add_message(&mut self, conversation_id: &str, role: Role, content: &str) -> String {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        self.messages
            .entry(conversation_id.to_string())
            .or_default()
            .push(ChatMessage {
                id: id.clone(),
                role,
                content: content.to_string(),
                timestamp: now,
            });

        let user_messages = self
            .messages(conversation_id)
            .iter()
            .filter(|message| message.role == Role::User)
            .count();
        let first_user = self.first_user_message(conversation_id).map(title_from);

        if let Some(conversation) = self
            .conversations
            .iter_mut()
            .find(|conversation| conversation.id == conversation_id)
        {
            conversation.update_time = now;
            let untitled = conversation.title == DEFAULT_TITLE
                || conversation.title.chars().count() == ID_PREFIX_CHARS;
            if role == Role::User && (user_messages == 1 || untitled) {
                if let Some(title) = first_user {
                    conversation.title = title;
                }
            }
        }
        id
    }

    /// Replaces the content of a message. Returns `false` if it is unknown.
    pub fn update_message(&mut self, conversation_id: &str, message_id: &str, content: &str) -> bool {
        let Some(message) = self
            .messages
            .get_mut(conversation_id)
            .and_then(|messages| messages.iter_mut().find(|message| message.id == message_id))
        else {
            return false;
        };
        message.content = content.to_string();
        true
    }

    /// Appends streamed text to a message.
    pub fn append_to_message(&mut self, conversation_id: &str, message_id: &str, chunk: &str) -> bool {
        let Some(message) = self
            .messages
            .get_mut(conversation_id)
            .and_then(|messages| messages.iter_mut().find(|message| message.id == message_id))
        else {
            return false;
        };
        message.content.push_str(chunk);
        true
    }

    pub fn rename(&mut self, conversation_id: &str, title: &str) -> bool {
        let Some(conversation) = self
            .conversations
            .iter_mut()
            .find(|conversation| conversation.id == conversation_id)
        else {
            return false;
        };
        conversation.title = title.to_string();
        conversation.update_time = Utc::now();
        true
    }

    /// Removes a conversation locally. When it was current, the first
    /// remaining conversation becomes current, or a fresh one is created.
    pub fn remove_conversation(&mut self, conversation_id: &str) {
        self.conversations
            .retain(|conversation| conversation.id != conversation_id);
        self.messages.remove(conversation_id);

        if self.current.as_deref() == Some(conversation_id) {
            match self.conversations.first() {
                Some(first) => self.current = Some(first.id.clone()),
                None => {
                    self.create_conversation(None);
                }
            }
        }
    }

    /// Clears server memory for a conversation, then removes it locally.
    pub async fn delete_conversation(
        &mut self,
        api: &ApiClient,
        conversation_id: &str,
    ) -> Result<(), ApiError> {
        api.clear_memory(conversation_id).await?;
        self.remove_conversation(conversation_id);
        Ok(())
    }

    pub fn clear_all(&mut self) {
        self.conversations.clear();
        self.messages.clear();
        self.current = None;
        self.create_conversation(None);
    }

    /// Rebuilds the conversation list from server memory records.
    pub fn load_records(&mut self, records: &[MemoryRecord]) {
        let mut grouped: Vec<Conversation> = Vec::new();
        for record in records {
            let create_time = record
                .create_time
                .as_deref()
                .and_then(parse_timestamp)
                .unwrap_or(DateTime::<Utc>::MIN_UTC);
            let update_time = record
                .update_time
                .as_deref()
                .and_then(parse_timestamp)
                .unwrap_or(create_time);

            match grouped
                .iter_mut()
                .find(|conversation| conversation.id == record.conversation_id)
            {
                Some(existing) => {
                    if update_time > existing.update_time {
                        existing.update_time = update_time;
                    }
                }
                None => grouped.push(Conversation {
                    id: record.conversation_id.clone(),
                    title: String::new(),
                    create_time,
                    update_time,
                }),
            }
        }

        for conversation in &mut grouped {
            conversation.title = self.display_title(&conversation.id);
        }
        grouped.sort_by(|a, b| b.update_time.cmp(&a.update_time));
        self.conversations = grouped;

        if self.current.is_none() {
            match self.conversations.first() {
                Some(first) => self.current = Some(first.id.clone()),
                None => {
                    self.create_conversation(None);
                }
            }
        }
    }

    /// Replaces the local messages of one conversation with its server
    /// history and retitles it from the first user message.
    pub fn load_history(&mut self, conversation_id: &str, records: &[MemoryRecord]) {
        let history = history_from_records(conversation_id, records);
        self.messages.insert(conversation_id.to_string(), history);

        if let Some(title) = self.first_user_message(conversation_id).map(title_from) {
            if let Some(conversation) = self
                .conversations
                .iter_mut()
                .find(|conversation| conversation.id == conversation_id)
            {
                conversation.title = title;
            }
        }
    }

    /// Fetches memory records and rebuilds the conversation list.
    pub async fn refresh(&mut self, api: &ApiClient) -> Result<(), ApiError> {
        match api.conversation_list().await {
            Ok(records) => {
                self.load_records(&records);
                Ok(())
            }
            Err(err) => {
                if self.conversations.is_empty() {
                    self.create_conversation(None);
                }
                Err(err)
            }
        }
    }

    fn first_user_message(&self, conversation_id: &str) -> Option<&str> {
        self.messages(conversation_id)
            .iter()
            .find(|message| message.role == Role::User)
            .map(|message| message.content.as_str())
    }
}

/// Messages of one conversation from server records, oldest first.
pub fn history_from_records(conversation_id: &str, records: &[MemoryRecord]) -> Vec<ChatMessage> {
    let mut history: Vec<(DateTime<Utc>, ChatMessage)> = records
        .iter()
        .filter(|record| record.conversation_id == conversation_id)
        .map(|record| {
            let raw = record.timestamp.clone().unwrap_or_default();
            let timestamp = parse_timestamp(&raw).unwrap_or(DateTime::<Utc>::MIN_UTC);
            let role = if record.kind == USER_RECORD_KIND {
                Role::User
            } else {
                Role::Assistant
            };
            (
                timestamp,
                ChatMessage {
                    id: format!("{conversation_id}-{raw}"),
                    role,
                    content: record.content.clone(),
                    timestamp,
                },
            )
        })
        .collect();
    history.sort_by(|a, b| a.0.cmp(&b.0));
    history.into_iter().map(|(_, message)| message).collect()
}

/// First 30 characters of `text`, with `...` when truncated.
pub fn title_from(text: &str) -> String {
    if text.chars().count() > TITLE_MAX_CHARS {
        let mut title: String = text.chars().take(TITLE_MAX_CHARS).collect();
        title.push_str("...");
        title
    } else {
        text.to_string()
    }
}

fn id_prefix(conversation_id: &str) -> String {
    conversation_id.chars().take(ID_PREFIX_CHARS).collect()
}

/// Accepts RFC 3339 and zone-less `YYYY-MM-DD[T ]HH:MM:SS[.fff]` (read as UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}
