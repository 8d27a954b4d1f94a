use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Constants
// =============================================================================

/// Reserved identifier of the bot that always exists.
pub const DEFAULT_BOT_ID: &str = "default";
/// Display name of the default bot.
pub const DEFAULT_BOT_NAME: &str = "Бот по умолчанию";
/// Label shown when a chat's bot no longer exists.
pub const GENERIC_BOT_LABEL: &str = "Бот";
/// Title of a chat before its first message.
pub const DEFAULT_CHAT_TITLE: &str = "Новый чат";
/// Prefix of every assistant message that reports a failure.
pub const ERROR_PREFIX: &str = "Ошибка: ";
/// Used when a failure carries no description at all.
pub const UNKNOWN_ERROR: &str = "Неизвестная ошибка";
/// Number of whitespace-separated tokens used for a chat title.
pub const TITLE_TOKENS: usize = 8;

// =============================================================================
// Enums
// =============================================================================

/// Author of a chat message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of an audit log entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Request,
    Response,
    Error,
}

impl std::fmt::Display for LogKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogKind::Request => "request",
            LogKind::Response => "response",
            LogKind::Error => "error",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Structs
// =============================================================================

/// A named pairing of display name and remote-service credential.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bot {
    pub id: String,
    pub name: String,
    #[serde(rename = "apiKey")]
    pub credential: String,
}

impl Bot {
    /// The reserved default bot carrying the configured credential.
    pub fn default_bot(credential: impl Into<String>) -> Self {
        Self {
            id: DEFAULT_BOT_ID.to_string(),
            name: DEFAULT_BOT_NAME.to_string(),
            credential: credential.into(),
        }
    }

    pub fn is_default(&self) -> bool {
        self.id == DEFAULT_BOT_ID
    }
}

/// Metadata of a file attached to a message. File contents are never kept.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub mime_type: String,
}

/// A single message in a chat.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl Message {
    pub fn user(content: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            attachments,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            attachments: Vec::new(),
        }
    }
}

/// A persisted conversation thread bound to one bot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    /// Time-ordered identifier (UUIDv7).
    pub id: String,
    pub title: String,
    pub bot_id: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Continuation token issued by the remote service.
    #[serde(
        default,
        rename = "conversation_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub conversation_id: Option<String>,
    /// Set once the title has been derived from the first message.
    #[serde(default)]
    pub title_fixed: bool,
}

impl Chat {
    /// Create an empty chat bound to `bot_id`.
    pub fn new(bot_id: impl Into<String>) -> Self {
        Self {
            id: new_chat_id(),
            title: DEFAULT_CHAT_TITLE.to_string(),
            bot_id: bot_id.into(),
            messages: Vec::new(),
            conversation_id: None,
            title_fixed: false,
        }
    }
}

/// One entry of the session audit log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub kind: LogKind,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl LogEntry {
    pub fn new(kind: LogKind, payload: serde_json::Value) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Render as `HH:MM:SS - kind` followed by the pretty-printed payload.
    pub fn render(&self) -> String {
        let time = self.timestamp.with_timezone(&Local).format("%H:%M:%S");
        let body = serde_json::to_string_pretty(&self.payload)
            .unwrap_or_else(|_| self.payload.to_string());
        format!("{} - {}\n{}", time, self.kind, body)
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Fresh time-ordered chat identifier.
pub fn new_chat_id() -> String {
    Uuid::now_v7().to_string()
}

/// Fresh bot identifier.
pub fn new_bot_id() -> String {
    Uuid::new_v4().to_string()
}

/// Derive a chat title from the first message: its first eight
/// whitespace-separated tokens, or the default title if there are none.
pub fn derive_title(content: &str) -> String {
    let title = content
        .split_whitespace()
        .take(TITLE_TOKENS)
        .collect::<Vec<_>>()
        .join(" ");
    if title.is_empty() {
        DEFAULT_CHAT_TITLE.to_string()
    } else {
        title
    }
}

/// Human-readable file size, e.g. `0 Bytes`, `512 Bytes`, `1.5 KB`.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = format!("{:.2}", value);
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, UNITS[unit])
}
