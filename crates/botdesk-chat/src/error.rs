//! Error types for conversation orchestration.

use botdesk_core::error::BotdeskError;
use serde_json::{json, Value};

/// Errors from the orchestration engine.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("chat not found: {0}")]
    ChatNotFound(String),
    #[error("bot not found: {0}")]
    BotNotFound(String),
    #[error("chat {0} is awaiting a reply")]
    Busy(String),
    #[error("message index {index} out of range for {len} messages")]
    MessageIndexOutOfRange { index: usize, len: usize },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<BotdeskError> for ChatError {
    fn from(err: BotdeskError) -> Self {
        ChatError::Storage(err.to_string())
    }
}

impl ChatError {
    /// Most specific human-readable description, if any.
    pub fn description(&self) -> Option<String> {
        match self {
            ChatError::Inference(e) => e.description(),
            ChatError::Configuration(msg) => non_empty(msg),
            other => Some(other.to_string()),
        }
    }

    /// Structured form recorded in the audit log.
    pub fn to_payload(&self) -> Value {
        match self {
            ChatError::Inference(e) => e.to_payload(),
            ChatError::Configuration(msg) => json!({
                "kind": "configuration",
                "message": msg,
            }),
            other => json!({
                "kind": "internal",
                "message": other.to_string(),
            }),
        }
    }
}

/// Failures of a single call to the remote inference service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InferenceError {
    #[error("network error: {0}")]
    Network(String),
    #[error("authentication rejected with status {status}")]
    Auth {
        status: u16,
        message: Option<String>,
        code: Option<String>,
    },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("server error with status {status}")]
    Server {
        status: u16,
        message: Option<String>,
        code: Option<String>,
    },
}

impl InferenceError {
    /// Message supplied by the remote service in the error body.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            InferenceError::Auth { message, .. } | InferenceError::Server { message, .. } => {
                message.as_deref().filter(|m| !m.is_empty())
            }
            _ => None,
        }
    }

    /// Transport-level description.
    pub fn transport_message(&self) -> Option<String> {
        match self {
            InferenceError::Network(msg) | InferenceError::Malformed(msg) => non_empty(msg),
            InferenceError::Auth { status, .. } | InferenceError::Server { status, .. } => {
                Some(format!("Request failed with status code {}", status))
            }
        }
    }

    /// Server message, else transport message.
    pub fn description(&self) -> Option<String> {
        self.server_message()
            .map(str::to_string)
            .or_else(|| self.transport_message())
    }

    /// HTTP status, when the service answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            InferenceError::Auth { status, .. } | InferenceError::Server { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// Structured form recorded in the audit log.
    pub fn to_payload(&self) -> Value {
        let kind = match self {
            InferenceError::Network(_) => "network",
            InferenceError::Auth { .. } => "auth",
            InferenceError::Malformed(_) => "malformed",
            InferenceError::Server { .. } => "server_error",
        };
        let code = match self {
            InferenceError::Auth { code, .. } | InferenceError::Server { code, .. } => {
                code.clone()
            }
            _ => None,
        };
        json!({
            "kind": kind,
            "message": self.transport_message(),
            "status": self.status(),
            "response": {
                "message": self.server_message(),
                "code": code,
            },
        })
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}
