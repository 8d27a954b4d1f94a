//! Remote inference client: wire types and the HTTP implementation.
//!
//! One blocking-mode POST per turn. No retries and no streaming; every
//! failure is classified into an [`InferenceError`] for the caller.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use botdesk_core::types::{Attachment, Message, Role};

use crate::error::{ChatError, InferenceError};

/// Reply fields holding the answer text, in priority order.
pub const ANSWER_FIELDS: [&str; 3] = ["answer", "message", "text"];

/// The only response mode this client requests.
pub const RESPONSE_MODE: &str = "blocking";

/// A role/content pair as sent in the `messages` history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: String,
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

/// JSON body of a chat request.
///
/// The credential never appears here; it travels only in the
/// `Authorization` header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub inputs: Map<String, Value>,
    pub query: String,
    pub response_mode: String,
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<Attachment>>,
    pub messages: Vec<WireMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl ChatRequest {
    /// Build a request for `query` carrying the full `history`.
    pub fn new(query: impl Into<String>, user: impl Into<String>, history: &[Message]) -> Self {
        Self {
            inputs: Map::new(),
            query: query.into(),
            response_mode: RESPONSE_MODE.to_string(),
            user: user.into(),
            files: None,
            messages: history.iter().map(WireMessage::from).collect(),
            conversation_id: None,
        }
    }

    /// Attach file metadata. Contents are never uploaded.
    pub fn with_files(mut self, files: Vec<Attachment>) -> Self {
        self.files = Some(files);
        self
    }

    pub fn with_conversation_id(mut self, conversation_id: Option<String>) -> Self {
        self.conversation_id = conversation_id;
        self
    }
}

/// A successful reply: the raw JSON object returned by the service.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceReply {
    pub payload: Value,
}

impl InferenceReply {
    pub fn new(payload: Value) -> Self {
        Self { payload }
    }

    /// First non-empty string among [`ANSWER_FIELDS`].
    pub fn answer(&self) -> Option<&str> {
        ANSWER_FIELDS.iter().find_map(|field| {
            self.payload
                .get(field)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
        })
    }

    /// Continuation token issued by the service, if any.
    pub fn conversation_id(&self) -> Option<&str> {
        self.payload
            .get("conversation_id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// Sends one conversation turn to the remote service.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn send(
        &self,
        endpoint: &str,
        credential: &str,
        request: &ChatRequest,
    ) -> Result<InferenceReply, InferenceError>;
}

// =============================================================================
// HttpInferenceClient
// =============================================================================

/// [`InferenceClient`] over HTTP using reqwest.
#[derive(Debug, Clone)]
pub struct HttpInferenceClient {
    client: reqwest::Client,
}

impl HttpInferenceClient {
    /// Build a client whose calls give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChatError::Configuration(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn send(
        &self,
        endpoint: &str,
        credential: &str,
        request: &ChatRequest,
    ) -> Result<InferenceReply, InferenceError> {
        let response = self
            .client
            .post(endpoint)
            .bearer_auth(credential)
            .json(request)
            .send()
            .await
            .map_err(|e| InferenceError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| InferenceError::Network(e.to_string()))?;

        debug!(status = status.as_u16(), bytes = body.len(), "Inference response received");

        if !status.is_success() {
            return Err(classify_failure(status.as_u16(), &body));
        }
        parse_reply(&body)
    }
}

/// Map a non-success status and its body to an error.
pub fn classify_failure(status: u16, body: &str) -> InferenceError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let field = |name: &str| {
        parsed
            .as_ref()
            .and_then(|v| v.get(name))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    let message = field("message");
    let code = field("code");

    match status {
        401 | 403 => InferenceError::Auth {
            status,
            message,
            code,
        },
        _ => InferenceError::Server {
            status,
            message,
            code,
        },
    }
}

/// Parse a success body. Anything but a JSON object is malformed.
pub fn parse_reply(body: &str) -> Result<InferenceReply, InferenceError> {
    let payload: Value = serde_json::from_str(body)
        .map_err(|e| InferenceError::Malformed(format!("invalid JSON: {}", e)))?;
    if !payload.is_object() {
        return Err(InferenceError::Malformed(
            "expected a JSON object".to_string(),
        ));
    }
    Ok(InferenceReply::new(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn history() -> Vec<Message> {
        vec![
            Message::user("first", vec![]),
            Message::assistant("reply"),
            Message::user("second", vec![]),
        ]
    }

    // ---- Request body ----

    #[test]
    fn test_request_body_shape() {
        let request = ChatRequest::new("second", "user-123", &history());
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["inputs"], json!({}));
        assert_eq!(value["query"], "second");
        assert_eq!(value["response_mode"], "blocking");
        assert_eq!(value["user"], "user-123");
        assert_eq!(value["messages"].as_array().unwrap().len(), 3);
        assert_eq!(value["messages"][1]["role"], "assistant");
        assert_eq!(value["messages"][1]["content"], "reply");
        assert!(value.get("files").is_none());
        assert!(value.get("conversation_id").is_none());
    }

    #[test]
    fn test_request_files_carry_metadata_only() {
        let request = ChatRequest::new("see file", "u", &[]).with_files(vec![Attachment {
            name: "notes.pdf".to_string(),
            size: 2048,
            mime_type: "application/pdf".to_string(),
        }]);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value["files"],
            json!([{ "name": "notes.pdf", "size": 2048, "type": "application/pdf" }])
        );
    }

    #[test]
    fn test_request_empty_files_still_present() {
        let request = ChatRequest::new("hi", "u", &[]).with_files(vec![]);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["files"], json!([]));
    }

    #[test]
    fn test_request_carries_conversation_id() {
        let request =
            ChatRequest::new("hi", "u", &[]).with_conversation_id(Some("conv-9".to_string()));
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["conversation_id"], "conv-9");
    }

    // ---- Answer extraction ----

    #[test]
    fn test_answer_field_preferred() {
        let reply = InferenceReply::new(json!({"answer": "a", "message": "m", "text": "t"}));
        assert_eq!(reply.answer(), Some("a"));
    }

    #[test]
    fn test_message_field_fallback() {
        let reply = InferenceReply::new(json!({"message": "hi"}));
        assert_eq!(reply.answer(), Some("hi"));
    }

    #[test]
    fn test_text_field_fallback() {
        let reply = InferenceReply::new(json!({"text": "plain"}));
        assert_eq!(reply.answer(), Some("plain"));
    }

    #[test]
    fn test_empty_answer_falls_through() {
        let reply = InferenceReply::new(json!({"answer": "", "text": "t"}));
        assert_eq!(reply.answer(), Some("t"));
    }

    #[test]
    fn test_non_string_answer_ignored() {
        let reply = InferenceReply::new(json!({"answer": 42}));
        assert!(reply.answer().is_none());
    }

    #[test]
    fn test_conversation_id_extraction() {
        let reply = InferenceReply::new(json!({"answer": "a", "conversation_id": "c-1"}));
        assert_eq!(reply.conversation_id(), Some("c-1"));
        let none = InferenceReply::new(json!({"answer": "a"}));
        assert!(none.conversation_id().is_none());
    }

    // ---- Body classification ----

    #[test]
    fn test_parse_reply_object() {
        let reply = parse_reply(r#"{"answer": "ok"}"#).unwrap();
        assert_eq!(reply.answer(), Some("ok"));
    }

    #[test]
    fn test_parse_reply_invalid_json() {
        assert!(matches!(
            parse_reply("<html>"),
            Err(InferenceError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_reply_non_object() {
        assert!(matches!(
            parse_reply("[1, 2]"),
            Err(InferenceError::Malformed(_))
        ));
    }

    #[test]
    fn test_classify_auth() {
        let err = classify_failure(401, r#"{"message": "Access token is invalid", "code": "unauthorized"}"#);
        assert_eq!(
            err,
            InferenceError::Auth {
                status: 401,
                message: Some("Access token is invalid".to_string()),
                code: Some("unauthorized".to_string()),
            }
        );
    }

    #[test]
    fn test_classify_server_without_body() {
        let err = classify_failure(503, "Service Unavailable");
        assert_eq!(
            err,
            InferenceError::Server {
                status: 503,
                message: None,
                code: None,
            }
        );
    }

    #[test]
    fn test_classify_forbidden_is_auth() {
        assert!(matches!(
            classify_failure(403, "{}"),
            InferenceError::Auth { status: 403, .. }
        ));
    }
}
