//! Conversation controller: the per-chat turn state machine.
//!
//! Each chat is either idle or awaiting a reply. A send or regenerate on a
//! chat that is awaiting a reply is rejected with [`ChatError::Busy`];
//! different chats proceed independently. Every turn ends idle, whatever
//! its outcome, and every failure becomes an assistant message prefixed
//! with [`ERROR_PREFIX`] plus an `error` audit entry.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use botdesk_core::config::InferenceConfig;
use botdesk_core::error::BotdeskError;
use botdesk_core::types::{
    Attachment, Bot, Chat, LogEntry, LogKind, Message, ERROR_PREFIX, GENERIC_BOT_LABEL,
    UNKNOWN_ERROR,
};
use botdesk_storage::PersistentStore;

use crate::audit::AuditLog;
use crate::client::{ChatRequest, InferenceClient, InferenceReply};
use crate::conversation::ConversationStore;
use crate::error::{ChatError, InferenceError};
use crate::registry::BotRegistry;

/// Description used when the endpoint or the bot credential is missing.
pub const CONFIGURATION_MISSING: &str = "API configuration is missing";

/// Controller settings derived from [`InferenceConfig`].
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Full chat endpoint URL. `None` makes every turn fail with a
    /// configuration error.
    pub chat_url: Option<String>,
    /// Pseudo identity sent as `user`.
    pub user: String,
}

impl ControllerSettings {
    pub fn from_config(config: &InferenceConfig) -> Self {
        Self {
            chat_url: config.chat_messages_url(),
            user: config.user.clone(),
        }
    }
}

/// Result of a send or regenerate call.
#[derive(Debug)]
pub enum TurnOutcome {
    /// Nothing to send (blank input without attachments, or unknown chat).
    Skipped,
    /// The service answered; the assistant message has been appended.
    Answered(Message),
    /// The turn failed; `reply` is the error message appended to the chat.
    Failed { reply: Message, cause: ChatError },
}

/// Marks a chat as awaiting a reply until dropped.
struct TurnGuard<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    chat_id: String,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.remove(&self.chat_id);
        debug!(chat_id = %self.chat_id, "Chat idle");
    }
}

/// A turn ready to go out: the request plus the bot that answers it.
struct PreparedTurn {
    bot_id: String,
    request: ChatRequest,
}

pub struct ConversationController {
    registry: Mutex<BotRegistry>,
    conversations: Mutex<ConversationStore>,
    audit: AuditLog,
    client: Arc<dyn InferenceClient>,
    settings: ControllerSettings,
    in_flight: Mutex<HashSet<String>>,
}

impl ConversationController {
    /// Restore state from `store` and apply the startup rule: if no chat is
    /// active, a fresh chat bound to the selected bot is created.
    pub fn open(
        store: Arc<dyn PersistentStore>,
        client: Arc<dyn InferenceClient>,
        config: &InferenceConfig,
    ) -> Self {
        let registry = BotRegistry::load(
            Arc::clone(&store),
            config.default_credential().unwrap_or_default(),
        );
        let mut conversations = ConversationStore::load(store);
        let active = conversations.ensure_active_chat(registry.selected_bot_id());
        info!(
            bots = registry.list_bots().len(),
            chats = conversations.len(),
            active_chat = %active,
            "Conversation controller ready"
        );

        Self {
            registry: Mutex::new(registry),
            conversations: Mutex::new(conversations),
            audit: AuditLog::new(),
            client,
            settings: ControllerSettings::from_config(config),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    // =========================================================================
    // Bots
    // =========================================================================

    pub fn list_bots(&self) -> Result<Vec<Bot>, ChatError> {
        Ok(self.registry()?.list_bots().to_vec())
    }

    pub fn get_bot(&self, id: &str) -> Result<Option<Bot>, ChatError> {
        Ok(self.registry()?.get_bot(id).cloned())
    }

    /// Register a bot and make it the selected one.
    pub fn add_bot(&self, name: &str, credential: &str) -> Result<Bot, ChatError> {
        let mut registry = self.registry()?;
        let bot = registry.add_bot(name, credential)?;
        registry.select_bot(&bot.id)?;
        Ok(bot)
    }

    /// Delete a bot. Chats bound to it are kept.
    pub fn delete_bot(&self, id: &str) -> Result<bool, ChatError> {
        Ok(self.registry()?.delete_bot(id))
    }

    pub fn selected_bot_id(&self) -> Result<String, ChatError> {
        Ok(self.registry()?.selected_bot_id().to_string())
    }

    /// Select a bot and open a new chat bound to it.
    pub fn select_bot(&self, id: &str) -> Result<Chat, ChatError> {
        self.registry()?.select_bot(id)?;
        Ok(self.conversations()?.create_chat(id))
    }

    /// Display name of the chat's bot, or a generic label if it was deleted.
    pub fn bot_label(&self, chat: &Chat) -> Result<String, ChatError> {
        Ok(self
            .registry()?
            .get_bot(&chat.bot_id)
            .map(|b| b.name.clone())
            .unwrap_or_else(|| GENERIC_BOT_LABEL.to_string()))
    }

    // =========================================================================
    // Chats
    // =========================================================================

    /// Create a chat bound to the selected bot.
    pub fn new_chat(&self) -> Result<Chat, ChatError> {
        let bot_id = self.selected_bot_id()?;
        Ok(self.conversations()?.create_chat(&bot_id))
    }

    /// Create a chat bound to `bot_id`, which must exist.
    pub fn create_chat(&self, bot_id: &str) -> Result<Chat, ChatError> {
        if self.registry()?.get_bot(bot_id).is_none() {
            return Err(ChatError::BotNotFound(bot_id.to_string()));
        }
        Ok(self.conversations()?.create_chat(bot_id))
    }

    pub fn delete_chat(&self, id: &str) -> Result<bool, ChatError> {
        Ok(self.conversations()?.delete_chat(id))
    }

    /// Chats, most recently created first.
    pub fn list_chats(&self) -> Result<Vec<Chat>, ChatError> {
        Ok(self.conversations()?.list_chats())
    }

    pub fn get_chat(&self, id: &str) -> Result<Option<Chat>, ChatError> {
        Ok(self.conversations()?.get_chat(id).cloned())
    }

    pub fn active_chat_id(&self) -> Result<Option<String>, ChatError> {
        Ok(self.conversations()?.active_chat_id().map(str::to_string))
    }

    pub fn set_active_chat(&self, id: &str) -> Result<(), ChatError> {
        self.conversations()?.set_active_chat(id)
    }

    /// Whether `chat_id` is awaiting a reply.
    pub fn is_busy(&self, chat_id: &str) -> bool {
        self.in_flight
            .lock()
            .map(|in_flight| in_flight.contains(chat_id))
            .unwrap_or(false)
    }

    // =========================================================================
    // Audit
    // =========================================================================

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Audit entries of this session, oldest first.
    pub fn logs(&self) -> Vec<LogEntry> {
        self.audit.list()
    }

    // =========================================================================
    // Turns
    // =========================================================================

    /// Send a user message and wait for the reply.
    ///
    /// Blank text without attachments, or an unknown chat, is a silent
    /// no-op reported as [`TurnOutcome::Skipped`].
    pub async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        attachments: Vec<Attachment>,
    ) -> Result<TurnOutcome, ChatError> {
        let _turn = self.begin_turn(chat_id)?;

        let Some(prepared) = self.prepare_send(chat_id, text, attachments)? else {
            return Ok(TurnOutcome::Skipped);
        };
        self.complete_turn(chat_id, prepared).await
    }

    /// Discard everything after `from_index` and request a new answer to
    /// the message at that index.
    pub async fn regenerate_response(
        &self,
        chat_id: &str,
        from_index: usize,
    ) -> Result<TurnOutcome, ChatError> {
        let _turn = self.begin_turn(chat_id)?;

        let prepared = self.prepare_regenerate(chat_id, from_index)?;
        self.complete_turn(chat_id, prepared).await
    }

    fn begin_turn(&self, chat_id: &str) -> Result<TurnGuard<'_>, ChatError> {
        let mut in_flight = self
            .in_flight
            .lock()
            .map_err(|e| ChatError::Storage(format!("in-flight lock poisoned: {}", e)))?;
        if !in_flight.insert(chat_id.to_string()) {
            warn!(chat_id = %chat_id, "Chat is awaiting a reply, rejecting turn");
            return Err(ChatError::Busy(chat_id.to_string()));
        }
        debug!(chat_id = %chat_id, "Chat awaiting reply");
        Ok(TurnGuard {
            in_flight: &self.in_flight,
            chat_id: chat_id.to_string(),
        })
    }

    fn prepare_send(
        &self,
        chat_id: &str,
        text: &str,
        attachments: Vec<Attachment>,
    ) -> Result<Option<PreparedTurn>, ChatError> {
        if text.trim().is_empty() && attachments.is_empty() {
            debug!(chat_id = %chat_id, "Blank input ignored");
            return Ok(None);
        }

        let mut conversations = self.conversations()?;
        if conversations.get_chat(chat_id).is_none() {
            debug!(chat_id = %chat_id, "Send to unknown chat ignored");
            return Ok(None);
        }
        conversations.append_message(chat_id, Message::user(text, attachments.clone()))?;

        let chat = conversations
            .get_chat(chat_id)
            .ok_or_else(|| ChatError::ChatNotFound(chat_id.to_string()))?;
        let request = ChatRequest::new(text, self.settings.user.as_str(), &chat.messages)
            .with_files(attachments)
            .with_conversation_id(chat.conversation_id.clone());
        Ok(Some(PreparedTurn {
            bot_id: chat.bot_id.clone(),
            request,
        }))
    }

    fn prepare_regenerate(
        &self,
        chat_id: &str,
        from_index: usize,
    ) -> Result<PreparedTurn, ChatError> {
        let mut conversations = self.conversations()?;
        let chat = conversations
            .get_chat(chat_id)
            .ok_or_else(|| ChatError::ChatNotFound(chat_id.to_string()))?;
        let len = chat.messages.len();
        let query = chat
            .messages
            .get(from_index)
            .map(|m| m.content.clone())
            .ok_or(ChatError::MessageIndexOutOfRange {
                index: from_index,
                len,
            })?;

        conversations.truncate_messages(chat_id, from_index + 1)?;
        info!(chat_id = %chat_id, from_index, dropped = len - from_index - 1, "Regenerating response");

        let chat = conversations
            .get_chat(chat_id)
            .ok_or_else(|| ChatError::ChatNotFound(chat_id.to_string()))?;
        let request = ChatRequest::new(query, self.settings.user.as_str(), &chat.messages)
            .with_conversation_id(chat.conversation_id.clone());
        Ok(PreparedTurn {
            bot_id: chat.bot_id.clone(),
            request,
        })
    }

    /// Configuration check, request entry, remote call, reconciliation.
    async fn complete_turn(
        &self,
        chat_id: &str,
        prepared: PreparedTurn,
    ) -> Result<TurnOutcome, ChatError> {
        let credential = self.credential_for(&prepared.bot_id)?;
        let (endpoint, credential) = match (self.settings.chat_url.clone(), credential) {
            (Some(endpoint), Some(credential)) => (endpoint, credential),
            _ => {
                return self.fail_turn(
                    chat_id,
                    ChatError::Configuration(CONFIGURATION_MISSING.to_string()),
                );
            }
        };

        let payload = serde_json::to_value(&prepared.request).map_err(BotdeskError::from)?;
        debug!(chat_id = %chat_id, payload = %payload, "Sending request");
        self.audit.record(LogKind::Request, payload);

        match self
            .client
            .send(&endpoint, &credential, &prepared.request)
            .await
        {
            Ok(reply) => self.apply_reply(chat_id, reply),
            Err(e) => self.fail_turn(chat_id, ChatError::Inference(e)),
        }
    }

    /// Credential of `bot_id`, or `None` if the bot is gone or has none.
    fn credential_for(&self, bot_id: &str) -> Result<Option<String>, ChatError> {
        Ok(self
            .registry()?
            .get_bot(bot_id)
            .map(|b| b.credential.clone())
            .filter(|c| !c.trim().is_empty()))
    }

    fn apply_reply(&self, chat_id: &str, reply: InferenceReply) -> Result<TurnOutcome, ChatError> {
        debug!(chat_id = %chat_id, payload = %reply.payload, "Reply received");
        self.audit.record(LogKind::Response, reply.payload.clone());

        let Some(answer) = reply.answer() else {
            return self.fail_turn(
                chat_id,
                InferenceError::Malformed("reply carries no answer text".to_string()).into(),
            );
        };
        let message = Message::assistant(answer);

        let mut conversations = self.conversations()?;
        if conversations.get_chat(chat_id).is_none() {
            warn!(chat_id = %chat_id, "Chat deleted while awaiting reply, answer dropped");
            return Ok(TurnOutcome::Answered(message));
        }
        conversations.append_message(chat_id, message.clone())?;
        if let Some(token) = reply.conversation_id() {
            conversations.set_conversation_id(chat_id, token)?;
        }
        info!(chat_id = %chat_id, chars = message.content.len(), "Turn answered");
        Ok(TurnOutcome::Answered(message))
    }

    fn fail_turn(&self, chat_id: &str, cause: ChatError) -> Result<TurnOutcome, ChatError> {
        warn!(chat_id = %chat_id, error = %cause, "Turn failed");
        self.audit.record(LogKind::Error, cause.to_payload());

        let description = cause
            .description()
            .unwrap_or_else(|| UNKNOWN_ERROR.to_string());
        let reply = Message::assistant(format!("{}{}", ERROR_PREFIX, description));

        let mut conversations = self.conversations()?;
        if conversations.get_chat(chat_id).is_some() {
            conversations.append_message(chat_id, reply.clone())?;
        } else {
            warn!(chat_id = %chat_id, "Chat deleted while awaiting reply, error dropped");
        }
        Ok(TurnOutcome::Failed { reply, cause })
    }

    fn registry(&self) -> Result<MutexGuard<'_, BotRegistry>, ChatError> {
        self.registry
            .lock()
            .map_err(|e| ChatError::Storage(format!("registry lock poisoned: {}", e)))
    }

    fn conversations(&self) -> Result<MutexGuard<'_, ConversationStore>, ChatError> {
        self.conversations
            .lock()
            .map_err(|e| ChatError::Storage(format!("conversation lock poisoned: {}", e)))
    }
}
