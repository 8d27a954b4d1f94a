//! Conversation store: chats, their message histories, and the active chat.
//!
//! Chats are kept in creation order; [`ConversationStore::list_chats`]
//! returns them newest first for display. The active chat id always
//! resolves to a stored chat, or is `None` when there are no chats.

use std::sync::Arc;

use tracing::{debug, info, warn};

use botdesk_core::types::{derive_title, Chat, Message};
use botdesk_storage::{load_or_default, save_json, PersistentStore, StateKey};

use crate::error::ChatError;

pub struct ConversationStore {
    store: Arc<dyn PersistentStore>,
    chats: Vec<Chat>,
    active_chat_id: Option<String>,
}

impl ConversationStore {
    /// Restore chats and the active chat id from `store`.
    ///
    /// A persisted active id that does not resolve is dropped; call
    /// [`ConversationStore::ensure_active_chat`] to apply the startup rule.
    pub fn load(store: Arc<dyn PersistentStore>) -> Self {
        let mut chats: Vec<Chat> = load_or_default(store.as_ref(), StateKey::Chats);
        for chat in &mut chats {
            // Chats saved before the flag existed already carry their title.
            if !chat.messages.is_empty() {
                chat.title_fixed = true;
            }
        }

        let stored_active: Option<String> =
            load_or_default(store.as_ref(), StateKey::ActiveChatId);
        let active_chat_id = stored_active.filter(|id| {
            let found = chats.iter().any(|c| &c.id == id);
            if !found {
                warn!(chat_id = %id, "Persisted active chat no longer exists");
            }
            found
        });

        debug!(chats = chats.len(), "Conversation store loaded");
        Self {
            store,
            chats,
            active_chat_id,
        }
    }

    /// Create an empty chat bound to `bot_id` and make it active.
    pub fn create_chat(&mut self, bot_id: &str) -> Chat {
        let chat = Chat::new(bot_id);
        self.chats.push(chat.clone());
        self.active_chat_id = Some(chat.id.clone());
        self.persist_chats();
        self.persist_active();
        info!(chat_id = %chat.id, bot_id = %bot_id, "Chat created");
        chat
    }

    /// Make sure an active chat exists, creating one bound to `bot_id`
    /// when the current active id is unset. Returns the active chat id.
    pub fn ensure_active_chat(&mut self, bot_id: &str) -> String {
        match &self.active_chat_id {
            Some(id) => id.clone(),
            None => self.create_chat(bot_id).id,
        }
    }

    /// Remove a chat. Returns whether it existed.
    ///
    /// When the active chat is removed the most recently created remaining
    /// chat becomes active.
    pub fn delete_chat(&mut self, id: &str) -> bool {
        let before = self.chats.len();
        self.chats.retain(|c| c.id != id);
        if self.chats.len() == before {
            return false;
        }
        self.persist_chats();

        if self.active_chat_id.as_deref() == Some(id) {
            self.active_chat_id = self.chats.last().map(|c| c.id.clone());
            self.persist_active();
        }
        info!(chat_id = %id, "Chat deleted");
        true
    }

    /// Append `message`. The first message of a chat fixes its title.
    pub fn append_message(&mut self, chat_id: &str, message: Message) -> Result<(), ChatError> {
        let chat = self.chat_mut(chat_id)?;
        if chat.messages.is_empty() && !chat.title_fixed {
            chat.title = derive_title(&message.content);
            chat.title_fixed = true;
        }
        chat.messages.push(message);
        self.persist_chats();
        Ok(())
    }

    /// Keep only the first `count` messages of a chat.
    pub fn truncate_messages(&mut self, chat_id: &str, count: usize) -> Result<(), ChatError> {
        let chat = self.chat_mut(chat_id)?;
        chat.messages.truncate(count);
        self.persist_chats();
        Ok(())
    }

    /// Store the continuation token issued by the remote service.
    pub fn set_conversation_id(&mut self, chat_id: &str, token: &str) -> Result<(), ChatError> {
        let chat = self.chat_mut(chat_id)?;
        if chat.conversation_id.as_deref() == Some(token) {
            return Ok(());
        }
        chat.conversation_id = Some(token.to_string());
        self.persist_chats();
        Ok(())
    }

    pub fn get_chat(&self, id: &str) -> Option<&Chat> {
        self.chats.iter().find(|c| c.id == id)
    }

    /// Chats, most recently created first.
    pub fn list_chats(&self) -> Vec<Chat> {
        self.chats.iter().rev().cloned().collect()
    }

    pub fn active_chat_id(&self) -> Option<&str> {
        self.active_chat_id.as_deref()
    }

    pub fn set_active_chat(&mut self, id: &str) -> Result<(), ChatError> {
        if self.get_chat(id).is_none() {
            return Err(ChatError::ChatNotFound(id.to_string()));
        }
        self.active_chat_id = Some(id.to_string());
        self.persist_active();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.chats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chats.is_empty()
    }

    fn chat_mut(&mut self, id: &str) -> Result<&mut Chat, ChatError> {
        self.chats
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| ChatError::ChatNotFound(id.to_string()))
    }

    fn persist_chats(&self) {
        save_json(self.store.as_ref(), StateKey::Chats, &self.chats);
    }

    fn persist_active(&self) {
        save_json(
            self.store.as_ref(),
            StateKey::ActiveChatId,
            &self.active_chat_id,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use botdesk_core::types::{Attachment, DEFAULT_CHAT_TITLE};
    use botdesk_storage::MemoryStore;

    fn fresh() -> (Arc<dyn PersistentStore>, ConversationStore) {
        let store: Arc<dyn PersistentStore> = Arc::new(MemoryStore::new());
        let conversations = ConversationStore::load(Arc::clone(&store));
        (store, conversations)
    }

    fn assert_active_resolves(conversations: &ConversationStore) {
        match conversations.active_chat_id() {
            Some(id) => assert!(conversations.get_chat(id).is_some(), "dangling active id {}", id),
            None => assert!(conversations.is_empty()),
        }
    }

    // ---- Create / delete ----

    #[test]
    fn test_create_chat_becomes_active() {
        let (_, mut conversations) = fresh();
        let chat = conversations.create_chat("default");
        assert_eq!(conversations.active_chat_id(), Some(chat.id.as_str()));
        assert_eq!(chat.title, DEFAULT_CHAT_TITLE);
        assert_eq!(chat.bot_id, "default");
        assert!(chat.messages.is_empty());
    }

    #[test]
    fn test_list_chats_newest_first() {
        let (_, mut conversations) = fresh();
        let a = conversations.create_chat("default");
        let b = conversations.create_chat("default");
        let c = conversations.create_chat("default");
        let ids: Vec<String> = conversations.list_chats().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![c.id, b.id, a.id]);
    }

    #[test]
    fn test_delete_active_chat_activates_most_recent() {
        let (_, mut conversations) = fresh();
        let a = conversations.create_chat("default");
        let b = conversations.create_chat("default");
        conversations.set_active_chat(&a.id).unwrap();

        assert!(conversations.delete_chat(&a.id));
        assert_eq!(conversations.active_chat_id(), Some(b.id.as_str()));
    }

    #[test]
    fn test_delete_last_chat_clears_active() {
        let (_, mut conversations) = fresh();
        let a = conversations.create_chat("default");
        conversations.delete_chat(&a.id);
        assert!(conversations.active_chat_id().is_none());
        assert!(conversations.is_empty());
    }

    #[test]
    fn test_delete_inactive_chat_keeps_active() {
        let (_, mut conversations) = fresh();
        let a = conversations.create_chat("default");
        let b = conversations.create_chat("default");
        conversations.delete_chat(&a.id);
        assert_eq!(conversations.active_chat_id(), Some(b.id.as_str()));
    }

    #[test]
    fn test_delete_unknown_chat_is_noop() {
        let (_, mut conversations) = fresh();
        conversations.create_chat("default");
        assert!(!conversations.delete_chat("ghost"));
        assert_eq!(conversations.len(), 1);
    }

    #[test]
    fn test_active_id_never_dangles() {
        let (_, mut conversations) = fresh();
        let mut created = Vec::new();
        for round in 0..12 {
            if round % 3 == 2 {
                let victim: String = created.remove(round % created.len());
                conversations.delete_chat(&victim);
            } else {
                created.push(conversations.create_chat("default").id);
            }
            assert_active_resolves(&conversations);
        }
        for id in created {
            conversations.delete_chat(&id);
            assert_active_resolves(&conversations);
        }
        assert!(conversations.active_chat_id().is_none());
    }

    #[test]
    fn test_set_active_unknown_rejected() {
        let (_, mut conversations) = fresh();
        let a = conversations.create_chat("default");
        assert!(matches!(
            conversations.set_active_chat("ghost"),
            Err(ChatError::ChatNotFound(_))
        ));
        assert_eq!(conversations.active_chat_id(), Some(a.id.as_str()));
    }

    // ---- Messages & titles ----

    #[test]
    fn test_first_message_sets_title() {
        let (_, mut conversations) = fresh();
        let chat = conversations.create_chat("default");
        conversations
            .append_message(&chat.id, Message::user("one two three four five six seven eight nine", vec![]))
            .unwrap();
        let chat = conversations.get_chat(&chat.id).unwrap();
        assert_eq!(chat.title, "one two three four five six seven eight");
        assert!(chat.title_fixed);
    }

    #[test]
    fn test_title_is_fixed_after_first_message() {
        let (_, mut conversations) = fresh();
        let chat = conversations.create_chat("default");
        conversations
            .append_message(&chat.id, Message::user("first topic", vec![]))
            .unwrap();
        conversations
            .append_message(&chat.id, Message::assistant("answer"))
            .unwrap();
        conversations
            .append_message(&chat.id, Message::user("another subject entirely", vec![]))
            .unwrap();
        assert_eq!(conversations.get_chat(&chat.id).unwrap().title, "first topic");
    }

    #[test]
    fn test_title_survives_truncate_to_zero() {
        let (_, mut conversations) = fresh();
        let chat = conversations.create_chat("default");
        conversations
            .append_message(&chat.id, Message::user("original", vec![]))
            .unwrap();
        conversations.truncate_messages(&chat.id, 0).unwrap();
        conversations
            .append_message(&chat.id, Message::user("replacement", vec![]))
            .unwrap();
        assert_eq!(conversations.get_chat(&chat.id).unwrap().title, "original");
    }

    #[test]
    fn test_attachment_only_message_keeps_default_title() {
        let (_, mut conversations) = fresh();
        let chat = conversations.create_chat("default");
        let attachment = Attachment {
            name: "a.png".to_string(),
            size: 1,
            mime_type: "image/png".to_string(),
        };
        conversations
            .append_message(&chat.id, Message::user("", vec![attachment]))
            .unwrap();
        let chat = conversations.get_chat(&chat.id).unwrap();
        assert_eq!(chat.title, DEFAULT_CHAT_TITLE);
        assert!(chat.title_fixed);
    }

    #[test]
    fn test_append_to_missing_chat() {
        let (_, mut conversations) = fresh();
        let result = conversations.append_message("ghost", Message::assistant("x"));
        assert!(matches!(result, Err(ChatError::ChatNotFound(_))));
    }

    #[test]
    fn test_truncate_keeps_prefix() {
        let (_, mut conversations) = fresh();
        let chat = conversations.create_chat("default");
        for content in ["q1", "a1", "q2", "a2"] {
            conversations
                .append_message(&chat.id, Message::user(content, vec![]))
                .unwrap();
        }
        conversations.truncate_messages(&chat.id, 3).unwrap();
        let contents: Vec<String> = conversations
            .get_chat(&chat.id)
            .unwrap()
            .messages
            .iter()
            .map(|m| m.content.clone())
            .collect();
        assert_eq!(contents, vec!["q1", "a1", "q2"]);
    }

    #[test]
    fn test_set_conversation_id() {
        let (_, mut conversations) = fresh();
        let chat = conversations.create_chat("default");
        conversations.set_conversation_id(&chat.id, "conv-1").unwrap();
        conversations.set_conversation_id(&chat.id, "conv-2").unwrap();
        assert_eq!(
            conversations.get_chat(&chat.id).unwrap().conversation_id.as_deref(),
            Some("conv-2")
        );
    }

    // ---- Startup & persistence ----

    #[test]
    fn test_ensure_active_chat_creates_when_empty() {
        let (_, mut conversations) = fresh();
        let id = conversations.ensure_active_chat("bot-7");
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations.get_chat(&id).unwrap().bot_id, "bot-7");
        assert_eq!(conversations.ensure_active_chat("bot-7"), id);
        assert_eq!(conversations.len(), 1);
    }

    #[test]
    fn test_roundtrip_restores_state() {
        let (store, mut conversations) = fresh();
        let a = conversations.create_chat("default");
        let b = conversations.create_chat("bot-2");
        conversations
            .append_message(&a.id, Message::user("hello there", vec![]))
            .unwrap();
        conversations
            .append_message(&a.id, Message::assistant("hi"))
            .unwrap();
        conversations.set_conversation_id(&a.id, "conv-1").unwrap();
        conversations.set_active_chat(&b.id).unwrap();

        let restored = ConversationStore::load(Arc::clone(&store));
        assert_eq!(restored.list_chats(), conversations.list_chats());
        assert_eq!(restored.active_chat_id(), Some(b.id.as_str()));
    }

    #[test]
    fn test_dangling_persisted_active_id_dropped() {
        let store: Arc<dyn PersistentStore> = Arc::new(MemoryStore::new());
        save_json(store.as_ref(), StateKey::ActiveChatId, &Some("ghost"));
        let mut conversations = ConversationStore::load(Arc::clone(&store));
        assert!(conversations.active_chat_id().is_none());

        let id = conversations.ensure_active_chat("default");
        let persisted: Option<String> = load_or_default(store.as_ref(), StateKey::ActiveChatId);
        assert_eq!(persisted, Some(id));
    }

    #[test]
    fn test_legacy_chat_with_messages_keeps_title() {
        let store: Arc<dyn PersistentStore> = Arc::new(MemoryStore::new());
        store
            .save(
                StateKey::Chats.as_str(),
                r#"[{"id":"c1","title":"Old title","botId":"default","messages":[{"role":"user","content":"Old title"}]}]"#,
            )
            .unwrap();
        let mut conversations = ConversationStore::load(store);
        conversations.truncate_messages("c1", 0).unwrap();
        conversations
            .append_message("c1", Message::user("new words", vec![]))
            .unwrap();
        assert_eq!(conversations.get_chat("c1").unwrap().title, "Old title");
    }
}
