//! Bot registry: the configured bots and the current selection.
//!
//! The reserved default bot always exists and cannot be deleted. Every
//! mutation is mirrored into the [`PersistentStore`] right away.

use std::sync::Arc;

use tracing::{info, warn};

use botdesk_core::types::{new_bot_id, Bot, DEFAULT_BOT_ID};
use botdesk_storage::{load_or_default, save_json, PersistentStore, StateKey};

use crate::error::ChatError;

pub struct BotRegistry {
    store: Arc<dyn PersistentStore>,
    bots: Vec<Bot>,
    selected_bot_id: String,
}

impl BotRegistry {
    /// Restore the registry from `store`.
    ///
    /// Seeds the default bot with `default_credential` when it is missing,
    /// and reverts a selection that no longer resolves to the default bot.
    pub fn load(store: Arc<dyn PersistentStore>, default_credential: &str) -> Self {
        let mut bots: Vec<Bot> = load_or_default(store.as_ref(), StateKey::Bots);
        let seeded = !bots.iter().any(Bot::is_default);
        if seeded {
            bots.insert(0, Bot::default_bot(default_credential));
        }

        let stored_selection: Option<String> =
            load_or_default(store.as_ref(), StateKey::SelectedBotId);
        let selected_bot_id = match stored_selection {
            Some(id) if bots.iter().any(|b| b.id == id) => id,
            Some(id) => {
                warn!(bot_id = %id, "Selected bot no longer exists, reverting to default");
                DEFAULT_BOT_ID.to_string()
            }
            None => DEFAULT_BOT_ID.to_string(),
        };

        let registry = Self {
            store,
            bots,
            selected_bot_id,
        };
        if seeded {
            info!("Default bot created");
            registry.persist_bots();
        }
        registry.persist_selection();
        registry
    }

    /// All bots in insertion order.
    pub fn list_bots(&self) -> &[Bot] {
        &self.bots
    }

    pub fn get_bot(&self, id: &str) -> Option<&Bot> {
        self.bots.iter().find(|b| b.id == id)
    }

    /// Register a new bot. Name and credential must be non-blank.
    pub fn add_bot(&mut self, name: &str, credential: &str) -> Result<Bot, ChatError> {
        let name = name.trim();
        let credential = credential.trim();
        if name.is_empty() {
            return Err(ChatError::Validation(
                "bot name must not be empty".to_string(),
            ));
        }
        if credential.is_empty() {
            return Err(ChatError::Validation(
                "bot credential must not be empty".to_string(),
            ));
        }

        let bot = Bot {
            id: new_bot_id(),
            name: name.to_string(),
            credential: credential.to_string(),
        };
        self.bots.push(bot.clone());
        self.persist_bots();
        info!(bot_id = %bot.id, name = %bot.name, "Bot added");
        Ok(bot)
    }

    /// Remove a bot. The default bot and unknown ids are left alone.
    ///
    /// Deleting the selected bot reverts the selection to the default bot.
    /// Returns whether a bot was removed.
    pub fn delete_bot(&mut self, id: &str) -> bool {
        if id == DEFAULT_BOT_ID {
            return false;
        }
        let before = self.bots.len();
        self.bots.retain(|b| b.id != id);
        if self.bots.len() == before {
            return false;
        }
        self.persist_bots();

        if self.selected_bot_id == id {
            self.selected_bot_id = DEFAULT_BOT_ID.to_string();
            self.persist_selection();
        }
        info!(bot_id = %id, "Bot deleted");
        true
    }

    pub fn selected_bot_id(&self) -> &str {
        &self.selected_bot_id
    }

    /// Change the selected bot. Unknown ids are rejected.
    pub fn select_bot(&mut self, id: &str) -> Result<(), ChatError> {
        if self.get_bot(id).is_none() {
            return Err(ChatError::BotNotFound(id.to_string()));
        }
        self.selected_bot_id = id.to_string();
        self.persist_selection();
        Ok(())
    }

    fn persist_bots(&self) {
        save_json(self.store.as_ref(), StateKey::Bots, &self.bots);
    }

    fn persist_selection(&self) {
        save_json(
            self.store.as_ref(),
            StateKey::SelectedBotId,
            &self.selected_bot_id,
        );
    }
}
