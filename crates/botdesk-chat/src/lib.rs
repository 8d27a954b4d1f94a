//! Conversation orchestration for botdesk.
//!
//! Owns bot and chat state, sequences requests to the remote chat API,
//! reconciles replies (including regeneration of an earlier answer),
//! persists every mutation, and keeps a session audit log of all exchanges.

pub mod audit;
pub mod client;
pub mod controller;
pub mod conversation;
pub mod error;
pub mod registry;

pub use audit::AuditLog;
pub use client::{ChatRequest, HttpInferenceClient, InferenceClient, InferenceReply, WireMessage};
pub use controller::{ConversationController, ControllerSettings, TurnOutcome};
pub use conversation::ConversationStore;
pub use error::{ChatError, InferenceError};
pub use registry::BotRegistry;
