pub mod config;
pub mod error;
pub mod types;

pub use config::BotdeskConfig;
pub use error::{BotdeskError, Result};
pub use types::*;
