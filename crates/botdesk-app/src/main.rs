//! botdesk binary - composition root.
//!
//! 1. Parse CLI args and load configuration from TOML
//! 2. Initialize tracing (stderr)
//! 3. Open the SQLite state store
//! 4. Build the HTTP inference client and the conversation controller
//! 5. Run the interactive front end on stdin/stdout

mod cli;
mod repl;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

use botdesk_chat::{ConversationController, HttpInferenceClient};
use botdesk_core::config::{BotdeskConfig, GeneralConfig};
use botdesk_storage::{Database, PersistentStore, SqliteStore};

use crate::cli::CliArgs;
use crate::repl::Repl;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config is read before tracing so the configured level applies.
    let config_file = args.resolve_config_path();
    let loaded = BotdeskConfig::load(&config_file);
    let config_level = match &loaded {
        Ok(config) => config.general.log_level.clone(),
        Err(_) => GeneralConfig::default().log_level,
    };

    // Tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(args.resolve_log_level(&config_level))),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting botdesk v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match loaded {
        Ok(config) => {
            tracing::info!(path = %config_file.display(), "Configuration loaded");
            config
        }
        Err(e) => {
            tracing::warn!(path = %config_file.display(), error = %e, "Using default configuration");
            BotdeskConfig::default()
        }
    };
    config.apply_env_overrides();
    config
        .inference
        .apply_overrides(args.resolve_endpoint(), None);

    if config.inference.chat_messages_url().is_none() {
        tracing::warn!("No inference endpoint configured, replies will report a configuration error");
    }

    // Storage.
    let data_dir = args.resolve_data_dir(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }
    let db_path = data_dir.join(&config.storage.database_file);
    let db = Database::new(&db_path)?;
    tracing::info!(path = %db_path.display(), "SQLite database opened");
    let store: Arc<dyn PersistentStore> = Arc::new(SqliteStore::new(Arc::new(db)));

    // Inference.
    let client = HttpInferenceClient::new(Duration::from_secs(config.inference.timeout_secs))?;
    let controller = Arc::new(ConversationController::open(
        store,
        Arc::new(client),
        &config.inference,
    ));

    println!(
        "botdesk v{}. Type /help for commands.",
        env!("CARGO_PKG_VERSION")
    );
    let mut repl = Repl::new(controller, std::io::stdout());
    repl.run(BufReader::new(tokio::io::stdin())).await?;

    tracing::info!("botdesk stopped");
    Ok(())
}
