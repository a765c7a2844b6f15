use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

mod client;
mod config;
mod db;
mod llm;
mod safety;
mod session;
mod util;
mod web;

use crate::config::{AppConfig, CliArgs, Command};
use crate::db::history_store::HistoryStore;
use crate::llm::LlmManager;
use crate::util::logging::init_tracing;
use crate::web::auth::TokenVerifier;
use crate::web::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Secrets may live in a local .env file
    dotenv::dotenv().ok();

    // Parse command line arguments
    let args = CliArgs::parse();

    // Initialize logging
    init_tracing(args.log_json);

    // Load configuration
    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    match args.command.clone().unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Ask { .. } => {
            client::run_repl(&config.client).await?;
            Ok(())
        }
        Command::IssueToken { user_id } => {
            let token = TokenVerifier::new(&config.auth).issue(&user_id)?;
            println!("{}", token);
            Ok(())
        }
    }
}

async fn serve(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.auth.jwt_secret == "change-me" {
        tracing::warn!("Using the default JWT secret; set JWT_SECRET before exposing the server");
    }

    info!("Opening history store at {}", config.history.connection_string);
    let history = HistoryStore::open(&config.history)?;

    // Initialize LLM manager
    info!("Initializing LLM manager with backend: {}", config.llm.backend);
    let llm_manager = LlmManager::new(&config.llm)?;

    let app_state = Arc::new(AppState::new(config.clone(), llm_manager, history));

    // Start the web server
    info!("Starting NL-SQL server on {}:{}", config.web.host, config.web.port);
    match web::run_server(config.web, app_state).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            error!("Server error: {}", e);
            return Err(e.into());
        }
    }

    Ok(())
}
