use crate::config::AppConfig;
use crate::db::history_store::HistoryStore;
use crate::llm::LlmManager;
use crate::web::auth::TokenVerifier;

/// Shared application state for the web server.
///
/// Nothing per-user lives here: credentials, schema and SQL arrive with each
/// request and are dropped when it completes.
pub struct AppState {
    pub config: AppConfig,
    pub llm_manager: LlmManager,
    pub history: HistoryStore,
    pub auth: TokenVerifier,
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(config: AppConfig, llm_manager: LlmManager, history: HistoryStore) -> Self {
        let auth = TokenVerifier::new(&config.auth);
        Self {
            config,
            llm_manager,
            history,
            auth,
            startup_time: chrono::Utc::now(),
        }
    }
}
