use std::sync::Arc;

use tokio::sync::Mutex;

use crate::bot::AnswerBot;
use crate::config::Settings;
use crate::core::errors::ApiError;
use crate::history::MemoryStore;
use crate::llm::{LlmProvider, OpenAiProvider};
use crate::tickets::TicketStore;

/// Shared application state: configuration, the stores, the provider, and
/// the orchestrator built on top of them.
pub struct AppState {
    pub settings: Arc<Settings>,
    pub history: MemoryStore,
    pub tickets: TicketStore,
    pub provider: Arc<dyn LlmProvider>,
    pub bot: AnswerBot,
    /// Index rebuilds are exclusive; concurrent requests queue here.
    pub rebuild_lock: Mutex<()>,
}

impl AppState {
    pub fn initialize() -> Result<Arc<Self>, ApiError> {
        let settings = Arc::new(Settings::from_env());
        Self::with_settings(settings)
    }

    pub fn with_settings(settings: Arc<Settings>) -> Result<Arc<Self>, ApiError> {
        settings.validate()?;

        let history = MemoryStore::new();
        let tickets = TicketStore::new(settings.tickets_path.clone());
        let provider: Arc<dyn LlmProvider> = Arc::new(OpenAiProvider::new(
            settings.openai_base_url.clone(),
            settings.openai_api_key.clone(),
        ));
        let bot = AnswerBot::new(settings.clone(), provider.clone(), history.clone());

        Ok(Arc::new(AppState {
            settings,
            history,
            tickets,
            provider,
            bot,
            rebuild_lock: Mutex::new(()),
        }))
    }
}
