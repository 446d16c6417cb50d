use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::core::errors::ApiError;

/// Runtime configuration, read once from the environment at startup and
/// treated as read-only afterwards.
#[derive(Debug, Clone)]
pub struct Settings {
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub model_name: String,
    pub embed_model: String,
    pub kb_dir: PathBuf,
    pub index_dir: PathBuf,
    pub tickets_path: PathBuf,
    pub log_dir: PathBuf,
    pub top_k: usize,
    pub min_sim: f32,
    pub max_context_chars: usize,
    pub max_output_tokens: u32,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            openai_api_key: String::new(),
            openai_base_url: "https://api.openai.com".to_string(),
            model_name: "gpt-4o-mini".to_string(),
            embed_model: "text-embedding-3-small".to_string(),
            kb_dir: PathBuf::from("kb"),
            index_dir: PathBuf::from("data/index"),
            tickets_path: PathBuf::from("data/tickets.jsonl"),
            log_dir: PathBuf::from("data/logs"),
            top_k: 3,
            min_sim: 0.25,
            max_context_chars: 6000,
            max_output_tokens: 300,
            chunk_size: 900,
            chunk_overlap: 150,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Settings::default();
        Settings {
            openai_api_key: env::var("OPENAI_API_KEY").unwrap_or(defaults.openai_api_key),
            openai_base_url: env::var("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            model_name: env::var("MODEL_NAME").unwrap_or(defaults.model_name),
            embed_model: env::var("EMBED_MODEL").unwrap_or(defaults.embed_model),
            kb_dir: env_path("KB_DIR", defaults.kb_dir),
            index_dir: env_path("INDEX_DIR", defaults.index_dir),
            tickets_path: env_path("TICKETS_PATH", defaults.tickets_path),
            log_dir: env_path("LOG_DIR", defaults.log_dir),
            top_k: env_parse("TOP_K", defaults.top_k),
            min_sim: env_parse("MIN_SIM", defaults.min_sim),
            max_context_chars: env_parse("MAX_CONTEXT_CHARS", defaults.max_context_chars),
            max_output_tokens: env_parse("MAX_OUTPUT_TOKENS", defaults.max_output_tokens),
            chunk_size: env_parse("CHUNK_SIZE", defaults.chunk_size),
            chunk_overlap: env_parse("CHUNK_OVERLAP", defaults.chunk_overlap),
        }
    }

    pub fn validate(&self) -> Result<(), ApiError> {
        if self.chunk_overlap >= self.chunk_size {
            return Err(ApiError::Config(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(ApiError::Config("top_k must be at least 1".to_string()));
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

fn env_path(name: &str, default: PathBuf) -> PathBuf {
    env::var(name).map(PathBuf::from).unwrap_or(default)
}
