use chrono_tz::Tz;
use dotenvy::dotenv;
use std::env;

use crate::error::{CoreError, CoreResult};
use crate::telegram::normalize_chat_id;

#[derive(Debug, Clone)]
pub struct Config {
    // Platform
    pub bot_token: String,
    pub bot_handle: String,
    /// Routable chat-scope ids the assistant serves, normalized at load.
    pub allowed_chat_ids: Vec<i64>,

    // App
    pub timezone: Tz,
    pub log_level: String,
    pub environment: String,

    // Generator
    pub llm_base_url: String,
    pub llm_api_key: String,
    pub tier_a_model: String,
    pub tier_b_model: String,
    pub llm_timeout_secs: u64,

    // Embedder
    pub embedding_base_url: String,
    pub embedding_api_key: String,
    pub embedding_model: String,
    pub embedding_dim: usize,
    pub embedding_batch_size: usize,
    pub embedding_timeout_secs: u64,

    // Store
    pub store_url: String,
    pub store_key: String,
    pub store_timeout_secs: u64,

    // Quota
    pub tier_a_daily_limit: u32,
    pub tier_b_daily_limit: u32,

    // Retrieval
    pub rag_enabled: bool,
    pub rag_top_k: usize,
    pub rag_similarity_floor: f64,
    pub rag_max_context_chars: usize,

    // Indexing
    pub sync_batch_size: usize,
    pub sync_max_messages: usize,

    // Orchestrator
    pub max_question_chars: usize,
    pub shutdown_grace_secs: u64,
}

impl Config {
    pub fn from_env() -> CoreResult<Self> {
        dotenv().ok();
        Self::build()
    }

    fn build() -> CoreResult<Self> {
        let llm_base_url = get_env("LLM_BASE_URL", "https://api.openai.com/v1");
        let llm_api_key = require("LLM_API_KEY")?;

        let config = Config {
            bot_token: require("TELEGRAM_BOT_TOKEN")?,
            bot_handle: require("TELEGRAM_BOT_HANDLE")?,
            allowed_chat_ids: get_env_id_list("ALLOWED_CHAT_IDS"),

            timezone: parse_timezone(&get_env("TIMEZONE", "UTC"))?,
            log_level: get_env("LOG_LEVEL", "info"),
            environment: get_env("ENVIRONMENT", "production"),

            embedding_base_url: get_env("EMBEDDING_BASE_URL", &llm_base_url),
            embedding_api_key: env::var("EMBEDDING_API_KEY").unwrap_or_else(|_| llm_api_key.clone()),
            embedding_model: get_env("EMBEDDING_MODEL", "text-embedding-3-small"),
            embedding_dim: get_env_parsed("EMBEDDING_DIM", 768),
            embedding_batch_size: get_env_parsed("EMBEDDING_BATCH_SIZE", 100),
            embedding_timeout_secs: get_env_parsed("EMBEDDING_TIMEOUT_SECS", 30),

            tier_a_model: get_env("TIER_A_MODEL", "gpt-4o"),
            tier_b_model: get_env("TIER_B_MODEL", "gpt-4o-mini"),
            llm_timeout_secs: get_env_parsed("LLM_TIMEOUT_SECS", 30),
            llm_base_url,
            llm_api_key,

            store_url: require("STORE_URL")?,
            store_key: require("STORE_KEY")?,
            store_timeout_secs: get_env_parsed("STORE_TIMEOUT_SECS", 10),

            tier_a_daily_limit: get_env_parsed("TIER_A_DAILY_LIMIT", 5),
            tier_b_daily_limit: get_env_parsed("TIER_B_DAILY_LIMIT", 25),

            rag_enabled: get_env_parsed("RAG_ENABLED", true),
            rag_top_k: get_env_parsed("RAG_TOP_K", 5),
            rag_similarity_floor: get_env_parsed("RAG_SIMILARITY_FLOOR", 0.8),
            rag_max_context_chars: get_env_parsed("RAG_MAX_CONTEXT_CHARS", 2000),

            sync_batch_size: get_env_parsed("SYNC_BATCH_SIZE", 100),
            sync_max_messages: get_env_parsed("SYNC_MAX_MESSAGES", 1000),

            max_question_chars: get_env_parsed("MAX_QUESTION_CHARS", 2000),
            shutdown_grace_secs: get_env_parsed("SHUTDOWN_GRACE_SECS", 10),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> CoreResult<()> {
        if self.allowed_chat_ids.is_empty() {
            return Err(CoreError::Config(
                "ALLOWED_CHAT_IDS is required (comma-separated list of chat ids)".into(),
            ));
        }
        if self.tier_a_daily_limit == 0 || self.tier_b_daily_limit == 0 {
            return Err(CoreError::Config("tier daily limits must be positive".into()));
        }
        if self.llm_timeout_secs == 0
            || self.store_timeout_secs == 0
            || self.embedding_timeout_secs == 0
        {
            return Err(CoreError::Config("timeouts must be positive".into()));
        }
        if self.embedding_batch_size == 0 {
            return Err(CoreError::Config("EMBEDDING_BATCH_SIZE must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.rag_similarity_floor) {
            return Err(CoreError::Config(format!(
                "RAG_SIMILARITY_FLOOR must be in [0, 1], got {}",
                self.rag_similarity_floor
            )));
        }
        if !matches!(
            self.log_level.as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return Err(CoreError::Config(format!(
                "LOG_LEVEL must be one of trace, debug, info, warn, error; got {}",
                self.log_level
            )));
        }
        Ok(())
    }

    pub fn is_allowed_chat(&self, chat_scope_id: i64) -> bool {
        self.allowed_chat_ids.contains(&chat_scope_id)
    }
}

fn parse_timezone(name: &str) -> CoreResult<Tz> {
    name.parse()
        .map_err(|_| CoreError::Config(format!("TIMEZONE must be an IANA zone name, got {name}")))
}

fn require(key: &str) -> CoreResult<String> {
    env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| CoreError::Config(format!("{key} must be set")))
}

fn get_env(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn get_env_parsed<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Comma-separated ids; invalid entries are skipped, valid ones normalized
/// to the routable form.
fn get_env_id_list(key: &str) -> Vec<i64> {
    env::var(key)
        .unwrap_or_default()
        .split(',')
        .filter_map(|part| part.trim().parse::<i64>().ok())
        .map(normalize_chat_id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Env vars are process-global; serialize the tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn set_required_vars() {
        env::set_var("TELEGRAM_BOT_TOKEN", "test-token");
        env::set_var("TELEGRAM_BOT_HANDLE", "test_bot");
        env::set_var("ALLOWED_CHAT_IDS", "-1001750074031, 1750074032");
        env::set_var("LLM_API_KEY", "test-key");
        env::set_var("STORE_URL", "http://localhost:54321");
        env::set_var("STORE_KEY", "store-key");
    }

    fn clear_vars() {
        for key in [
            "TELEGRAM_BOT_TOKEN",
            "TELEGRAM_BOT_HANDLE",
            "ALLOWED_CHAT_IDS",
            "LLM_API_KEY",
            "STORE_URL",
            "STORE_KEY",
            "TIMEZONE",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn defaults_and_normalization() {
        let _guard = ENV_LOCK.lock().unwrap();
        set_required_vars();

        let config = Config::build().unwrap();
        assert_eq!(config.tier_a_daily_limit, 5);
        assert_eq!(config.tier_b_daily_limit, 25);
        assert_eq!(config.rag_top_k, 5);
        assert!((config.rag_similarity_floor - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.rag_max_context_chars, 2000);
        assert_eq!(config.embedding_dim, 768);
        // Raw positive supergroup id is normalized to the routable form.
        assert_eq!(
            config.allowed_chat_ids,
            vec![-1_001_750_074_031, -1_001_750_074_032]
        );
        assert!(config.is_allowed_chat(-1_001_750_074_031));
        assert!(!config.is_allowed_chat(-1));

        clear_vars();
    }

    #[test]
    fn missing_required_var_fails() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_vars();
        assert!(matches!(Config::build(), Err(CoreError::Config(_))));
    }

    #[test]
    fn invalid_timezone_fails() {
        let _guard = ENV_LOCK.lock().unwrap();
        set_required_vars();
        env::set_var("TIMEZONE", "Mars/Olympus");
        assert!(matches!(Config::build(), Err(CoreError::Config(_))));
        clear_vars();
    }
}
