pub mod catalog;
pub mod domain;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod render;
pub mod service;
pub mod storage;
pub mod triggers;
pub mod users;

pub mod config {
    use crate::engine::ThresholdMode;
    use crate::render::TemplateCache;
    use anyhow::Context;
    use std::str::FromStr;

    const DEFAULT_LOOKBACK_DAYS: u32 = 7;
    const DEFAULT_INGEST_CONCURRENCY: usize = 4;
    const DEFAULT_HISTORY_WINDOW_DAYS: u32 = 7;
    const DEFAULT_TEMPLATE_CACHE_CAPACITY: usize = 200;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub sentry_dsn: Option<String>,
        pub quote_provider_base_url: Option<String>,
        pub quote_provider_api_key: Option<String>,
        pub ingest_lookback_days: u32,
        pub ingest_concurrency: usize,
        pub history_window_days: u32,
        pub threshold_mode: ThresholdMode,
        pub template_dir: String,
        pub template_cache: TemplateCache,
        pub default_locale: String,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let threshold_mode = match std::env::var("TRIGGER_MODE").ok() {
                Some(s) => ThresholdMode::from_str(&s)?,
                None => ThresholdMode::default(),
            };

            let template_cache = match std::env::var("TEMPLATE_CACHE").ok() {
                Some(s) => TemplateCache::from_str(&s)?,
                None => TemplateCache::Bounded(DEFAULT_TEMPLATE_CACHE_CAPACITY),
            };

            Ok(Self {
                database_url: std::env::var("DATABASE_URL").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                quote_provider_base_url: std::env::var("QUOTE_PROVIDER_BASE_URL").ok(),
                quote_provider_api_key: std::env::var("QUOTE_PROVIDER_API_KEY").ok(),
                ingest_lookback_days: env_parse("INGEST_LOOKBACK_DAYS")
                    .unwrap_or(DEFAULT_LOOKBACK_DAYS),
                ingest_concurrency: env_parse("INGEST_CONCURRENCY")
                    .unwrap_or(DEFAULT_INGEST_CONCURRENCY),
                history_window_days: env_parse("HISTORY_WINDOW_DAYS")
                    .unwrap_or(DEFAULT_HISTORY_WINDOW_DAYS),
                threshold_mode,
                template_dir: std::env::var("TEMPLATE_DIR")
                    .ok()
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| "templates".to_string()),
                template_cache,
                default_locale: std::env::var("DEFAULT_LOCALE")
                    .ok()
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| "en".to_string()),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_quote_provider_base_url(&self) -> anyhow::Result<&str> {
            self.quote_provider_base_url
                .as_deref()
                .context("QUOTE_PROVIDER_BASE_URL is required")
        }
    }

    fn env_parse<T: FromStr>(key: &str) -> Option<T> {
        std::env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
    }
}
