pub mod domain;
pub mod engine;
pub mod error;
pub mod partners;
pub mod rules;
pub mod storage;

pub mod config {
    use crate::engine::evaluator::DEFAULT_RECENT_ANALYSES_LIMIT;
    use crate::engine::DEFAULT_RECOMMENDATION_TTL_DAYS;
    use anyhow::Context;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub sentry_dsn: Option<String>,
        pub partner_directory_url: Option<String>,
        pub partner_directory_api_key: Option<String>,
        pub recommendation_ttl_days: i64,
        pub recent_analyses_limit: usize,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let recommendation_ttl_days = std::env::var("RECOMMENDATION_TTL_DAYS")
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .unwrap_or(DEFAULT_RECOMMENDATION_TTL_DAYS);
            anyhow::ensure!(
                recommendation_ttl_days >= 1,
                "RECOMMENDATION_TTL_DAYS must be >= 1 (got {recommendation_ttl_days})"
            );

            let recent_analyses_limit = std::env::var("RECENT_ANALYSES_LIMIT")
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .unwrap_or(DEFAULT_RECENT_ANALYSES_LIMIT);
            anyhow::ensure!(
                recent_analyses_limit >= 1,
                "RECENT_ANALYSES_LIMIT must be >= 1"
            );

            Ok(Self {
                database_url: std::env::var("DATABASE_URL").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                partner_directory_url: std::env::var("PARTNER_DIRECTORY_URL")
                    .ok()
                    .filter(|s| !s.trim().is_empty()),
                partner_directory_api_key: std::env::var("PARTNER_DIRECTORY_API_KEY").ok(),
                recommendation_ttl_days,
                recent_analyses_limit,
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_partner_directory_url(&self) -> anyhow::Result<&str> {
            self.partner_directory_url
                .as_deref()
                .context("PARTNER_DIRECTORY_URL is required")
        }

        pub fn recommendation_ttl(&self) -> chrono::Duration {
            chrono::Duration::days(self.recommendation_ttl_days)
        }
    }

    impl Default for Settings {
        fn default() -> Self {
            Self {
                database_url: None,
                sentry_dsn: None,
                partner_directory_url: None,
                partner_directory_api_key: None,
                recommendation_ttl_days: DEFAULT_RECOMMENDATION_TTL_DAYS,
                recent_analyses_limit: DEFAULT_RECENT_ANALYSES_LIMIT,
            }
        }
    }
}
