pub mod domain;
pub mod performance;
pub mod pricing;
pub mod ranking;
pub mod storage;
pub mod time;

#[cfg(test)]
pub(crate) mod test_support;

pub mod config {
    use anyhow::Context;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub sentry_dsn: Option<String>,
        pub polygon_api_key: Option<String>,
        pub market_data_base_url: Option<String>,
        pub admin_api_key: Option<String>,
        pub allowed_origins: Vec<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                database_url: std::env::var("DATABASE_URL").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                polygon_api_key: std::env::var("POLYGON_API_KEY").ok(),
                market_data_base_url: std::env::var("MARKET_DATA_BASE_URL").ok(),
                admin_api_key: std::env::var("ADMIN_API_KEY")
                    .ok()
                    .filter(|s| !s.trim().is_empty()),
                allowed_origins: parse_origins(std::env::var("ALLOWED_ORIGINS").ok()),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_polygon_api_key(&self) -> anyhow::Result<&str> {
            self.polygon_api_key
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .context("POLYGON_API_KEY is required")
        }
    }

    fn parse_origins(v: Option<String>) -> Vec<String> {
        let raw = v.unwrap_or_else(|| "http://localhost:3000".to_string());
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn origins_are_split_and_trimmed() {
            let origins = parse_origins(Some("https://pickrank.io, http://localhost:3000,".into()));
            assert_eq!(origins, vec!["https://pickrank.io", "http://localhost:3000"]);
            assert_eq!(parse_origins(None), vec!["http://localhost:3000"]);
        }
    }
}
