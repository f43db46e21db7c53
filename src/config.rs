use std::time::Duration;

use serde::Deserialize;

/// Typed application configuration, layered from a base file, an
/// environment-specific file, and `APP_`-prefixed environment variables
/// (env wins), following the teacher's `config`+`dotenvy` startup sequence.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub products: Vec<String>,

    pub queue_capacity: usize,
    pub transaction_retries: u32,
    pub offer_timeout_secs: u64,
    pub ticker_interval_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub rate_limit_per_minute: u32,
    pub resync_lookback_secs: i64,
    pub offer_sweep_interval_ms: u64,
    pub offer_price_multiplier: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".into(),
            database_url: None,
            jwt_secret: "dev-secret-change-me".into(),
            products: vec![
                "GUACA".into(),
                "FOSFO".into(),
                "PITA".into(),
                "SEBO".into(),
                "PALTA-OIL".into(),
            ],
            queue_capacity: 1000,
            transaction_retries: 3,
            offer_timeout_secs: 30,
            ticker_interval_secs: 5,
            heartbeat_interval_secs: 30,
            rate_limit_per_minute: 100,
            resync_lookback_secs: 300,
            offer_sweep_interval_ms: 100,
            offer_price_multiplier: "1.10".into(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from `config/default.toml` (if present),
    /// `config/{RUN_MODE}.toml` (if present), and `APP_`-prefixed
    /// environment variables, in that order of increasing precedence.
    /// `.env` is loaded first via `dotenvy` so local overrides reach the
    /// environment layer.
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let defaults = AppConfig::default();
        let loaded: AppConfig = settings.try_deserialize().unwrap_or(defaults);
        Ok(loaded)
    }

    pub fn offer_timeout(&self) -> Duration {
        Duration::from_secs(self.offer_timeout_secs)
    }

    pub fn ticker_interval(&self) -> Duration {
        Duration::from_secs(self.ticker_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn offer_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.offer_sweep_interval_ms)
    }

    pub fn offer_price_multiplier(&self) -> rust_decimal::Decimal {
        self.offer_price_multiplier
            .parse()
            .unwrap_or(rust_decimal::Decimal::new(110, 2))
    }

    pub fn is_known_product(&self, product: &str) -> bool {
        self.products.iter().any(|p| p == product)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_spec_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.queue_capacity, 1000);
        assert_eq!(cfg.transaction_retries, 3);
        assert_eq!(cfg.offer_timeout_secs, 30);
        assert_eq!(cfg.rate_limit_per_minute, 100);
        assert!(cfg.is_known_product("GUACA"));
        assert!(!cfg.is_known_product("NOPE"));
    }
}
