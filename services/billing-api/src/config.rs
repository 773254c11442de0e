//! Configuration for the Billing API service.

use std::time::Duration;

use cadence_billing_core::{AppStoreConfig, BillingConfig, CardConfig, PlayStoreConfig};

/// Billing API configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub http_port: u16,
    /// Database URL; the in-memory store is used when absent
    pub database_url: Option<String>,
    /// Billing core configuration
    pub billing: BillingConfig,
    /// Request timeout
    pub request_timeout: Duration,
    /// Metrics enabled
    pub metrics_enabled: bool,
    /// Key required on plan administration routes; those routes are closed when absent
    pub admin_api_key: Option<String>,
    /// Interval of the due-cancellation sweep
    pub sweep_interval: Duration,
    /// Emit JSON log lines
    pub json_logs: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = optional("DATABASE_URL");

        let http_port = parse_or("HTTP_PORT", 8081)?;
        let request_timeout_secs: u64 = parse_or("REQUEST_TIMEOUT_SECS", 30)?;
        let platform_timeout_secs: u64 = parse_or("PLATFORM_TIMEOUT_SECS", 10)?;
        let webhook_tolerance_secs: u64 = parse_or("WEBHOOK_TOLERANCE_SECS", 300)?;
        let trial_days: u32 = parse_or("CARD_TRIAL_DAYS", 7)?;
        let sweep_interval_secs: u64 = parse_or("SWEEP_INTERVAL_SECS", 300)?;

        if sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid("SWEEP_INTERVAL_SECS"));
        }

        let metrics_enabled = std::env::var("METRICS_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse()
            .unwrap_or(true);

        let json_logs = std::env::var("LOG_FORMAT")
            .map(|format| format.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let mut billing = BillingConfig::new()
            .with_platform_timeout(Duration::from_secs(platform_timeout_secs))
            .with_webhook_tolerance(Duration::from_secs(webhook_tolerance_secs))
            .with_trial_days(trial_days);

        if let Some(currency) = optional("BILLING_CURRENCY") {
            if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(ConfigError::Invalid("BILLING_CURRENCY"));
            }
            billing = billing.with_currency(currency);
        }

        // Card processor
        if let Some(secret_key) = optional("CARD_SECRET_KEY") {
            let mut card = CardConfig::new(secret_key);
            if let Some(api_base) = optional("CARD_API_BASE") {
                card = card.with_api_base(api_base);
            }
            billing = billing.with_card(card);
        }
        if let Some(webhook_secret) = optional("CARD_WEBHOOK_SECRET") {
            billing = billing.with_card_webhook_secret(webhook_secret);
        }

        // App Store
        if let Some(shared_secret) = optional("APPLE_SHARED_SECRET") {
            let mut app_store = AppStoreConfig::new(shared_secret);
            if let (Some(verify_url), Some(sandbox_url)) = (
                optional("APPLE_VERIFY_URL"),
                optional("APPLE_SANDBOX_VERIFY_URL"),
            ) {
                app_store = app_store.with_urls(verify_url, sandbox_url);
            }
            billing = billing.with_app_store(app_store);
        }

        // Play Store
        match (optional("GOOGLE_PACKAGE_NAME"), optional("GOOGLE_ACCESS_TOKEN")) {
            (Some(package_name), Some(access_token)) => {
                let mut play_store = PlayStoreConfig::new(package_name, access_token);
                if let Some(api_base) = optional("GOOGLE_API_BASE") {
                    play_store = play_store.with_api_base(api_base);
                }
                billing = billing.with_play_store(play_store);
            }
            (Some(_), None) => return Err(ConfigError::Missing("GOOGLE_ACCESS_TOKEN")),
            (None, Some(_)) => return Err(ConfigError::Missing("GOOGLE_PACKAGE_NAME")),
            (None, None) => {}
        }
        if let Some(token) = optional("GOOGLE_NOTIFICATION_TOKEN") {
            billing = billing.with_play_notification_token(token);
        }

        Ok(Self {
            http_port,
            database_url,
            billing,
            request_timeout: Duration::from_secs(request_timeout_secs),
            metrics_enabled,
            admin_api_key: optional("ADMIN_API_KEY"),
            sweep_interval: Duration::from_secs(sweep_interval_secs),
            json_logs,
        })
    }
}

/// Non-empty value of an environment variable
fn optional(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match optional(name) {
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid(name)),
        None => Ok(default),
    }
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}
