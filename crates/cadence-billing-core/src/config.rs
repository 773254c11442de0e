//! Billing configuration

use std::time::Duration;

const DEFAULT_CARD_API_BASE: &str = "https://api.stripe.com/v1";
const DEFAULT_APPLE_VERIFY_URL: &str = "https://buy.itunes.apple.com/verifyReceipt";
const DEFAULT_APPLE_SANDBOX_VERIFY_URL: &str = "https://sandbox.itunes.apple.com/verifyReceipt";
const DEFAULT_GOOGLE_API_BASE: &str = "https://androidpublisher.googleapis.com";

/// Card processor credentials
#[derive(Debug, Clone)]
pub struct CardConfig {
    /// API secret key
    pub secret_key: String,
    /// API base URL, without trailing slash
    pub api_base: String,
}

impl CardConfig {
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            api_base: DEFAULT_CARD_API_BASE.to_string(),
        }
    }

    /// Point the adapter at a different API host
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }
}

/// App Store receipt verification settings
#[derive(Debug, Clone)]
pub struct AppStoreConfig {
    /// Shared secret sent with every verification request and expected in
    /// server notifications
    pub shared_secret: String,
    pub verify_url: String,
    pub sandbox_verify_url: String,
}

impl AppStoreConfig {
    pub fn new(shared_secret: impl Into<String>) -> Self {
        Self {
            shared_secret: shared_secret.into(),
            verify_url: DEFAULT_APPLE_VERIFY_URL.to_string(),
            sandbox_verify_url: DEFAULT_APPLE_SANDBOX_VERIFY_URL.to_string(),
        }
    }

    pub fn with_urls(
        mut self,
        verify_url: impl Into<String>,
        sandbox_verify_url: impl Into<String>,
    ) -> Self {
        self.verify_url = verify_url.into();
        self.sandbox_verify_url = sandbox_verify_url.into();
        self
    }
}

/// Play Developer API settings
#[derive(Debug, Clone)]
pub struct PlayStoreConfig {
    pub package_name: String,
    /// OAuth bearer token for the Play Developer API
    pub access_token: String,
    pub api_base: String,
}

impl PlayStoreConfig {
    pub fn new(package_name: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
            access_token: access_token.into(),
            api_base: DEFAULT_GOOGLE_API_BASE.to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }
}

/// Billing engine configuration
///
/// A platform left unconfigured is reported as disabled by its adapter
/// instead of failing at startup.
#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub card: Option<CardConfig>,
    /// Signing secret for card webhooks
    pub card_webhook_secret: Option<String>,
    pub app_store: Option<AppStoreConfig>,
    pub play_store: Option<PlayStoreConfig>,
    /// Token carried by Play real-time developer notification pushes
    pub play_notification_token: Option<String>,
    /// Bound on every platform call
    pub platform_timeout: Duration,
    /// Accepted clock skew on signed card webhooks
    pub webhook_tolerance: Duration,
    /// Trial length granted when a card trial is requested
    pub trial_days: u32,
    /// Currency captured on new subscriptions
    pub currency: String,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            card: None,
            card_webhook_secret: None,
            app_store: None,
            play_store: None,
            play_notification_token: None,
            platform_timeout: Duration::from_secs(10),
            webhook_tolerance: Duration::from_secs(300),
            trial_days: 7,
            currency: "USD".to_string(),
        }
    }
}

impl BillingConfig {
    /// Create a config with every platform disabled
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_card(mut self, card: CardConfig) -> Self {
        self.card = Some(card);
        self
    }

    pub fn with_card_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.card_webhook_secret = Some(secret.into());
        self
    }

    pub fn with_app_store(mut self, app_store: AppStoreConfig) -> Self {
        self.app_store = Some(app_store);
        self
    }

    pub fn with_play_store(mut self, play_store: PlayStoreConfig) -> Self {
        self.play_store = Some(play_store);
        self
    }

    pub fn with_play_notification_token(mut self, token: impl Into<String>) -> Self {
        self.play_notification_token = Some(token.into());
        self
    }

    pub fn with_platform_timeout(mut self, timeout: Duration) -> Self {
        self.platform_timeout = timeout;
        self
    }

    pub fn with_webhook_tolerance(mut self, tolerance: Duration) -> Self {
        self.webhook_tolerance = tolerance;
        self
    }

    pub fn with_trial_days(mut self, days: u32) -> Self {
        self.trial_days = days;
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into().to_uppercase();
        self
    }
}
