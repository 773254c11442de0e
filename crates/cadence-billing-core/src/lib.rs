//! Cadence Billing Core - Subscription lifecycle and platform reconciliation
//!
//! Keeps one canonical view of every user's subscriptions while payment
//! events arrive independently from a card processor, the App Store and the
//! Play Store. Includes the plan catalog, the subscription ledger and its
//! transition rules, platform adapters, webhook ingestion, usage counters and
//! the entitlement gate.
//!
//! # Example
//!
//! ```rust,ignore
//! use cadence_billing_core::{BillingConfig, BillingService, CardConfig, CardSubscriptionRequest};
//! use cadence_db::Stores;
//!
//! let config = BillingConfig::new()
//!     .with_card(CardConfig::new("sk_test_..."))
//!     .with_card_webhook_secret("whsec_...");
//!
//! let billing = BillingService::new(Stores::in_memory(), config)?;
//!
//! // Open a card subscription; it stays PENDING until the processor confirms
//! let checkout = billing
//!     .create_card_subscription(user_id, CardSubscriptionRequest {
//!         plan_id,
//!         billing_cycle: BillingCycle::Monthly,
//!         trial: false,
//!     })
//!     .await?;
//!
//! // Gate a feature
//! let check = billing.check_limits(user_id, Feature::Analyses).await?;
//! ```

pub mod app_store;
pub mod card;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod entitlement;
pub mod error;
pub mod ingest;
pub mod ledger;
pub mod play_store;
pub mod provider;
pub mod service;
pub mod transition;
pub mod usage;
pub mod webhook;

pub use app_store::AppStoreAdapter;
pub use card::CardAdapter;
pub use catalog::PlanCatalog;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AppStoreConfig, BillingConfig, CardConfig, PlayStoreConfig};
pub use entitlement::EntitlementGate;
pub use error::BillingError;
pub use ingest::{IngestOutcome, WebhookIngestor, WebhookSecrets};
pub use ledger::{Page, Pagination, SubscriptionLedger};
pub use play_store::PlayStoreAdapter;
pub use provider::{PlatformAdapter, PlatformAdapters};
pub use service::{
    ActiveSubscription, AppleReceiptVerification, BillingService, CancelRequest, CardCheckout,
    CardSubscriptionRequest, GooglePurchaseVerification,
};
pub use transition::{BillingPeriod, Transition};
pub use usage::UsageLedger;
