//! Common test utilities for cadence-billing-core integration tests

pub mod fixtures;
pub mod flaky_store;
pub mod mock_platform;

#[allow(unused_imports)]
pub use fixtures::{
    card_invoice_event, card_subscription_event, pro_plan, sign_card_payload, start_time,
    Harness, APPLE_SECRET, CARD_WEBHOOK_SECRET, PLAY_TOKEN,
};
#[allow(unused_imports)]
pub use mock_platform::{CreateBehavior, MockPlatform};
#[allow(unused_imports)]
pub use flaky_store::FlakySubscriptions;
