//! PostgreSQL repository implementations

mod payment;
mod plan;
mod subscription;
mod usage;
mod webhook_event;

pub use payment::PgPaymentRepository;
pub use plan::PgPlanRepository;
pub use subscription::PgSubscriptionRepository;
pub use usage::PgUsageRepository;
pub use webhook_event::PgWebhookEventRepository;
