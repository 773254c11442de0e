//! Repository bundle

use std::sync::Arc;

use crate::memory::{
    MemoryPaymentRepository, MemoryPlanRepository, MemorySubscriptionRepository,
    MemoryUsageRepository, MemoryWebhookEventRepository,
};
use crate::pg::{
    PgPaymentRepository, PgPlanRepository, PgSubscriptionRepository, PgUsageRepository,
    PgWebhookEventRepository,
};
use crate::pool::DbPool;
use crate::repo::{
    PaymentRepository, PlanRepository, SubscriptionRepository, UsageRepository,
    WebhookEventRepository,
};

/// Every repository the billing engine needs, behind trait objects
#[derive(Clone)]
pub struct Stores {
    pub plans: Arc<dyn PlanRepository>,
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub payments: Arc<dyn PaymentRepository>,
    pub usage: Arc<dyn UsageRepository>,
    pub webhook_events: Arc<dyn WebhookEventRepository>,
}

impl Stores {
    /// PostgreSQL-backed stores sharing one pool
    pub fn postgres(pool: DbPool) -> Self {
        Self {
            plans: Arc::new(PgPlanRepository::new(pool.clone())),
            subscriptions: Arc::new(PgSubscriptionRepository::new(pool.clone())),
            payments: Arc::new(PgPaymentRepository::new(pool.clone())),
            usage: Arc::new(PgUsageRepository::new(pool.clone())),
            webhook_events: Arc::new(PgWebhookEventRepository::new(pool)),
        }
    }

    /// Process-local stores; state is lost on restart
    pub fn in_memory() -> Self {
        Self {
            plans: Arc::new(MemoryPlanRepository::new()),
            subscriptions: Arc::new(MemorySubscriptionRepository::new()),
            payments: Arc::new(MemoryPaymentRepository::new()),
            usage: Arc::new(MemoryUsageRepository::new()),
            webhook_events: Arc::new(MemoryWebhookEventRepository::new()),
        }
    }
}
