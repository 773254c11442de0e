//! Billing service facade
//!
//! Wires the catalog, ledgers, platform adapters, ingestor and gate over one
//! set of injected stores. Boundary services talk to this type only.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};

use cadence_db::{Stores, SubscriptionFilter};
use cadence_types::{
    BillingCycle, EntitlementCheck, Feature, NewPlan, Payment, Plan, PlanId, Platform,
    Subscription, SubscriptionId, SubscriptionStatus, UsageDelta, UsagePeriod, UsageReport,
    UserId,
};

use crate::app_store::AppStoreAdapter;
use crate::card::CardAdapter;
use crate::catalog::{product_for, PlanCatalog};
use crate::clock::{Clock, SystemClock};
use crate::config::BillingConfig;
use crate::entitlement::EntitlementGate;
use crate::error::BillingError;
use crate::ingest::{IngestOutcome, WebhookIngestor, WebhookSecrets};
use crate::ledger::{Page, SubscriptionDraft, SubscriptionLedger};
use crate::play_store::PlayStoreAdapter;
use crate::provider::{CreateSubscriptionRequest, PlatformAdapters, Receipt, VerifyReceiptRequest};
use crate::transition::{BillingPeriod, Transition};
use crate::usage::UsageLedger;

/// Card subscription request
#[derive(Debug, Clone)]
pub struct CardSubscriptionRequest {
    pub plan_id: PlanId,
    pub billing_cycle: BillingCycle,
    /// Ask the processor for the configured trial
    pub trial: bool,
}

/// Result of opening a card subscription
#[derive(Debug, Clone, Serialize)]
pub struct CardCheckout {
    pub subscription: Subscription,
    /// Secret the client confirms the first payment with
    pub client_secret: Option<String>,
    /// Processor-native status at creation
    pub platform_status: String,
}

/// App Store receipt verification request
#[derive(Debug, Clone)]
pub struct AppleReceiptVerification {
    pub plan_id: PlanId,
    pub billing_cycle: BillingCycle,
    pub receipt_data: String,
    /// Product the client believes it bought
    pub product_id: Option<String>,
    pub transaction_id: Option<String>,
}

/// Play purchase verification request
#[derive(Debug, Clone)]
pub struct GooglePurchaseVerification {
    pub plan_id: PlanId,
    pub billing_cycle: BillingCycle,
    pub purchase_token: String,
    pub product_id: Option<String>,
    pub order_id: Option<String>,
}

/// Cancellation request
#[derive(Debug, Clone, Default)]
pub struct CancelRequest {
    pub reason: Option<String>,
    pub immediately: bool,
}

/// The entitlement-bearing subscription together with its plan
#[derive(Debug, Clone, Serialize)]
pub struct ActiveSubscription {
    pub subscription: Subscription,
    pub plan: Plan,
}

/// Subscription billing engine
#[derive(Clone)]
pub struct BillingService {
    stores: Stores,
    config: BillingConfig,
    catalog: PlanCatalog,
    ledger: SubscriptionLedger,
    usage: UsageLedger,
    gate: EntitlementGate,
    ingestor: WebhookIngestor,
    adapters: PlatformAdapters,
    clock: Arc<dyn Clock>,
}

impl BillingService {
    /// Create the engine with HTTP platform adapters and the wall clock
    pub fn new(stores: Stores, config: BillingConfig) -> Result<Self, BillingError> {
        let adapters = PlatformAdapters::new(
            Arc::new(CardAdapter::new(config.card.clone(), config.platform_timeout)?),
            Arc::new(AppStoreAdapter::new(
                config.app_store.clone(),
                config.platform_timeout,
            )?),
            Arc::new(PlayStoreAdapter::new(
                config.play_store.clone(),
                config.platform_timeout,
            )?),
        );

        for platform in [Platform::Card, Platform::Apple, Platform::Google] {
            if !adapters.get(platform).is_enabled() {
                warn!(platform = %platform, "Platform not configured; reporting it as disabled");
            }
        }

        Ok(Self::from_parts(stores, config, adapters, Arc::new(SystemClock)))
    }

    /// Create the engine from explicit collaborators
    pub fn from_parts(
        stores: Stores,
        config: BillingConfig,
        adapters: PlatformAdapters,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let catalog = PlanCatalog::new(stores.plans.clone());
        let ledger = SubscriptionLedger::new(stores.subscriptions.clone(), clock.clone());
        let usage = UsageLedger::new(stores.usage.clone(), clock.clone());
        let gate = EntitlementGate::new(ledger.clone(), usage.clone(), catalog.clone());

        let secrets = WebhookSecrets {
            card_signing_secret: config.card_webhook_secret.clone(),
            app_store_shared_secret: config.app_store.as_ref().map(|c| c.shared_secret.clone()),
            play_notification_token: config.play_notification_token.clone(),
            card_tolerance: config.webhook_tolerance,
        };
        let ingestor = WebhookIngestor::new(
            ledger.clone(),
            stores.payments.clone(),
            stores.webhook_events.clone(),
            adapters.clone(),
            secrets,
            clock.clone(),
        );

        Self {
            stores,
            config,
            catalog,
            ledger,
            usage,
            gate,
            ingestor,
            adapters,
            clock,
        }
    }

    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    pub fn ledger(&self) -> &SubscriptionLedger {
        &self.ledger
    }

    /// Whether a platform has credentials configured
    pub fn platform_enabled(&self, platform: Platform) -> bool {
        self.adapters.get(platform).is_enabled()
    }

    // Plans

    pub async fn create_plan(&self, plan: NewPlan) -> Result<Plan, BillingError> {
        self.catalog.create_plan(plan).await
    }

    pub async fn list_active_plans(&self) -> Result<Vec<Plan>, BillingError> {
        self.catalog.list_active_plans().await
    }

    pub async fn get_plan(&self, id: PlanId) -> Result<Plan, BillingError> {
        self.catalog.get_plan(id).await
    }

    pub async fn retire_plan(&self, id: PlanId) -> Result<Plan, BillingError> {
        self.catalog.retire_plan(id).await
    }

    // Subscription creation

    fn nominal_period(&self, cycle: BillingCycle) -> Result<BillingPeriod, BillingError> {
        let now = self.clock.now();
        BillingPeriod::new(now, now + cycle.nominal_period())
    }

    /// Open a card subscription.
    ///
    /// The PENDING row is written before the processor call and its id is the
    /// processor idempotency key. Only a definite rejection expires the row;
    /// when the processor's outcome is unknown (timeout, unreadable answer) the
    /// row stays PENDING for a later webhook to reconcile and the caller must
    /// not retry the creation.
    #[instrument(skip(self, request), fields(plan_id = %request.plan_id))]
    pub async fn create_card_subscription(
        &self,
        user_id: UserId,
        request: CardSubscriptionRequest,
    ) -> Result<CardCheckout, BillingError> {
        let plan = self.catalog.subscribable_plan(request.plan_id).await?;
        let adapter = self.adapters.enabled(Platform::Card)?;
        let product_id = product_for(&plan, Platform::Card, request.billing_cycle)?.to_string();

        let pending = self
            .ledger
            .create(SubscriptionDraft {
                user_id,
                plan_id: plan.id,
                status: SubscriptionStatus::Pending,
                billing_cycle: request.billing_cycle,
                platform: Platform::Card,
                platform_subscription_id: None,
                platform_customer_id: None,
                amount: plan.price_for(request.billing_cycle),
                currency: self.config.currency.clone(),
                period: self.nominal_period(request.billing_cycle)?,
            })
            .await?;

        let create = CreateSubscriptionRequest {
            subscription_ref: pending.id,
            user_id,
            product_id,
            trial_days: request.trial.then_some(self.config.trial_days),
        };

        let created = match adapter.create_subscription(&create).await {
            Ok(created) => created,
            Err(e) if !e.is_rejection() => {
                // The processor may have acted; a webhook carrying the reference settles it
                warn!(
                    subscription_id = %pending.id,
                    error = %e,
                    "Card processor outcome unknown; subscription left pending for reconciliation"
                );
                return Err(e);
            }
            Err(e) => {
                if let Err(expire_err) = self
                    .ledger
                    .apply(pending.id, &Transition::ActivationFailed)
                    .await
                {
                    warn!(
                        subscription_id = %pending.id,
                        error = %expire_err,
                        "Failed to expire rejected subscription"
                    );
                }
                return Err(e);
            }
        };

        let subscription = self
            .ledger
            .attach_platform_ids(
                pending.id,
                &created.platform_subscription_id,
                created.customer_id.as_deref(),
            )
            .await?;

        metrics::counter!("billing_subscriptions_created_total", "platform" => "CARD").increment(1);
        Ok(CardCheckout {
            subscription,
            client_secret: created.client_secret,
            platform_status: created.native_status,
        })
    }

    /// Verify an App Store receipt and open an ACTIVE subscription
    #[instrument(skip(self, request), fields(plan_id = %request.plan_id))]
    pub async fn verify_apple_receipt(
        &self,
        user_id: UserId,
        request: AppleReceiptVerification,
    ) -> Result<Subscription, BillingError> {
        if let Some(transaction_id) = &request.transaction_id {
            info!(transaction_id = %transaction_id, "Verifying App Store purchase");
        }
        self.verify_store_purchase(
            user_id,
            Platform::Apple,
            request.plan_id,
            request.billing_cycle,
            request.product_id,
            Receipt::AppStore {
                receipt_data: request.receipt_data,
            },
        )
        .await
    }

    /// Verify a Play purchase token and open an ACTIVE subscription
    #[instrument(skip(self, request), fields(plan_id = %request.plan_id))]
    pub async fn verify_google_purchase(
        &self,
        user_id: UserId,
        request: GooglePurchaseVerification,
    ) -> Result<Subscription, BillingError> {
        if let Some(order_id) = &request.order_id {
            info!(order_id = %order_id, "Verifying Play Store purchase");
        }
        self.verify_store_purchase(
            user_id,
            Platform::Google,
            request.plan_id,
            request.billing_cycle,
            request.product_id,
            Receipt::PlayStore {
                purchase_token: request.purchase_token,
            },
        )
        .await
    }

    async fn verify_store_purchase(
        &self,
        user_id: UserId,
        platform: Platform,
        plan_id: PlanId,
        cycle: BillingCycle,
        claimed_product: Option<String>,
        receipt: Receipt,
    ) -> Result<Subscription, BillingError> {
        let plan = self.catalog.subscribable_plan(plan_id).await?;
        let adapter = self.adapters.enabled(platform)?;
        let product_id = product_for(&plan, platform, cycle)?.to_string();

        if let Some(claimed) = claimed_product {
            if claimed != product_id {
                return Err(BillingError::Validation(format!(
                    "product {claimed} does not belong to this plan and billing cycle"
                )));
            }
        }

        let verified = adapter
            .verify_receipt(&VerifyReceiptRequest {
                receipt,
                product_id,
            })
            .await?;

        if verified.expires_at.is_some_and(|at| at <= self.clock.now()) {
            return Err(BillingError::VerificationFailed(
                "subscription has expired".to_string(),
            ));
        }

        if let Some(existing) = self
            .ledger
            .find_by_platform_id(platform, &verified.platform_subscription_id)
            .await?
        {
            if existing.user_id != user_id {
                warn!(
                    security_event = true,
                    subscription_id = %existing.id,
                    "Store purchase already linked to another user"
                );
                return Err(BillingError::StateConflict(
                    "purchase is linked to another account".to_string(),
                ));
            }
            info!(subscription_id = %existing.id, "Store purchase already verified");
            return Ok(existing);
        }

        let subscription = self
            .ledger
            .create(SubscriptionDraft {
                user_id,
                plan_id: plan.id,
                status: SubscriptionStatus::Active,
                billing_cycle: cycle,
                platform,
                platform_subscription_id: Some(verified.platform_subscription_id),
                platform_customer_id: None,
                amount: plan.price_for(cycle),
                currency: self.config.currency.clone(),
                period: self.nominal_period(cycle)?,
            })
            .await?;

        metrics::counter!("billing_subscriptions_created_total", "platform" => platform.as_str())
            .increment(1);

        for superseded in self.ledger.enforce_single_entitlement(user_id).await? {
            self.adapters.cancel_best_effort(&superseded, false).await;
        }
        Ok(subscription)
    }

    // Subscription queries

    pub async fn list_user_subscriptions(
        &self,
        user_id: UserId,
        filter: &SubscriptionFilter,
    ) -> Result<Page<Subscription>, BillingError> {
        self.ledger.list_user_subscriptions(user_id, filter).await
    }

    /// The entitlement-bearing subscription with its plan
    pub async fn active_subscription(
        &self,
        user_id: UserId,
    ) -> Result<Option<ActiveSubscription>, BillingError> {
        let Some(subscription) = self.ledger.active_subscription(user_id).await? else {
            return Ok(None);
        };
        let plan = self.catalog.get_plan(subscription.plan_id).await?;
        Ok(Some(ActiveSubscription { subscription, plan }))
    }

    pub async fn get_subscription(
        &self,
        user_id: UserId,
        id: SubscriptionId,
    ) -> Result<Subscription, BillingError> {
        self.ledger.get_for_user(user_id, id).await
    }

    /// Payment audit trail of one of the user's subscriptions, oldest first
    pub async fn subscription_payments(
        &self,
        user_id: UserId,
        id: SubscriptionId,
    ) -> Result<Vec<Payment>, BillingError> {
        let subscription = self.ledger.get_for_user(user_id, id).await?;
        self.stores
            .payments
            .list_by_subscription(subscription.id.0)
            .await?
            .into_iter()
            .map(|row| Payment::try_from(row).map_err(BillingError::from))
            .collect()
    }

    /// Cancel one of the user's subscriptions.
    ///
    /// Local state is authoritative; the platform is told on a best-effort
    /// basis only when the local state changed.
    #[instrument(skip(self, request))]
    pub async fn cancel_subscription(
        &self,
        user_id: UserId,
        id: SubscriptionId,
        request: CancelRequest,
    ) -> Result<Subscription, BillingError> {
        self.ledger.get_for_user(user_id, id).await?;

        let immediately = request.immediately;
        let update = self
            .ledger
            .apply(
                id,
                &Transition::Cancel {
                    immediately,
                    reason: request.reason,
                },
            )
            .await?;

        if update.changed {
            self.adapters
                .cancel_best_effort(&update.subscription, immediately)
                .await;
            let mode = if immediately { "immediate" } else { "deferred" };
            metrics::counter!("billing_subscriptions_canceled_total", "mode" => mode).increment(1);
        }
        Ok(update.subscription)
    }

    /// Finalize deferred cancellations that have come due
    pub async fn sweep_due_cancellations(&self) -> Result<Vec<Subscription>, BillingError> {
        self.ledger.sweep_due_cancellations().await
    }

    // Usage and entitlements

    pub async fn get_usage(&self, user_id: UserId) -> Result<UsagePeriod, BillingError> {
        self.usage.get_usage(user_id).await
    }

    pub async fn increment_usage(
        &self,
        user_id: UserId,
        delta: &UsageDelta,
    ) -> Result<UsagePeriod, BillingError> {
        self.usage.increment_usage(user_id, delta).await
    }

    pub async fn usage_report(&self, user_id: UserId) -> Result<UsageReport, BillingError> {
        self.gate.usage_report(user_id).await
    }

    pub async fn check_limits(
        &self,
        user_id: UserId,
        feature: Feature,
    ) -> Result<EntitlementCheck, BillingError> {
        self.gate.check(user_id, feature).await
    }

    // Notifications

    pub async fn ingest_card_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<IngestOutcome, BillingError> {
        self.ingestor.ingest_card(payload, signature).await
    }

    pub async fn ingest_app_store_notification(
        &self,
        payload: &[u8],
    ) -> Result<IngestOutcome, BillingError> {
        self.ingestor.ingest_app_store(payload).await
    }

    pub async fn ingest_play_notification(
        &self,
        payload: &[u8],
        token: Option<&str>,
    ) -> Result<IngestOutcome, BillingError> {
        self.ingestor.ingest_play_store(payload, token).await
    }
}
