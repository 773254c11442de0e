//! Webhook ingestion
//!
//! Verifies a platform notification, claims its `(platform, event id)`
//! idempotency key and applies at most one transition plus one payment row.
//! A claim is completed with its outcome, or released when processing fails
//! so the platform's redelivery can retry it.

use std::sync::Arc;

use chrono::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use cadence_db::{CreatePayment, PaymentRepository, WebhookEventRepository};
use cadence_types::{PaymentStatus, Platform, Subscription};

use crate::clock::Clock;
use crate::error::BillingError;
use crate::ledger::SubscriptionLedger;
use crate::provider::PlatformAdapters;
use crate::webhook::{
    decode_app_store_notification, decode_card_event, decode_play_notification,
    verify_app_store_notification, verify_card_signature, verify_shared_token, PaymentRecord,
    PlatformEvent,
};

/// How long an unfinished claim blocks redelivery
const CLAIM_TTL_MINUTES: i64 = 5;

/// What ingestion did with a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The subscription changed
    Applied,
    /// Valid event that changed nothing (stale, repeated or late)
    Unchanged,
    /// Event id already processed
    Duplicate,
    /// No tracked subscription matches the event
    Untracked,
    /// Unrecognized or malformed event
    Ignored,
    /// Transition not accepted from the subscription's status
    Conflict,
}

impl IngestOutcome {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Unchanged => "unchanged",
            Self::Duplicate => "duplicate",
            Self::Untracked => "untracked",
            Self::Ignored => "ignored",
            Self::Conflict => "conflict",
        }
    }
}

/// Secrets used to authenticate notifications
#[derive(Debug, Clone, Default)]
pub struct WebhookSecrets {
    pub card_signing_secret: Option<String>,
    pub app_store_shared_secret: Option<String>,
    pub play_notification_token: Option<String>,
    pub card_tolerance: std::time::Duration,
}

/// Applies platform notifications to the subscription ledger exactly once
#[derive(Clone)]
pub struct WebhookIngestor {
    ledger: SubscriptionLedger,
    payments: Arc<dyn PaymentRepository>,
    events: Arc<dyn WebhookEventRepository>,
    adapters: PlatformAdapters,
    secrets: WebhookSecrets,
    clock: Arc<dyn Clock>,
}

impl WebhookIngestor {
    pub fn new(
        ledger: SubscriptionLedger,
        payments: Arc<dyn PaymentRepository>,
        events: Arc<dyn WebhookEventRepository>,
        adapters: PlatformAdapters,
        secrets: WebhookSecrets,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            payments,
            events,
            adapters,
            secrets,
            clock,
        }
    }

    /// Ingest a signed card processor event
    #[instrument(skip_all)]
    pub async fn ingest_card(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<IngestOutcome, BillingError> {
        let secret = self.secrets.card_signing_secret.as_deref().ok_or_else(|| {
            warn!(security_event = true, "Card webhook received without a signing secret");
            BillingError::InvalidSignature("card webhook secret not configured".to_string())
        })?;
        let signature = signature.ok_or_else(|| {
            warn!(security_event = true, "Card webhook without signature header");
            BillingError::InvalidSignature("missing signature header".to_string())
        })?;
        verify_card_signature(
            secret,
            payload,
            signature,
            self.clock.now(),
            self.secrets.card_tolerance,
        )?;

        self.ingest_decoded(Platform::Card, decode_card_event(payload))
            .await
    }

    /// Ingest an App Store server notification
    #[instrument(skip_all)]
    pub async fn ingest_app_store(&self, payload: &[u8]) -> Result<IngestOutcome, BillingError> {
        verify_app_store_notification(self.secrets.app_store_shared_secret.as_deref(), payload)?;
        let decoded = decode_app_store_notification(payload, self.clock.now());
        self.ingest_decoded(Platform::Apple, decoded).await
    }

    /// Ingest a Play real-time developer notification push
    #[instrument(skip_all)]
    pub async fn ingest_play_store(
        &self,
        payload: &[u8],
        token: Option<&str>,
    ) -> Result<IngestOutcome, BillingError> {
        verify_shared_token(self.secrets.play_notification_token.as_deref(), token)?;
        let decoded = decode_play_notification(payload, self.clock.now());
        self.ingest_decoded(Platform::Google, decoded).await
    }

    async fn ingest_decoded(
        &self,
        platform: Platform,
        decoded: Result<PlatformEvent, BillingError>,
    ) -> Result<IngestOutcome, BillingError> {
        match decoded {
            Ok(event) => self.ingest(event).await,
            Err(BillingError::Validation(reason)) => {
                warn!(platform = %platform, reason = %reason, "Discarding malformed notification");
                record(platform, IngestOutcome::Ignored);
                Ok(IngestOutcome::Ignored)
            }
            Err(e) => Err(e),
        }
    }

    /// Apply an authenticated, decoded event exactly once
    #[instrument(
        skip(self, event),
        fields(
            platform = %event.platform,
            event_id = %event.event_id,
            event_type = %event.event_type
        )
    )]
    pub async fn ingest(&self, event: PlatformEvent) -> Result<IngestOutcome, BillingError> {
        let platform = event.platform.as_str();
        let stale_before = self.clock.now() - Duration::minutes(CLAIM_TTL_MINUTES);

        let claimed = self
            .events
            .claim(platform, &event.event_id, &event.event_type, stale_before)
            .await?;
        if !claimed {
            info!("Duplicate notification; already processed");
            record(event.platform, IngestOutcome::Duplicate);
            return Ok(IngestOutcome::Duplicate);
        }

        match self.process(&event).await {
            Ok(outcome) => {
                self.events
                    .complete(platform, &event.event_id, outcome.as_str())
                    .await?;
                record(event.platform, outcome);
                Ok(outcome)
            }
            Err(e) => {
                warn!(error = %e, "Notification processing failed; releasing claim");
                if let Err(release_err) = self.events.release(platform, &event.event_id).await {
                    warn!(error = %release_err, "Failed to release webhook claim");
                }
                Err(e)
            }
        }
    }

    async fn process(&self, event: &PlatformEvent) -> Result<IngestOutcome, BillingError> {
        if event.transition.is_none() && event.payment.is_none() {
            info!("Notification carries nothing to apply");
            return Ok(IngestOutcome::Ignored);
        }
        let Some(subscription) = self.resolve(event).await? else {
            info!("Notification for untracked subscription");
            return Ok(IngestOutcome::Untracked);
        };

        let mut outcome = IngestOutcome::Unchanged;
        let mut current = subscription;

        if let Some(transition) = &event.transition {
            if current.status.is_terminal() {
                info!(
                    subscription_id = %current.id,
                    status = %current.status,
                    "Late notification for ended subscription"
                );
            } else {
                match self.ledger.apply(current.id, transition).await {
                    Ok(update) => {
                        if update.changed {
                            outcome = IngestOutcome::Applied;
                        }
                        current = update.subscription;
                    }
                    Err(BillingError::StateConflict(reason)) => {
                        warn!(
                            subscription_id = %current.id,
                            reason = %reason,
                            "Discarded conflicting transition"
                        );
                        outcome = IngestOutcome::Conflict;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        if let Some(payment) = &event.payment {
            self.record_payment(&current, event.platform, payment).await?;
        }

        // Not gated on this delivery changing the row: a redelivery after a
        // failed supersede must retry it.
        if outcome != IngestOutcome::Conflict && current.status.confers_entitlement() {
            for superseded in self.ledger.enforce_single_entitlement(current.user_id).await? {
                self.adapters.cancel_best_effort(&superseded, false).await;
            }
        }

        Ok(outcome)
    }

    /// Find the tracked subscription, linking a platform id echoed back for a
    /// subscription whose creation call never returned
    async fn resolve(&self, event: &PlatformEvent) -> Result<Option<Subscription>, BillingError> {
        let Some(target) = &event.target else {
            return Ok(None);
        };

        if let Some(found) = self
            .ledger
            .find_by_platform_id(event.platform, &target.platform_subscription_id)
            .await?
        {
            return Ok(Some(found));
        }

        let Some(reference) = target.subscription_ref else {
            return Ok(None);
        };
        let subscription = match self.ledger.get(reference).await {
            Ok(subscription) => subscription,
            Err(BillingError::SubscriptionNotFound) => return Ok(None),
            Err(e) => return Err(e),
        };
        if subscription.platform != event.platform {
            warn!(
                subscription_id = %reference,
                "Notification reference points at another platform"
            );
            return Ok(None);
        }

        info!(
            subscription_id = %reference,
            platform_subscription_id = %target.platform_subscription_id,
            "Linking platform subscription from notification"
        );
        let linked = self
            .ledger
            .attach_platform_ids(
                reference,
                &target.platform_subscription_id,
                target.customer_id.as_deref(),
            )
            .await?;
        Ok(Some(linked))
    }

    async fn record_payment(
        &self,
        subscription: &Subscription,
        platform: Platform,
        payment: &PaymentRecord,
    ) -> Result<(), BillingError> {
        let inserted = self
            .payments
            .insert_if_absent(CreatePayment {
                id: Uuid::new_v4(),
                subscription_id: subscription.id.0,
                amount: payment.amount.unwrap_or(subscription.amount),
                currency: payment
                    .currency
                    .clone()
                    .unwrap_or_else(|| subscription.currency.clone()),
                status: payment.status.as_str().to_string(),
                platform: platform.as_str().to_string(),
                platform_payment_id: payment.platform_payment_id.clone(),
                payment_method: payment.payment_method.clone(),
                paid_at: (payment.status == PaymentStatus::Succeeded).then_some(payment.at),
                failed_at: (payment.status == PaymentStatus::Failed).then_some(payment.at),
            })
            .await?;

        if inserted {
            info!(
                subscription_id = %subscription.id,
                platform_payment_id = %payment.platform_payment_id,
                status = %payment.status,
                "Recorded payment"
            );
        }
        Ok(())
    }
}

fn record(platform: Platform, outcome: IngestOutcome) {
    metrics::counter!(
        "billing_webhooks_processed_total",
        "platform" => platform.as_str(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}
