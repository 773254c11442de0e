//! Platform notification decoding
//!
//! Each platform delivers its own envelope. Decoders verify nothing about
//! the subscription itself; they only turn a payload into a [`PlatformEvent`]
//! carrying at most one canonical [`Transition`] and one payment record.
//! Unrecognized event types decode to an event without a transition.

use std::collections::HashMap;
use std::time::Duration;

use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use cadence_types::{PaymentStatus, Platform, SubscriptionId};

use crate::app_store::AppleTransaction;
use crate::card::{map_card_status, period_from, timestamp, CardSubscriptionObject};
use crate::error::BillingError;
use crate::transition::{BillingPeriod, PeriodUpdate, StatusSnapshot, Transition};

/// Subscription a notification refers to
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionTarget {
    pub platform_subscription_id: String,
    /// Local id echoed back by the platform, when the creation call tagged it
    pub subscription_ref: Option<SubscriptionId>,
    pub customer_id: Option<String>,
}

/// Payment outcome carried by a notification
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRecord {
    pub platform_payment_id: String,
    /// `None` when the platform does not report the charged amount
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub status: PaymentStatus,
    pub payment_method: Option<String>,
    pub at: DateTime<Utc>,
}

/// Decoded platform notification
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformEvent {
    pub platform: Platform,
    /// Idempotency key within the platform
    pub event_id: String,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub target: Option<SubscriptionTarget>,
    pub transition: Option<Transition>,
    pub payment: Option<PaymentRecord>,
}

fn malformed(platform: Platform, err: impl std::fmt::Display) -> BillingError {
    BillingError::Validation(format!("malformed {platform} notification: {err}"))
}

fn rejected(reason: &str) -> BillingError {
    warn!(security_event = true, reason, "Webhook authenticity check failed");
    BillingError::InvalidSignature(reason.to_string())
}

/// Compare a shared token without leaking its length through timing
pub fn verify_shared_token(
    expected: Option<&str>,
    provided: Option<&str>,
) -> Result<(), BillingError> {
    let expected = expected.ok_or_else(|| rejected("notification token not configured"))?;
    let provided = provided.ok_or_else(|| rejected("missing notification token"))?;

    if bool::from(expected.as_bytes().ct_eq(provided.as_bytes())) {
        Ok(())
    } else {
        Err(rejected("notification token mismatch"))
    }
}

// Card processor

/// Verify a `t=<unix>,v1=<hex hmac>` signature header
///
/// The signed message is `"{t}.{payload}"` under HMAC-SHA256. Any of several
/// `v1` entries may match, which allows secret rotation.
pub fn verify_card_signature(
    secret: &str,
    payload: &[u8],
    header: &str,
    now: DateTime<Utc>,
    tolerance: Duration,
) -> Result<(), BillingError> {
    let mut timestamp: Option<&str> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        if let Some((key, value)) = part.trim().split_once('=') {
            match key {
                "t" => timestamp = Some(value),
                "v1" => signatures.push(value),
                _ => {}
            }
        }
    }

    let timestamp = timestamp.ok_or_else(|| rejected("missing timestamp"))?;
    if signatures.is_empty() {
        return Err(rejected("missing v1 signature"));
    }

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|_| BillingError::Internal("HMAC error".to_string()))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());

    let matched = signatures
        .iter()
        .any(|sig| bool::from(sig.as_bytes().ct_eq(expected.as_bytes())));
    if !matched {
        return Err(rejected("signature mismatch"));
    }

    let ts: i64 = timestamp
        .parse()
        .map_err(|_| rejected("invalid timestamp format"))?;
    let skew = now.timestamp().abs_diff(ts);
    if skew > tolerance.as_secs() {
        warn!(timestamp = ts, now = now.timestamp(), "Webhook timestamp outside tolerance");
        return Err(rejected("timestamp outside tolerance"));
    }

    Ok(())
}

/// Card processor event types consumed by the ingestor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardEventType {
    SubscriptionUpdated,
    SubscriptionDeleted,
    InvoicePaymentSucceeded,
    InvoicePaymentFailed,
    Unknown(String),
}

impl From<&str> for CardEventType {
    fn from(s: &str) -> Self {
        match s {
            "customer.subscription.created"
            | "customer.subscription.updated"
            | "subscription.updated" => Self::SubscriptionUpdated,
            "customer.subscription.deleted" | "subscription.deleted" => Self::SubscriptionDeleted,
            "invoice.payment_succeeded" | "invoice.paid" => Self::InvoicePaymentSucceeded,
            "invoice.payment_failed" => Self::InvoicePaymentFailed,
            other => Self::Unknown(other.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawCardEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    created: i64,
    data: RawCardEventData,
}

#[derive(Debug, Deserialize)]
struct RawCardEventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CardInvoiceObject {
    id: String,
    customer: Option<String>,
    subscription: Option<String>,
    #[serde(default)]
    amount_paid: i64,
    #[serde(default)]
    amount_due: i64,
    currency: String,
    payment_intent: Option<String>,
    #[serde(default)]
    lines: CardInvoiceLines,
    subscription_details: Option<CardSubscriptionDetails>,
}

#[derive(Debug, Default, Deserialize)]
struct CardInvoiceLines {
    #[serde(default)]
    data: Vec<CardInvoiceLine>,
}

#[derive(Debug, Deserialize)]
struct CardInvoiceLine {
    period: Option<CardLinePeriod>,
}

#[derive(Debug, Deserialize)]
struct CardLinePeriod {
    start: i64,
    end: i64,
}

#[derive(Debug, Deserialize)]
struct CardSubscriptionDetails {
    #[serde(default)]
    metadata: HashMap<String, String>,
}

impl CardInvoiceObject {
    /// Billing period the invoice pays for: the latest line period
    fn period(&self) -> Option<BillingPeriod> {
        self.lines
            .data
            .iter()
            .filter_map(|line| line.period.as_ref())
            .filter_map(|p| period_from(Some(p.start), Some(p.end)))
            .max_by_key(|p| p.end)
    }

    fn subscription_ref(&self) -> Option<SubscriptionId> {
        self.subscription_details
            .as_ref()
            .and_then(|d| subscription_ref(&d.metadata))
    }

    fn payment(&self, status: PaymentStatus, cents: i64, at: DateTime<Utc>) -> PaymentRecord {
        PaymentRecord {
            platform_payment_id: self
                .payment_intent
                .clone()
                .unwrap_or_else(|| format!("invoice_{}", self.id)),
            amount: Some(Decimal::new(cents, 2)),
            currency: Some(self.currency.to_uppercase()),
            status,
            payment_method: Some("card".to_string()),
            at,
        }
    }
}

fn subscription_ref(metadata: &HashMap<String, String>) -> Option<SubscriptionId> {
    metadata
        .get("subscription_ref")
        .and_then(|id| SubscriptionId::parse(id).ok())
}

/// Decode a card processor event envelope
pub fn decode_card_event(payload: &[u8]) -> Result<PlatformEvent, BillingError> {
    let raw: RawCardEvent =
        serde_json::from_slice(payload).map_err(|e| malformed(Platform::Card, e))?;
    let occurred_at = timestamp(raw.created).ok_or_else(|| malformed(Platform::Card, "created"))?;

    debug!(event_id = %raw.id, event_type = %raw.event_type, "Decoding card event");

    let mut event = PlatformEvent {
        platform: Platform::Card,
        event_id: raw.id,
        event_type: raw.event_type,
        occurred_at,
        target: None,
        transition: None,
        payment: None,
    };

    match CardEventType::from(event.event_type.as_str()) {
        CardEventType::SubscriptionUpdated => {
            let sub: CardSubscriptionObject = serde_json::from_value(raw.data.object)
                .map_err(|e| malformed(Platform::Card, e))?;
            event.transition = Some(if sub.status == "incomplete_expired" {
                Transition::ActivationFailed
            } else {
                let period = sub.period();
                Transition::Sync(StatusSnapshot {
                    status: map_card_status(&sub.status),
                    period,
                    trial: sub.trial(),
                    cancel_at: sub.cancel_at.and_then(timestamp).or_else(|| {
                        period.filter(|_| sub.cancel_at_period_end).map(|p| p.end)
                    }),
                    canceled_at: sub.canceled_at.and_then(timestamp),
                    observed_at: occurred_at,
                })
            });
            event.target = Some(card_target(&sub));
        }
        CardEventType::SubscriptionDeleted => {
            let sub: CardSubscriptionObject = serde_json::from_value(raw.data.object)
                .map_err(|e| malformed(Platform::Card, e))?;
            event.transition = Some(Transition::Delete {
                at: sub.canceled_at.and_then(timestamp).unwrap_or(occurred_at),
            });
            event.target = Some(card_target(&sub));
        }
        CardEventType::InvoicePaymentSucceeded => {
            let invoice: CardInvoiceObject = serde_json::from_value(raw.data.object)
                .map_err(|e| malformed(Platform::Card, e))?;
            event.transition = Some(Transition::PaymentSucceeded {
                period: invoice
                    .period()
                    .map_or(PeriodUpdate::Keep, PeriodUpdate::Exact),
                paid_at: occurred_at,
            });
            event.payment = Some(invoice.payment(
                PaymentStatus::Succeeded,
                invoice.amount_paid,
                occurred_at,
            ));
            event.target = invoice_target(&invoice);
        }
        CardEventType::InvoicePaymentFailed => {
            let invoice: CardInvoiceObject = serde_json::from_value(raw.data.object)
                .map_err(|e| malformed(Platform::Card, e))?;
            event.transition = Some(Transition::PaymentFailed {
                period_end: invoice.period().map(|p| p.end),
                failed_at: occurred_at,
            });
            event.payment = Some(invoice.payment(
                PaymentStatus::Failed,
                invoice.amount_due,
                occurred_at,
            ));
            event.target = invoice_target(&invoice);
        }
        CardEventType::Unknown(kind) => {
            debug!(event_type = %kind, "Unhandled card event type");
        }
    }

    Ok(event)
}

fn card_target(sub: &CardSubscriptionObject) -> SubscriptionTarget {
    SubscriptionTarget {
        platform_subscription_id: sub.id.clone(),
        subscription_ref: subscription_ref(&sub.metadata),
        customer_id: Some(sub.customer.clone()),
    }
}

fn invoice_target(invoice: &CardInvoiceObject) -> Option<SubscriptionTarget> {
    // One-off invoices carry no subscription
    invoice
        .subscription
        .as_ref()
        .map(|platform_subscription_id| SubscriptionTarget {
            platform_subscription_id: platform_subscription_id.clone(),
            subscription_ref: invoice.subscription_ref(),
            customer_id: invoice.customer.clone(),
        })
}

// App Store

#[derive(Debug, Deserialize)]
struct AppleNotification {
    notification_type: String,
    notification_uuid: Option<String>,
    auto_renew_status: Option<String>,
    auto_renew_status_change_date_ms: Option<String>,
    unified_receipt: Option<AppleUnifiedReceipt>,
}

#[derive(Debug, Deserialize)]
struct AppleUnifiedReceipt {
    #[serde(default)]
    latest_receipt_info: Vec<AppleTransaction>,
}

/// Check the shared secret an App Store notification carries in `password`
pub fn verify_app_store_notification(
    shared_secret: Option<&str>,
    payload: &[u8],
) -> Result<(), BillingError> {
    #[derive(Deserialize)]
    struct Password {
        password: Option<String>,
    }

    let password: Password = serde_json::from_slice(payload)
        .map_err(|_| rejected("unreadable App Store notification"))?;
    verify_shared_token(shared_secret, password.password.as_deref())
}

/// Decode an App Store server notification
pub fn decode_app_store_notification(
    payload: &[u8],
    received_at: DateTime<Utc>,
) -> Result<PlatformEvent, BillingError> {
    let raw: AppleNotification =
        serde_json::from_slice(payload).map_err(|e| malformed(Platform::Apple, e))?;

    let latest = raw
        .unified_receipt
        .as_ref()
        .and_then(|r| r.latest_receipt_info.iter().max_by_key(|t| t.expires_at()))
        .cloned();

    let Some(latest) = latest else {
        debug!(
            notification_type = %raw.notification_type,
            "App Store notification without transactions"
        );
        return Ok(PlatformEvent {
            platform: Platform::Apple,
            event_id: raw
                .notification_uuid
                .unwrap_or_else(|| format!("{}:none", raw.notification_type)),
            event_type: raw.notification_type,
            occurred_at: received_at,
            target: None,
            transition: None,
            payment: None,
        });
    };

    let event_id = raw.notification_uuid.clone().unwrap_or_else(|| {
        let mut id = format!("{}:{}", raw.notification_type, latest.transaction_id);
        if let Some(changed) = &raw.auto_renew_status_change_date_ms {
            id.push(':');
            id.push_str(changed);
        }
        id
    });

    let paid_at = latest.purchased_at().unwrap_or(received_at);
    let period = match (latest.purchased_at(), latest.expires_at()) {
        (Some(start), Some(end)) => BillingPeriod::new(start, end).ok(),
        _ => None,
    };

    let mut payment = None;
    let transition = match raw.notification_type.as_str() {
        "INITIAL_BUY" => Some(Transition::Activate {
            period,
            trial: None,
        }),
        "DID_RENEW" | "INTERACTIVE_RENEWAL" | "DID_RECOVER" => {
            payment = Some(PaymentRecord {
                platform_payment_id: latest.transaction_id.clone(),
                amount: None,
                currency: None,
                status: PaymentStatus::Succeeded,
                payment_method: Some("app_store".to_string()),
                at: paid_at,
            });
            Some(Transition::PaymentSucceeded {
                period: period.map_or(PeriodUpdate::Advance, PeriodUpdate::Exact),
                paid_at,
            })
        }
        // Store expiries do not line up with the nominal period stored at
        // verification, so only the timestamp guards against stale failures.
        "DID_FAIL_TO_RENEW" => Some(Transition::PaymentFailed {
            period_end: None,
            failed_at: received_at,
        }),
        "CANCEL" | "REFUND" | "REVOKE" => Some(Transition::Delete {
            at: latest.canceled_at().unwrap_or(received_at),
        }),
        "DID_CHANGE_RENEWAL_STATUS" => match raw.auto_renew_status.as_deref() {
            Some("false") => Some(Transition::Cancel {
                immediately: false,
                reason: Some("auto-renew disabled in App Store".to_string()),
            }),
            Some("true") => Some(Transition::Resume),
            _ => None,
        },
        "EXPIRED" => Some(Transition::Expire),
        other => {
            debug!(notification_type = %other, "Unhandled App Store notification type");
            None
        }
    };

    Ok(PlatformEvent {
        platform: Platform::Apple,
        event_id,
        event_type: raw.notification_type,
        occurred_at: received_at,
        target: Some(SubscriptionTarget {
            platform_subscription_id: latest.original_transaction_id.clone(),
            subscription_ref: None,
            customer_id: None,
        }),
        transition,
        payment,
    })
}

// Play Store

#[derive(Debug, Deserialize)]
struct PubSubPush {
    message: PubSubMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PubSubMessage {
    data: String,
    #[serde(alias = "message_id")]
    message_id: String,
    publish_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeveloperNotification {
    event_time_millis: Option<String>,
    subscription_notification: Option<SubscriptionNotification>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionNotification {
    notification_type: i32,
    purchase_token: String,
    subscription_id: Option<String>,
}

/// Play real-time developer notification type names
fn play_notification_name(kind: i32) -> &'static str {
    match kind {
        1 => "SUBSCRIPTION_RECOVERED",
        2 => "SUBSCRIPTION_RENEWED",
        3 => "SUBSCRIPTION_CANCELED",
        4 => "SUBSCRIPTION_PURCHASED",
        5 => "SUBSCRIPTION_ON_HOLD",
        6 => "SUBSCRIPTION_IN_GRACE_PERIOD",
        7 => "SUBSCRIPTION_RESTARTED",
        8 => "SUBSCRIPTION_PRICE_CHANGE_CONFIRMED",
        9 => "SUBSCRIPTION_DEFERRED",
        10 => "SUBSCRIPTION_PAUSED",
        11 => "SUBSCRIPTION_PAUSE_SCHEDULE_CHANGED",
        12 => "SUBSCRIPTION_REVOKED",
        13 => "SUBSCRIPTION_EXPIRED",
        20 => "SUBSCRIPTION_PENDING_PURCHASE_CANCELED",
        _ => "SUBSCRIPTION_UNKNOWN",
    }
}

/// Decode a Play notification delivered as a Pub/Sub push
pub fn decode_play_notification(
    payload: &[u8],
    received_at: DateTime<Utc>,
) -> Result<PlatformEvent, BillingError> {
    let push: PubSubPush =
        serde_json::from_slice(payload).map_err(|e| malformed(Platform::Google, e))?;
    let data = base64::engine::general_purpose::STANDARD
        .decode(push.message.data.as_bytes())
        .map_err(|e| malformed(Platform::Google, e))?;
    let notification: DeveloperNotification =
        serde_json::from_slice(&data).map_err(|e| malformed(Platform::Google, e))?;

    let occurred_at = notification
        .event_time_millis
        .as_deref()
        .and_then(crate::app_store::parse_millis)
        .or(push.message.publish_time)
        .unwrap_or(received_at);

    let Some(sub) = notification.subscription_notification else {
        debug!(
            message_id = %push.message.message_id,
            "Play notification without subscription payload"
        );
        return Ok(PlatformEvent {
            platform: Platform::Google,
            event_id: push.message.message_id,
            event_type: "TEST_NOTIFICATION".to_string(),
            occurred_at,
            target: None,
            transition: None,
            payment: None,
        });
    };

    let transition = match sub.notification_type {
        1 => Some(Transition::PaymentSucceeded {
            period: PeriodUpdate::Keep,
            paid_at: occurred_at,
        }),
        2 => Some(Transition::PaymentSucceeded {
            period: PeriodUpdate::Advance,
            paid_at: occurred_at,
        }),
        3 => Some(Transition::Cancel {
            immediately: false,
            reason: Some("canceled in Play Store".to_string()),
        }),
        4 => Some(Transition::Activate {
            period: None,
            trial: None,
        }),
        5 | 6 => Some(Transition::PaymentFailed {
            period_end: None,
            failed_at: occurred_at,
        }),
        7 => Some(Transition::Resume),
        10 => Some(Transition::Pause),
        12 => Some(Transition::Delete { at: occurred_at }),
        13 => Some(Transition::Expire),
        other => {
            debug!(
                notification_type = other,
                product_id = sub.subscription_id.as_deref().unwrap_or("unknown"),
                "Unhandled Play notification type"
            );
            None
        }
    };

    Ok(PlatformEvent {
        platform: Platform::Google,
        event_id: push.message.message_id,
        event_type: play_notification_name(sub.notification_type).to_string(),
        occurred_at,
        target: Some(SubscriptionTarget {
            platform_subscription_id: sub.purchase_token,
            subscription_ref: None,
            customer_id: None,
        }),
        transition,
        payment: None,
    })
}
