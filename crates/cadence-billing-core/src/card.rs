//! Card processor adapter
//!
//! Talks to a Stripe-compatible REST API with form-encoded requests.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

use cadence_types::{Platform, SubscriptionStatus, UserId};

use crate::config::CardConfig;
use crate::error::BillingError;
use crate::provider::{
    http_client, transport_error, CreateSubscriptionRequest, PlatformAdapter,
    PlatformSubscription,
};
use crate::transition::BillingPeriod;

/// Card processor adapter
#[derive(Clone)]
pub struct CardAdapter {
    client: Client,
    config: Option<CardConfig>,
}

impl CardAdapter {
    /// Create a card adapter; `None` leaves the card platform disabled
    pub fn new(config: Option<CardConfig>, timeout: Duration) -> Result<Self, BillingError> {
        Ok(Self {
            client: http_client(timeout)?,
            config,
        })
    }

    fn credentials(&self) -> Result<&CardConfig, BillingError> {
        self.config
            .as_ref()
            .ok_or(BillingError::PlatformDisabled(Platform::Card))
    }

    /// Make authenticated request to the card processor
    async fn card_request<T: for<'de> Deserialize<'de>>(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, &str)],
        idempotency_key: Option<&str>,
    ) -> Result<T, BillingError> {
        let config = self.credentials()?;
        let url = format!("{}{endpoint}", config.api_base);

        let mut request = self
            .client
            .request(method.clone(), &url)
            .basic_auth(&config.secret_key, Option::<&str>::None);

        if method == Method::GET {
            request = request.query(params);
        } else if !params.is_empty() {
            request = request.form(params);
        }
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error(Platform::Card, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Card processor API error");
            return Err(status_error(status, &body));
        }

        response.json::<T>().await.map_err(|e| {
            error!(error = %e, "Failed to parse card processor response");
            BillingError::Internal(e.to_string())
        })
    }

    /// Find the processor customer previously created for a user
    #[instrument(skip(self))]
    pub async fn find_customer(
        &self,
        user_id: &UserId,
    ) -> Result<Option<CardCustomer>, BillingError> {
        let query = format!("metadata['user_id']:'{user_id}'");
        let result: CardList<CardCustomer> = self
            .card_request(
                Method::GET,
                "/customers/search",
                &[("query", query.as_str()), ("limit", "1")],
                None,
            )
            .await?;

        Ok(result.data.into_iter().find(|c| !c.deleted))
    }

    /// Create a processor customer tagged with the user id
    #[instrument(skip(self))]
    pub async fn create_customer(&self, user_id: &UserId) -> Result<CardCustomer, BillingError> {
        debug!(user_id = %user_id, "Creating card customer");

        let user = user_id.to_string();
        let idempotency_key = format!("customer-{user}");
        self.card_request(
            Method::POST,
            "/customers",
            &[("metadata[user_id]", user.as_str())],
            Some(&idempotency_key),
        )
        .await
    }

    async fn customer_for(&self, user_id: &UserId) -> Result<CardCustomer, BillingError> {
        match self.find_customer(user_id).await? {
            Some(customer) => Ok(customer),
            None => self.create_customer(user_id).await,
        }
    }
}

#[async_trait]
impl PlatformAdapter for CardAdapter {
    fn platform(&self) -> Platform {
        Platform::Card
    }

    fn is_enabled(&self) -> bool {
        self.config.is_some()
    }

    fn map_native_status(&self, native: &str) -> SubscriptionStatus {
        map_card_status(native)
    }

    #[instrument(skip(self, request), fields(subscription_ref = %request.subscription_ref))]
    async fn create_subscription(
        &self,
        request: &CreateSubscriptionRequest,
    ) -> Result<PlatformSubscription, BillingError> {
        let customer = self.customer_for(&request.user_id).await?;

        let subscription_ref = request.subscription_ref.to_string();
        let user = request.user_id.to_string();
        let trial_days = request.trial_days.map(|days| days.to_string());

        let mut form: Vec<(&str, &str)> = vec![
            ("customer", customer.id.as_str()),
            ("items[0][price]", request.product_id.as_str()),
            ("payment_behavior", "default_incomplete"),
            ("payment_settings[save_default_payment_method]", "on_subscription"),
            ("expand[]", "latest_invoice.payment_intent"),
            ("metadata[subscription_ref]", subscription_ref.as_str()),
            ("metadata[user_id]", user.as_str()),
        ];
        if let Some(days) = trial_days.as_deref() {
            form.push(("trial_period_days", days));
        }

        let created: CardSubscriptionObject = self
            .card_request(Method::POST, "/subscriptions", &form, Some(&subscription_ref))
            .await?;

        info!(
            platform_subscription_id = %created.id,
            native_status = %created.status,
            "Created card subscription"
        );

        Ok(PlatformSubscription {
            client_secret: created.client_secret(),
            period: created.period(),
            trial: created.trial(),
            platform_subscription_id: created.id,
            customer_id: Some(customer.id),
            native_status: created.status,
        })
    }

    #[instrument(skip(self))]
    async fn cancel(
        &self,
        platform_subscription_id: &str,
        immediately: bool,
    ) -> Result<(), BillingError> {
        let endpoint = format!("/subscriptions/{platform_subscription_id}");
        let _: CardSubscriptionObject = if immediately {
            self.card_request(Method::DELETE, &endpoint, &[], None).await?
        } else {
            self.card_request(
                Method::POST,
                &endpoint,
                &[("cancel_at_period_end", "true")],
                None,
            )
            .await?
        };

        info!(immediately, "Canceled card subscription");
        Ok(())
    }
}

/// Card processor status vocabulary to canonical status
pub fn map_card_status(native: &str) -> SubscriptionStatus {
    match native {
        "active" => SubscriptionStatus::Active,
        "canceled" => SubscriptionStatus::Canceled,
        "incomplete" | "incomplete_expired" => SubscriptionStatus::Pending,
        "past_due" => SubscriptionStatus::PastDue,
        "trialing" => SubscriptionStatus::Trialing,
        "paused" => SubscriptionStatus::Paused,
        _ => SubscriptionStatus::Pending,
    }
}

fn status_error(status: StatusCode, body: &str) -> BillingError {
    let message = serde_json::from_str::<CardErrorBody>(body)
        .ok()
        .and_then(|b| b.error.message)
        .unwrap_or_else(|| format!("card processor returned {status}"));

    match status {
        StatusCode::TOO_MANY_REQUESTS => BillingError::PlatformUnavailable(message),
        s if s.is_server_error() => BillingError::PlatformUnavailable(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            BillingError::Internal("card processor rejected the API credentials".to_string())
        }
        _ => BillingError::Validation(message),
    }
}

/// Convert a Unix timestamp from the processor
pub(crate) fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

pub(crate) fn period_from(start: Option<i64>, end: Option<i64>) -> Option<BillingPeriod> {
    let start = timestamp(start?)?;
    let end = timestamp(end?)?;
    BillingPeriod::new(start, end).ok()
}

// Card processor API types

/// Processor customer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardCustomer {
    pub id: String,
    pub email: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub deleted: bool,
}

/// Field the processor returns either as an id or, when expanded, an object
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expandable<T> {
    Id(String),
    Object(T),
}

/// Processor subscription object, as returned by the API and in webhooks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardSubscriptionObject {
    pub id: String,
    pub customer: String,
    pub status: String,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    pub trial_start: Option<i64>,
    pub trial_end: Option<i64>,
    pub cancel_at: Option<i64>,
    pub canceled_at: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub latest_invoice: Option<Expandable<CardInvoiceRef>>,
}

impl CardSubscriptionObject {
    pub fn period(&self) -> Option<BillingPeriod> {
        period_from(self.current_period_start, self.current_period_end)
    }

    pub fn trial(&self) -> Option<BillingPeriod> {
        period_from(self.trial_start, self.trial_end)
    }

    fn client_secret(&self) -> Option<String> {
        match &self.latest_invoice {
            Some(Expandable::Object(invoice)) => match &invoice.payment_intent {
                Some(Expandable::Object(intent)) => intent.client_secret.clone(),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Invoice as embedded in a subscription
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardInvoiceRef {
    pub id: String,
    pub payment_intent: Option<Expandable<CardPaymentIntent>>,
}

/// Payment intent carrying the client confirmation secret
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardPaymentIntent {
    pub id: String,
    pub client_secret: Option<String>,
}

/// Processor list/search response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardList<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
struct CardErrorBody {
    error: CardErrorDetail,
}

#[derive(Debug, Deserialize)]
struct CardErrorDetail {
    message: Option<String>,
}
