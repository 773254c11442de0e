//! Integration tests for usage counters and the entitlement gate

mod common;

use chrono::Duration;
use futures::future::join_all;
use rust_decimal::Decimal;

use cadence_billing_core::{BillingError, CancelRequest, GooglePurchaseVerification};
use cadence_types::{BillingCycle, Feature, Plan, Subscription, UsageDelta, UserId};
use common::{start_time, Harness};

async fn subscribe(h: &Harness, user: UserId, plan: &Plan) -> Subscription {
    h.google
        .set_verified("token-usage", "pro_monthly", start_time() + Duration::days(30));
    h.billing
        .verify_google_purchase(
            user,
            GooglePurchaseVerification {
                plan_id: plan.id,
                billing_cycle: BillingCycle::Monthly,
                purchase_token: "token-usage".to_string(),
                product_id: None,
                order_id: None,
            },
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_remaining_analyses_count_down() {
    let h = Harness::new();
    let plan = h.pro_plan().await;
    let user = UserId::new();
    subscribe(&h, user, &plan).await;

    h.billing
        .increment_usage(user, &UsageDelta::analyses(7))
        .await
        .unwrap();
    let check = h.billing.check_limits(user, Feature::Analyses).await.unwrap();
    assert!(check.allowed);
    assert_eq!(check.remaining, Some(Decimal::from(3)));
    assert_eq!(check.limit, Some(Decimal::from(10)));

    h.billing
        .increment_usage(user, &UsageDelta::analyses(3))
        .await
        .unwrap();
    let check = h.billing.check_limits(user, Feature::Analyses).await.unwrap();
    assert!(!check.allowed);
    assert_eq!(check.remaining, Some(Decimal::ZERO));
    assert_eq!(check.message, "Analysis limit reached for this month");
}

#[tokio::test]
async fn test_no_subscription_denies_features() {
    let h = Harness::new();
    h.pro_plan().await;
    let user = UserId::new();

    for feature in [Feature::Analyses, Feature::Storage, Feature::Chat] {
        let check = h.billing.check_limits(user, feature).await.unwrap();
        assert!(!check.allowed, "{feature} should be denied");
        assert!(check.message.starts_with("No active subscription"));
    }

    let report = h.billing.usage_report(user).await.unwrap();
    assert_eq!(report.remaining_usage.analyses_remaining, Some(0));
}

#[tokio::test]
async fn test_chat_follows_plan_flag() {
    let h = Harness::new();
    let plan = h.pro_plan().await;
    let user = UserId::new();
    subscribe(&h, user, &plan).await;

    let check = h.billing.check_limits(user, Feature::Chat).await.unwrap();
    assert!(check.allowed);
    assert_eq!(check.message, "AI Chat available");
}

#[tokio::test]
async fn test_canceled_subscription_loses_entitlement() {
    let h = Harness::new();
    let plan = h.pro_plan().await;
    let user = UserId::new();
    let sub = subscribe(&h, user, &plan).await;

    h.billing
        .cancel_subscription(
            user,
            sub.id,
            CancelRequest {
                reason: None,
                immediately: true,
            },
        )
        .await
        .unwrap();

    let check = h.billing.check_limits(user, Feature::Analyses).await.unwrap();
    assert!(!check.allowed);
}

#[tokio::test]
async fn test_usage_report_and_month_rollover() {
    let h = Harness::new();
    let plan = h.pro_plan().await;
    let user = UserId::new();
    subscribe(&h, user, &plan).await;

    h.billing
        .increment_usage(
            user,
            &UsageDelta {
                analyses_used: Some(4),
                storage_used_gb: Some(Decimal::new(25, 1)),
                chat_messages_used: Some(12),
            },
        )
        .await
        .unwrap();

    let report = h.billing.usage_report(user).await.unwrap();
    assert_eq!(report.usage.analyses_used, 4);
    assert_eq!(report.limits.max_analyses_per_month, Some(10));
    assert_eq!(report.remaining_usage.analyses_remaining, Some(6));
    assert_eq!(report.remaining_usage.storage_remaining_gb, Some(Decimal::new(25, 1)));

    // March 10 -> April 1
    h.clock.advance(Duration::days(22));
    let april = h.billing.get_usage(user).await.unwrap();
    assert_eq!(april.analyses_used, 0);
    assert_eq!(april.storage_used_gb, Decimal::ZERO);
}

#[tokio::test]
async fn test_negative_increment_is_rejected() {
    let h = Harness::new();
    let user = UserId::new();

    let result = h
        .billing
        .increment_usage(user, &UsageDelta::analyses(-1))
        .await;
    assert!(matches!(result, Err(BillingError::Validation(_))));
    assert_eq!(h.billing.get_usage(user).await.unwrap().analyses_used, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_increments_are_not_lost() {
    let h = Harness::new();
    let user = UserId::new();

    let increments = (0..50).map(|_| {
        let billing = h.billing.clone();
        tokio::spawn(async move {
            billing
                .increment_usage(user, &UsageDelta::analyses(1))
                .await
                .unwrap()
        })
    });
    for result in join_all(increments).await {
        result.unwrap();
    }

    assert_eq!(h.billing.get_usage(user).await.unwrap().analyses_used, 50);
}
