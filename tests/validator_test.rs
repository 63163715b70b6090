//! Pre-payment validation against the ledger and the configured price.

mod common;

use chrono::Duration;
use common::{FakeGateway, Harness};
use premium_payments::database::repository::SiteConfigRepository;
use premium_payments::payments::types::{GatewayName, TransactionStatus};
use premium_payments::services::transaction_validator::ValidationReason;
use std::sync::Arc;

fn harness() -> Harness {
    Harness::new(vec![Arc::new(FakeGateway::new(GatewayName::Midtrans))])
}

#[tokio::test]
async fn amount_tolerance_is_one_percent_of_the_configured_price() {
    for price in [49_000_i64, 99_000, 199_000] {
        let h = harness();
        h.site_config
            .set("premium_price", &price.to_string())
            .await
            .unwrap();
        let user = h.add_established_user().await;
        let one_percent = price / 100;

        for amount in [price, price - one_percent, price + one_percent] {
            let outcome = h.validator.validate(user.id, amount).await.unwrap();
            assert!(outcome.valid, "price {} amount {} should pass", price, amount);
            assert_eq!(outcome.expected_amount, price);
        }

        for amount in [price - one_percent - 1, price + one_percent + 1] {
            let outcome = h.validator.validate(user.id, amount).await.unwrap();
            assert_eq!(
                outcome.reason,
                Some(ValidationReason::InvalidAmount),
                "price {} amount {} should fail",
                price,
                amount
            );
        }
    }
}

#[tokio::test]
async fn recent_pending_transaction_blocks_a_new_one() {
    let h = harness();
    let user = h.add_established_user().await;
    let now = h.clock_now();

    let pending = h
        .seed(
            user.id,
            TransactionStatus::Pending,
            now - Duration::minutes(10),
            now - Duration::minutes(10),
        )
        .await;

    let outcome = h.validator.validate(user.id, common::PRICE).await.unwrap();
    assert_eq!(outcome.reason, Some(ValidationReason::PendingTransaction));
    assert_eq!(outcome.existing_transaction.map(|t| t.id), Some(pending.id));
}

#[tokio::test]
async fn stale_pending_transaction_does_not_block() {
    let h = harness();
    let user = h.add_established_user().await;
    let now = h.clock_now();

    h.seed(
        user.id,
        TransactionStatus::Pending,
        now - Duration::minutes(40),
        now - Duration::minutes(40),
    )
    .await;

    let outcome = h.validator.validate(user.id, common::PRICE).await.unwrap();
    assert!(outcome.valid);
}

#[tokio::test]
async fn success_within_a_day_is_a_recent_success() {
    let h = harness();
    let user = h.add_established_user().await;
    let now = h.clock_now();

    let paid = h
        .seed(
            user.id,
            TransactionStatus::Success,
            now - Duration::hours(5),
            now - Duration::hours(4),
        )
        .await;

    let outcome = h.validator.validate(user.id, common::PRICE).await.unwrap();
    assert_eq!(outcome.reason, Some(ValidationReason::RecentSuccess));
    assert_eq!(outcome.existing_transaction.map(|t| t.id), Some(paid.id));

    h.clock.advance(Duration::hours(21));
    let outcome = h.validator.validate(user.id, common::PRICE).await.unwrap();
    assert!(outcome.valid);
}

#[tokio::test]
async fn premium_and_missing_users_are_rejected_first() {
    let h = harness();
    let outcome = h
        .validator
        .validate(uuid::Uuid::new_v4(), common::PRICE)
        .await
        .unwrap();
    assert_eq!(outcome.reason, Some(ValidationReason::UserNotFound));

    let mut user = h.add_established_user().await;
    user.is_premium = true;
    h.users.add_user(user.clone()).await;

    // Already premium wins over a bad amount.
    let outcome = h.validator.validate(user.id, 1).await.unwrap();
    assert_eq!(outcome.reason, Some(ValidationReason::AlreadyPremium));
}

#[tokio::test]
async fn failed_and_expired_history_does_not_block() {
    let h = harness();
    let user = h.add_established_user().await;
    let now = h.clock_now();

    for status in [
        TransactionStatus::Failed,
        TransactionStatus::Expired,
        TransactionStatus::Cancelled,
    ] {
        h.seed(user.id, status, now - Duration::minutes(5), now - Duration::minutes(5))
            .await;
    }

    let outcome = h.validator.validate(user.id, common::PRICE).await.unwrap();
    assert!(outcome.valid);
}
