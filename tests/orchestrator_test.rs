//! Premium purchase flow from eligibility checks to manual status polls.

mod common;

use common::{FakeGateway, Harness, PRICE};
use premium_payments::database::repository::UserRepository;
use premium_payments::payments::types::{GatewayName, TransactionStatus};
use premium_payments::services::payment_orchestrator::{PaymentCreation, PremiumPaymentRequest};
use premium_payments::services::transaction_validator::ValidationReason;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use uuid::Uuid;

fn request(user_id: Uuid) -> PremiumPaymentRequest {
    PremiumPaymentRequest {
        user_id,
        gateway: None,
        payment_method: "qris".to_string(),
        amount: None,
        ip_address: Some("198.51.100.20".to_string()),
        success_url: None,
        failure_url: None,
    }
}

#[tokio::test]
async fn creates_a_pending_row_with_redirect_and_fraud_summary() {
    let midtrans = Arc::new(FakeGateway::new(GatewayName::Midtrans));
    let h = Harness::new(vec![midtrans.clone()]);
    let user = h.add_established_user().await;

    let creation = h
        .orchestrator
        .create_premium_payment(request(user.id))
        .await
        .unwrap();

    let (transaction, redirect_url) = match creation {
        PaymentCreation::Created {
            transaction,
            redirect_url,
            ..
        } => (transaction, redirect_url),
        other => panic!("expected a created payment, got {:?}", other),
    };

    assert_eq!(transaction.status, TransactionStatus::Pending);
    assert_eq!(transaction.amount, PRICE);
    assert_eq!(transaction.gateway, GatewayName::Midtrans);
    assert!(transaction.order_id.starts_with("PREM-20260301120000-"));
    assert_eq!(
        redirect_url,
        format!("https://pay.example.test/REF-{}", transaction.order_id)
    );

    let stored = h.reload(transaction.id).await;
    assert_eq!(stored.redirect_url(), Some(redirect_url.as_str()));
    assert_eq!(
        stored.details["gateway_reference"],
        format!("REF-{}", transaction.order_id)
    );
    assert_eq!(stored.details["fraud_check"]["risk_level"], "low");

    let created = midtrans.created.lock().unwrap();
    assert_eq!(created.len(), 1);
    let callbacks = &created[0].callbacks;
    assert_eq!(
        callbacks.success,
        format!(
            "https://premium.example.test/payment/success?order_id={}",
            transaction.order_id
        )
    );
    assert_eq!(
        callbacks.failure,
        format!(
            "https://premium.example.test/payment/failed?order_id={}",
            transaction.order_id
        )
    );
    assert_eq!(callbacks.webhook, "https://premium.example.test/webhooks/midtrans");
}

#[tokio::test]
async fn open_payment_is_returned_instead_of_a_new_one() {
    let midtrans = Arc::new(FakeGateway::new(GatewayName::Midtrans));
    let h = Harness::new(vec![midtrans.clone()]);
    let user = h.add_established_user().await;
    let open = h.insert_pending(user.id, GatewayName::Midtrans).await;

    let creation = h
        .orchestrator
        .create_premium_payment(request(user.id))
        .await
        .unwrap();

    match creation {
        PaymentCreation::Rejected {
            reason,
            existing_transaction,
            expected_amount,
        } => {
            assert_eq!(reason, ValidationReason::PendingTransaction);
            assert_eq!(existing_transaction.map(|t| t.id), Some(open.id));
            assert_eq!(expected_amount, PRICE);
        }
        other => panic!("expected a rejection, got {:?}", other),
    }
    assert!(midtrans.created.lock().unwrap().is_empty());
}

#[tokio::test]
async fn wrong_amount_is_rejected_before_the_gateway_is_called() {
    let midtrans = Arc::new(FakeGateway::new(GatewayName::Midtrans));
    let h = Harness::new(vec![midtrans.clone()]);
    let user = h.add_established_user().await;

    let creation = h
        .orchestrator
        .create_premium_payment(PremiumPaymentRequest {
            amount: Some(PRICE / 2),
            ..request(user.id)
        })
        .await
        .unwrap();

    assert!(matches!(
        creation,
        PaymentCreation::Rejected {
            reason: ValidationReason::InvalidAmount,
            ..
        }
    ));
    assert!(midtrans.created.lock().unwrap().is_empty());
}

#[tokio::test]
async fn gateway_failure_leaves_no_ledger_row() {
    let midtrans = Arc::new(FakeGateway::new(GatewayName::Midtrans));
    midtrans.fail_creation();
    let h = Harness::new(vec![midtrans.clone()]);
    let user = h.add_established_user().await;

    let creation = h
        .orchestrator
        .create_premium_payment(request(user.id))
        .await
        .unwrap();

    match creation {
        PaymentCreation::GatewayFailed { gateway, error } => {
            assert_eq!(gateway, GatewayName::Midtrans);
            assert!(error.contains("500"));
        }
        other => panic!("expected a gateway failure, got {:?}", other),
    }

    // Nothing pending, so an immediate retry is allowed through validation.
    let retry = h
        .orchestrator
        .create_premium_payment(request(user.id))
        .await
        .unwrap();
    assert!(!matches!(retry, PaymentCreation::Rejected { .. }));
}

#[tokio::test]
async fn explicit_gateway_overrides_the_active_one() {
    let midtrans = Arc::new(FakeGateway::new(GatewayName::Midtrans));
    let duitku = Arc::new(FakeGateway::new(GatewayName::Duitku));
    let h = Harness::new(vec![midtrans.clone(), duitku.clone()]);
    let user = h.add_established_user().await;

    let creation = h
        .orchestrator
        .create_premium_payment(PremiumPaymentRequest {
            gateway: Some(GatewayName::Duitku),
            ..request(user.id)
        })
        .await
        .unwrap();

    match creation {
        PaymentCreation::Created { transaction, .. } => {
            assert_eq!(transaction.gateway, GatewayName::Duitku)
        }
        other => panic!("expected a created payment, got {:?}", other),
    }
    assert!(midtrans.created.lock().unwrap().is_empty());
    assert_eq!(duitku.created.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn status_check_reconciles_settlement_and_grants_premium() {
    let midtrans = Arc::new(FakeGateway::new(GatewayName::Midtrans));
    let h = Harness::new(vec![midtrans.clone()]);
    let user = h.add_established_user().await;
    let tx = h.insert_pending(user.id, GatewayName::Midtrans).await;
    midtrans.set_remote_status(TransactionStatus::Success);

    let check = h.orchestrator.check_status(tx.id).await.unwrap();

    assert_eq!(check.observed, Some(TransactionStatus::Success));
    assert_eq!(check.transaction.status, TransactionStatus::Success);
    assert!(check.transaction.premium_granted());
    let stored_user = h.users.find_by_id(user.id).await.unwrap().unwrap();
    assert!(stored_user.is_premium);
}

#[tokio::test]
async fn terminal_rows_are_not_rechecked() {
    let midtrans = Arc::new(FakeGateway::new(GatewayName::Midtrans));
    let h = Harness::new(vec![midtrans.clone()]);
    let user = h.add_established_user().await;
    let now = h.clock_now();
    let tx = h.seed(user.id, TransactionStatus::Failed, now, now).await;

    let check = h.orchestrator.check_status(tx.id).await.unwrap();

    assert_eq!(check.transaction.status, TransactionStatus::Failed);
    assert_eq!(check.observed, None);
    assert_eq!(midtrans.verify_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn link_gateways_report_that_they_cannot_be_polled() {
    let link = Arc::new(FakeGateway::new(GatewayName::PaypalMe).without_status_check());
    let h = Harness::new(vec![link.clone()]);
    let user = h.add_established_user().await;
    let tx = h.insert_pending(user.id, GatewayName::PaypalMe).await;

    let check = h.orchestrator.check_status(tx.id).await.unwrap();

    assert_eq!(check.transaction.status, TransactionStatus::Pending);
    assert!(check
        .verification_error
        .unwrap()
        .contains("does not support status checks"));
    assert_eq!(link.verify_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unreachable_provider_keeps_the_row_pending() {
    let midtrans = Arc::new(FakeGateway::new(GatewayName::Midtrans));
    midtrans.set_remote_unreachable();
    let h = Harness::new(vec![midtrans.clone()]);
    let user = h.add_established_user().await;
    let tx = h.insert_pending(user.id, GatewayName::Midtrans).await;

    let check = h.orchestrator.check_status(tx.id).await.unwrap();

    assert_eq!(check.observed, None);
    assert_eq!(check.verification_error.as_deref(), Some("connection refused"));
    assert_eq!(h.reload(tx.id).await.status, TransactionStatus::Pending);
}

#[tokio::test]
async fn unknown_transaction_is_not_found() {
    let h = Harness::new(vec![Arc::new(FakeGateway::new(GatewayName::Midtrans))]);
    let err = h.orchestrator.get_transaction(Uuid::new_v4()).await.unwrap_err();
    assert_eq!(err.status_code(), 404);
}
