// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Payment reconciliation: signature checks, order matching, idempotency,
//! partial failure and its recovery.

use async_trait::async_trait;
use mirrorx_backend::db::{
    AppendOutcome, BackendKind, BalanceUpdate, DataStore, GrantOutcome, MemoryStore, Store,
};
use mirrorx_backend::error::AppError;
use mirrorx_backend::models::{CreditBalance, Order, Transaction, User, WardrobeItem};
use mirrorx_backend::services::payment::sign;
use mirrorx_backend::services::{CreditLedger, PaymentConfirmation, PaymentReconciler};
use mirrorx_backend::time_utils::now_rfc3339;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

mod common;

const SECRET: &str = "test_payment_secret";

fn reconciler(store: &DataStore) -> PaymentReconciler {
    PaymentReconciler::new(store.clone(), CreditLedger::new(store.clone()), SECRET)
}

async fn new_user(store: &DataStore, email: &str) -> String {
    store
        .create_user(User::new(email, "Buyer", now_rfc3339()))
        .await
        .unwrap()
        .id
}

/// Register the order checkout would have created (9900 paise, 20 credits).
async fn order(payments: &PaymentReconciler, user_id: &str, order_id: &str) {
    payments
        .register_order(user_id, order_id, 9900, 20)
        .await
        .unwrap();
}

fn confirmation<'a>(order: &'a str, payment: &'a str, signature: &'a str) -> PaymentConfirmation<'a> {
    PaymentConfirmation {
        order_id: order,
        payment_id: payment,
        signature,
        amount_minor_units: 9900,
        credits: 20,
    }
}

#[tokio::test]
async fn verified_payment_grants_once() {
    let store = common::test_store();
    let user_id = new_user(&store, "buyer@x.com").await;
    let payments = reconciler(&store);
    order(&payments, &user_id, "order_1").await;
    let signature = sign("order_1", "pay_1", SECRET).unwrap();

    let first = payments
        .reconcile(&user_id, confirmation("order_1", "pay_1", &signature))
        .await
        .unwrap();
    assert!(!first.is_duplicate());
    assert_eq!(first.balance(), CreditBalance::new(5, 20));

    let second = payments
        .reconcile(&user_id, confirmation("order_1", "pay_1", &signature))
        .await
        .unwrap();
    assert!(second.is_duplicate());
    assert_eq!(second.balance(), CreditBalance::new(5, 20));

    let recorded = store.find_transaction("order_1", "pay_1").await.unwrap().unwrap();
    assert_eq!(recorded.user_id, user_id);
    assert_eq!(recorded.credits_purchased, 20);
    assert_eq!(recorded.amount_minor_units, 9900);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_deliveries_grant_once() {
    let store = common::test_store();
    let user_id = new_user(&store, "race@x.com").await;
    let payments = reconciler(&store);
    order(&payments, &user_id, "order_r").await;
    let signature = sign("order_r", "pay_r", SECRET).unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let payments = payments.clone();
        let user_id = user_id.clone();
        let signature = signature.clone();
        handles.push(tokio::spawn(async move {
            payments
                .reconcile(&user_id, confirmation("order_r", "pay_r", &signature))
                .await
        }));
    }

    let mut granted = 0;
    for handle in handles {
        if !handle.await.unwrap().unwrap().is_duplicate() {
            granted += 1;
        }
    }

    assert_eq!(granted, 1);
    assert_eq!(
        store.get_or_init_credit_balance(&user_id).await.unwrap(),
        CreditBalance::new(5, 20)
    );
}

#[tokio::test]
async fn tampered_signature_records_nothing() {
    let store = common::test_store();
    let user_id = new_user(&store, "tamper@x.com").await;
    let payments = reconciler(&store);
    order(&payments, &user_id, "order_1").await;
    let signature = sign("order_1", "pay_1", SECRET).unwrap();

    let err = payments
        .reconcile(&user_id, confirmation("order_2", "pay_1", &signature))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::InvalidSignature));
    assert!(store.find_transaction("order_2", "pay_1").await.unwrap().is_none());
    assert_eq!(
        store.get_or_init_credit_balance(&user_id).await.unwrap(),
        CreditBalance::new(5, 0)
    );
}

#[tokio::test]
async fn payment_owned_by_another_user_conflicts() {
    let store = common::test_store();
    let owner = new_user(&store, "owner@x.com").await;
    let other = new_user(&store, "other@x.com").await;
    let payments = reconciler(&store);
    order(&payments, &owner, "order_o").await;
    let signature = sign("order_o", "pay_o", SECRET).unwrap();

    payments
        .reconcile(&owner, confirmation("order_o", "pay_o", &signature))
        .await
        .unwrap();

    assert!(matches!(
        payments
            .reconcile(&other, confirmation("order_o", "pay_o", &signature))
            .await,
        Err(AppError::Conflict(_))
    ));
    assert_eq!(
        store.get_or_init_credit_balance(&other).await.unwrap(),
        CreditBalance::new(5, 0)
    );
}

#[tokio::test]
async fn non_positive_credits_are_rejected() {
    let store = common::test_store();
    let user_id = new_user(&store, "zero@x.com").await;
    let payments = reconciler(&store);
    order(&payments, &user_id, "order_z").await;
    let signature = sign("order_z", "pay_z", SECRET).unwrap();

    let mut payment = confirmation("order_z", "pay_z", &signature);
    payment.credits = 0;
    assert!(matches!(
        payments.reconcile(&user_id, payment).await,
        Err(AppError::InvalidAmount(_))
    ));
    assert!(store.find_transaction("order_z", "pay_z").await.unwrap().is_none());
}

#[tokio::test]
async fn unknown_order_is_rejected() {
    let store = common::test_store();
    let user_id = new_user(&store, "noorder@x.com").await;
    let payments = reconciler(&store);
    let signature = sign("order_x", "pay_x", SECRET).unwrap();

    assert!(matches!(
        payments
            .reconcile(&user_id, confirmation("order_x", "pay_x", &signature))
            .await,
        Err(AppError::NotFound(_))
    ));
    assert!(store.find_transaction("order_x", "pay_x").await.unwrap().is_none());
}

#[tokio::test]
async fn credits_must_match_the_order() {
    let store = common::test_store();
    let user_id = new_user(&store, "cheap@x.com").await;
    let payments = reconciler(&store);
    // A one-rupee order cannot be redeemed for more credits than it was sold for
    payments
        .register_order(&user_id, "order_cheap", 100, 1)
        .await
        .unwrap();
    let signature = sign("order_cheap", "pay_cheap", SECRET).unwrap();

    let mut payment = confirmation("order_cheap", "pay_cheap", &signature);
    payment.credits = 1_000_000;
    payment.amount_minor_units = 0;
    assert!(matches!(
        payments.reconcile(&user_id, payment).await,
        Err(AppError::InvalidAmount(_))
    ));

    let mut payment = confirmation("order_cheap", "pay_cheap", &signature);
    payment.credits = 1;
    payment.amount_minor_units = 0;
    let granted = payments.reconcile(&user_id, payment).await.unwrap();
    assert_eq!(granted.balance(), CreditBalance::new(5, 1));
    assert_eq!(granted.transaction().amount_minor_units, 100);
}

#[tokio::test]
async fn order_of_another_user_conflicts() {
    let store = common::test_store();
    let buyer = new_user(&store, "buyer2@x.com").await;
    let other = new_user(&store, "thief@x.com").await;
    let payments = reconciler(&store);
    order(&payments, &buyer, "order_t").await;
    let signature = sign("order_t", "pay_t", SECRET).unwrap();

    assert!(matches!(
        payments
            .reconcile(&other, confirmation("order_t", "pay_t", &signature))
            .await,
        Err(AppError::Conflict(_))
    ));
    assert!(store.find_transaction("order_t", "pay_t").await.unwrap().is_none());
}

/// Memory store whose credit grants fail while `failing` is set.
struct FailingCredits {
    inner: MemoryStore,
    failing: AtomicBool,
}

impl FailingCredits {
    fn injected() -> AppError {
        AppError::StorageUnavailable("injected failure".to_string())
    }
}

#[async_trait]
impl Store for FailingCredits {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        self.inner.find_user_by_email(email).await
    }

    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>, AppError> {
        self.inner.find_user_by_id(user_id).await
    }

    async fn create_user(&self, user: &User, balance: CreditBalance) -> Result<(), AppError> {
        self.inner.create_user(user, balance).await
    }

    async fn update_user(
        &self,
        user_id: &str,
        mutate: &(dyn Fn(User) -> Result<User, AppError> + Send + Sync),
    ) -> Result<User, AppError> {
        self.inner.update_user(user_id, mutate).await
    }

    async fn get_or_init_credit_balance(&self, user_id: &str) -> Result<CreditBalance, AppError> {
        self.inner.get_or_init_credit_balance(user_id).await
    }

    async fn update_credit_balance(
        &self,
        user_id: &str,
        update: BalanceUpdate<'_>,
    ) -> Result<CreditBalance, AppError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Self::injected());
        }
        self.inner.update_credit_balance(user_id, update).await
    }

    async fn list_wardrobe(&self, user_id: &str) -> Result<Vec<WardrobeItem>, AppError> {
        self.inner.list_wardrobe(user_id).await
    }

    async fn add_wardrobe_item(&self, item: &WardrobeItem) -> Result<(), AppError> {
        self.inner.add_wardrobe_item(item).await
    }

    async fn remove_wardrobe_item(&self, user_id: &str, item_id: &str) -> Result<bool, AppError> {
        self.inner.remove_wardrobe_item(user_id, item_id).await
    }

    async fn find_transaction(&self, transaction_id: &str) -> Result<Option<Transaction>, AppError> {
        self.inner.find_transaction(transaction_id).await
    }

    async fn append_transaction_if_absent(
        &self,
        tx: &Transaction,
    ) -> Result<AppendOutcome, AppError> {
        self.inner.append_transaction_if_absent(tx).await
    }

    async fn grant_transaction_credits(
        &self,
        transaction_id: &str,
    ) -> Result<GrantOutcome, AppError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Self::injected());
        }
        self.inner.grant_transaction_credits(transaction_id).await
    }

    async fn put_order(&self, order: &Order) -> Result<(), AppError> {
        self.inner.put_order(order).await
    }

    async fn find_order(&self, order_id: &str) -> Result<Option<Order>, AppError> {
        self.inner.find_order(order_id).await
    }
}

#[tokio::test]
async fn failed_grant_stays_a_partial_failure_until_credited() {
    let backend = Arc::new(FailingCredits {
        inner: MemoryStore::new(),
        failing: AtomicBool::new(true),
    });
    let store = DataStore::from_store(backend.clone(), BackendKind::Memory, Duration::from_secs(5));
    let user_id = new_user(&store, "partial@x.com").await;
    let payments = reconciler(&store);
    order(&payments, &user_id, "order_p").await;
    let signature = sign("order_p", "pay_p", SECRET).unwrap();

    let transaction_id = match payments
        .reconcile(&user_id, confirmation("order_p", "pay_p", &signature))
        .await
    {
        Err(AppError::ReconciliationPartialFailure { transaction_id, .. }) => transaction_id,
        other => panic!("expected partial failure, got {other:?}"),
    };
    assert_eq!(transaction_id, Transaction::key_for("order_p", "pay_p"));

    // The audit record survives the failed grant
    let recorded = store.find_transaction("order_p", "pay_p").await.unwrap().unwrap();
    assert!(!recorded.credits_granted);
    assert_eq!(
        store.get_or_init_credit_balance(&user_id).await.unwrap(),
        CreditBalance::new(5, 0)
    );

    // A redelivery must not report success while the credits are missing
    let err = payments
        .reconcile(&user_id, confirmation("order_p", "pay_p", &signature))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ReconciliationPartialFailure { .. }));

    // Once storage recovers, the redelivery finishes the grant exactly once
    backend.failing.store(false, Ordering::SeqCst);
    let recovered = payments
        .reconcile(&user_id, confirmation("order_p", "pay_p", &signature))
        .await
        .unwrap();
    assert!(!recovered.is_duplicate());
    assert_eq!(recovered.balance(), CreditBalance::new(5, 20));

    let again = payments
        .reconcile(&user_id, confirmation("order_p", "pay_p", &signature))
        .await
        .unwrap();
    assert!(again.is_duplicate());
    assert_eq!(again.balance(), CreditBalance::new(5, 20));
    assert!(store
        .find_transaction("order_p", "pay_p")
        .await
        .unwrap()
        .unwrap()
        .credits_granted);
}
