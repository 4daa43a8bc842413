// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Payment reconciliation.
//!
//! A provider callback is trusted only if its signature is
//! `hex(HMAC-SHA256(secret, order_id + "|" + payment_id))` and it matches an
//! order this server created for the same user and credit count. A verified
//! payment is recorded as a `success` transaction BEFORE credits are
//! granted, and the record doubles as the idempotency key. The grant itself
//! flips the record's `credits_granted` flag in the same atomic write, so a
//! repeat delivery either finds the payment fully credited or finishes the
//! grant an earlier delivery could not.

use crate::db::{AppendOutcome, DataStore, GrantOutcome};
use crate::error::AppError;
use crate::models::{CreditBalance, Order, Transaction, TransactionStatus};
use crate::services::ledger::{CreditLedger, MAX_TOP_UP};
use crate::time_utils::now_rfc3339;
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;

// Type alias for HMAC-SHA256
type HmacSha256 = Hmac<Sha256>;

/// Per-payment locks serializing reconciliation within this instance.
pub type ReconcileLocks = Arc<DashMap<String, Arc<Mutex<()>>>>;

/// Compute the provider signature for an order/payment pair (hex).
pub fn sign(order_id: &str, payment_id: &str, secret: &str) -> Option<String> {
    mac_for(order_id, payment_id, secret).map(hex::encode)
}

fn mac_for(order_id: &str, payment_id: &str, secret: &str) -> Option<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(order_id.as_bytes());
    mac.update(b"|");
    mac.update(payment_id.as_bytes());
    Some(mac.finalize().into_bytes().to_vec())
}

/// Check a provider signature in constant time.
pub fn verify(order_id: &str, payment_id: &str, signature: &str, secret: &str) -> bool {
    let Ok(provided) = hex::decode(signature.trim()) else {
        return false;
    };
    let Some(expected) = mac_for(order_id, payment_id, secret) else {
        return false;
    };
    expected.ct_eq(&provided).into()
}

/// Outcome of a successful reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// Credits granted by this call.
    Granted {
        transaction: Transaction,
        balance: CreditBalance,
    },
    /// Duplicate delivery; credits were granted earlier (or concurrently).
    AlreadyProcessed {
        transaction: Transaction,
        balance: CreditBalance,
    },
}

impl Reconciliation {
    pub fn balance(&self) -> CreditBalance {
        match self {
            Reconciliation::Granted { balance, .. }
            | Reconciliation::AlreadyProcessed { balance, .. } => *balance,
        }
    }

    pub fn transaction(&self) -> &Transaction {
        match self {
            Reconciliation::Granted { transaction, .. }
            | Reconciliation::AlreadyProcessed { transaction, .. } => transaction,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Reconciliation::AlreadyProcessed { .. })
    }
}

/// Verified payment details from a provider callback.
#[derive(Debug, Clone)]
pub struct PaymentConfirmation<'a> {
    pub order_id: &'a str,
    pub payment_id: &'a str,
    pub signature: &'a str,
    /// 0 when the client did not echo the amount
    pub amount_minor_units: i64,
    pub credits: i64,
}

#[derive(Clone)]
pub struct PaymentReconciler {
    store: DataStore,
    ledger: CreditLedger,
    secret: String,
    locks: ReconcileLocks,
}

impl PaymentReconciler {
    pub fn new(store: DataStore, ledger: CreditLedger, secret: impl Into<String>) -> Self {
        Self {
            store,
            ledger,
            secret: secret.into(),
            locks: Arc::new(DashMap::new()),
        }
    }

    pub fn verify(&self, order_id: &str, payment_id: &str, signature: &str) -> bool {
        verify(order_id, payment_id, signature, &self.secret)
    }

    /// Remember an order handed to checkout so its callback can be matched.
    pub async fn register_order(
        &self,
        user_id: &str,
        order_id: &str,
        amount_minor_units: i64,
        credits: i64,
    ) -> Result<Order, AppError> {
        let order = Order::new(order_id, user_id, amount_minor_units, credits, now_rfc3339());
        self.store.put_order(&order).await?;
        tracing::debug!(user_id, order_id, credits, "Payment order registered");
        Ok(order)
    }

    /// The order a callback refers to, checked against what was sold.
    async fn order_for(
        &self,
        user_id: &str,
        payment: &PaymentConfirmation<'_>,
    ) -> Result<Order, AppError> {
        let Some(order) = self.store.find_order(payment.order_id).await? else {
            tracing::warn!(user_id, order_id = %payment.order_id, "Payment for unknown order");
            return Err(AppError::NotFound("Unknown payment order".to_string()));
        };

        if order.user_id != user_id {
            tracing::warn!(
                user_id,
                owner = %order.user_id,
                order_id = %order.id,
                "Payment order belongs to a different user"
            );
            return Err(AppError::Conflict(
                "payment order belongs to another account".to_string(),
            ));
        }
        if payment.credits != order.credits {
            tracing::warn!(
                user_id,
                order_id = %order.id,
                claimed = payment.credits,
                ordered = order.credits,
                "Payment credits do not match the order"
            );
            return Err(AppError::InvalidAmount(
                "creditsToAdd does not match the order".to_string(),
            ));
        }
        if payment.amount_minor_units != 0 && payment.amount_minor_units != order.amount_minor_units
        {
            return Err(AppError::InvalidAmount(
                "amount does not match the order".to_string(),
            ));
        }
        Ok(order)
    }

    /// Verify a callback and grant its credits exactly once.
    ///
    /// Errors:
    /// - [`AppError::InvalidSignature`]: nothing recorded, nothing granted.
    /// - [`AppError::NotFound`] / [`AppError::InvalidAmount`]: no matching
    ///   order for this user and credit count; nothing recorded.
    /// - [`AppError::Conflict`]: the order or payment belongs to another user.
    /// - [`AppError::ReconciliationPartialFailure`]: recorded but not granted.
    ///   Redelivering the same callback retries the grant; the returned
    ///   transaction ID identifies the record for manual recovery.
    pub async fn reconcile(
        &self,
        user_id: &str,
        payment: PaymentConfirmation<'_>,
    ) -> Result<Reconciliation, AppError> {
        if payment.order_id.trim().is_empty() || payment.payment_id.trim().is_empty() {
            return Err(AppError::Validation(
                "orderId and paymentId are required".to_string(),
            ));
        }
        if payment.credits <= 0 || payment.credits > MAX_TOP_UP {
            return Err(AppError::InvalidAmount(format!(
                "creditsToAdd must be between 1 and {}",
                MAX_TOP_UP
            )));
        }
        if payment.amount_minor_units < 0 {
            return Err(AppError::InvalidAmount(
                "amount must not be negative".to_string(),
            ));
        }

        if !self.verify(payment.order_id, payment.payment_id, payment.signature) {
            tracing::warn!(
                user_id,
                order_id = %payment.order_id,
                payment_id = %payment.payment_id,
                "Payment signature mismatch"
            );
            return Err(AppError::InvalidSignature);
        }

        let order = self.order_for(user_id, &payment).await?;

        let key = Transaction::key_for(payment.order_id, payment.payment_id);

        // Serialize concurrent deliveries of the same payment within this instance.
        // Cross-instance races are settled by the atomic append below.
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();

        let result = {
            let _guard = lock.lock().await;
            self.record_and_grant(user_id, &payment, &order).await
        };

        drop(lock);
        self.locks
            .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);

        result
    }

    async fn record_and_grant(
        &self,
        user_id: &str,
        payment: &PaymentConfirmation<'_>,
        order: &Order,
    ) -> Result<Reconciliation, AppError> {
        let transaction = Transaction::success(
            user_id,
            payment.order_id,
            payment.payment_id,
            order.amount_minor_units,
            order.credits,
            now_rfc3339(),
        );

        let transaction = match self.store.append_transaction(&transaction).await? {
            AppendOutcome::Appended => transaction,
            AppendOutcome::AlreadyExists(existing) => {
                if existing.user_id != user_id {
                    tracing::warn!(
                        user_id,
                        owner = %existing.user_id,
                        transaction_id = %existing.id,
                        "Payment already recorded for a different user"
                    );
                    return Err(AppError::Conflict(
                        "payment already recorded for another account".to_string(),
                    ));
                }
                if existing.status != TransactionStatus::Success {
                    return Err(AppError::Conflict(format!(
                        "payment already recorded with status {:?}",
                        existing.status
                    )));
                }
                if existing.credits_granted {
                    tracing::info!(
                        user_id,
                        transaction_id = %existing.id,
                        "Duplicate payment delivery ignored"
                    );
                    return self.already_processed(user_id, existing).await;
                }

                tracing::warn!(
                    user_id,
                    transaction_id = %existing.id,
                    "Recorded payment was never credited; retrying grant"
                );
                existing
            }
        };

        match self.store.grant_transaction_credits(&transaction.id).await {
            Ok(GrantOutcome::Granted(balance)) => {
                tracing::info!(
                    user_id,
                    transaction_id = %transaction.id,
                    credits = transaction.credits_purchased,
                    amount = transaction.amount_minor_units,
                    "Payment reconciled"
                );
                Ok(Reconciliation::Granted {
                    transaction: Transaction {
                        credits_granted: true,
                        ..transaction
                    },
                    balance,
                })
            }
            // Another instance finished the grant between our append and now.
            Ok(GrantOutcome::AlreadyGranted) => {
                self.already_processed(
                    user_id,
                    Transaction {
                        credits_granted: true,
                        ..transaction
                    },
                )
                .await
            }
            Err(e) => {
                tracing::error!(
                    user_id,
                    transaction_id = %transaction.id,
                    error = %e,
                    "Payment recorded but credits not granted"
                );
                Err(AppError::ReconciliationPartialFailure {
                    transaction_id: transaction.id,
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn already_processed(
        &self,
        user_id: &str,
        transaction: Transaction,
    ) -> Result<Reconciliation, AppError> {
        let balance = self.ledger.balance(user_id).await?;
        Ok(Reconciliation::AlreadyProcessed {
            transaction,
            balance,
        })
    }
}
