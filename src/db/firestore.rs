// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore backend.
//!
//! Collections:
//! - `users` (profile + password hash)
//! - `user_emails` (normalized email -> user ID, uniqueness index)
//! - `user_credits` (balance, keyed by user ID)
//! - `wardrobe` (saved images)
//! - `transactions` (append-only payment records)
//! - `payment_orders` (checkout orders created by this server)
//!
//! Every read-modify-write runs inside a Firestore transaction whose reads
//! are bound to that transaction, so a concurrent writer aborts the commit
//! and the whole closure is retried against fresh data.

use super::{collections, AppendOutcome, BalanceUpdate, GrantOutcome, Store};
use crate::error::AppError;
use crate::models::{CreditBalance, Order, Transaction, User, WardrobeItem};
use async_trait::async_trait;
use firestore::{FirestoreConsistencySelector, FirestoreQueryDirection, FirestoreTransaction};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Commit attempts before a contended transaction is reported as retryable.
const MAX_TRANSACTION_ATTEMPTS: u32 = 5;
const RETRY_BACKOFF: Duration = Duration::from_millis(25);

/// Document in `user_emails`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EmailIndex {
    user_id: String,
}

fn db_error(e: impl std::fmt::Display) -> AppError {
    AppError::StorageUnavailable(e.to_string())
}

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreStore {
    client: firestore::FirestoreDb,
}

impl FirestoreStore {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| db_error(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self { client })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| db_error(format!("Failed to connect to Firestore Emulator: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore Emulator");

        Ok(Self { client })
    }

    /// Round-trip a cheap read to prove the backend is reachable.
    pub async fn ping(&self) -> Result<(), AppError> {
        let _: Option<EmailIndex> = self
            .client
            .fluent()
            .select()
            .by_id_in(collections::USER_EMAILS)
            .obj()
            .one("healthcheck")
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn begin(&self) -> Result<FirestoreTransaction<'_>, AppError> {
        self.client
            .begin_transaction()
            .await
            .map_err(|e| db_error(format!("Failed to begin transaction: {}", e)))
    }

    /// A client whose reads are part of `transaction`.
    fn reader_for(&self, transaction: &FirestoreTransaction<'_>) -> firestore::FirestoreDb {
        self.client
            .clone_with_consistency_selector(FirestoreConsistencySelector::Transaction(
                transaction.transaction_id().clone(),
            ))
    }

    async fn get_doc<T>(
        db: &firestore::FirestoreDb,
        collection: &str,
        id: &str,
    ) -> Result<Option<T>, AppError>
    where
        T: for<'de> Deserialize<'de> + Send,
    {
        db.fluent()
            .select()
            .by_id_in(collection)
            .obj()
            .one(id)
            .await
            .map_err(db_error)
    }

    fn stage<T>(
        &self,
        transaction: &mut FirestoreTransaction<'_>,
        collection: &str,
        id: &str,
        object: &T,
    ) -> Result<(), AppError>
    where
        T: Serialize + Sync + Send + for<'de> Deserialize<'de>,
    {
        self.client
            .fluent()
            .update()
            .in_col(collection)
            .document_id(id)
            .object(object)
            .add_to_transaction(transaction)
            .map_err(|e| db_error(format!("Failed to add {} write to transaction: {}", collection, e)))?;
        Ok(())
    }

    /// Commit, or report whether the attempt should be retried.
    async fn commit(
        transaction: FirestoreTransaction<'_>,
        attempt: u32,
        op: &'static str,
    ) -> Result<bool, AppError> {
        match transaction.commit().await {
            Ok(_) => Ok(true),
            Err(e) if attempt < MAX_TRANSACTION_ATTEMPTS => {
                tracing::debug!(op, attempt, error = %e, "Transaction commit failed, retrying");
                tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                Ok(false)
            }
            Err(e) => Err(db_error(format!("{} commit failed: {}", op, e))),
        }
    }
}

#[async_trait]
impl Store for FirestoreStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let email = email.to_string();
        let users: Vec<User> = self
            .client
            .fluent()
            .select()
            .from(collections::USERS)
            .filter(move |q| q.field("email").eq(email.clone()))
            .limit(1)
            .obj()
            .query()
            .await
            .map_err(db_error)?;
        Ok(users.into_iter().next())
    }

    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>, AppError> {
        Self::get_doc(&self.client, collections::USERS, user_id).await
    }

    async fn create_user(&self, user: &User, balance: CreditBalance) -> Result<(), AppError> {
        let email_key = urlencoding::encode(&user.email).into_owned();

        for attempt in 1..=MAX_TRANSACTION_ATTEMPTS {
            let mut transaction = self.begin().await?;
            let reader = self.reader_for(&transaction);

            let existing: Option<EmailIndex> =
                Self::get_doc(&reader, collections::USER_EMAILS, &email_key).await?;
            if existing.is_some() {
                let _ = transaction.rollback().await;
                return Err(AppError::Conflict(format!(
                    "An account with email {} already exists",
                    user.email
                )));
            }

            let index = EmailIndex {
                user_id: user.id.clone(),
            };
            self.stage(&mut transaction, collections::USER_EMAILS, &email_key, &index)?;
            self.stage(&mut transaction, collections::USERS, &user.id, user)?;
            self.stage(&mut transaction, collections::CREDITS, &user.id, &balance)?;

            if Self::commit(transaction, attempt, "create_user").await? {
                return Ok(());
            }
        }

        Err(db_error("create_user: transaction contention"))
    }

    async fn update_user(
        &self,
        user_id: &str,
        mutate: &(dyn Fn(User) -> Result<User, AppError> + Send + Sync),
    ) -> Result<User, AppError> {
        for attempt in 1..=MAX_TRANSACTION_ATTEMPTS {
            let mut transaction = self.begin().await?;
            let reader = self.reader_for(&transaction);

            let Some(current) =
                Self::get_doc::<User>(&reader, collections::USERS, user_id).await?
            else {
                let _ = transaction.rollback().await;
                return Err(AppError::NotFound(format!("User {} not found", user_id)));
            };

            let updated = match mutate(current) {
                Ok(updated) => updated,
                Err(e) => {
                    let _ = transaction.rollback().await;
                    return Err(e);
                }
            };
            self.stage(&mut transaction, collections::USERS, user_id, &updated)?;

            if Self::commit(transaction, attempt, "update_user").await? {
                return Ok(updated);
            }
        }

        Err(db_error("update_user: transaction contention"))
    }

    async fn get_or_init_credit_balance(&self, user_id: &str) -> Result<CreditBalance, AppError> {
        if let Some(balance) = Self::get_doc(&self.client, collections::CREDITS, user_id).await? {
            return Ok(balance);
        }
        // Missing row: initialize through the transactional path.
        self.update_credit_balance(user_id, &|balance| Ok(balance))
            .await
    }

    async fn update_credit_balance(
        &self,
        user_id: &str,
        update: BalanceUpdate<'_>,
    ) -> Result<CreditBalance, AppError> {
        for attempt in 1..=MAX_TRANSACTION_ATTEMPTS {
            let mut transaction = self.begin().await?;
            let reader = self.reader_for(&transaction);

            let current = match Self::get_doc(&reader, collections::CREDITS, user_id).await? {
                Some(balance) => balance,
                None => {
                    if Self::get_doc::<User>(&reader, collections::USERS, user_id)
                        .await?
                        .is_none()
                    {
                        let _ = transaction.rollback().await;
                        return Err(AppError::NotFound(format!("User {} not found", user_id)));
                    }
                    CreditBalance::default()
                }
            };

            let next = match update(current) {
                Ok(next) => next,
                Err(e) => {
                    let _ = transaction.rollback().await;
                    return Err(e);
                }
            };
            self.stage(&mut transaction, collections::CREDITS, user_id, &next)?;

            if Self::commit(transaction, attempt, "update_credit_balance").await? {
                tracing::debug!(
                    user_id,
                    daily = next.daily,
                    purchased = next.purchased,
                    "Credit balance updated"
                );
                return Ok(next);
            }
        }

        Err(db_error("update_credit_balance: transaction contention"))
    }

    async fn list_wardrobe(&self, user_id: &str) -> Result<Vec<WardrobeItem>, AppError> {
        let user_id = user_id.to_string();
        self.client
            .fluent()
            .select()
            .from(collections::WARDROBE)
            .filter(move |q| q.field("user_id").eq(user_id.clone()))
            .order_by([
                ("created_at", FirestoreQueryDirection::Descending),
                ("id", FirestoreQueryDirection::Descending),
            ])
            .obj()
            .query()
            .await
            .map_err(db_error)
    }

    async fn add_wardrobe_item(&self, item: &WardrobeItem) -> Result<(), AppError> {
        let _: () = self
            .client
            .fluent()
            .update()
            .in_col(collections::WARDROBE)
            .document_id(&item.id)
            .object(item)
            .execute()
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn remove_wardrobe_item(&self, user_id: &str, item_id: &str) -> Result<bool, AppError> {
        let item: Option<WardrobeItem> =
            Self::get_doc(&self.client, collections::WARDROBE, item_id).await?;

        match item {
            Some(item) if item.user_id == user_id => {
                self.client
                    .fluent()
                    .delete()
                    .from(collections::WARDROBE)
                    .document_id(item_id)
                    .execute()
                    .await
                    .map_err(db_error)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Transaction>, AppError> {
        Self::get_doc(&self.client, collections::TRANSACTIONS, transaction_id).await
    }

    async fn append_transaction_if_absent(
        &self,
        tx: &Transaction,
    ) -> Result<AppendOutcome, AppError> {
        for attempt in 1..=MAX_TRANSACTION_ATTEMPTS {
            let mut transaction = self.begin().await?;
            let reader = self.reader_for(&transaction);

            if let Some(existing) =
                Self::get_doc::<Transaction>(&reader, collections::TRANSACTIONS, &tx.id).await?
            {
                let _ = transaction.rollback().await;
                return Ok(AppendOutcome::AlreadyExists(existing));
            }

            self.stage(&mut transaction, collections::TRANSACTIONS, &tx.id, tx)?;

            if Self::commit(transaction, attempt, "append_transaction").await? {
                return Ok(AppendOutcome::Appended);
            }
        }

        Err(db_error("append_transaction: transaction contention"))
    }

    async fn grant_transaction_credits(
        &self,
        transaction_id: &str,
    ) -> Result<GrantOutcome, AppError> {
        for attempt in 1..=MAX_TRANSACTION_ATTEMPTS {
            let mut transaction = self.begin().await?;
            let reader = self.reader_for(&transaction);

            let Some(mut tx) =
                Self::get_doc::<Transaction>(&reader, collections::TRANSACTIONS, transaction_id)
                    .await?
            else {
                let _ = transaction.rollback().await;
                return Err(AppError::NotFound(format!(
                    "Transaction {} not found",
                    transaction_id
                )));
            };
            if tx.credits_granted {
                let _ = transaction.rollback().await;
                return Ok(GrantOutcome::AlreadyGranted);
            }

            let current = match Self::get_doc(&reader, collections::CREDITS, &tx.user_id).await? {
                Some(balance) => balance,
                None => {
                    if Self::get_doc::<User>(&reader, collections::USERS, &tx.user_id)
                        .await?
                        .is_none()
                    {
                        let _ = transaction.rollback().await;
                        return Err(AppError::NotFound(format!("User {} not found", tx.user_id)));
                    }
                    CreditBalance::default()
                }
            };

            let Some(next) = current.apply_delta(0, tx.credits_purchased) else {
                let _ = transaction.rollback().await;
                return Err(AppError::InvalidAmount("credit grant out of range".to_string()));
            };
            tx.credits_granted = true;
            self.stage(&mut transaction, collections::CREDITS, &tx.user_id, &next)?;
            self.stage(&mut transaction, collections::TRANSACTIONS, transaction_id, &tx)?;

            if Self::commit(transaction, attempt, "grant_transaction_credits").await? {
                return Ok(GrantOutcome::Granted(next));
            }
        }

        Err(db_error("grant_transaction_credits: transaction contention"))
    }

    async fn put_order(&self, order: &Order) -> Result<(), AppError> {
        let _: () = self
            .client
            .fluent()
            .update()
            .in_col(collections::ORDERS)
            .document_id(urlencoding::encode(&order.id))
            .object(order)
            .execute()
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn find_order(&self, order_id: &str) -> Result<Option<Order>, AppError> {
        Self::get_doc(&self.client, collections::ORDERS, &urlencoding::encode(order_id)).await
    }
}
