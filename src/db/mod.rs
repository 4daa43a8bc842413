// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Storage layer.
//!
//! [`DataStore`] is the only storage handle the rest of the crate sees. At
//! boot it selects exactly one [`Store`] backend (Firestore, or the
//! in-process [`MemoryStore`] when Firestore is unconfigured or unreachable)
//! and delegates every call to it for the lifetime of the process. Backend
//! failures after boot surface as retryable [`AppError::StorageUnavailable`]
//! and never switch backends.

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreStore;
pub use memory::MemoryStore;

use crate::config::Config;
use crate::error::AppError;
use crate::models::{CreditBalance, Order, Transaction, User, WardrobeItem};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Collection names as constants.
pub mod collections {
    pub const USERS: &str = "users";
    /// Email -> user ID index, enforces email uniqueness
    pub const USER_EMAILS: &str = "user_emails";
    /// Credit balances (keyed by user ID)
    pub const CREDITS: &str = "user_credits";
    pub const WARDROBE: &str = "wardrobe";
    /// Payment transactions (keyed by order/payment pair)
    pub const TRANSACTIONS: &str = "transactions";
    /// Checkout orders created by this server
    pub const ORDERS: &str = "payment_orders";
}

/// Atomic balance mutation: receives the current balance, returns the new
/// one or an error that aborts the update without writing.
pub type BalanceUpdate<'a> =
    &'a (dyn Fn(CreditBalance) -> Result<CreditBalance, AppError> + Send + Sync);

/// Result of an idempotent transaction append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// A record with the same ID already exists; nothing was written.
    AlreadyExists(Transaction),
}

/// Result of applying a recorded transaction's credits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantOutcome {
    /// Credits were added by this call; the new balance.
    Granted(CreditBalance),
    /// The transaction was already credited; nothing was written.
    AlreadyGranted,
}

/// Read/write contract shared by every storage backend.
///
/// Implementations must make `create_user` (user + balance + email index),
/// `update_credit_balance`, `append_transaction_if_absent` and
/// `grant_transaction_credits` (balance + grant flag) atomic.
#[async_trait]
pub trait Store: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError>;

    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>, AppError>;

    /// Insert the user and its initial balance together.
    /// Fails with [`AppError::Conflict`] if the email is taken.
    async fn create_user(&self, user: &User, balance: CreditBalance) -> Result<(), AppError>;

    /// Read-modify-write of a user record.
    async fn update_user(
        &self,
        user_id: &str,
        mutate: &(dyn Fn(User) -> Result<User, AppError> + Send + Sync),
    ) -> Result<User, AppError>;

    /// Current balance; a missing row for an existing user is initialized to defaults.
    async fn get_or_init_credit_balance(&self, user_id: &str) -> Result<CreditBalance, AppError>;

    /// Serialized per user: no other update for the same user interleaves.
    async fn update_credit_balance(
        &self,
        user_id: &str,
        update: BalanceUpdate<'_>,
    ) -> Result<CreditBalance, AppError>;

    /// Items for a user, newest first.
    async fn list_wardrobe(&self, user_id: &str) -> Result<Vec<WardrobeItem>, AppError>;

    async fn add_wardrobe_item(&self, item: &WardrobeItem) -> Result<(), AppError>;

    /// Returns false if the item does not exist or belongs to another user.
    async fn remove_wardrobe_item(&self, user_id: &str, item_id: &str) -> Result<bool, AppError>;

    async fn find_transaction(&self, transaction_id: &str)
        -> Result<Option<Transaction>, AppError>;

    /// Check-and-insert keyed by `tx.id`, atomic per key.
    async fn append_transaction_if_absent(
        &self,
        tx: &Transaction,
    ) -> Result<AppendOutcome, AppError>;

    /// Add a recorded transaction's credits to its owner's purchased pool
    /// and mark it granted, both or neither. A granted transaction is never
    /// applied again.
    async fn grant_transaction_credits(
        &self,
        transaction_id: &str,
    ) -> Result<GrantOutcome, AppError>;

    async fn put_order(&self, order: &Order) -> Result<(), AppError>;

    async fn find_order(&self, order_id: &str) -> Result<Option<Order>, AppError>;
}

/// Which backend is authoritative for this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Firestore,
    Memory,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Firestore => "firestore",
            BackendKind::Memory => "memory",
        }
    }
}

/// Data access facade.
#[derive(Clone)]
pub struct DataStore {
    backend: Arc<dyn Store>,
    kind: BackendKind,
    /// Why the fallback store was selected, if it was
    fallback_reason: Option<String>,
    timeout: Duration,
}

impl DataStore {
    /// Select the backend once for the process lifetime.
    ///
    /// Never fails: an unconfigured or unreachable Firestore degrades to the
    /// in-memory store and the degradation is logged once at error level.
    pub async fn connect(config: &Config) -> Self {
        let Some(project_id) = config.firestore_project_id.as_deref() else {
            return Self::fallback(config.store_timeout, "durable store not configured");
        };

        let attempt = tokio::time::timeout(config.store_timeout, async {
            let store = FirestoreStore::new(project_id).await?;
            store.ping().await?;
            Ok::<_, AppError>(store)
        })
        .await;

        match attempt {
            Ok(Ok(store)) => {
                tracing::info!(project = project_id, "Using Firestore as authoritative store");
                Self::from_store(Arc::new(store), BackendKind::Firestore, config.store_timeout)
            }
            Ok(Err(e)) => Self::fallback(config.store_timeout, &e.to_string()),
            Err(_) => Self::fallback(
                config.store_timeout,
                "timed out connecting to durable store",
            ),
        }
    }

    /// Wrap an explicit backend.
    pub fn from_store(backend: Arc<dyn Store>, kind: BackendKind, timeout: Duration) -> Self {
        Self {
            backend,
            kind,
            fallback_reason: None,
            timeout,
        }
    }

    /// In-memory store selected on purpose (tests, local runs).
    pub fn in_memory(timeout: Duration) -> Self {
        Self::from_store(Arc::new(MemoryStore::new()), BackendKind::Memory, timeout)
    }

    fn fallback(timeout: Duration, reason: &str) -> Self {
        tracing::error!(
            reason = %reason,
            "DEGRADED MODE: durable store unavailable at boot, using in-memory fallback \
             store for the process lifetime; all data is lost on restart"
        );
        Self {
            fallback_reason: Some(reason.to_string()),
            ..Self::in_memory(timeout)
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.kind
    }

    /// True whenever the in-memory store is authoritative.
    pub fn is_degraded(&self) -> bool {
        self.kind == BackendKind::Memory
    }

    pub fn fallback_reason(&self) -> Option<&str> {
        self.fallback_reason.as_deref()
    }

    /// Run a backend call with the configured upper bound.
    async fn bounded<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, AppError>>,
    ) -> Result<T, AppError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(op, backend = self.kind.as_str(), "Storage call timed out");
                Err(AppError::StorageUnavailable(format!("{} timed out", op)))
            }
        }
    }

    // ─── User Operations ─────────────────────────────────────────

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let email = crate::models::user::normalize_email(email);
        self.bounded("find_user_by_email", self.backend.find_user_by_email(&email))
            .await
    }

    pub async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>, AppError> {
        self.bounded("find_user_by_id", self.backend.find_user_by_id(user_id))
            .await
    }

    /// Create a user together with its default balance (5 daily, 0 purchased).
    ///
    /// If either write fails the whole call fails and no account exists.
    pub async fn create_user(&self, mut user: User) -> Result<User, AppError> {
        user.email = crate::models::user::normalize_email(&user.email);
        if user.email.is_empty() {
            return Err(AppError::Validation("email is required".to_string()));
        }

        self.bounded(
            "create_user",
            self.backend.create_user(&user, CreditBalance::default()),
        )
        .await?;

        tracing::info!(user_id = %user.id, backend = self.kind.as_str(), "User created");
        Ok(user)
    }

    /// Link a third-party identity to an existing account.
    ///
    /// A user holds at most one external identity: relinking the same one is a
    /// no-op, a different one is a [`AppError::Conflict`].
    pub async fn link_external_identity(
        &self,
        user_id: &str,
        identity_id: &str,
        avatar_url: Option<&str>,
    ) -> Result<User, AppError> {
        let identity_id = identity_id.to_string();
        let avatar_url = avatar_url.map(str::to_string);

        let mutate = move |mut user: User| match user.external_identity_id.as_deref() {
            Some(existing) if existing == identity_id => Ok(user),
            Some(_) => Err(AppError::Conflict(
                "account already linked to another identity".to_string(),
            )),
            None => {
                user.external_identity_id = Some(identity_id.clone());
                if let Some(avatar) = &avatar_url {
                    user.avatar_url = avatar.clone();
                }
                Ok(user)
            }
        };

        self.bounded(
            "link_external_identity",
            self.backend.update_user(user_id, &mutate),
        )
        .await
    }

    /// Stamp `last_login_at`.
    pub async fn record_login(&self, user_id: &str, at: &str) -> Result<User, AppError> {
        let at = at.to_string();
        let mutate = move |mut user: User| {
            user.last_login_at = Some(at.clone());
            Ok(user)
        };
        self.bounded("record_login", self.backend.update_user(user_id, &mutate))
            .await
    }

    // ─── Credit Operations ───────────────────────────────────────

    pub async fn get_or_init_credit_balance(
        &self,
        user_id: &str,
    ) -> Result<CreditBalance, AppError> {
        self.bounded(
            "get_or_init_credit_balance",
            self.backend.get_or_init_credit_balance(user_id),
        )
        .await
    }

    /// Atomically add signed deltas to both pools.
    ///
    /// Fails with [`AppError::InsufficientCredits`] and writes nothing if
    /// either pool would go negative.
    pub async fn apply_credit_delta(
        &self,
        user_id: &str,
        daily_delta: i64,
        purchased_delta: i64,
    ) -> Result<CreditBalance, AppError> {
        let update = move |balance: CreditBalance| {
            balance
                .apply_delta(daily_delta, purchased_delta)
                .ok_or(AppError::InsufficientCredits)
        };
        self.update_credit_balance(user_id, &update).await
    }

    /// Atomic conditional update primitive used by the ledger.
    pub async fn update_credit_balance(
        &self,
        user_id: &str,
        update: BalanceUpdate<'_>,
    ) -> Result<CreditBalance, AppError> {
        self.bounded(
            "update_credit_balance",
            self.backend.update_credit_balance(user_id, update),
        )
        .await
    }

    // ─── Wardrobe Operations ─────────────────────────────────────

    pub async fn list_wardrobe(&self, user_id: &str) -> Result<Vec<WardrobeItem>, AppError> {
        self.bounded("list_wardrobe", self.backend.list_wardrobe(user_id))
            .await
    }

    pub async fn add_wardrobe_item(
        &self,
        user_id: &str,
        image_data: String,
    ) -> Result<WardrobeItem, AppError> {
        let item = WardrobeItem::new(user_id, image_data, crate::time_utils::now_rfc3339());
        self.bounded("add_wardrobe_item", self.backend.add_wardrobe_item(&item))
            .await?;
        Ok(item)
    }

    pub async fn remove_wardrobe_item(
        &self,
        user_id: &str,
        item_id: &str,
    ) -> Result<bool, AppError> {
        self.bounded(
            "remove_wardrobe_item",
            self.backend.remove_wardrobe_item(user_id, item_id),
        )
        .await
    }

    // ─── Transaction Operations ──────────────────────────────────

    pub async fn find_transaction(
        &self,
        order_id: &str,
        payment_id: &str,
    ) -> Result<Option<Transaction>, AppError> {
        let key = Transaction::key_for(order_id, payment_id);
        self.bounded("find_transaction", self.backend.find_transaction(&key))
            .await
    }

    /// Append-only insert; an existing record with the same order/payment
    /// pair is returned instead of overwritten.
    pub async fn append_transaction(&self, tx: &Transaction) -> Result<AppendOutcome, AppError> {
        self.bounded(
            "append_transaction",
            self.backend.append_transaction_if_absent(tx),
        )
        .await
    }

    /// Credit a recorded transaction exactly once.
    pub async fn grant_transaction_credits(
        &self,
        transaction_id: &str,
    ) -> Result<GrantOutcome, AppError> {
        self.bounded(
            "grant_transaction_credits",
            self.backend.grant_transaction_credits(transaction_id),
        )
        .await
    }

    // ─── Order Operations ────────────────────────────────────────

    pub async fn put_order(&self, order: &Order) -> Result<(), AppError> {
        self.bounded("put_order", self.backend.put_order(order)).await
    }

    pub async fn find_order(&self, order_id: &str) -> Result<Option<Order>, AppError> {
        self.bounded("find_order", self.backend.find_order(order_id))
            .await
    }
}
