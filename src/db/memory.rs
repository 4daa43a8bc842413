//! In-process fallback store.
//!
//! Same contract as the Firestore backend, held in `DashMap`s owned by a
//! single [`MemoryStore`] instance. Per-user atomicity comes from holding the
//! shard write lock of the relevant entry for the whole read-modify-write.
//! No lock is ever held across an `.await`.

use super::{AppendOutcome, BalanceUpdate, GrantOutcome, Store};
use crate::error::AppError;
use crate::models::wardrobe::sort_newest_first;
use crate::models::{CreditBalance, Order, Transaction, User, WardrobeItem};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Process-lifetime store.
///
/// Lock order: `emails` before `users`/`credits`, and `transactions`
/// before `users`/`credits`; nothing else nests.
#[derive(Default)]
pub struct MemoryStore {
    users: DashMap<String, User>,
    /// Normalized email -> user ID
    emails: DashMap<String, String>,
    credits: DashMap<String, CreditBalance>,
    /// User ID -> items (unordered)
    wardrobe: DashMap<String, Vec<WardrobeItem>>,
    transactions: DashMap<String, Transaction>,
    orders: DashMap<String, Order>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn require_user(&self, user_id: &str) -> Result<(), AppError> {
        if self.users.contains_key(user_id) {
            Ok(())
        } else {
            Err(AppError::NotFound(format!("User {} not found", user_id)))
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let user_id = match self.emails.get(email) {
            Some(id) => id.value().clone(),
            None => return Ok(None),
        };
        Ok(self.users.get(&user_id).map(|u| u.value().clone()))
    }

    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>, AppError> {
        Ok(self.users.get(user_id).map(|u| u.value().clone()))
    }

    async fn create_user(&self, user: &User, balance: CreditBalance) -> Result<(), AppError> {
        match self.emails.entry(user.email.clone()) {
            Entry::Occupied(_) => Err(AppError::Conflict(format!(
                "An account with email {} already exists",
                user.email
            ))),
            Entry::Vacant(slot) => {
                // Balance first: the user must never be visible without one.
                self.credits.insert(user.id.clone(), balance);
                self.users.insert(user.id.clone(), user.clone());
                slot.insert(user.id.clone());
                Ok(())
            }
        }
    }

    async fn update_user(
        &self,
        user_id: &str,
        mutate: &(dyn Fn(User) -> Result<User, AppError> + Send + Sync),
    ) -> Result<User, AppError> {
        let mut entry = self
            .users
            .get_mut(user_id)
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))?;
        let updated = mutate(entry.value().clone())?;
        *entry = updated.clone();
        Ok(updated)
    }

    async fn get_or_init_credit_balance(&self, user_id: &str) -> Result<CreditBalance, AppError> {
        if let Some(balance) = self.credits.get(user_id) {
            return Ok(*balance);
        }
        self.require_user(user_id)?;
        Ok(*self.credits.entry(user_id.to_string()).or_default())
    }

    async fn update_credit_balance(
        &self,
        user_id: &str,
        update: BalanceUpdate<'_>,
    ) -> Result<CreditBalance, AppError> {
        if !self.credits.contains_key(user_id) {
            self.require_user(user_id)?;
        }

        let mut entry = self.credits.entry(user_id.to_string()).or_default();
        let next = update(*entry)?;
        *entry = next;
        Ok(next)
    }

    async fn list_wardrobe(&self, user_id: &str) -> Result<Vec<WardrobeItem>, AppError> {
        let mut items = self
            .wardrobe
            .get(user_id)
            .map(|items| items.value().clone())
            .unwrap_or_default();
        sort_newest_first(&mut items);
        Ok(items)
    }

    async fn add_wardrobe_item(&self, item: &WardrobeItem) -> Result<(), AppError> {
        self.require_user(&item.user_id)?;
        self.wardrobe
            .entry(item.user_id.clone())
            .or_default()
            .push(item.clone());
        Ok(())
    }

    async fn remove_wardrobe_item(&self, user_id: &str, item_id: &str) -> Result<bool, AppError> {
        let Some(mut items) = self.wardrobe.get_mut(user_id) else {
            return Ok(false);
        };
        let before = items.len();
        items.retain(|item| item.id != item_id);
        Ok(items.len() != before)
    }

    async fn find_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Transaction>, AppError> {
        Ok(self.transactions.get(transaction_id).map(|t| t.value().clone()))
    }

    async fn append_transaction_if_absent(
        &self,
        tx: &Transaction,
    ) -> Result<AppendOutcome, AppError> {
        match self.transactions.entry(tx.id.clone()) {
            Entry::Occupied(existing) => Ok(AppendOutcome::AlreadyExists(existing.get().clone())),
            Entry::Vacant(slot) => {
                slot.insert(tx.clone());
                Ok(AppendOutcome::Appended)
            }
        }
    }

    async fn grant_transaction_credits(
        &self,
        transaction_id: &str,
    ) -> Result<GrantOutcome, AppError> {
        // Held until the balance is written, so the flag and the credits
        // move together.
        let mut tx = self
            .transactions
            .get_mut(transaction_id)
            .ok_or_else(|| AppError::NotFound(format!("Transaction {} not found", transaction_id)))?;
        if tx.credits_granted {
            return Ok(GrantOutcome::AlreadyGranted);
        }

        if !self.credits.contains_key(&tx.user_id) {
            self.require_user(&tx.user_id)?;
        }
        let mut balance = self.credits.entry(tx.user_id.clone()).or_default();
        let next = balance
            .apply_delta(0, tx.credits_purchased)
            .ok_or_else(|| AppError::InvalidAmount("credit grant out of range".to_string()))?;
        *balance = next;
        tx.credits_granted = true;
        Ok(GrantOutcome::Granted(next))
    }

    async fn put_order(&self, order: &Order) -> Result<(), AppError> {
        self.orders.insert(order.id.clone(), order.clone());
        Ok(())
    }

    async fn find_order(&self, order_id: &str) -> Result<Option<Order>, AppError> {
        Ok(self.orders.get(order_id).map(|o| o.value().clone()))
    }
}
