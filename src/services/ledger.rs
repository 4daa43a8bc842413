//! Credit ledger: metered usage on top of the storage facade.
//!
//! Depletion order is fixed: the daily pool is spent to zero before a single
//! purchased credit is touched. Every mutation is one atomic conditional
//! update in the active backend, so concurrent deductions for the same user
//! can never both spend the last credit.

use crate::db::DataStore;
use crate::error::AppError;
use crate::models::CreditBalance;

/// Largest single top-up accepted.
pub const MAX_TOP_UP: i64 = 1_000_000;

#[derive(Clone)]
pub struct CreditLedger {
    store: DataStore,
}

impl CreditLedger {
    pub fn new(store: DataStore) -> Self {
        Self { store }
    }

    pub async fn balance(&self, user_id: &str) -> Result<CreditBalance, AppError> {
        self.store.get_or_init_credit_balance(user_id).await
    }

    /// Spend one credit.
    ///
    /// Fails with [`AppError::InsufficientCredits`] and writes nothing when
    /// both pools are empty.
    pub async fn deduct(&self, user_id: &str) -> Result<CreditBalance, AppError> {
        let spend = |balance: CreditBalance| {
            balance
                .consume_one()
                .ok_or(AppError::InsufficientCredits)
        };

        match self.store.update_credit_balance(user_id, &spend).await {
            Ok(balance) => {
                tracing::debug!(
                    user_id,
                    daily = balance.daily,
                    purchased = balance.purchased,
                    "Credit deducted"
                );
                Ok(balance)
            }
            Err(AppError::InsufficientCredits) => {
                tracing::info!(user_id, "Deduction refused: no credits left");
                Err(AppError::InsufficientCredits)
            }
            Err(e) => Err(e),
        }
    }

    /// Add credits to the purchased pool.
    pub async fn top_up(
        &self,
        user_id: &str,
        purchased_delta: i64,
    ) -> Result<CreditBalance, AppError> {
        if purchased_delta <= 0 || purchased_delta > MAX_TOP_UP {
            return Err(AppError::InvalidAmount(format!(
                "credits must be between 1 and {}, got {}",
                MAX_TOP_UP, purchased_delta
            )));
        }

        let balance = self
            .store
            .apply_credit_delta(user_id, 0, purchased_delta)
            .await?;

        tracing::info!(
            user_id,
            added = purchased_delta,
            purchased = balance.purchased,
            "Purchased credits added"
        );
        Ok(balance)
    }
}
