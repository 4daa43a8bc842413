//! Per-user credit balance.

use serde::{Deserialize, Serialize};

/// Free credits granted to every new account.
pub const DEFAULT_DAILY_CREDITS: i64 = 5;

/// Credit balance owned 1:1 by a user (document ID is the user ID).
///
/// Both pools are never negative; every mutation goes through
/// [`CreditBalance::apply_delta`] or [`CreditBalance::consume_one`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditBalance {
    /// Free pool (reset externally)
    pub daily: i64,
    /// Paid pool, never expires
    pub purchased: i64,
}

impl Default for CreditBalance {
    /// Balance created alongside a new user.
    fn default() -> Self {
        Self {
            daily: DEFAULT_DAILY_CREDITS,
            purchased: 0,
        }
    }
}

impl CreditBalance {
    pub fn new(daily: i64, purchased: i64) -> Self {
        Self { daily, purchased }
    }

    /// Apply signed deltas, refusing any result with a negative pool.
    pub fn apply_delta(self, daily_delta: i64, purchased_delta: i64) -> Option<Self> {
        let daily = self.daily.checked_add(daily_delta)?;
        let purchased = self.purchased.checked_add(purchased_delta)?;
        (daily >= 0 && purchased >= 0).then_some(Self { daily, purchased })
    }

    /// Spend one credit, daily pool first.
    pub fn consume_one(self) -> Option<Self> {
        if self.daily > 0 {
            self.apply_delta(-1, 0)
        } else {
            self.apply_delta(0, -1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_balance_is_five_free_credits() {
        assert_eq!(CreditBalance::default(), CreditBalance::new(5, 0));
    }

    #[test]
    fn consume_one_drains_daily_before_purchased() {
        let balance = CreditBalance::new(1, 2);
        let balance = balance.consume_one().unwrap();
        assert_eq!(balance, CreditBalance::new(0, 2));
        let balance = balance.consume_one().unwrap();
        assert_eq!(balance, CreditBalance::new(0, 1));
    }

    #[test]
    fn consume_one_refuses_empty_balance() {
        assert_eq!(CreditBalance::new(0, 0).consume_one(), None);
    }

    #[test]
    fn apply_delta_refuses_negative_pools() {
        assert_eq!(CreditBalance::new(0, 3).apply_delta(-1, 0), None);
        assert_eq!(CreditBalance::new(2, 0).apply_delta(0, -1), None);
        assert_eq!(
            CreditBalance::new(2, 0).apply_delta(0, 20),
            Some(CreditBalance::new(2, 20))
        );
    }

    #[test]
    fn apply_delta_refuses_overflow() {
        assert_eq!(CreditBalance::new(0, i64::MAX).apply_delta(0, 1), None);
    }
}
