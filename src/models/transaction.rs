//! Payment transactions (append-only audit trail for top-ups).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Success,
    Failed,
}

/// Record of one payment-provider callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Derived from `(provider_order_id, provider_payment_id)`; see [`Transaction::key_for`]
    pub id: String,
    pub user_id: String,
    pub provider_order_id: String,
    pub provider_payment_id: String,
    pub amount_minor_units: i64,
    pub credits_purchased: i64,
    pub status: TransactionStatus,
    /// Set in the same atomic write that adds the credits to the balance.
    #[serde(default)]
    pub credits_granted: bool,
    pub created_at: String,
}

impl Transaction {
    /// Successful top-up record for a verified payment, not yet credited.
    pub fn success(
        user_id: &str,
        order_id: &str,
        payment_id: &str,
        amount_minor_units: i64,
        credits_purchased: i64,
        created_at: String,
    ) -> Self {
        Self {
            id: Self::key_for(order_id, payment_id),
            user_id: user_id.to_string(),
            provider_order_id: order_id.to_string(),
            provider_payment_id: payment_id.to_string(),
            amount_minor_units,
            credits_purchased,
            status: TransactionStatus::Success,
            credits_granted: false,
            created_at,
        }
    }

    /// Deterministic ID so duplicate deliveries map to the same record.
    pub fn key_for(order_id: &str, payment_id: &str) -> String {
        format!(
            "{}|{}",
            urlencoding::encode(order_id),
            urlencoding::encode(payment_id)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_unambiguous() {
        assert_ne!(Transaction::key_for("a|b", "c"), Transaction::key_for("a", "b|c"));
        assert_eq!(Transaction::key_for("order_1", "pay_1"), "order_1|pay_1");
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&TransactionStatus::Success).unwrap();
        assert_eq!(json, "\"success\"");
    }
}
