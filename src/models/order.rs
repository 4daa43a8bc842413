//! Server-side record of a checkout order.

use serde::{Deserialize, Serialize};

/// What the server agreed to sell when the order was created. A payment
/// callback is only honored for the order's owner and its exact credits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Provider order ID (or `order_demo_*`)
    pub id: String,
    pub user_id: String,
    pub amount_minor_units: i64,
    pub credits: i64,
    pub created_at: String,
}

impl Order {
    pub fn new(
        id: &str,
        user_id: &str,
        amount_minor_units: i64,
        credits: i64,
        created_at: String,
    ) -> Self {
        Self {
            id: id.to_string(),
            user_id: user_id.to_string(),
            amount_minor_units,
            credits,
            created_at,
        }
    }
}
