// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Razorpay Orders API client.
//!
//! Only order creation lives here; signature checks and credit grants are
//! in [`crate::services::payment`]. Without a key ID the client hands out
//! local demo orders so checkout can be exercised end to end.

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const RAZORPAY_API: &str = "https://api.razorpay.com/v1";
const CURRENCY: &str = "INR";
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Order handed to the checkout widget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOrder {
    pub id: String,
    /// Minor units (paise)
    pub amount: i64,
    pub currency: String,
    pub receipt: String,
    pub credits: i64,
    pub key_id: Option<String>,
    /// Not backed by a real provider order.
    pub demo: bool,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    amount: i64,
    currency: String,
    #[serde(default)]
    receipt: Option<String>,
}

#[derive(Clone)]
pub struct RazorpayClient {
    http: reqwest::Client,
    base_url: String,
    key_id: Option<String>,
    key_secret: String,
}

impl RazorpayClient {
    pub fn new(key_id: Option<String>, key_secret: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default payment HTTP client");
                reqwest::Client::new()
            });
        Self {
            http,
            base_url: RAZORPAY_API.to_string(),
            key_id,
            key_secret,
        }
    }

    /// Point at another API root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// No provider key: orders are local demo orders.
    pub fn is_demo(&self) -> bool {
        self.key_id.is_none()
    }

    /// Create an order for `credits` credits costing `amount` minor units.
    pub async fn create_order(
        &self,
        amount: i64,
        credits: i64,
        user_id: &str,
    ) -> Result<PaymentOrder, AppError> {
        if amount <= 0 {
            return Err(AppError::InvalidAmount(
                "amount must be positive".to_string(),
            ));
        }
        if credits <= 0 {
            return Err(AppError::InvalidAmount(
                "credits must be positive".to_string(),
            ));
        }

        let receipt = receipt_for(user_id);

        let Some(key_id) = &self.key_id else {
            let order = PaymentOrder {
                id: format!("order_demo_{}", uuid::Uuid::new_v4().simple()),
                amount,
                currency: CURRENCY.to_string(),
                receipt,
                credits,
                key_id: None,
                demo: true,
            };
            tracing::info!(user_id, order_id = %order.id, "Demo payment order created");
            return Ok(order);
        };

        let body = serde_json::json!({
            "amount": amount,
            "currency": CURRENCY,
            "receipt": receipt,
            "notes": {
                "user_id": user_id,
                "credits": credits.to_string(),
            }
        });

        let response = self
            .http
            .post(format!("{}/orders", self.base_url))
            .basic_auth(key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::PaymentProvider(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, body = %body, "Payment order creation rejected");
            return Err(AppError::PaymentProvider(format!("HTTP {}: {}", status, body)));
        }

        let created: OrderResponse = response
            .json()
            .await
            .map_err(|e| AppError::PaymentProvider(format!("JSON parse error: {}", e)))?;

        tracing::info!(user_id, order_id = %created.id, amount, credits, "Payment order created");

        Ok(PaymentOrder {
            id: created.id,
            amount: created.amount,
            currency: created.currency,
            receipt: created.receipt.unwrap_or(receipt),
            credits,
            key_id: Some(key_id.clone()),
            demo: false,
        })
    }
}

/// Provider receipts are capped at 40 characters.
fn receipt_for(user_id: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let mut receipt = format!("rcpt_{}_{}", user_id, &suffix[..8]);
    receipt.truncate(40);
    receipt
}
