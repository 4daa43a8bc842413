// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Credit purchase: order creation and checkout confirmation.

use axum::{extract::State, routing::post, Extension, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use super::{CreditsResponse, ValidJson};
use crate::error::Result;
use crate::middleware::auth::AuthUser;
use crate::services::{PaymentConfirmation, PaymentOrder};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/payment/order", post(create_order))
        .route("/payment/verify", post(verify_payment))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderRequest {
    /// Minor units (paise)
    #[validate(range(min = 1, message = "amount must be positive"))]
    amount: i64,
    #[validate(range(min = 1, max = 1_000_000, message = "credits must be between 1 and 1000000"))]
    credits: i64,
}

/// Checkout callback as posted by the frontend. Accepts both our field
/// names and the provider's `razorpay_*` names.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentRequest {
    // Capped and ASCII-only so the derived transaction key stays within
    // storage document-ID limits after percent-encoding.
    #[serde(default, alias = "razorpay_order_id")]
    #[validate(length(min = 1, max = 128, message = "orderId must be 1-128 characters"))]
    #[validate(custom(function = "validate_provider_id", message = "orderId has invalid characters"))]
    order_id: String,
    #[serde(default, alias = "razorpay_payment_id")]
    #[validate(length(min = 1, max = 128, message = "paymentId must be 1-128 characters"))]
    #[validate(custom(function = "validate_provider_id", message = "paymentId has invalid characters"))]
    payment_id: String,
    #[serde(default, alias = "razorpay_signature")]
    #[validate(length(min = 1, max = 256, message = "signature must be 1-256 characters"))]
    signature: String,
    #[validate(range(min = 1, message = "creditsToAdd must be positive"))]
    credits_to_add: i64,
    /// Minor units; when given it must match the order
    #[serde(default)]
    #[validate(range(min = 0, message = "amount must not be negative"))]
    amount: i64,
}

fn validate_provider_id(id: &str) -> std::result::Result<(), validator::ValidationError> {
    if id.chars().all(|c| c.is_ascii_graphic()) {
        Ok(())
    } else {
        Err(validator::ValidationError::new("provider_id_charset"))
    }
}

#[derive(Debug, Serialize)]
pub struct VerifyPaymentResponse {
    pub success: bool,
    pub credits: CreditsResponse,
    pub already_processed: bool,
    pub transaction_id: String,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    ValidJson(req): ValidJson<CreateOrderRequest>,
) -> Result<Json<PaymentOrder>> {
    let order = state
        .payment_gateway
        .create_order(req.amount, req.credits, &auth.user_id)
        .await?;
    state
        .payments
        .register_order(&auth.user_id, &order.id, order.amount, order.credits)
        .await?;
    Ok(Json(order))
}

async fn verify_payment(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    ValidJson(req): ValidJson<VerifyPaymentRequest>,
) -> Result<Json<VerifyPaymentResponse>> {
    let outcome = state
        .payments
        .reconcile(
            &auth.user_id,
            PaymentConfirmation {
                order_id: req.order_id.trim(),
                payment_id: req.payment_id.trim(),
                signature: &req.signature,
                amount_minor_units: req.amount,
                credits: req.credits_to_add,
            },
        )
        .await?;

    Ok(Json(VerifyPaymentResponse {
        success: true,
        credits: outcome.balance().into(),
        already_processed: outcome.is_duplicate(),
        transaction_id: outcome.transaction().id.clone(),
    }))
}
