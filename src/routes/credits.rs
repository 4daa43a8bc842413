// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Credit balance and metered usage.

use axum::{extract::State, routing::get, routing::post, Extension, Json, Router};
use std::sync::Arc;

use super::CreditsResponse;
use crate::error::Result;
use crate::middleware::auth::AuthUser;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/credits", get(balance))
        .route("/credits/deduct", post(deduct))
}

async fn balance(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<CreditsResponse>> {
    Ok(Json(state.ledger.balance(&auth.user_id).await?.into()))
}

/// Spend one credit for a generation.
async fn deduct(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<CreditsResponse>> {
    Ok(Json(state.ledger.deduct(&auth.user_id).await?.into()))
}
