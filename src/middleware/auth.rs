// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Session authentication middleware.

use crate::error::AppError;
use crate::AppState;
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Authenticated user extracted from the session token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub email: String,
    /// Session came from an unverified identity claim.
    pub provisional: bool,
}

/// Middleware that requires a valid bearer session token.
///
/// A provisional session stays valid only while its account has no password
/// and no verified identity; once the real owner claims the account, every
/// provisional token for it is refused.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .map(|h| bearer_token(h).ok_or(AppError::Unauthenticated))
        .transpose()?;

    let session = state.sessions.authenticate(token)?;

    if session.provisional {
        let user = state.store.find_user_by_id(&session.user_id).await?;
        let unclaimed = matches!(&user, Some(user) if !user.has_verified_credentials());
        if !unclaimed {
            tracing::warn!(
                user_id = %session.user_id,
                "Provisional session refused: account is gone or now has verified credentials"
            );
            return Err(AppError::InvalidToken);
        }
    }

    request.extensions_mut().insert(AuthUser {
        user_id: session.user_id,
        email: session.email,
        provisional: session.provisional,
    });

    Ok(next.run(request).await)
}

fn bearer_token(header_value: &str) -> Option<&str> {
    let (scheme, token) = header_value.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then_some(token.trim())
}
