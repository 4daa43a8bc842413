// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Account routes: password signup/login, identity-token sign-in, profile.

use axum::{extract::State, routing::get, routing::post, Extension, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use super::{UserResponse, ValidJson};
use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::User;
use crate::services::password::{hash_password_async, verify_password_async};
use crate::services::IdentityClaim;
use crate::time_utils::now_rfc3339;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/identity", post(identity_sign_in))
}

pub fn protected_routes() -> Router<Arc<AppState>> {
    Router::new().route("/auth/me", get(me))
}

/// Single message for every login failure so accounts cannot be enumerated.
const BAD_CREDENTIALS: &str = "Invalid email or password";

#[derive(Debug, Deserialize, Validate)]
pub struct SignupRequest {
    #[serde(default)]
    #[validate(email(message = "A valid email is required"))]
    email: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "Password is required"))]
    password: String,
    #[serde(default)]
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    name: String,
    #[serde(default)]
    #[validate(length(max = 32, message = "Phone must be at most 32 characters"))]
    phone: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "Email is required"))]
    email: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "Password is required"))]
    password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct IdentityRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "Credential is required"))]
    credential: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: UserResponse,
    pub token: String,
}

async fn signup(
    State(state): State<Arc<AppState>>,
    ValidJson(req): ValidJson<SignupRequest>,
) -> Result<Json<AuthResponse>> {
    if state.store.find_user_by_email(&req.email).await?.is_some() {
        return Err(AppError::Conflict(
            "An account with this email already exists".to_string(),
        ));
    }

    let mut user = User::new(&req.email, &req.name, now_rfc3339());
    user.password_hash = Some(hash_password_async(req.password).await?);
    user.phone = req.phone.map(|p| p.trim().to_string()).filter(|p| !p.is_empty());

    // Raced signups for the same email are settled here by the unique index.
    let user = state.store.create_user(user).await?;

    tracing::info!(user_id = %user.id, "User signed up");
    session_response(&state, user, false).await
}

async fn login(
    State(state): State<Arc<AppState>>,
    ValidJson(req): ValidJson<LoginRequest>,
) -> Result<Json<AuthResponse>> {
    let Some(user) = state.store.find_user_by_email(&req.email).await? else {
        return Err(AppError::Validation(BAD_CREDENTIALS.to_string()));
    };

    let Some(hash) = user.password_hash.clone() else {
        tracing::info!(user_id = %user.id, "Password login attempted on identity-only account");
        return Err(AppError::Validation(
            "This account uses Google sign-in".to_string(),
        ));
    };

    if !verify_password_async(req.password, hash).await? {
        tracing::info!(user_id = %user.id, "Password login failed");
        return Err(AppError::Validation(BAD_CREDENTIALS.to_string()));
    }

    let user = state.store.record_login(&user.id, &now_rfc3339()).await?;
    tracing::info!(user_id = %user.id, "User logged in");
    session_response(&state, user, false).await
}

async fn identity_sign_in(
    State(state): State<Arc<AppState>>,
    ValidJson(req): ValidJson<IdentityRequest>,
) -> Result<Json<AuthResponse>> {
    let claim = state.identity_verifier.verify(&req.credential).await?;

    if !claim.trusted {
        tracing::warn!(
            subject = %claim.subject_id,
            email = %claim.email,
            "Untrusted identity claim; session will be provisional"
        );
    }

    let user = resolve_identity(&state, &claim).await?;
    let user = state.store.record_login(&user.id, &now_rfc3339()).await?;
    session_response(&state, user, !claim.trusted).await
}

/// Find, create or link the account for an identity claim.
///
/// Only trusted claims store an external identity. An untrusted claim may
/// create a fresh account or re-enter one that has neither a password nor a
/// verified identity, and nothing else. A trusted claim that reaches such an
/// account takes it over, which also ends its provisional sessions (see
/// `middleware::auth`).
async fn resolve_identity(state: &AppState, claim: &IdentityClaim) -> Result<User> {
    let Some(user) = state.store.find_user_by_email(&claim.email).await? else {
        let mut user = User::new(&claim.email, &claim.name, now_rfc3339());
        if claim.trusted {
            user.external_identity_id = Some(claim.subject_id.clone());
        }
        if let Some(avatar) = &claim.avatar_url {
            user.avatar_url = avatar.clone();
        }
        let user = state.store.create_user(user).await?;
        tracing::info!(user_id = %user.id, trusted = claim.trusted, "User created from identity claim");
        return Ok(user);
    };

    if !claim.trusted {
        if user.has_verified_credentials() {
            tracing::warn!(
                user_id = %user.id,
                subject = %claim.subject_id,
                "Refusing untrusted identity claim for a protected account"
            );
            return Err(AppError::IdentityNotVerified);
        }
        return Ok(user);
    }

    match user.external_identity_id.as_deref() {
        Some(linked) if linked == claim.subject_id => Ok(user),
        Some(_) => {
            tracing::warn!(
                user_id = %user.id,
                subject = %claim.subject_id,
                "Verified identity differs from the linked one; signing in without relinking"
            );
            Ok(user)
        }
        None => {
            if !user.has_password() {
                tracing::warn!(
                    user_id = %user.id,
                    "Verified identity takes over an account created from an unverified claim"
                );
            }
            let user = state
                .store
                .link_external_identity(&user.id, &claim.subject_id, claim.avatar_url.as_deref())
                .await?;
            tracing::info!(user_id = %user.id, "External identity linked");
            Ok(user)
        }
    }
}

async fn me(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<UserResponse>> {
    let user = state
        .store
        .find_user_by_id(&auth.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
    let credits = state.ledger.balance(&user.id).await?;
    Ok(Json(UserResponse::new(user, credits, auth.provisional)))
}

async fn session_response(
    state: &AppState,
    user: User,
    provisional: bool,
) -> Result<Json<AuthResponse>> {
    let token = if provisional {
        state.sessions.issue_provisional(&user.id, &user.email)?
    } else {
        state.sessions.issue(&user.id, &user.email)?
    };
    let credits = state.ledger.balance(&user.id).await?;

    Ok(Json(AuthResponse {
        user: UserResponse::new(user, credits, provisional),
        token,
    }))
}
