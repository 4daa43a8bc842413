// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! HTTP route handlers.

pub mod auth;
pub mod credits;
pub mod payment;
pub mod wardrobe;

use crate::error::AppError;
use crate::middleware::auth::require_auth;
use crate::models::{CreditBalance, User};
use crate::AppState;
use axum::extract::{DefaultBodyLimit, FromRequest, Request, State};
use axum::http::{header, Method};
use axum::{middleware, routing::get, Json, Router};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use validator::Validate;

/// Prefix for every API route.
pub const API_BASE_PATH: &str = "/api";

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub storage: String,
    pub degraded: bool,
    pub identity_verification: String,
}

/// Health check response
async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let identity_verification = if state.identity_verifier.is_verifying() {
        "verified"
    } else {
        "decode_only"
    };
    Json(HealthResponse {
        status: "ok".to_string(),
        storage: state.store.backend_kind().as_str().to_string(),
        degraded: state.store.is_degraded(),
        identity_verification: identity_verification.to_string(),
    })
}

/// JSON body that has been deserialized and validated.
///
/// Any body rejection (bad JSON, wrong content type) or rule violation is an
/// [`AppError::Validation`].
pub struct ValidJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| AppError::Validation(rejection.body_text()))?;
        value.validate()?;
        Ok(Self(value))
    }
}

/// Credit balance as returned to clients.
#[derive(Debug, Serialize)]
pub struct CreditsResponse {
    pub daily: i64,
    pub purchased: i64,
}

impl From<CreditBalance> for CreditsResponse {
    fn from(balance: CreditBalance) -> Self {
        Self {
            daily: balance.daily,
            purchased: balance.purchased,
        }
    }
}

/// Public view of an account; never includes the password hash.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub avatar: String,
    pub credits: CreditsResponse,
    /// Signed in through an unverified identity claim.
    pub provisional: bool,
}

impl UserResponse {
    pub fn new(user: User, credits: CreditBalance, provisional: bool) -> Self {
        Self {
            id: user.id,
            name: user.display_name,
            email: user.email,
            phone: user.phone,
            avatar: user.avatar_url,
            credits: credits.into(),
            provisional,
        }
    }
}

/// Build the complete router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    // CORS layer - allow requests from frontend URL and localhost (for dev)
    let frontend_url = state.config.frontend_url.clone();
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::AllowOrigin::predicate(
            move |origin: &axum::http::HeaderValue, _request_parts: &axum::http::request::Parts| {
                let origin_str = origin.to_str().unwrap_or("");
                origin_str == frontend_url
                    || origin_str.starts_with("http://localhost")
                    || origin_str.starts_with("http://127.0.0.1")
            },
        ))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]);

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(health_check))
        .merge(auth::routes());

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .merge(auth::protected_routes())
        .merge(wardrobe::routes())
        .merge(credits::routes())
        .merge(payment::routes())
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let api = Router::new().merge(public_routes).merge(protected_routes);

    Router::new()
        .route("/health", get(health_check))
        .nest(API_BASE_PATH, api)
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        .layer(middleware::from_fn(
            crate::middleware::security::add_security_headers,
        ))
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}
