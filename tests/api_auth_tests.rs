// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! API authentication and CORS tests.
//!
//! These tests verify that:
//! 1. Signup/login issue sessions and report the right failures
//! 2. Protected routes reject missing (401) and bad (403) tokens
//! 3. CORS preflight requests return correct headers

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;
use serde_json::json;
use std::time::{SystemTime, UNIX_EPOCH};
use tower::ServiceExt;

mod common;
use common::{create_test_app, send, signup};

/// Create a session token with an arbitrary expiry.
fn create_test_jwt(user_id: &str, signing_key: &[u8], exp_offset_secs: i64) -> String {
    #[derive(Serialize)]
    struct Claims {
        sub: String,
        email: String,
        exp: i64,
        iat: i64,
    }

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;

    let claims = Claims {
        sub: user_id.to_string(),
        email: "a@x.com".to_string(),
        exp: now + exp_offset_secs,
        iat: now,
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(signing_key),
    )
    .unwrap()
}

#[tokio::test]
async fn test_signup_returns_user_and_token() {
    let (app, _) = create_test_app();

    let (status, body) = send(
        &app,
        "POST",
        "/api/auth/signup",
        None,
        Some(json!({ "email": "A@X.com", "password": "p", "name": "A", "phone": "555" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["email"], "a@x.com");
    assert_eq!(body["user"]["name"], "A");
    assert_eq!(body["user"]["phone"], "555");
    assert_eq!(body["user"]["credits"], json!({ "daily": 5, "purchased": 0 }));
    assert_eq!(body["user"]["provisional"], false);
    assert!(body["user"].get("password_hash").is_none());
    assert!(body["token"].as_str().is_some_and(|t| !t.is_empty()));
}

#[tokio::test]
async fn test_signup_duplicate_email_conflicts() {
    let (app, _) = create_test_app();
    signup(&app, "dup@x.com").await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/auth/signup",
        None,
        Some(json!({ "email": "DUP@x.com ", "password": "q", "name": "B" })),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");
}

#[tokio::test]
async fn test_signup_missing_fields_is_validation_error() {
    let (app, _) = create_test_app();

    for body in [
        json!({ "password": "p", "name": "A" }),
        json!({ "email": "a@x.com", "name": "A" }),
        json!({ "email": "a@x.com", "password": "p" }),
        json!({ "email": "not-an-email", "password": "p", "name": "A" }),
    ] {
        let (status, response) = send(&app, "POST", "/api/auth/signup", None, Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response["error"], "validation_error");
    }
}

#[tokio::test]
async fn test_login_success_and_failures() {
    let (app, _) = create_test_app();
    signup(&app, "login@x.com").await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({ "email": "Login@X.com", "password": "p" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["email"], "login@x.com");

    for (email, password) in [("login@x.com", "wrong"), ("nobody@x.com", "p")] {
        let (status, body) = send(
            &app,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({ "email": email, "password": password })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_error");
    }
}

#[tokio::test]
async fn test_protected_route_without_token() {
    let (app, _) = create_test_app();

    let (status, body) = send(&app, "GET", "/api/wardrobe", None, None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthenticated");
}

#[tokio::test]
async fn test_protected_route_with_invalid_token() {
    let (app, _) = create_test_app();

    let (status, body) = send(&app, "GET", "/api/wardrobe", Some("invalid.token.here"), None).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "invalid_token");
}

#[tokio::test]
async fn test_protected_route_with_expired_token() {
    let (app, state) = create_test_app();
    let (user_id, _) = signup(&app, "expired@x.com").await;
    let token = create_test_jwt(&user_id, &state.config.jwt_signing_key, -10);

    let (status, _) = send(&app, "GET", "/api/credits", Some(&token), None).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_protected_route_with_foreign_key_token() {
    let (app, _) = create_test_app();
    let (user_id, _) = signup(&app, "forged@x.com").await;
    let token = create_test_jwt(&user_id, b"some_other_signing_key_32_bytes!", 3600);

    let (status, _) = send(&app, "GET", "/api/credits", Some(&token), None).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_me_returns_profile_and_credits() {
    let (app, _) = create_test_app();
    let (user_id, token) = signup(&app, "me@x.com").await;

    let (status, body) = send(&app, "GET", "/api/auth/me", Some(&token), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], user_id.as_str());
    assert_eq!(body["credits"]["daily"], 5);
    assert!(body["avatar"]
        .as_str()
        .unwrap()
        .starts_with("https://ui-avatars.com/api/?name=Test%20User"));
}

#[tokio::test]
async fn test_deduct_until_insufficient_credits() {
    let (app, _) = create_test_app();
    let (_, token) = signup(&app, "deduct@x.com").await;

    for expected_daily in (0..5).rev() {
        let (status, body) = send(&app, "POST", "/api/credits/deduct", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "daily": expected_daily, "purchased": 0 }));
    }

    let (status, body) = send(&app, "POST", "/api/credits/deduct", Some(&token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "insufficient_credits");

    let (_, body) = send(&app, "GET", "/api/credits", Some(&token), None).await;
    assert_eq!(body, json!({ "daily": 0, "purchased": 0 }));
}

#[tokio::test]
async fn test_health_reports_backend() {
    let (app, _) = create_test_app();

    for uri in ["/health", "/api/health"] {
        let (status, body) = send(&app, "GET", uri, None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["storage"], "memory");
        assert_eq!(body["degraded"], true);
        assert_eq!(body["identity_verification"], "decode_only");
    }
}

#[tokio::test]
async fn test_cors_preflight() {
    let (app, _) = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/api/credits/deduct")
                .header(header::ORIGIN, "http://localhost:5173")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "authorization")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .unwrap(),
        "http://localhost:5173"
    );
}

#[tokio::test]
async fn test_cors_rejects_unknown_origin() {
    let (app, _) = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/api/credits")
                .header(header::ORIGIN, "https://evil.example")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(response
        .headers()
        .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        .is_none());
}
