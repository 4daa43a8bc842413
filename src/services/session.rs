// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Session tokens (HS256 JWT).
//!
//! The only way a request obtains a user ID is [`SessionIssuer::authenticate`].

use crate::error::AppError;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Session lifetime.
pub const SESSION_LIFETIME: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// JWT claims structure.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    pub email: String,
    /// Expiration time (Unix timestamp)
    pub exp: usize,
    /// Issued at (Unix timestamp)
    pub iat: usize,
    /// Minted from an unverified identity claim
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub prv: bool,
}

/// Identity established by a valid session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub user_id: String,
    pub email: String,
    pub provisional: bool,
}

/// Mints and verifies bearer session tokens.
#[derive(Clone)]
pub struct SessionIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl SessionIssuer {
    pub fn new(signing_key: &[u8]) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(signing_key),
            decoding_key: DecodingKey::from_secret(signing_key),
        }
    }

    /// Create a session token for a user.
    pub fn issue(&self, user_id: &str, email: &str) -> anyhow::Result<String> {
        self.sign(user_id, email, false)
    }

    /// Session for a user signed in through an unverified identity claim.
    pub fn issue_provisional(&self, user_id: &str, email: &str) -> anyhow::Result<String> {
        self.sign(user_id, email, true)
    }

    fn sign(&self, user_id: &str, email: &str, provisional: bool) -> anyhow::Result<String> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() as usize;

        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            iat: now,
            exp: now + SESSION_LIFETIME.as_secs() as usize,
            prv: provisional,
        };

        Ok(encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.encoding_key,
        )?)
    }

    /// Validate a bearer token.
    ///
    /// `None` is [`AppError::Unauthenticated`]; a bad signature, expiry or
    /// shape is [`AppError::InvalidToken`].
    pub fn authenticate(&self, token: Option<&str>) -> Result<SessionUser, AppError> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AppError::Unauthenticated)?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| {
                tracing::debug!(error = %e, "Session token rejected");
                AppError::InvalidToken
            })?
            .claims;

        if claims.sub.is_empty() {
            return Err(AppError::InvalidToken);
        }

        Ok(SessionUser {
            user_id: claims.sub,
            email: claims.email,
            provisional: claims.prv,
        })
    }
}
