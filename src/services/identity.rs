// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Google Sign-In ID token verification.
//!
//! Two modes, tried in order:
//! 1. Verified: RS256 signature against Google's JWKS, issuer, expiry and
//!    the configured audience. Produces a `trusted` claim.
//! 2. Decode-only: the payload is parsed without any signature check and
//!    the claim is marked untrusted. Used when no audience is configured,
//!    when the key set cannot be reached, or when the token fails signature
//!    or claim validation.
//!
//! Untrusted claims are provisional and must never grant more than a new
//! account's defaults (see `routes::auth`). A malformed token never falls
//! through: it is rejected with [`AppError::InvalidToken`].

use crate::error::AppError;
use anyhow::Context;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::header::CACHE_CONTROL;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

const GOOGLE_JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
const GOOGLE_ISSUERS: [&str; 2] = ["https://accounts.google.com", "accounts.google.com"];
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);
/// Upper bound on the whole verified-mode attempt, key fetch included.
const VERIFY_TIMEOUT: Duration = Duration::from_secs(8);
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
const CLOCK_SKEW_SECS: u64 = 60;

/// Normalized identity extracted from an ID token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityClaim {
    pub subject_id: String,
    pub email: String,
    pub name: String,
    pub avatar_url: Option<String>,
    /// Signature, issuer, audience and expiry were all checked.
    pub trusted: bool,
}

/// Why verified mode did not produce a claim.
#[derive(Debug)]
enum VerifyFailure {
    /// This token failed signature/claim validation.
    Rejected(String),
    /// Key material could not be obtained; applies to every token.
    Unavailable(String),
}

#[derive(Clone)]
enum VerifierMode {
    Google { audience: String },
    /// Fixed key; for deterministic local/integration tests.
    StaticKey {
        audience: String,
        algorithm: Algorithm,
        decoding_key: Arc<DecodingKey>,
    },
    DecodeOnly,
}

#[derive(Clone)]
struct JwksCacheEntry {
    keys_by_kid: HashMap<String, Arc<DecodingKey>>,
    expires_at: Instant,
}

/// Verifier for Google-issued ID tokens.
pub struct IdentityVerifier {
    http_client: reqwest::Client,
    jwks_url: String,
    mode: VerifierMode,
    jwks_cache: RwLock<Option<JwksCacheEntry>>,
    refresh_lock: Mutex<()>,
    /// Set once, never cleared: verified mode is off for the process lifetime.
    degraded: AtomicBool,
}

impl IdentityVerifier {
    /// Production verifier. `None` audience means decode-only from the start.
    pub fn new(audience: Option<&str>) -> anyhow::Result<Self> {
        let mode = match audience {
            Some(audience) => {
                tracing::info!(audience = %audience, "Identity verification enabled");
                VerifierMode::Google {
                    audience: audience.to_string(),
                }
            }
            None => {
                tracing::error!(
                    "GOOGLE_CLIENT_ID is not set: identity tokens are decoded WITHOUT \
                     signature verification and every claim is untrusted"
                );
                VerifierMode::DecodeOnly
            }
        };
        Self::with_mode(mode)
    }

    /// Verifier with a fixed key instead of Google's JWKS.
    pub fn new_with_static_key(
        audience: &str,
        algorithm: Algorithm,
        decoding_key: DecodingKey,
    ) -> anyhow::Result<Self> {
        Self::with_mode(VerifierMode::StaticKey {
            audience: audience.to_string(),
            algorithm,
            decoding_key: Arc::new(decoding_key),
        })
    }

    /// Point the Google mode at another JWKS endpoint.
    pub fn with_jwks_url(mut self, url: impl Into<String>) -> Self {
        self.jwks_url = url.into();
        self
    }

    fn with_mode(mode: VerifierMode) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .context("failed building identity HTTP client")?;

        Ok(Self {
            http_client,
            jwks_url: GOOGLE_JWKS_URL.to_string(),
            mode,
            jwks_cache: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            degraded: AtomicBool::new(false),
        })
    }

    /// Whether claims can currently come out trusted.
    pub fn is_verifying(&self) -> bool {
        !matches!(self.mode, VerifierMode::DecodeOnly) && !self.degraded.load(Ordering::Acquire)
    }

    /// Verify a raw ID token.
    pub async fn verify(&self, raw_token: &str) -> Result<IdentityClaim, AppError> {
        let raw_token = raw_token.trim();
        let unverified = decode_unverified(raw_token)?;

        if !self.is_verifying() {
            return unverified.into_claim(false);
        }

        let attempt = tokio::time::timeout(VERIFY_TIMEOUT, self.verify_signed(raw_token)).await;

        match attempt {
            Ok(Ok(claims)) => claims.into_claim(true),
            Ok(Err(VerifyFailure::Rejected(reason))) => {
                tracing::warn!(
                    reason = %reason,
                    subject = %unverified.sub.as_deref().unwrap_or("<missing>"),
                    "Identity token failed verification; using decoded payload as untrusted"
                );
                unverified.into_claim(false)
            }
            Ok(Err(VerifyFailure::Unavailable(reason))) => {
                self.degrade(&reason);
                unverified.into_claim(false)
            }
            Err(_) => {
                self.degrade("identity verification timed out");
                unverified.into_claim(false)
            }
        }
    }

    /// Switch to decode-only for the rest of the process; logs only the first time.
    fn degrade(&self, reason: &str) {
        if !self.degraded.swap(true, Ordering::AcqRel) {
            tracing::error!(
                reason = %reason,
                "DEGRADED MODE: identity key set unavailable, identity tokens are now \
                 decoded WITHOUT signature verification for the process lifetime"
            );
        }
    }

    async fn verify_signed(&self, token: &str) -> Result<IdTokenClaims, VerifyFailure> {
        let header = decode_header(token)
            .map_err(|e| VerifyFailure::Rejected(format!("invalid JWT header: {e}")))?;

        let (audience, algorithm, decoding_key) = match &self.mode {
            VerifierMode::StaticKey {
                audience,
                algorithm,
                decoding_key,
            } => (audience.as_str(), *algorithm, decoding_key.clone()),
            VerifierMode::Google { audience } => {
                if header.alg != Algorithm::RS256 {
                    return Err(VerifyFailure::Rejected(format!(
                        "unexpected JWT alg: {:?}",
                        header.alg
                    )));
                }
                let kid = header
                    .kid
                    .ok_or_else(|| VerifyFailure::Rejected("missing JWT kid".to_string()))?;
                let key = self.decoding_key_for_kid(&kid).await?;
                (audience.as_str(), Algorithm::RS256, key)
            }
            VerifierMode::DecodeOnly => {
                return Err(VerifyFailure::Unavailable(
                    "verification disabled".to_string(),
                ))
            }
        };

        let mut validation = Validation::new(algorithm);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.set_issuer(&GOOGLE_ISSUERS);
        validation.set_audience(&[audience]);
        validation.leeway = CLOCK_SKEW_SECS;

        let token_data = decode::<IdTokenClaims>(token, decoding_key.as_ref(), &validation)
            .map_err(|e| VerifyFailure::Rejected(format!("JWT validation failed: {e}")))?;

        if token_data.claims.email_verified == Some(false) {
            return Err(VerifyFailure::Rejected(
                "email_verified claim is false".to_string(),
            ));
        }

        Ok(token_data.claims)
    }

    async fn decoding_key_for_kid(&self, kid: &str) -> Result<Arc<DecodingKey>, VerifyFailure> {
        if let Some(key) = self.lookup_cached_key(kid).await {
            return Ok(key);
        }

        // Keys rotate: refresh once even if the cache looks fresh.
        for force_refresh in [false, true] {
            self.refresh_jwks(force_refresh).await?;
            if let Some(key) = self.lookup_cached_key(kid).await {
                return Ok(key);
            }
        }

        Err(VerifyFailure::Rejected(format!(
            "JWT kid not found in JWKS: {kid}"
        )))
    }

    async fn lookup_cached_key(&self, kid: &str) -> Option<Arc<DecodingKey>> {
        let cache = self.jwks_cache.read().await;
        let now = Instant::now();
        cache
            .as_ref()
            .filter(|entry| entry.expires_at > now)
            .and_then(|entry| entry.keys_by_kid.get(kid))
            .cloned()
    }

    async fn refresh_jwks(&self, force_refresh: bool) -> Result<(), VerifyFailure> {
        let _guard = self.refresh_lock.lock().await;

        if !force_refresh {
            let cache = self.jwks_cache.read().await;
            if cache
                .as_ref()
                .is_some_and(|entry| entry.expires_at > Instant::now())
            {
                return Ok(());
            }
        }

        tracing::debug!(jwks_url = %self.jwks_url, "Refreshing identity JWKS cache");

        let response = self
            .http_client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| VerifyFailure::Unavailable(format!("JWKS request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(VerifyFailure::Unavailable(format!(
                "JWKS request returned status {}",
                response.status()
            )));
        }

        let ttl = response
            .headers()
            .get(CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .and_then(max_age)
            .unwrap_or(DEFAULT_CACHE_TTL);

        let jwks: Jwks = response
            .json()
            .await
            .map_err(|e| VerifyFailure::Unavailable(format!("invalid JWKS JSON: {e}")))?;

        let keys_by_kid: HashMap<String, Arc<DecodingKey>> = jwks
            .keys
            .into_iter()
            .filter(|jwk| jwk.kty == "RSA" && !jwk.kid.trim().is_empty())
            .filter(|jwk| jwk.alg.as_deref().map_or(true, |alg| alg == "RS256"))
            .filter_map(|jwk| match DecodingKey::from_rsa_components(&jwk.n, &jwk.e) {
                Ok(key) => Some((jwk.kid, Arc::new(key))),
                Err(e) => {
                    tracing::warn!(error = %e, kid = %jwk.kid, "Skipping invalid RSA JWKS key");
                    None
                }
            })
            .collect();

        if keys_by_kid.is_empty() {
            return Err(VerifyFailure::Unavailable(
                "JWKS response did not include any usable RSA keys".to_string(),
            ));
        }

        *self.jwks_cache.write().await = Some(JwksCacheEntry {
            keys_by_kid,
            expires_at: Instant::now() + ttl,
        });

        tracing::debug!(ttl_secs = ttl.as_secs(), "Identity JWKS cache refreshed");
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct Jwks {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kid: String,
    kty: String,
    alg: Option<String>,
    n: String,
    e: String,
}

/// Payload fields of a Google ID token that matter here.
#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: Option<String>,
    email: Option<String>,
    email_verified: Option<bool>,
    name: Option<String>,
    picture: Option<String>,
}

impl IdTokenClaims {
    fn into_claim(self, trusted: bool) -> Result<IdentityClaim, AppError> {
        let subject_id = self
            .sub
            .filter(|s| !s.trim().is_empty())
            .ok_or(AppError::InvalidToken)?;
        let email = self
            .email
            .map(|e| crate::models::user::normalize_email(&e))
            .filter(|e| e.contains('@'))
            .ok_or(AppError::InvalidToken)?;

        let name = self
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());

        Ok(IdentityClaim {
            subject_id,
            email,
            name,
            avatar_url: self.picture.filter(|p| !p.trim().is_empty()),
            trusted,
        })
    }
}

/// Parse header and payload without checking the signature.
///
/// Anything that is not three dot-separated segments with a JSON header and
/// a JSON object payload is malformed.
fn decode_unverified(token: &str) -> Result<IdTokenClaims, AppError> {
    let mut segments = token.split('.');
    let (Some(header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(AppError::InvalidToken);
    };

    let decode_segment = |segment: &str| {
        URL_SAFE_NO_PAD
            .decode(segment.trim_end_matches('='))
            .map_err(|_| AppError::InvalidToken)
    };

    serde_json::from_slice::<serde_json::Map<String, serde_json::Value>>(&decode_segment(
        header,
    )?)
    .map_err(|_| AppError::InvalidToken)?;

    serde_json::from_slice(&decode_segment(payload)?).map_err(|_| AppError::InvalidToken)
}

fn max_age(cache_control: &str) -> Option<Duration> {
    cache_control
        .split(',')
        .filter_map(|directive| directive.trim().strip_prefix("max-age="))
        .find_map(|raw| raw.trim_matches('"').parse().ok())
        .map(Duration::from_secs)
}
