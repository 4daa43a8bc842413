//! Application configuration loaded from environment variables.
//!
//! Only the session-signing secret is required. Every other option has a
//! local/demo default that keeps the server bootable without a durable
//! store, an identity-provider audience, or payment credentials. Those
//! defaults are never appropriate for production.

use std::env;
use std::time::Duration;

/// Shared secret used when `RAZORPAY_KEY_SECRET` is unset (demo only).
pub const DEMO_PAYMENT_SECRET: &str = "mirrorx_demo_payment_secret";

const DEFAULT_STORE_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port
    pub port: u16,
    /// Frontend URL allowed by CORS
    pub frontend_url: String,
    /// Request body limit (wardrobe images arrive base64-encoded)
    pub max_body_bytes: usize,

    // --- Durable store ---
    /// Firestore project; None selects the in-memory fallback store
    pub firestore_project_id: Option<String>,
    /// Upper bound on every storage call
    pub store_timeout: Duration,

    // --- Identity provider ---
    /// Expected audience (Google OAuth client ID); None means decode-only
    pub identity_audience: Option<String>,

    // --- Payments ---
    /// Razorpay key ID; None returns local demo orders
    pub payment_key_id: Option<String>,
    /// Razorpay key secret, also the HMAC key for payment signatures
    pub payment_key_secret: String,

    // --- Secrets ---
    /// JWT signing key for session tokens (raw bytes)
    pub jwt_signing_key: Vec<u8>,
}

impl Config {
    /// Deterministic config for tests.
    pub fn test_default() -> Self {
        Self {
            port: 8080,
            frontend_url: "http://localhost:5173".to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            firestore_project_id: None,
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            identity_audience: None,
            payment_key_id: None,
            payment_key_secret: "test_payment_secret".to_string(),
            jwt_signing_key: b"test_jwt_key_32_bytes_minimum!!".to_vec(),
        }
    }

    /// Load configuration from environment variables (and `.env` if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let jwt_signing_key = env::var("JWT_SECRET")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("JWT_SECRET"))?
            .into_bytes();

        Ok(Self {
            port: parse_or("PORT", 8080),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            max_body_bytes: parse_or("MAX_BODY_BYTES", DEFAULT_MAX_BODY_BYTES),
            firestore_project_id: optional("FIRESTORE_PROJECT_ID")
                .or_else(|| optional("GCP_PROJECT_ID")),
            store_timeout: Duration::from_millis(parse_or(
                "STORE_TIMEOUT_MS",
                DEFAULT_STORE_TIMEOUT_MS,
            )),
            identity_audience: optional("GOOGLE_CLIENT_ID"),
            payment_key_id: optional("RAZORPAY_KEY_ID"),
            payment_key_secret: optional("RAZORPAY_KEY_SECRET")
                .unwrap_or_else(|| DEMO_PAYMENT_SECRET.to_string()),
            jwt_signing_key,
        })
    }

    /// Whether payment signatures are checked against the public demo secret.
    pub fn payment_secret_is_default(&self) -> bool {
        self.payment_key_secret == DEMO_PAYMENT_SECRET
    }
}

/// Read a trimmed, non-empty variable.
fn optional(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
}
