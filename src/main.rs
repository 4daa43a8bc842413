// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! MirrorX API Server
//!
//! Accounts, wardrobe, credits and payments for the virtual try-on frontend.

use mirrorx_backend::{config::Config, db::DataStore, AppState};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging();

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(port = config.port, "Starting MirrorX API");

    if config.payment_secret_is_default() {
        tracing::warn!(
            "RAZORPAY_KEY_SECRET is not set: using the demo payment secret, \
             payment signatures are NOT secure"
        );
    }

    // Choose the storage backend once, for the whole process
    let store = DataStore::connect(&config).await;
    tracing::info!(
        backend = store.backend_kind().as_str(),
        degraded = store.is_degraded(),
        "Storage backend selected"
    );

    // Build shared state
    let state = Arc::new(AppState::new(config.clone(), store)?);
    if state.payment_gateway.is_demo() {
        tracing::warn!("Payment key ID not set: checkout hands out demo orders");
    }

    // Build router
    let app = mirrorx_backend::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for directive in ["mirrorx_backend=debug", "info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(format)
        .init();
}
