// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! MirrorX: backend for an AI virtual try-on service
//!
//! This crate provides the account, wardrobe, credit and payment API
//! behind the try-on frontend.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::DataStore;
use services::{CreditLedger, IdentityVerifier, PaymentReconciler, RazorpayClient, SessionIssuer};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: DataStore,
    pub ledger: CreditLedger,
    pub sessions: SessionIssuer,
    pub identity_verifier: IdentityVerifier,
    pub payments: PaymentReconciler,
    pub payment_gateway: RazorpayClient,
}

impl AppState {
    /// Wire every service onto an already-selected store.
    pub fn new(config: Config, store: DataStore) -> anyhow::Result<Self> {
        let identity_verifier = IdentityVerifier::new(config.identity_audience.as_deref())?;
        Ok(Self::with_identity_verifier(config, store, identity_verifier))
    }

    /// Same as [`AppState::new`] with a caller-supplied identity verifier.
    pub fn with_identity_verifier(
        config: Config,
        store: DataStore,
        identity_verifier: IdentityVerifier,
    ) -> Self {
        let ledger = CreditLedger::new(store.clone());
        let payments = PaymentReconciler::new(
            store.clone(),
            ledger.clone(),
            config.payment_key_secret.clone(),
        );
        let payment_gateway = RazorpayClient::new(
            config.payment_key_id.clone(),
            config.payment_key_secret.clone(),
        );
        let sessions = SessionIssuer::new(&config.jwt_signing_key);

        Self {
            config,
            store,
            ledger,
            sessions,
            identity_verifier,
            payments,
            payment_gateway,
        }
    }
}
