// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod identity;
pub mod ledger;
pub mod password;
pub mod payment;
pub mod razorpay;
pub mod session;

pub use identity::{IdentityClaim, IdentityVerifier};
pub use ledger::CreditLedger;
pub use payment::{PaymentConfirmation, PaymentReconciler, Reconciliation};
pub use razorpay::{PaymentOrder, RazorpayClient};
pub use session::{SessionIssuer, SessionUser};
