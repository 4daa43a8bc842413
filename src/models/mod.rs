// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod credits;
pub mod order;
pub mod transaction;
pub mod user;
pub mod wardrobe;

pub use credits::CreditBalance;
pub use order::Order;
pub use transaction::{Transaction, TransactionStatus};
pub use user::User;
pub use wardrobe::WardrobeItem;
