//! Cadence Types - Shared domain types
//!
//! This crate contains the vocabulary shared by the billing engine and its
//! boundary services:
//! - Identifiers for users, plans, subscriptions and payments
//! - Plans and their entitlement limits
//! - Subscriptions, canonical statuses, billing cycles and payment platforms
//! - Payments, usage periods and entitlement checks

pub mod entitlement;
pub mod error;
pub mod ids;
pub mod payment;
pub mod plan;
pub mod subscription;
pub mod usage;

pub use entitlement::*;
pub use error::*;
pub use ids::*;
pub use payment::*;
pub use plan::*;
pub use subscription::*;
pub use usage::*;
