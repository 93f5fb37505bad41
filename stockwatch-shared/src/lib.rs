//! # StockWatch Shared Library
//!
//! This crate contains the types and plumbing shared by the StockWatch API
//! server: credential handling, the stored-procedure gateway, the row
//! decoders that turn procedure output into named structures, and the
//! payment-provider boundary.
//!
//! ## Module Organization
//!
//! - `auth`: Token issuing, password hashing, request auth context
//! - `db`: Connection pool, procedure gateway, positional rows
//! - `models`: Per-resource row decoders (users, products, settings, ...)
//! - `payments`: Payment provider trait, Stripe REST client, webhook signatures
//! - `notify`: Password-reset notification delivery

pub mod auth;
pub mod db;
pub mod models;
pub mod notify;
pub mod payments;

/// Current version of the StockWatch shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
