//! # StockWatch API Server Library
//!
//! This library provides the HTTP layer of the StockWatch backend. The
//! binary in `main.rs` wires it to MySQL and Stripe; tests wire it to
//! in-memory fakes.
//!
//! ## Modules
//!
//! - `app`: Application state and router builder
//! - `config`: Configuration management
//! - `error`: Error handling and HTTP response mapping
//! - `middleware`: Security headers
//! - `routes`: API route handlers

pub mod app;
pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
