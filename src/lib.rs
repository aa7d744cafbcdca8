//! Membership Checkout Client Library
//!
//! This library provides the card checkout flow for membership purchases:
//! card tokenization through Mercado Pago, payment network detection,
//! submission to the billing backend, and the submission state machine that
//! ties them together.
//!
//! # Modules
//!
//! - `core`: Checkout domain (orchestrator, models, errors).
//! - `integrations`: External service clients (tokenization provider, backend).
//! - `config`: Configuration management.
//! - `detector`: Payment method detection by BIN.
//! - `errors`: Error handling types.
//! - `guard`: Scoped busy flags.
//! - `models`: Card, token, request and result models.
//! - `orchestrator`: Submission state machine.
//! - `sdk_client`: Tokenization client seam and shared handle.
//! - `submitter`: Billing backend client.
//! - `tokenizer`: Card tokenization.
//! - `validation`: Card input formatting and checks.

pub mod core;
pub mod integrations;

// Re-export primary modules for shared use in tests and binaries
pub mod config;
pub mod detector;
pub mod errors;
pub mod guard;
pub mod models;
pub mod orchestrator;
pub mod sdk_client;
pub mod submitter;
pub mod tokenizer;
pub mod validation;
