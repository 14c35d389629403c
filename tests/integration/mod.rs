//! Integration test suite for steward
//!
//! End-to-end tests that drive the update engine against a local HTTP server
//! standing in for the metadata feed and the artifact store, plus tests of the
//! `steward` binary itself.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **cli**: the `steward` binary (help, status, request, config errors)
//! - **fetch**: artifact downloads over HTTP (names, status codes, cancellation)
//! - **update_cycle**: check → request → install → handoff → cleanup

mod cli;
mod common;
mod fetch;
mod update_cycle;
