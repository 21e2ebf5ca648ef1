//! Autarch runtime library.
//!
//! Exposes every module so the binary and the integration tests under
//! `tests/` can assemble a runtime the same way `main` does.

pub mod agent;
pub mod config;
pub mod decision;
pub mod http;
pub mod market;
pub mod middleware;
pub mod models;
pub mod rpc;
pub mod rules;
pub mod runtime;
pub mod sse;
pub mod wallet;
