//! News-intelligence backend core: query normalization, corpus search,
//! external-source fan-out, a replayable per-job event bus, the search-job
//! and deep-search state machines, callback ingress, and the timeout/purge
//! sweeper.
//!
//! This crate is the core library; it owns no transport (no HTTP server, no
//! CLI) — an embedder wires `lifecycle::Context` into whatever front door it
//! needs.

pub mod config;
pub mod deep;
pub mod domain;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod repository;
pub mod search;
pub mod sweeper;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::CoreConfig;
pub use error::{CoreError, FailureCategory, FailureCode, FailureReason, Result};
pub use lifecycle::Context;
