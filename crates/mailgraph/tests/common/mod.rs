//! Shared test utilities for mailgraph integration tests.
//!
//! This module provides:
//! - `TestHarness` with an isolated data directory and mock mailbox and
//!   ingestion servers
//! - Builders for configs and Gmail API payloads

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
