//! Common test utilities
//!
//! This module is shared across all integration tests

#![allow(dead_code)]

pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::{wait_until, GatedScorer, TestEnvironment};
