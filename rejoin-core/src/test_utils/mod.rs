//! Test utilities and helpers
//!
//! Common fixtures and builders to reduce duplication across the
//! pipeline tests.

pub mod fixtures;

pub use fixtures::*;
