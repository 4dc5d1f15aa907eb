//! Shared test utilities for fileproc integration tests.
//!
//! - `TestHarness` for runs over files in a temp directory
//! - `RecordingSink` to capture diagnostics
//! - Ready-made transformations

pub mod harness;
pub mod transforms;

pub use harness::{RecordingSink, TestHarness};
pub use transforms::*;
