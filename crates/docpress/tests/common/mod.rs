//! Shared test utilities for docpress integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated media/results roots and service startup
//! - In-process fakes for the office engine and the page rasterizer
//! - Shell-script stand-ins for the external programs (unix only)

pub mod fakes;
pub mod harness;

pub use fakes::*;
pub use harness::TestHarness;
