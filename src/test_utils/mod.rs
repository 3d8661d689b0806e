//! Test utilities for use case and HTTP tests.
//!
//! This module provides:
//! - Test data factories for creating valid test fixtures
//! - In-memory repository implementations for mocking persistence
//! - A fake payment provider with request counters
//! - Helper builders for constructing use case instances with test dependencies

mod app_state_builder;
mod billing_mocks;
mod factories;
mod provider_mocks;

pub use app_state_builder::*;
pub use billing_mocks::*;
pub use factories::*;
pub use provider_mocks::*;
