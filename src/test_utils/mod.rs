//! Test utilities shared by use case and HTTP tests.
//!
//! This module provides:
//! - Test data factories with sensible defaults
//! - In-memory implementations of the store and the subscription source
//! - A builder for `AppState` backed by those mocks

mod app_state_builder;
mod factories;
mod sync_mocks;

pub use app_state_builder::*;
pub use factories::*;
pub use sync_mocks::*;
