//! Shared test helpers

mod fixtures;

pub use fixtures::*;
