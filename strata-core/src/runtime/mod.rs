//! Async runtime management
//!
//! Provides the Tokio runtime used for dataset downloads.

pub mod executor;

pub use executor::{IoRuntime, RuntimeConfig};
