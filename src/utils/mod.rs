//! Utilities Module
//!
//! Configuration and logging shared across the crate.

pub mod config;
pub mod logging;

pub use config::SignerConfig;
