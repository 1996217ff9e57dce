//! # Hyke Core
//!
//! Configuration and error types shared by the status engine crates.

pub mod config;
pub mod error;

pub use config::HykeConfig;
pub use error::{HykeError, Result};
