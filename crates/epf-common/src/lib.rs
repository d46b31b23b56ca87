//! EPF Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared utilities for the EPF importer workspace.
//!
//! - **Logging**: subscriber configuration and initialization
//!
//! # Example
//!
//! ```no_run
//! use epf_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

pub mod logging;

pub use logging::{init_logging, LogConfig};
