//! pkghost telemetry - logging for the provider host and its frontends.
//!
//! The host itself only emits `tracing` events. This crate installs the
//! global subscriber: an `EnvFilter` built from a level plus directives, one
//! of four output formats, and stdout, stderr or daily-rolling files as the
//! target.
//!
//! # Example
//!
//! ```rust,no_run
//! use pkghost_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), pkghost_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Compact)
//!     .with_directive("pkghost_providers=debug");
//! setup_logging(&config)?;
//! tracing::info!("logging ready");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{
    FileLogConfig, FileRotation, LogConfig, LogFormat, LogTarget, setup_default_logging,
    setup_logging,
};
