//! cnid Telemetry - logging setup for the CNI install daemon.
//!
//! # Example
//!
//! ```rust,no_run
//! use cnid_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), cnid_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Json)
//!     .with_directive("cnid_install=debug");
//!
//! setup_logging(&config)?;
//! tracing::info!("installer starting");
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
pub use logging::{LogConfig, LogFormat, setup_logging};
