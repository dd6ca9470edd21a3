//! # GPCN Common
//!
//! Shared utilities for the GPCN provisioner crates.
//!
//! ## Logging
//!
//! ```no_run
//! use gpcn_common::{init_logging_with_format, LogFormat};
//!
//! init_logging_with_format("info", LogFormat::Pretty).unwrap();
//! tracing::info!(network_id = "net-1", "Network created");
//! ```

pub mod logging;

pub use logging::{init_logging, init_logging_json, init_logging_with_format, redact, LogFormat};
