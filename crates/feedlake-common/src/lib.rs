//! Feedlake Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Ambient concerns shared across feedlake workspace members.
//!
//! - **Logging**: one subscriber setup for every binary, configured from the
//!   environment (see [`logging::LogConfig`]).

pub mod logging;

pub use logging::{init_logging, LogConfig};
