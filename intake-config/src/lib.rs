//! Configuration for the intake crash collector.
//!
//! All configuration is bound from environment variables at startup into one
//! immutable [`Config`] aggregate which is threaded explicitly through
//! construction. Nothing reads the environment after [`Config::from_env`]
//! returns.

mod config;

pub use config::*;
