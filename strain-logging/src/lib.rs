//! Logging initialisation for the Strain harness
//!
//! Installs a `tracing` subscriber configured from [`LoggingConfig`]. Output
//! goes to stderr so that JSON written to stdout by the CLI stays parseable.

pub mod init;

pub use init::{build_env_filter, init_logging_from_config, init_simple_tracing};
pub use strain_config::{LogFormat, LogLevel, LoggingConfig};
