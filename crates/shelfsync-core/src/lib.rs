//! shelfsync-core - Shared configuration and logging
//!
//! - [`config`]: YAML configuration for the GraphQL and REST API clients,
//!   with defaults, validation and a builder
//! - [`logging`]: `tracing` subscriber bootstrap driven by that configuration

pub mod config;
pub mod logging;

pub use config::{ApiConfig, Config, ConfigBuilder, LoggingConfig, ValidationError};
