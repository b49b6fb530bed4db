//! Configuration module for shelfsync.
//!
//! Typed configuration mapped to the YAML configuration file: one section per
//! remote API (each with its own request-governor tuning) plus logging.
//! Provides loading, defaults, validation and a builder for programmatic use.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for shelfsync.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The GraphQL catalogue API.
    pub graphql: ApiConfig,
    /// The REST library API.
    pub rest: ApiConfig,
    pub logging: LoggingConfig,
}

/// Connection and pacing settings for one remote API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Endpoint (GraphQL) or base URL (REST).
    pub base_url: String,
    /// Bearer token sent with every request, if any.
    pub token: Option<String>,
    /// Minimum spacing between requests, in milliseconds.
    pub rate_ms: u64,
    /// Requests that may be sent back to back before pacing applies.
    pub burst: u32,
    /// Maximum simultaneous in-flight requests.
    pub max_concurrent: usize,
    /// Ceiling for the spacing after backoff, in milliseconds.
    pub max_rate_ms: u64,
    /// Multiplier applied to the rate on each rate-limit signal (>= 1.0).
    pub backoff_factor: f64,
    /// Random spread applied to waits and backoffs (0.0..=1.0).
    pub jitter_factor: f64,
    /// Times a request rejected with 429 is retried by the caller.
    pub max_retries: u32,
    /// Consecutive healthy responses before a slowed-down rate returns to `rate_ms`.
    pub recovery_successes: u32,
    /// Per-request HTTP timeout, in seconds.
    pub timeout_secs: u64,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    /// `RUST_LOG` overrides it when set.
    pub level: String,
    /// Output format: `pretty` or `json`.
    pub format: String,
    /// Include the event target (module path) in each line.
    pub with_target: bool,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Using default configuration");
                Self::default()
            }
        }
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/shelfsync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("shelfsync")
            .join("config.yaml")
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for Config {
    fn default() -> Self {
        Self {
            graphql: ApiConfig::graphql_default(),
            rest: ApiConfig::rest_default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ApiConfig {
    /// Defaults for the GraphQL API: one request per second, three in flight.
    pub fn graphql_default() -> Self {
        Self {
            base_url: "http://localhost:8080/graphql".to_string(),
            rate_ms: 1000,
            ..Self::default()
        }
    }

    /// Defaults for the REST API: the governor's stock pacing.
    pub fn rest_default() -> Self {
        Self {
            base_url: "http://localhost:13378/api".to_string(),
            ..Self::default()
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: None,
            rate_ms: 2000,
            burst: 1,
            max_concurrent: 3,
            max_rate_ms: 600_000,
            backoff_factor: 2.0,
            jitter_factor: 0.1,
            max_retries: 3,
            recovery_successes: 100,
            timeout_secs: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            with_target: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"graphql.rate_ms"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `logging.format`.
const VALID_LOG_FORMATS: &[&str] = &["pretty", "json"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        self.graphql.validate_into("graphql", &mut errors);
        self.rest.validate_into("rest", &mut errors);

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }
        if !VALID_LOG_FORMATS.contains(&self.logging.format.as_str()) {
            errors.push(ValidationError {
                field: "logging.format".into(),
                message: format!(
                    "invalid format '{}'; valid options: {}",
                    self.logging.format,
                    VALID_LOG_FORMATS.join(", ")
                ),
            });
        }

        errors
    }
}

impl ApiConfig {
    fn validate_into(&self, section: &str, errors: &mut Vec<ValidationError>) {
        let mut push = |field: &str, message: String| {
            errors.push(ValidationError {
                field: format!("{section}.{field}"),
                message,
            });
        };

        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            push(
                "base_url",
                format!("must be an http(s) URL, got '{}'", self.base_url),
            );
        }
        if self.rate_ms == 0 {
            push("rate_ms", "must be greater than 0".into());
        }
        if self.burst == 0 {
            push("burst", "must be greater than 0".into());
        }
        if self.max_concurrent == 0 {
            push("max_concurrent", "must be greater than 0".into());
        }
        if self.max_rate_ms < self.rate_ms {
            push(
                "max_rate_ms",
                format!(
                    "max_rate_ms ({}) must not be below rate_ms ({})",
                    self.max_rate_ms, self.rate_ms
                ),
            );
        }
        if !(self.backoff_factor.is_finite() && self.backoff_factor >= 1.0) {
            push("backoff_factor", "must be at least 1.0".into());
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            push("jitter_factor", "must be in range 0.0..=1.0".into());
        }
        if self.recovery_successes == 0 {
            push("recovery_successes", "must be greater than 0".into());
        }
        if self.timeout_secs == 0 {
            push("timeout_secs", "must be greater than 0".into());
        }
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use shelfsync_core::config::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .graphql_base_url("https://catalogue.example.com/v1/graphql")
///     .graphql_token("secret")
///     .rest_rate_ms(500)
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- graphql ---

    pub fn graphql(mut self, api: ApiConfig) -> Self {
        self.config.graphql = api;
        self
    }

    pub fn graphql_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.graphql.base_url = url.into();
        self
    }

    pub fn graphql_token(mut self, token: impl Into<String>) -> Self {
        self.config.graphql.token = Some(token.into());
        self
    }

    pub fn graphql_rate_ms(mut self, ms: u64) -> Self {
        self.config.graphql.rate_ms = ms;
        self
    }

    pub fn graphql_max_concurrent(mut self, n: usize) -> Self {
        self.config.graphql.max_concurrent = n;
        self
    }

    // --- rest ---

    pub fn rest(mut self, api: ApiConfig) -> Self {
        self.config.rest = api;
        self
    }

    pub fn rest_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.rest.base_url = url.into();
        self
    }

    pub fn rest_token(mut self, token: impl Into<String>) -> Self {
        self.config.rest.token = Some(token.into());
        self
    }

    pub fn rest_rate_ms(mut self, ms: u64) -> Self {
        self.config.rest.rate_ms = ms;
        self
    }

    pub fn rest_max_concurrent(mut self, n: usize) -> Self {
        self.config.rest.max_concurrent = n;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_format(mut self, format: impl Into<String>) -> Self {
        self.config.logging.format = format.into();
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
