//! Shelfsync Client - governed HTTP clients for the remote APIs
//!
//! Every request goes through the API's [`RequestGovernor`]: acquire a permit,
//! send, release, then report the response back so the governor can adapt.
//!
//! ## Modules
//!
//! - [`client`] - [`GovernedClient`], the shared acquire/send/observe executor
//! - [`graphql`] - GraphQL client (`{query, variables}` POSTs to one endpoint)
//! - [`rest`] - REST client (JSON GET/POST relative to a base URL)
//! - [`settings`] - conversion from configuration to governor settings
//!
//! [`RequestGovernor`]: shelfsync_governor::RequestGovernor

pub mod client;
pub mod graphql;
pub mod rest;
pub mod settings;

pub use client::GovernedClient;
pub use graphql::GraphQlClient;
pub use rest::RestClient;

use std::time::Duration;

use reqwest::StatusCode;
use shelfsync_governor::GovernorError;
use thiserror::Error;

/// Errors that can occur when calling a remote API
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server rejected the request with 429 (after any retries)
    #[error("Too many requests, retry after {retry_after:?}")]
    TooManyRequests {
        /// Delay the server asked for, or the governor's remaining backoff
        retry_after: Duration,
    },

    /// Any other non-success status
    #[error("HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },

    /// A network-level error occurred
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The governor did not admit the request
    #[error("Request not admitted: {0}")]
    Governor(#[from] GovernorError),

    /// The API response could not be parsed or was malformed
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The GraphQL endpoint answered with an `errors` array
    #[error("GraphQL errors: {}", .0.join("; "))]
    GraphQl(Vec<String>),
}

impl ClientError {
    /// Whether the server throttled this request.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::TooManyRequests { .. })
    }
}
