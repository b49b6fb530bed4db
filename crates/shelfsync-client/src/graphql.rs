//! GraphQL API client
//!
//! Posts `{query, variables}` to a single endpoint through a
//! [`GovernedClient`] and unwraps the standard `{data, errors}` envelope.

use std::sync::Arc;

use reqwest::Method;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use shelfsync_core::config::ApiConfig;
use shelfsync_governor::{RequestContext, RequestGovernor};
use tracing::{debug, warn};

use crate::{client::GovernedClient, ClientError};

#[derive(Debug, Serialize)]
struct GraphQlRequest<'a> {
    query: &'a str,
    variables: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct GraphQlErrorEntry {
    message: String,
}

/// Client for one GraphQL endpoint.
#[derive(Debug, Clone)]
pub struct GraphQlClient {
    inner: GovernedClient,
}

impl GraphQlClient {
    /// Creates a client for `endpoint` paced by `governor`.
    pub fn new(endpoint: impl Into<String>, governor: Arc<RequestGovernor>) -> Self {
        Self {
            inner: GovernedClient::new(endpoint, governor),
        }
    }

    /// Creates a client and its governor from the `graphql` configuration section.
    pub fn from_config(api: &ApiConfig) -> Result<Self, ClientError> {
        Ok(Self {
            inner: GovernedClient::from_config(api)?,
        })
    }

    pub fn with_token(self, token: impl Into<String>) -> Self {
        Self {
            inner: self.inner.with_token(token),
        }
    }

    /// The underlying executor (and through it, the governor).
    pub fn inner(&self) -> &GovernedClient {
        &self.inner
    }

    pub fn governor(&self) -> &Arc<RequestGovernor> {
        self.inner.governor()
    }

    /// Runs a query or mutation and deserializes its `data`.
    ///
    /// A non-empty `errors` array fails the call with [`ClientError::GraphQl`]
    /// even when partial `data` is present.
    pub async fn query<T>(
        &self,
        query: &str,
        variables: serde_json::Value,
        ctx: &RequestContext,
    ) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
    {
        let body = GraphQlRequest {
            query,
            variables: &variables,
        };
        debug!(query_len = query.len(), "Sending GraphQL request");

        let response = self
            .inner
            .execute_with_retry(|| self.inner.request(Method::POST, "").json(&body), ctx)
            .await?;

        let envelope: GraphQlResponse<T> = response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(format!("GraphQL response: {e}")))?;

        if !envelope.errors.is_empty() {
            let messages: Vec<String> = envelope.errors.into_iter().map(|e| e.message).collect();
            warn!(count = messages.len(), "GraphQL request returned errors");
            return Err(ClientError::GraphQl(messages));
        }

        envelope
            .data
            .ok_or_else(|| ClientError::InvalidResponse("GraphQL response has no data".into()))
    }
}
