//! REST API client
//!
//! JSON GET/POST to paths relative to a base URL, through a [`GovernedClient`].

use std::sync::Arc;

use reqwest::{Method, Response};
use serde::{de::DeserializeOwned, Serialize};
use shelfsync_core::config::ApiConfig;
use shelfsync_governor::{RequestContext, RequestGovernor};
use tracing::debug;

use crate::{client::GovernedClient, ClientError};

/// Client for one REST API.
#[derive(Debug, Clone)]
pub struct RestClient {
    inner: GovernedClient,
}

impl RestClient {
    /// Creates a client for `base_url` paced by `governor`.
    pub fn new(base_url: impl Into<String>, governor: Arc<RequestGovernor>) -> Self {
        Self {
            inner: GovernedClient::new(base_url, governor),
        }
    }

    /// Creates a client and its governor from the `rest` configuration section.
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

    pub fn inner(&self) -> &GovernedClient {
        &self.inner
    }

    pub fn governor(&self) -> &Arc<RequestGovernor> {
        self.inner.governor()
    }

    /// `GET {base_url}{path}` and deserialize the JSON body.
    pub async fn get_json<T>(&self, path: &str, ctx: &RequestContext) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
    {
        debug!(path, "GET");
        let response = self
            .inner
            .execute_with_retry(|| self.inner.request(Method::GET, path), ctx)
            .await?;
        decode(response, path).await
    }

    /// `POST {base_url}{path}` with a JSON body and deserialize the JSON reply.
    pub async fn post_json<T, B>(
        &self,
        path: &str,
        body: &B,
        ctx: &RequestContext,
    ) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        debug!(path, "POST");
        let response = self
            .inner
            .execute_with_retry(|| self.inner.request(Method::POST, path).json(body), ctx)
            .await?;
        decode(response, path).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response, path: &str) -> Result<T, ClientError> {
    response
        .json()
        .await
        .map_err(|e| ClientError::InvalidResponse(format!("{path}: {e}")))
}
