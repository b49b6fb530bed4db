//! Governed HTTP executor
//!
//! Wraps `reqwest::Client` with a base URL, bearer authentication and the
//! API's [`RequestGovernor`]. Every request follows the same lifecycle:
//!
//! 1. `acquire` a permit from the governor (honouring the caller's context),
//! 2. send the request,
//! 3. release the permit,
//! 4. report status and headers with `observe_response`.
//!
//! The governor never retries. [`GovernedClient::execute_with_retry`] is the
//! caller-side retry for 429 responses; the wait between attempts is the
//! backoff window the governor opened when it observed the 429.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::{sync::Arc, time::Duration};
//! use reqwest::Method;
//! use shelfsync_client::GovernedClient;
//! use shelfsync_governor::{RequestContext, RequestGovernor};
//!
//! # async fn example() -> Result<(), shelfsync_client::ClientError> {
//! let governor = Arc::new(RequestGovernor::new(Duration::from_secs(1), 1, 3));
//! let client = GovernedClient::new("https://library.example.com/api", governor)
//!     .with_token("secret");
//!
//! let ctx = RequestContext::new().timeout(Duration::from_secs(60));
//! let response = client
//!     .execute_with_retry(|| client.request(Method::GET, "/libraries"), &ctx)
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::{sync::Arc, time::Duration};

use reqwest::{header::RETRY_AFTER, Client, Method, RequestBuilder, Response, StatusCode};
use shelfsync_core::config::ApiConfig;
use shelfsync_governor::{parse_retry_after, RequestContext, RequestGovernor};
use tracing::{debug, info, warn};

use crate::{settings::governor_settings, ClientError};

/// Default number of 429 retries in [`GovernedClient::execute_with_retry`]
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// HTTP client whose every request is admitted by a [`RequestGovernor`].
#[derive(Debug, Clone)]
pub struct GovernedClient {
    /// The underlying HTTP client
    client: Client,
    /// Base URL that request paths are appended to
    base_url: String,
    /// Bearer token, if the API needs one
    token: Option<String>,
    /// Pacing for this API; owned by this client and its clones
    governor: Arc<RequestGovernor>,
    max_retries: u32,
}

impl GovernedClient {
    /// Creates a client for `base_url` paced by `governor`.
    pub fn new(base_url: impl Into<String>, governor: Arc<RequestGovernor>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            token: None,
            governor,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Creates a client and its own governor from one API configuration section.
    pub fn from_config(api: &ApiConfig) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(api.timeout_secs.max(1)))
            .build()?;
        let governor = Arc::new(RequestGovernor::with_settings(governor_settings(api)));

        debug!(base_url = %api.base_url, "Creating governed client from config");
        Ok(Self {
            client,
            base_url: api.base_url.clone(),
            token: api.token.clone(),
            governor,
            max_retries: api.max_retries,
        })
    }

    /// Sets the bearer token sent with every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Sets how many times a 429 is retried by [`execute_with_retry`](Self::execute_with_retry).
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Updates the bearer token (e.g., after a token refresh)
    pub fn set_token(&mut self, token: impl Into<String>) {
        self.token = Some(token.into());
        debug!("Updated API token");
    }

    pub fn governor(&self) -> &Arc<RequestGovernor> {
        &self.governor
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Creates an authenticated request builder for `path` relative to the base URL.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.client.request(method, &url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Sends one request through the governor.
    ///
    /// Returns the response for any 2xx/3xx status. A 429 becomes
    /// [`ClientError::TooManyRequests`], any other failure status becomes
    /// [`ClientError::Status`]. Either way the governor has already seen the
    /// response. If `ctx` fires while the request is in flight the request is
    /// abandoned and the permit returned.
    pub async fn execute(
        &self,
        builder: RequestBuilder,
        ctx: &RequestContext,
    ) -> Result<Response, ClientError> {
        let permit = self.governor.acquire(ctx).await?;

        let sent = tokio::select! {
            biased;
            err = ctx.done() => Err(ClientError::Governor(err)),
            result = builder.send() => result.map_err(ClientError::from),
        };
        permit.release();
        let response = sent?;

        let status = response.status();
        self.governor.observe_response(status, response.headers());

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| parse_retry_after(v).ok())
                .filter(|d| !d.is_zero())
                .or_else(|| self.governor.backoff_remaining())
                .unwrap_or_default();
            return Err(ClientError::TooManyRequests { retry_after });
        }

        if status.is_client_error() || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), "Request failed");
            return Err(ClientError::Status { status, body });
        }

        Ok(response)
    }

    /// Sends a request, retrying up to `max_retries` times on 429.
    ///
    /// `make_request` is called once per attempt because a `RequestBuilder`
    /// cannot be reused. No extra sleep happens between attempts: the next
    /// `acquire` already waits out the backoff the 429 triggered.
    pub async fn execute_with_retry<F>(
        &self,
        make_request: F,
        ctx: &RequestContext,
    ) -> Result<Response, ClientError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            match self.execute(make_request(), ctx).await {
                Err(ClientError::TooManyRequests { retry_after }) if attempt < self.max_retries => {
                    attempt += 1;
                    info!(
                        attempt,
                        retry_after_ms = retry_after.as_millis() as u64,
                        "Received 429, retrying after governor backoff"
                    );
                }
                Err(err @ ClientError::TooManyRequests { .. }) => {
                    warn!(attempts = attempt + 1, "429 retry limit exhausted");
                    return Err(err);
                }
                Ok(response) => {
                    if attempt > 0 {
                        info!(attempt, "Request succeeded after retry");
                    }
                    return Ok(response);
                }
                Err(err) => return Err(err),
            }
        }
    }
}
