//! Shared helpers for client integration tests

use std::{sync::Arc, time::Duration};

use shelfsync_client::{GraphQlClient, RestClient};
use shelfsync_governor::{GovernorSettings, RequestGovernor};
use wiremock::MockServer;

pub const TEST_TOKEN: &str = "test-token";

/// A fast governor with jitter disabled: 10ms spacing, two in flight.
pub fn test_governor() -> Arc<RequestGovernor> {
    Arc::new(RequestGovernor::with_settings(test_settings()))
}

/// Like [`test_governor`], recovering after `successes` healthy responses.
pub fn recovering_governor(successes: u32) -> Arc<RequestGovernor> {
    Arc::new(RequestGovernor::with_settings(GovernorSettings {
        recovery_successes: successes,
        ..test_settings()
    }))
}

fn test_settings() -> GovernorSettings {
    GovernorSettings {
        base_rate: Duration::from_millis(10),
        burst: 1,
        max_concurrent: 2,
        max_rate: Duration::from_secs(5),
        jitter_factor: 0.0,
        ..GovernorSettings::default()
    }
}

pub async fn setup_rest() -> (MockServer, RestClient) {
    let server = MockServer::start().await;
    let client = RestClient::new(format!("{}/api", server.uri()), test_governor())
        .with_token(TEST_TOKEN);
    (server, client)
}

pub async fn setup_graphql() -> (MockServer, GraphQlClient) {
    let server = MockServer::start().await;
    let client = GraphQlClient::new(format!("{}/graphql", server.uri()), test_governor())
        .with_token(TEST_TOKEN);
    (server, client)
}
