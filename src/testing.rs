//! Shared fixtures for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::auth::{Credential, TokenEndpoints, TokenProvider};
use crate::error::{SyncError, SyncResult};
use crate::http::{LayerClient, RetryPolicy};
use crate::observations::{Condition, ReachLevelSource, ReachLevels, ReachObservation};

pub fn no_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 1,
        initial_interval: Duration::from_millis(1),
        max_interval: Duration::from_millis(1),
    }
}

/// Answers `POST /generateToken` with `tok-1`.
pub async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/generateToken"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"token":"tok-1"}"#))
        .mount(server)
        .await;
}

pub fn tokens_for(server: &MockServer) -> TokenProvider {
    TokenProvider::new(
        Client::new(),
        Credential::User {
            username: "u".to_string(),
            password: "p".to_string(),
        },
        TokenEndpoints {
            generate_token_url: format!("{}/generateToken", server.uri()),
            ..TokenEndpoints::default()
        },
        no_retry(),
    )
}

pub fn layer_for(server: &MockServer) -> LayerClient {
    layer_at(server, "/FeatureServer/0")
}

pub fn layer_at(server: &MockServer, layer_path: &str) -> LayerClient {
    LayerClient::new(
        Client::new(),
        &format!("{}{layer_path}", server.uri()),
        no_retry(),
    )
}

/// In-memory observation source that counts fetches and can be told to fail.
pub struct StaticSource {
    pub levels: ReachLevels,
    pub calls: AtomicUsize,
    pub failures: AtomicUsize,
    pub delay: Duration,
}

impl StaticSource {
    pub fn new(entries: &[(&str, &str, Condition)]) -> Self {
        let levels = entries
            .iter()
            .map(|(id, stage, condition)| {
                (
                    id.to_string(),
                    ReachObservation {
                        reach_id: id.to_string(),
                        stage: stage.to_string(),
                        condition: *condition,
                    },
                )
            })
            .collect();
        Self {
            levels,
            calls: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReachLevelSource for StaticSource {
    async fn reach_levels(&self) -> SyncResult<ReachLevels> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(SyncError::upstream("source unavailable"));
        }
        Ok(self.levels.clone())
    }
}
