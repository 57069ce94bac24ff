use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use backoff::future::retry_notify;
use backoff::{Error as BackoffError, ExponentialBackoffBuilder};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::auth::TokenProvider;
use crate::error::{Operation, ServiceErrorKind, SyncError, SyncResult};

const RETRY_BASE_DELAY_MS: u64 = 300;
const MAX_BACKOFF_SECS: u64 = 8;

/// Bounded exponential backoff applied to every outbound call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_millis(RETRY_BASE_DELAY_MS),
            max_interval: Duration::from_secs(MAX_BACKOFF_SECS),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }
}

pub fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("riverlevels/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")
}

/// Runs `attempt` until it succeeds, fails permanently, or the policy's
/// attempt budget is spent.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    is_transient: impl Fn(&E) -> bool,
    mut attempt: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(policy.initial_interval)
        .with_multiplier(2.0)
        .with_randomization_factor(0.2)
        .with_max_interval(policy.max_interval)
        .with_max_elapsed_time(None)
        .build();
    let attempts = Arc::new(AtomicUsize::new(0));
    let max_attempts = policy.max_attempts.max(1);

    retry_notify(
        backoff,
        || {
            let attempts = Arc::clone(&attempts);
            let fut = attempt();
            let is_transient = &is_transient;
            async move {
                let n = attempts.fetch_add(1, Ordering::Relaxed) + 1;
                match fut.await {
                    Ok(value) => Ok(value),
                    Err(err) if is_transient(&err) && n < max_attempts => {
                        Err(BackoffError::transient(err))
                    }
                    Err(err) => Err(BackoffError::permanent(err)),
                }
            }
        },
        |err: E, wait: Duration| {
            tracing::warn!(
                request = label,
                attempt = attempts.load(Ordering::Relaxed),
                max_attempts,
                retry_in_ms = wait.as_millis() as u64,
                "retrying after transient failure: {err}"
            );
        },
    )
    .await
}

pub fn classify_transport(err: &reqwest::Error) -> ServiceErrorKind {
    if err.is_timeout() {
        ServiceErrorKind::Timeout
    } else if err.is_decode() {
        ServiceErrorKind::Decode(err.to_string())
    } else {
        ServiceErrorKind::Transport(err.to_string())
    }
}

/// Checks the HTTP status, then the `error` object this API family embeds in
/// 200 responses.
pub fn parse_payload(status: StatusCode, body: &str) -> std::result::Result<Value, ServiceErrorKind> {
    if !status.is_success() {
        return Err(ServiceErrorKind::Status(status.as_u16()));
    }
    let value: Value =
        serde_json::from_str(body).map_err(|err| ServiceErrorKind::Decode(err.to_string()))?;
    if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return Err(ServiceErrorKind::Payload { code, message });
    }
    Ok(value)
}

/// A single feature-service layer, addressed by its REST base URL
/// (`.../FeatureServer/<n>`).
#[derive(Debug, Clone)]
pub struct LayerClient {
    http: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl LayerClient {
    pub fn new(http: Client, base_url: &str, retry: RetryPolicy) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        if path.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    /// Issues an authenticated request, re-authenticating once if the service
    /// rejects the token.
    pub async fn request<T: DeserializeOwned>(
        &self,
        tokens: &TokenProvider,
        operation: Operation,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> SyncResult<T> {
        let token = tokens.get_token().await?;
        let value = match self.send(operation, method.clone(), path, params, token.value()).await {
            Err(kind) if kind.is_token_rejection() => {
                tracing::warn!(%operation, "token rejected, re-authenticating");
                tokens.invalidate(&token).await;
                let fresh = tokens.get_token().await?;
                self.send(operation, method, path, params, fresh.value())
                    .await
                    .map_err(|kind| {
                        if kind.is_token_rejection() {
                            SyncError::auth(format!("token rejected after refresh: {kind}"))
                        } else {
                            SyncError::service(operation, kind)
                        }
                    })?
            }
            other => other.map_err(|kind| SyncError::service(operation, kind))?,
        };

        serde_json::from_value(value)
            .map_err(|err| SyncError::service(operation, ServiceErrorKind::Decode(err.to_string())))
    }

    async fn send(
        &self,
        operation: Operation,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        token: &str,
    ) -> std::result::Result<Value, ServiceErrorKind> {
        let url = self.url(path);
        let mut form: Vec<(&str, &str)> = vec![("f", "json"), ("token", token)];
        form.extend(params.iter().map(|(k, v)| (*k, v.as_str())));

        with_retry(
            &self.retry,
            operation.as_str(),
            ServiceErrorKind::is_transient,
            || {
                let url = url.clone();
                let request = if method == Method::GET {
                    self.http.get(&url).query(&form)
                } else {
                    self.http.request(method.clone(), &url).form(&form)
                };
                async move {
                    tracing::debug!(%operation, url = %url, "sending request");
                    let response = request.send().await.map_err(|err| classify_transport(&err))?;
                    let status = response.status();
                    let body = response.text().await.map_err(|err| classify_transport(&err))?;
                    parse_payload(status, &body)
                }
            },
        )
        .await
    }
}
