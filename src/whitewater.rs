use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{ServiceErrorKind, SyncError, SyncResult};
use crate::http::{classify_transport, with_retry, RetryPolicy};
use crate::observations::{Condition, ReachLevelSource, ReachLevels, ReachObservation};

pub const DEFAULT_OBSERVATIONS_URL: &str = "https://www.americanwhitewater.org";

/// Every state and territory the river database publishes a summary for.
pub const STATE_CODES: &[&str] = &[
    "AL", "AK", "AS", "AZ", "AR", "CA", "CO", "CT", "DE", "DC", "FM", "FL", "GA", "GU", "HI", "ID",
    "IL", "IN", "IA", "KS", "KY", "LA", "ME", "MH", "MD", "MA", "MI", "MN", "MS", "MO", "MT", "NE",
    "NV", "NH", "NJ", "NM", "NY", "NC", "ND", "MP", "OH", "OK", "OR", "PW", "PA", "PR", "RI", "SC",
    "SD", "TN", "TX", "UT", "VT", "VI", "VA", "WA", "WV", "WI", "WY",
];

const STATE_FETCH_CONCURRENCY: usize = 8;

#[derive(Debug, Deserialize)]
struct ReachSummary {
    id: Value,
    #[serde(default)]
    gauge_id: Option<Value>,
    #[serde(default)]
    reading_formatted: Option<String>,
    #[serde(default)]
    cond: Option<String>,
}

impl ReachSummary {
    fn into_observation(self) -> Option<ReachObservation> {
        if self.gauge_id.as_ref().is_none_or(Value::is_null) {
            return None;
        }
        let reach_id = match self.id {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let condition = Condition::from_code(self.cond.as_deref()?)?;
        Some(ReachObservation {
            reach_id,
            stage: self.reading_formatted.unwrap_or_default().trim().to_string(),
            condition,
        })
    }
}

/// Builds the reach table from the per-state summary listings.
pub struct WhitewaterSource {
    http: Client,
    base_url: String,
    retry: RetryPolicy,
    states: Vec<String>,
}

impl WhitewaterSource {
    pub fn new(http: Client, base_url: &str, retry: RetryPolicy) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
            states: STATE_CODES.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[cfg(test)]
    pub fn with_states(mut self, states: &[&str]) -> Self {
        self.states = states.iter().map(|s| s.to_string()).collect();
        self
    }

    fn state_url(&self, state: &str) -> String {
        format!(
            "{}/content/River/state-summary/state/{state}/.json",
            self.base_url
        )
    }

    async fn fetch_state(&self, state: &str) -> Result<Vec<ReachObservation>, ServiceErrorKind> {
        let url = self.state_url(state);
        let body: Value = with_retry(&self.retry, "state_summary", ServiceErrorKind::is_transient, || {
            let request = self.http.get(&url);
            async move {
                let response = request.send().await.map_err(|err| classify_transport(&err))?;
                let status = response.status();
                if status.is_server_error() || status.as_u16() == 429 {
                    return Err(ServiceErrorKind::Status(status.as_u16()));
                }
                let text = response.text().await.map_err(|err| classify_transport(&err))?;
                Ok(serde_json::from_str(&text).unwrap_or(Value::Null))
            }
        })
        .await?;

        Ok(parse_state_summary(body))
    }
}

/// The listing carries no reliable status code, so anything that is not an
/// array means "no reaches".
fn parse_state_summary(body: Value) -> Vec<ReachObservation> {
    let Value::Array(items) = body else {
        return Vec::new();
    };
    items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<ReachSummary>(item).ok())
        .filter_map(ReachSummary::into_observation)
        .collect()
}

#[async_trait]
impl ReachLevelSource for WhitewaterSource {
    async fn reach_levels(&self) -> SyncResult<ReachLevels> {
        let results: Vec<(String, Result<Vec<ReachObservation>, ServiceErrorKind>)> =
            stream::iter(self.states.iter().cloned())
                .map(|state| async move {
                    let result = self.fetch_state(&state).await;
                    (state, result)
                })
                .buffer_unordered(STATE_FETCH_CONCURRENCY)
                .collect()
                .await;

        let mut levels = ReachLevels::new();
        let mut failed = 0usize;
        for (state, result) in results {
            match result {
                Ok(observations) => {
                    tracing::debug!(state = %state, reaches = observations.len(), "state summary loaded");
                    for observation in observations {
                        levels.insert(observation.reach_id.clone(), observation);
                    }
                }
                Err(err) => {
                    failed += 1;
                    tracing::warn!(state = %state, "state summary unavailable: {err}");
                }
            }
        }

        if !self.states.is_empty() && failed == self.states.len() {
            return Err(SyncError::upstream(format!(
                "all {failed} state summaries failed"
            )));
        }
        Ok(levels)
    }
}
