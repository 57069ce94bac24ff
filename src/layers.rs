use std::sync::Arc;

use clap::ValueEnum;
use futures_util::future::join_all;
use reqwest::Client;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::auth::TokenProvider;
use crate::catalog::{self, ObjectId};
use crate::edits::{self, SubmissionResult};
use crate::error::{SyncError, SyncResult};
use crate::features;
use crate::http::{LayerClient, RetryPolicy};
use crate::observations::ObservationCache;

pub const DEFAULT_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    /// River reach polylines
    Lines,
    /// River reach access points
    Points,
}

impl LayerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LayerKind::Lines => "lines",
            LayerKind::Points => "points",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LayerConfig {
    pub kind: LayerKind,
    pub base_url: String,
}

/// Services shared by every layer and block in one run.
#[derive(Clone)]
pub struct SyncContext {
    pub http: Client,
    pub retry: RetryPolicy,
    pub tokens: Arc<TokenProvider>,
    pub observations: Arc<ObservationCache>,
    /// Upper bound on block tasks in flight per layer.
    pub concurrency: usize,
}

impl SyncContext {
    pub fn layer_client(&self, config: &LayerConfig) -> LayerClient {
        LayerClient::new(self.http.clone(), &config.base_url, self.retry.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageFailure {
    pub stage: String,
    pub message: String,
}

impl From<&SyncError> for StageFailure {
    fn from(err: &SyncError) -> Self {
        Self {
            stage: err.stage().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockReport {
    pub index: usize,
    pub first_object_id: Option<ObjectId>,
    pub object_ids: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<SubmissionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StageFailure>,
}

impl BlockReport {
    fn new(index: usize, ids: &[ObjectId], outcome: SyncResult<SubmissionResult>) -> Self {
        let (result, error) = match outcome {
            Ok(result) => (Some(result), None),
            Err(err) => (None, Some(StageFailure::from(&err))),
        };
        Self {
            index,
            first_object_id: ids.first().copied(),
            object_ids: ids.len(),
            result,
            error,
        }
    }

    /// A block that never ran because its task could not be scheduled or
    /// did not finish.
    fn task_failure(index: usize, ids: &[ObjectId], message: &str) -> Self {
        Self {
            index,
            first_object_id: ids.first().copied(),
            object_ids: ids.len(),
            result: None,
            error: Some(StageFailure {
                stage: "task".to_string(),
                message: message.to_string(),
            }),
        }
    }
}

/// Outcome of one layer: either a stage failure before any block ran, or one
/// report per block.
#[derive(Debug, Clone, Serialize)]
pub struct LayerReport {
    pub layer: LayerKind,
    pub url: String,
    pub max_record_count: Option<usize>,
    pub object_ids: usize,
    pub blocks: Vec<BlockReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StageFailure>,
}

impl LayerReport {
    fn failed(config: &LayerConfig, err: &SyncError) -> Self {
        Self {
            layer: config.kind,
            url: config.base_url.clone(),
            max_record_count: None,
            object_ids: 0,
            blocks: Vec::new(),
            error: Some(StageFailure::from(err)),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.blocks.iter().all(|b| b.error.is_none())
    }

    pub fn failed_blocks(&self) -> usize {
        self.blocks.iter().filter(|b| b.error.is_some()).count()
    }

    pub fn submitted(&self) -> usize {
        self.results().map(|r| r.submitted).sum()
    }

    pub fn updated(&self) -> usize {
        self.results().map(|r| r.updated).sum()
    }

    pub fn skipped(&self) -> usize {
        self.results().map(|r| r.skipped).sum()
    }

    fn results(&self) -> impl Iterator<Item = &SubmissionResult> {
        self.blocks.iter().filter_map(|b| b.result.as_ref())
    }
}

/// Fetches and syncs one block. Each block owns its features and batch.
async fn run_block(
    layer: &LayerClient,
    tokens: &TokenProvider,
    observations: &ObservationCache,
    ids: &[ObjectId],
) -> SyncResult<SubmissionResult> {
    let features = features::fetch_block(layer, tokens, ids).await?;
    edits::sync_block(layer, tokens, observations, features).await
}

/// Waits for a concurrency permit, then runs the block.
async fn run_scheduled_block(
    permits: Arc<Semaphore>,
    index: usize,
    layer: LayerClient,
    tokens: Arc<TokenProvider>,
    observations: Arc<ObservationCache>,
    ids: Vec<ObjectId>,
) -> BlockReport {
    let Ok(_permit) = permits.acquire_owned().await else {
        return BlockReport::task_failure(index, &ids, "block scheduler closed");
    };
    let outcome = run_block(&layer, &tokens, &observations, &ids).await;
    BlockReport::new(index, &ids, outcome)
}

/// Authenticates, discovers the layer, then syncs every block concurrently and
/// waits for all of them.
#[tracing::instrument(skip_all, fields(layer = config.kind.as_str()))]
pub async fn sync_layer(ctx: &SyncContext, config: &LayerConfig) -> LayerReport {
    let layer = ctx.layer_client(config);

    if let Err(err) = ctx.tokens.get_token().await {
        tracing::warn!("authentication failed: {err}");
        return LayerReport::failed(config, &err);
    }
    let catalog = match catalog::discover(&layer, &ctx.tokens).await {
        Ok(catalog) => catalog,
        Err(err) => {
            tracing::warn!("discovery failed: {err}");
            return LayerReport::failed(config, &err);
        }
    };

    let blocks = catalog.blocks();
    let permits = Arc::new(Semaphore::new(ctx.concurrency.max(1)));
    let mut join_set = JoinSet::new();
    for (index, ids) in blocks.iter().cloned().enumerate() {
        let layer = layer.clone();
        let tokens = Arc::clone(&ctx.tokens);
        let observations = Arc::clone(&ctx.observations);
        let permits = Arc::clone(&permits);
        join_set.spawn(run_scheduled_block(
            permits,
            index,
            layer,
            tokens,
            observations,
            ids,
        ));
    }

    let mut reports = Vec::with_capacity(blocks.len());
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(report) => {
                if let Some(error) = &report.error {
                    tracing::warn!(
                        block = report.index,
                        stage = %error.stage,
                        "block failed: {}",
                        error.message
                    );
                }
                reports.push(report);
            }
            Err(err) => tracing::error!("block task aborted: {err}"),
        }
    }
    // An aborted task never reports back; account for it as a failed block.
    for (index, ids) in blocks.iter().enumerate() {
        if !reports.iter().any(|r| r.index == index) {
            reports.push(BlockReport::task_failure(index, ids, "block task aborted"));
        }
    }
    reports.sort_by_key(|r| r.index);

    let report = LayerReport {
        layer: config.kind,
        url: config.base_url.clone(),
        max_record_count: Some(catalog.max_record_count),
        object_ids: catalog.object_ids.len(),
        blocks: reports,
        error: None,
    };
    tracing::info!(
        blocks = report.blocks.len(),
        failed_blocks = report.failed_blocks(),
        updated = report.updated(),
        skipped = report.skipped(),
        "layer synchronized"
    );
    report
}

/// Runs every layer independently; they share only the token and observation
/// caches.
pub async fn sync_layers(ctx: &SyncContext, configs: &[LayerConfig]) -> Vec<LayerReport> {
    join_all(configs.iter().map(|config| sync_layer(ctx, config))).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observations::Condition;
    use crate::testing::{layer_at, mount_token, no_retry, tokens_for, StaticSource};
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn context(server: &MockServer, source: Arc<StaticSource>) -> SyncContext {
        SyncContext {
            http: Client::new(),
            retry: no_retry(),
            tokens: Arc::new(tokens_for(server)),
            observations: Arc::new(ObservationCache::new(source)),
            concurrency: 4,
        }
    }

    fn config(server: &MockServer, kind: LayerKind, layer_path: &str) -> LayerConfig {
        LayerConfig {
            kind,
            base_url: layer_at(server, layer_path).base_url().to_string(),
        }
    }

    #[tokio::test]
    async fn closed_scheduler_is_a_task_failure() {
        let server = MockServer::start().await;
        Mock::given(wiremock::matchers::any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let permits = Arc::new(Semaphore::new(1));
        permits.close();
        let ctx = context(&server, Arc::new(StaticSource::new(&[])));
        let report = run_scheduled_block(
            permits,
            3,
            layer_at(&server, "/lines/FeatureServer/0"),
            Arc::clone(&ctx.tokens),
            Arc::clone(&ctx.observations),
            vec![7, 8],
        )
        .await;

        assert_eq!(report.index, 3);
        assert_eq!(report.first_object_id, Some(7));
        assert!(report.result.is_none());
        assert_eq!(report.error.unwrap().stage, "task");
    }

    async fn mount_layer(server: &MockServer, layer_path: &str, max_records: usize, ids: &[i64]) {
        Mock::given(method("GET"))
            .and(path(layer_path.to_string()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(format!(r#"{{"maxRecordCount":{max_records}}}"#)),
            )
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("{layer_path}/query")))
            .and(body_string_contains("returnIdsOnly=true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "objectIdFieldName": "OBJECTID",
                "objectIds": ids,
            })))
            .mount(server)
            .await;
        for chunk in ids.chunks(max_records) {
            let csv = chunk.iter().map(i64::to_string).collect::<Vec<_>>().join("%2C");
            let features: Vec<_> = chunk
                .iter()
                .map(|id| serde_json::json!({"attributes": {"OBJECTID": id, "reach_id": format!("R{id}")}}))
                .collect();
            Mock::given(method("POST"))
                .and(path(format!("{layer_path}/query")))
                .and(body_string_contains(format!("objectIds={csv}&")))
                .respond_with(
                    ResponseTemplate::new(200).set_body_json(serde_json::json!({"features": features})),
                )
                .expect(1)
                .mount(server)
                .await;
        }
    }

    #[tokio::test]
    async fn layer_sync_runs_every_block() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        mount_layer(&server, "/lines/FeatureServer/0", 2, &[1, 2, 3, 4, 5]).await;
        Mock::given(method("POST"))
            .and(path("/lines/FeatureServer/0/applyEdits"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"updateResults":[{"objectId":1,"success":true}]}"#,
            ))
            .expect(2)
            .mount(&server)
            .await;

        // Blocks [1,2] and [5] have a gauged reach; [3,4] has none.
        let source = Arc::new(StaticSource::new(&[
            ("R1", "2ft", Condition::Low),
            ("R5", "6ft", Condition::High),
        ]));
        let ctx = context(&server, source.clone());
        let report = sync_layer(&ctx, &config(&server, LayerKind::Lines, "/lines/FeatureServer/0")).await;

        assert!(report.is_success(), "{report:?}");
        assert_eq!(report.max_record_count, Some(2));
        assert_eq!(report.object_ids, 5);
        let sizes: Vec<usize> = report.blocks.iter().map(|b| b.object_ids).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(report.submitted(), 2);
        assert_eq!(report.skipped(), 3);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn failed_block_does_not_stop_others() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        mount_layer(&server, "/lines/FeatureServer/0", 1, &[1, 2]).await;
        Mock::given(method("POST"))
            .and(path("/lines/FeatureServer/0/applyEdits"))
            .and(body_string_contains("R1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"error":{"code":400,"message":"Unable to complete operation.","details":[]}}"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/lines/FeatureServer/0/applyEdits"))
            .and(body_string_contains("R2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"updateResults":[{"objectId":2,"success":true}]}"#,
            ))
            .mount(&server)
            .await;

        let source = Arc::new(StaticSource::new(&[
            ("R1", "2ft", Condition::Low),
            ("R2", "3ft", Condition::Medium),
        ]));
        let ctx = context(&server, source);
        let report = sync_layer(&ctx, &config(&server, LayerKind::Lines, "/lines/FeatureServer/0")).await;

        assert!(!report.is_success());
        assert_eq!(report.failed_blocks(), 1);
        assert_eq!(report.updated(), 1);
        let failure = report.blocks[0].error.as_ref().unwrap();
        assert_eq!(failure.stage, "apply_edits");
    }

    #[tokio::test]
    async fn auth_failure_is_reported_before_discovery() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generateToken"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"error":{"code":400,"message":"Unable to generate token.","details":[]}}"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"maxRecordCount":1}"#))
            .expect(0)
            .mount(&server)
            .await;

        let ctx = context(&server, Arc::new(StaticSource::new(&[])));
        let report = sync_layer(&ctx, &config(&server, LayerKind::Points, "/points/FeatureServer/0")).await;

        assert!(!report.is_success());
        assert_eq!(report.error.as_ref().unwrap().stage, "authenticate");
        assert!(report.blocks.is_empty());
    }

    #[tokio::test]
    async fn both_layers_share_one_observation_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generateToken"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"token":"tok-1"}"#))
            .expect(1)
            .mount(&server)
            .await;
        mount_layer(&server, "/lines/FeatureServer/0", 2, &[1, 2, 3]).await;
        mount_layer(&server, "/points/FeatureServer/0", 2, &[4, 5]).await;
        for layer_path in ["/lines/FeatureServer/0", "/points/FeatureServer/0"] {
            Mock::given(method("POST"))
                .and(path(format!("{layer_path}/applyEdits")))
                .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"updateResults":[]}"#))
                .mount(&server)
                .await;
        }

        let source = Arc::new(StaticSource::new(&[
            ("R1", "1ft", Condition::Low),
            ("R4", "4ft", Condition::Medium),
        ]));
        let ctx = context(&server, source.clone());
        let reports = sync_layers(
            &ctx,
            &[
                config(&server, LayerKind::Lines, "/lines/FeatureServer/0"),
                config(&server, LayerKind::Points, "/points/FeatureServer/0"),
            ],
        )
        .await;

        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(LayerReport::is_success));
        assert_eq!(reports[0].layer, LayerKind::Lines);
        assert_eq!(reports[1].layer, LayerKind::Points);
        assert_eq!(source.calls(), 1);
    }
}
