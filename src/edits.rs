use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::auth::TokenProvider;
use crate::catalog::ObjectId;
use crate::error::{Operation, ServiceErrorKind, SyncError, SyncResult};
use crate::features::Feature;
use crate::http::LayerClient;
use crate::observations::{ObservationCache, ReachLevels};

/// Features whose gauge attributes were overwritten, submitted under one
/// rollback scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditBatch {
    pub updates: Vec<Feature>,
    /// Features left out because their reach has no observation.
    pub skipped: usize,
}

/// Joins `features` against `levels`. Features with no matching reach are
/// dropped; a reach without a gauge is normal.
pub fn build_edit_batch(features: Vec<Feature>, levels: &ReachLevels) -> EditBatch {
    let mut batch = EditBatch::default();
    for mut feature in features {
        let observation = feature.reach_id().and_then(|id| levels.get(id));
        match observation {
            Some(observation) => {
                feature.attributes.condition = Some(observation.condition);
                feature.attributes.gauge_observation = Some(observation.stage.clone());
                batch.updates.push(feature);
            }
            None => batch.skipped += 1,
        }
    }
    batch
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditFailure {
    pub object_id: ObjectId,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubmissionResult {
    pub submitted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failures: Vec<EditFailure>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApplyEditsResponse {
    #[serde(default)]
    update_results: Vec<EditResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditResult {
    #[serde(default)]
    object_id: Option<ObjectId>,
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<EditResultError>,
}

#[derive(Debug, Deserialize)]
struct EditResultError {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    description: Option<String>,
}

/// Writes the current observation onto every matched feature in the block and
/// submits the batch with `rollbackOnFailure=true`.
pub async fn sync_block(
    layer: &LayerClient,
    tokens: &TokenProvider,
    observations: &ObservationCache,
    features: Vec<Feature>,
) -> SyncResult<SubmissionResult> {
    let levels = observations.get_observations().await?;
    let batch = build_edit_batch(features, &levels);
    if batch.updates.is_empty() {
        tracing::debug!(skipped = batch.skipped, "no gauged features in block");
        return Ok(SubmissionResult {
            skipped: batch.skipped,
            ..SubmissionResult::default()
        });
    }

    let updates = serde_json::to_string(&batch.updates).map_err(|err| {
        SyncError::service(Operation::ApplyEdits, ServiceErrorKind::Decode(err.to_string()))
    })?;
    let response: ApplyEditsResponse = layer
        .request(
            tokens,
            Operation::ApplyEdits,
            Method::POST,
            "applyEdits",
            &[
                ("updates", updates),
                ("rollbackOnFailure", "true".to_string()),
                ("useGlobalIds", "false".to_string()),
            ],
        )
        .await?;

    let mut result = SubmissionResult {
        submitted: batch.updates.len(),
        skipped: batch.skipped,
        ..SubmissionResult::default()
    };
    for edit in response.update_results {
        if edit.success {
            result.updated += 1;
            continue;
        }
        let message = edit
            .error
            .map(|e| match (e.code, e.description) {
                (Some(code), Some(desc)) => format!("{code}: {desc}"),
                (None, Some(desc)) => desc,
                (Some(code), None) => format!("error code {code}"),
                (None, None) => "edit rejected".to_string(),
            })
            .unwrap_or_else(|| "edit rejected".to_string());
        result.failures.push(EditFailure {
            object_id: edit.object_id.unwrap_or_default(),
            message,
        });
    }

    tracing::debug!(
        submitted = result.submitted,
        updated = result.updated,
        failed = result.failures.len(),
        "edit batch applied"
    );
    Ok(result)
}
