use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::auth::TokenProvider;
use crate::error::{Operation, ServiceErrorKind, SyncError, SyncResult};
use crate::http::LayerClient;

pub type ObjectId = i64;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayerMetadata {
    #[serde(default)]
    max_record_count: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdsResponse {
    /// The service sends `null` for an empty layer.
    #[serde(default)]
    object_ids: Option<Vec<ObjectId>>,
}

/// Everything needed to plan attribute fetches for one layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Catalog {
    pub max_record_count: usize,
    pub object_ids: Vec<ObjectId>,
}

impl Catalog {
    pub fn blocks(&self) -> Vec<Vec<ObjectId>> {
        partition(&self.object_ids, self.max_record_count)
    }
}

/// Reads the page-size cap, then lists every object id in one call. Ids are
/// unbounded; attribute queries are not, so they are split client-side.
pub async fn discover(layer: &LayerClient, tokens: &TokenProvider) -> SyncResult<Catalog> {
    let metadata: LayerMetadata = layer
        .request(tokens, Operation::Metadata, Method::GET, "", &[])
        .await?;
    let max_record_count = metadata
        .max_record_count
        .filter(|count| *count > 0)
        .ok_or_else(|| {
            SyncError::service(
                Operation::Metadata,
                ServiceErrorKind::Decode("layer metadata has no usable maxRecordCount".to_string()),
            )
        })?;

    let ids: IdsResponse = layer
        .request(
            tokens,
            Operation::QueryIds,
            Method::POST,
            "query",
            &[
                ("where", "1=1".to_string()),
                ("returnIdsOnly", "true".to_string()),
            ],
        )
        .await?;
    let object_ids = ids.object_ids.unwrap_or_default();

    tracing::debug!(
        layer = layer.base_url(),
        max_record_count,
        object_ids = object_ids.len(),
        "catalog discovered"
    );
    Ok(Catalog {
        max_record_count,
        object_ids,
    })
}

/// Splits `ids` into order-preserving, non-overlapping blocks of at most
/// `block_size` ids.
pub fn partition(ids: &[ObjectId], block_size: usize) -> Vec<Vec<ObjectId>> {
    ids.chunks(block_size.max(1)).map(<[ObjectId]>::to_vec).collect()
}
