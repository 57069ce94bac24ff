use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::error::SyncResult;

pub type ReachId = String;
pub type ReachLevels = HashMap<ReachId, ReachObservation>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    Low,
    Medium,
    High,
}

impl Condition {
    pub fn as_str(self) -> &'static str {
        match self {
            Condition::Low => "low",
            Condition::Medium => "medium",
            Condition::High => "high",
        }
    }

    /// Maps the upstream's abbreviated condition codes.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "low" => Some(Condition::Low),
            "med" => Some(Condition::Medium),
            "high" => Some(Condition::High),
            _ => None,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReachObservation {
    pub reach_id: ReachId,
    /// Human-formatted gauge reading, e.g. `"3.2ft"`.
    pub stage: String,
    pub condition: Condition,
}

/// Anything that can produce the full reach -> observation table.
#[async_trait]
pub trait ReachLevelSource: Send + Sync {
    async fn reach_levels(&self) -> SyncResult<ReachLevels>;
}

/// Fetches the observation table from its source at most once per process.
///
/// A failed fetch leaves the cache empty, so the next caller tries again.
pub struct ObservationCache {
    source: Arc<dyn ReachLevelSource>,
    levels: OnceCell<Arc<ReachLevels>>,
}

impl ObservationCache {
    pub fn new(source: Arc<dyn ReachLevelSource>) -> Self {
        Self {
            source,
            levels: OnceCell::new(),
        }
    }

    pub async fn get_observations(&self) -> SyncResult<Arc<ReachLevels>> {
        let levels = self
            .levels
            .get_or_try_init(|| async {
                tracing::debug!("fetching reach observations");
                let levels = self.source.reach_levels().await?;
                tracing::info!(reaches = levels.len(), "reach observations cached");
                Ok::<_, crate::error::SyncError>(Arc::new(levels))
            })
            .await?;
        Ok(Arc::clone(levels))
    }

    #[cfg(test)]
    pub fn is_loaded(&self) -> bool {
        self.levels.initialized()
    }
}
