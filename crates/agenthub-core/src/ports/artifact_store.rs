//! ArtifactStore port - ワーカーの成果物
//!
//! complete() には ArtifactRef だけを渡す。中身はこちらに置く。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{AgentId, ArtifactRef, TaskId};

/// Output produced by a worker for a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// e.g. "completion_note", "result_html".
    pub kind: String,
    pub content: String,
}

impl Artifact {
    pub fn new(kind: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredArtifact {
    pub artifact_ref: ArtifactRef,
    pub task_id: TaskId,
    pub created_by: AgentId,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub artifact: Artifact,
}

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("artifact content is empty")]
    Empty,
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(
        &self,
        task_id: &TaskId,
        agent_id: &AgentId,
        artifact: Artifact,
    ) -> Result<ArtifactRef, ArtifactError>;

    async fn get(&self, artifact_ref: &ArtifactRef) -> Option<StoredArtifact>;
}
