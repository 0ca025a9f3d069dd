//! InMemoryArtifactStore - 開発用の成果物置き場

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::domain::{AgentId, ArtifactRef, TaskId};
use crate::ports::{Artifact, ArtifactError, ArtifactStore, Clock, IdGenerator, StoredArtifact};

pub struct InMemoryArtifactStore {
    artifacts: DashMap<ArtifactRef, StoredArtifact>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl InMemoryArtifactStore {
    pub fn new(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            artifacts: DashMap::new(),
            clock,
            ids,
        }
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn put(
        &self,
        task_id: &TaskId,
        agent_id: &AgentId,
        artifact: Artifact,
    ) -> Result<ArtifactRef, ArtifactError> {
        if artifact.content.is_empty() {
            return Err(ArtifactError::Empty);
        }
        let artifact_ref = self.ids.generate_artifact_ref();
        let stored = StoredArtifact {
            artifact_ref: artifact_ref.clone(),
            task_id: task_id.clone(),
            created_by: agent_id.clone(),
            created_at: self.clock.now(),
            artifact,
        };
        self.artifacts.insert(artifact_ref.clone(), stored);
        Ok(artifact_ref)
    }

    async fn get(&self, artifact_ref: &ArtifactRef) -> Option<StoredArtifact> {
        self.artifacts.get(artifact_ref).map(|entry| entry.value().clone())
    }
}
