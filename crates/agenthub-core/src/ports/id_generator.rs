//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（Clock の時刻を timestamp 部に使う）

use crate::domain::ids::{AgentId, ArtifactRef, TaskId};
use crate::ports::Clock;
use ulid::Ulid;

/// Thread Safety: `Send + Sync`（複数ワーカーから共有される）
pub trait IdGenerator: Send + Sync {
    fn generate_task_id(&self) -> TaskId;

    fn generate_agent_id(&self) -> AgentId;

    fn generate_artifact_ref(&self) -> ArtifactRef;
}

/// ULID-backed generator. The timestamp part comes from the injected clock
/// so ids sort by creation time even under a `ManualClock`.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_task_id(&self) -> TaskId {
        TaskId::from_ulid(self.next_ulid())
    }

    fn generate_agent_id(&self) -> AgentId {
        AgentId::from_ulid(self.next_ulid())
    }

    fn generate_artifact_ref(&self) -> ArtifactRef {
        ArtifactRef::from_ulid(self.next_ulid())
    }
}
