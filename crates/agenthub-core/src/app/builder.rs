//! HubBuilder - ハブの構築とワイヤリング
//!
//! # Fail-fast 設計
//! - build() 時に HubConfig を検証
//! - 不正な設定は BuildError で返す（ワーカーを起動してから気づくことはない）

use std::sync::Arc;

use crate::config::{ConfigError, HubConfig};
use crate::domain::{AgentId, ClaimError, Task, TaskDraft};
use crate::impls::{InMemoryArtifactStore, InMemoryDeliveryQueue, InMemoryTaskStore};
use crate::ports::{
    Clock, DeliveryQueue, EventSink, IdGenerator, QueueError, SystemClock, TaskStore,
    TracingEventSink, UlidGenerator,
};

use super::reaper_loop::ReaperLoop;
use super::worker_loop::{TaskHandler, WorkerGroup, WorkerLoop};

/// HubBuilder は設定・時計・イベント通知先を受け取って Hub を組み立てる
///
/// # 使用例
/// ```ignore
/// let hub = HubBuilder::new()
///     .config(HubConfig::load_from("agenthub.toml")?)
///     .build()?;
/// let running = hub.start(Arc::new(MyHandler));
/// hub.submit("Write README").await?;
/// running.shutdown_and_join().await;
/// ```
pub struct HubBuilder {
    config: HubConfig,
    clock: Option<Arc<dyn Clock>>,
    sink: Option<Arc<dyn EventSink>>,
}

/// BuildError はハブ構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid config: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error(transparent)]
    Claim(#[from] ClaimError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl HubBuilder {
    pub fn new() -> Self {
        Self {
            config: HubConfig::default(),
            clock: None,
            sink: None,
        }
    }

    pub fn config(mut self, config: HubConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> Result<Hub, BuildError> {
        self.config.validate()?;

        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let sink: Arc<dyn EventSink> = match self.sink {
            Some(sink) => sink,
            None => Arc::new(TracingEventSink),
        };
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(Arc::clone(&clock)));

        let store = InMemoryTaskStore::new(Arc::clone(&clock))
            .with_id_generator(Arc::clone(&ids))
            .with_event_sink(sink);
        let artifacts = InMemoryArtifactStore::new(Arc::clone(&clock), Arc::clone(&ids));

        Ok(Hub {
            config: self.config,
            ids,
            store: Arc::new(store),
            queue: Arc::new(InMemoryDeliveryQueue::new()),
            artifacts: Arc::new(artifacts),
        })
    }
}

impl Default for HubBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Hub はストア・配送キュー・成果物ストアをまとめたもの
///
/// ワーカーは `start()` で起動し、返ってきた WorkerGroup で止める。
pub struct Hub {
    config: HubConfig,
    ids: Arc<dyn IdGenerator>,
    store: Arc<InMemoryTaskStore>,
    queue: Arc<InMemoryDeliveryQueue>,
    artifacts: Arc<InMemoryArtifactStore>,
}

impl Hub {
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<InMemoryTaskStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<InMemoryDeliveryQueue> {
        &self.queue
    }

    pub fn artifacts(&self) -> &Arc<InMemoryArtifactStore> {
        &self.artifacts
    }

    /// Create a pending task and offer it to workers.
    pub async fn submit(&self, title: impl Into<String>) -> Result<Task, HubError> {
        self.submit_draft(TaskDraft::new(title)).await
    }

    pub async fn submit_draft(&self, draft: TaskDraft) -> Result<Task, HubError> {
        let task = self.store.create(draft).await?;
        self.queue.push(task.task_id.clone()).await?;
        tracing::info!(task_id = %task.task_id, title = %task.title, "task submitted");
        Ok(task)
    }

    /// A worker wired to this hub's stores and lease settings.
    pub fn worker(&self, agent_id: AgentId, handler: Arc<dyn TaskHandler>) -> WorkerLoop {
        WorkerLoop::new(
            agent_id,
            self.store.clone(),
            self.queue.clone(),
            self.artifacts.clone(),
            handler,
            self.config.lease.default_lease(),
            self.config.lease.renew_interval(),
            self.config.worker.poll_timeout(),
        )
    }

    pub fn reaper(&self) -> ReaperLoop {
        ReaperLoop::new(
            self.store.clone(),
            self.queue.clone(),
            self.config.reaper.interval(),
        )
    }

    /// Spawn `worker.count` workers (and the reaper when enabled).
    pub fn start(&self, handler: Arc<dyn TaskHandler>) -> WorkerGroup {
        let mut group = WorkerGroup::new();
        for _ in 0..self.config.worker.count {
            let agent_id = self.ids.generate_agent_id();
            group.spawn_worker(self.worker(agent_id, Arc::clone(&handler)));
        }
        if self.config.reaper.enabled {
            group.spawn_reaper(self.reaper());
        }
        tracing::info!(
            workers = self.config.worker.count,
            reaper = self.config.reaper.enabled,
            "hub started"
        );
        group
    }
}
