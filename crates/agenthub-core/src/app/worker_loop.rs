//! WorkerLoop - タスク実行ループ
//!
//! # フロー
//! 1. DeliveryQueue::pop() で task_id 取得（候補に過ぎない）
//! 2. TaskStore::claim() で lease 取得（負けたら次へ）
//! 3. Handler 実行。その間 renew_interval ごとに lease を延長
//! 4. 結果に応じて complete / release / fail（release したら再配送）
//!
//! renew に失敗したら（NotOwner / LeaseExpired）もう自分のタスクではないので
//! handler を捨てて次へ進む。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::domain::{AgentId, Task, TaskId};
use crate::ports::{Artifact, ArtifactStore, DeliveryQueue, QueueError, TaskStore};

use super::reaper_loop::ReaperLoop;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    /// Give the task back; someone may try again.
    #[error("retryable: {0}")]
    Retryable(String),

    /// Mark the task failed for good.
    #[error("fatal: {0}")]
    Fatal(String),

    /// Walk away without telling the store, as a crashed worker would. The
    /// lease runs out and the task becomes reclaimable.
    #[error("abandoned: {0}")]
    Abandon(String),
}

/// Does the actual work for a claimed task.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> Result<Artifact, HandlerError>;
}

/// What happened to one delivered task id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkOutcome {
    Completed,
    Failed,
    Released,
    Abandoned,
    /// Claim refused (someone else holds it, or it is finished).
    Skipped,
    /// Lease lost while working, or the store refused the final transition.
    LostLease,
}

pub struct WorkerLoop {
    agent_id: AgentId,
    store: Arc<dyn TaskStore>,
    queue: Arc<dyn DeliveryQueue>,
    artifacts: Arc<dyn ArtifactStore>,
    handler: Arc<dyn TaskHandler>,
    lease: chrono::Duration,
    renew_interval: Duration,
    poll_timeout: Duration,
}

impl WorkerLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agent_id: AgentId,
        store: Arc<dyn TaskStore>,
        queue: Arc<dyn DeliveryQueue>,
        artifacts: Arc<dyn ArtifactStore>,
        handler: Arc<dyn TaskHandler>,
        lease: chrono::Duration,
        renew_interval: Duration,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            agent_id,
            store,
            queue,
            artifacts,
            handler,
            lease,
            renew_interval,
            poll_timeout,
        }
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// Poll and process until shutdown is requested or the queue closes.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(agent_id = %self.agent_id, "worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let popped = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                popped = self.queue.pop(self.poll_timeout) => popped,
            };

            match popped {
                Ok(Some(task_id)) => {
                    self.process(&task_id).await;
                }
                Ok(None) => {
                    tracing::trace!(agent_id = %self.agent_id, "no claimable tasks");
                }
                Err(QueueError::Closed) => break,
            }
        }
        tracing::info!(agent_id = %self.agent_id, "worker stopped");
    }

    /// Claim and work one task.
    pub async fn process(&self, task_id: &TaskId) -> WorkOutcome {
        let task = match self.store.claim(task_id, &self.agent_id, self.lease).await {
            Ok(grant) => {
                tracing::info!(
                    agent_id = %self.agent_id,
                    task_id = %task_id,
                    attempt = grant.task.attempt,
                    reclaimed = grant.reclaimed,
                    "claimed task"
                );
                grant.task
            }
            Err(err) => {
                tracing::debug!(agent_id = %self.agent_id, task_id = %task_id, error = %err, "claim refused");
                return WorkOutcome::Skipped;
            }
        };

        let Some(result) = self.run_with_renewal(&task).await else {
            return WorkOutcome::LostLease;
        };

        match result {
            Ok(artifact) => {
                let result_ref = match self.artifacts.put(task_id, &self.agent_id, artifact).await {
                    Ok(result_ref) => Some(result_ref),
                    Err(err) => {
                        tracing::warn!(task_id = %task_id, error = %err, "artifact not stored");
                        None
                    }
                };
                self.finish(
                    task_id,
                    self.store.complete(task_id, &self.agent_id, result_ref).await,
                    WorkOutcome::Completed,
                )
            }
            Err(HandlerError::Retryable(reason)) => {
                let outcome = self.finish(
                    task_id,
                    self.store.release(task_id, &self.agent_id, &reason).await,
                    WorkOutcome::Released,
                );
                if outcome == WorkOutcome::Released {
                    self.redeliver(task_id).await;
                }
                outcome
            }
            Err(HandlerError::Fatal(reason)) => self.finish(
                task_id,
                self.store.fail(task_id, &self.agent_id, &reason).await,
                WorkOutcome::Failed,
            ),
            Err(HandlerError::Abandon(reason)) => {
                tracing::warn!(agent_id = %self.agent_id, task_id = %task_id, reason = %reason, "abandoning task");
                WorkOutcome::Abandoned
            }
        }
    }

    /// Drive the handler while renewing the lease. `None` means the lease
    /// was lost and the handler was dropped.
    async fn run_with_renewal(&self, task: &Task) -> Option<Result<Artifact, HandlerError>> {
        let mut work = self.handler.handle(task);
        let mut ticker = tokio::time::interval(self.renew_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick fires immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                result = &mut work => return Some(result),
                _ = ticker.tick() => {
                    if let Err(err) = self.store.renew(&task.task_id, &self.agent_id).await {
                        tracing::warn!(
                            agent_id = %self.agent_id,
                            task_id = %task.task_id,
                            error = %err,
                            "lost ownership while working"
                        );
                        return None;
                    }
                }
            }
        }
    }

    /// A released task is pending again but nothing else will offer it.
    async fn redeliver(&self, task_id: &TaskId) {
        if let Err(err) = self.queue.push(task_id.clone()).await {
            tracing::warn!(task_id = %task_id, error = %err, "released task not redelivered");
        }
    }

    fn finish<T>(
        &self,
        task_id: &TaskId,
        result: Result<T, crate::domain::ClaimError>,
        outcome: WorkOutcome,
    ) -> WorkOutcome {
        match result {
            Ok(_) => outcome,
            Err(err) => {
                tracing::warn!(agent_id = %self.agent_id, task_id = %task_id, error = %err, "store rejected result");
                WorkOutcome::LostLease
            }
        }
    }
}

/// Handle for background loops sharing one shutdown signal.
/// - `request_shutdown()` で全ループに停止を通知
/// - 実行中の handler は打ち切らない（新しい claim をやめるだけ）
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            joins: Vec::new(),
        }
    }

    pub fn spawn_worker(&mut self, worker: WorkerLoop) {
        let rx = self.shutdown_tx.subscribe();
        self.joins.push(tokio::spawn(worker.run(rx)));
    }

    pub fn spawn_reaper(&mut self, reaper: ReaperLoop) {
        let rx = self.shutdown_tx.subscribe();
        self.joins.push(tokio::spawn(reaper.run(rx)));
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(err) = join.await {
                tracing::error!(error = %err, "background loop panicked");
            }
        }
    }
}

impl Default for WorkerGroup {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventKind, TaskDraft, TaskStatus};
    use crate::impls::{InMemoryArtifactStore, InMemoryDeliveryQueue, InMemoryTaskStore};
    use crate::ports::{Clock, SystemClock, UlidGenerator};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Fixture {
        store: Arc<InMemoryTaskStore>,
        queue: Arc<InMemoryDeliveryQueue>,
        artifacts: Arc<InMemoryArtifactStore>,
    }

    impl Fixture {
        fn new() -> Self {
            let clock: Arc<dyn Clock> = Arc::new(SystemClock);
            let ids = Arc::new(UlidGenerator::new(clock.clone()));
            Self {
                store: Arc::new(InMemoryTaskStore::new(clock.clone())),
                queue: Arc::new(InMemoryDeliveryQueue::new()),
                artifacts: Arc::new(InMemoryArtifactStore::new(clock, ids)),
            }
        }

        fn worker(&self, name: &str, handler: Arc<dyn TaskHandler>, lease_ms: i64) -> WorkerLoop {
            WorkerLoop::new(
                AgentId::new(name),
                self.store.clone(),
                self.queue.clone(),
                self.artifacts.clone(),
                handler,
                chrono::Duration::milliseconds(lease_ms),
                Duration::from_millis((lease_ms / 3).max(1) as u64),
                Duration::from_millis(50),
            )
        }

        async fn submit(&self, id: &str) -> TaskId {
            let task = self.store.create(TaskDraft::new(id).with_id(id)).await.unwrap();
            self.queue.push(task.task_id.clone()).await.unwrap();
            task.task_id
        }
    }

    struct Note;

    #[async_trait]
    impl TaskHandler for Note {
        async fn handle(&self, task: &Task) -> Result<Artifact, HandlerError> {
            Ok(Artifact::new("completion_note", format!("Task '{}' was simulated and completed.", task.title)))
        }
    }

    /// Sleeps longer than the lease, relying on renewal.
    struct Slow(Duration);

    #[async_trait]
    impl TaskHandler for Slow {
        async fn handle(&self, _task: &Task) -> Result<Artifact, HandlerError> {
            tokio::time::sleep(self.0).await;
            Ok(Artifact::new("note", "slow but done"))
        }
    }

    struct FailWith(HandlerError);

    #[async_trait]
    impl TaskHandler for FailWith {
        async fn handle(&self, _task: &Task) -> Result<Artifact, HandlerError> {
            Err(self.0.clone())
        }
    }

    /// Abandons the first `n` tasks it sees.
    struct Flaky {
        abandon: AtomicU32,
    }

    #[async_trait]
    impl TaskHandler for Flaky {
        async fn handle(&self, _task: &Task) -> Result<Artifact, HandlerError> {
            if self
                .abandon
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(HandlerError::Abandon("simulated crash".into()));
            }
            Ok(Artifact::new("note", "done"))
        }
    }

    #[tokio::test]
    async fn process_completes_and_stores_artifact() {
        let fx = Fixture::new();
        let t = fx.submit("T").await;
        let worker = fx.worker("agentA", Arc::new(Note), 60_000);

        assert_eq!(worker.process(&t).await, WorkOutcome::Completed);

        let snapshot = fx.store.get(&t).await.unwrap();
        assert_eq!(snapshot.task.status, TaskStatus::Done);
        let result_ref = fx.store.result(&t).await.unwrap().unwrap();
        let stored = fx.artifacts.get(&result_ref).await.unwrap();
        assert_eq!(stored.created_by, AgentId::new("agentA"));
        assert!(stored.artifact.content.contains("was simulated and completed"));
    }

    #[tokio::test]
    async fn lease_is_renewed_while_handler_runs() {
        let fx = Fixture::new();
        let t = fx.submit("T").await;
        let worker = fx.worker("agentA", Arc::new(Slow(Duration::from_millis(300))), 120);

        let rival = {
            let store = fx.store.clone();
            let t = t.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                store.claim(&t, &AgentId::new("agentB"), chrono::Duration::seconds(5)).await
            })
        };

        assert_eq!(worker.process(&t).await, WorkOutcome::Completed);
        assert!(rival.await.unwrap().is_err(), "renewed lease must keep rivals out");
        assert_eq!(fx.store.get(&t).await.unwrap().task.attempt, 1);
    }

    #[tokio::test]
    async fn retryable_error_releases_and_fatal_error_fails() {
        let fx = Fixture::new();
        let t1 = fx.submit("T1").await;
        let t2 = fx.submit("T2").await;
        assert_eq!(fx.queue.pop(Duration::from_millis(10)).await.unwrap(), Some(t1.clone()));

        let retry = fx.worker("agentA", Arc::new(FailWith(HandlerError::Retryable("busy".into()))), 60_000);
        assert_eq!(retry.process(&t1).await, WorkOutcome::Released);
        let task = fx.store.get(&t1).await.unwrap().task;
        assert_eq!(task.status, TaskStatus::Pending);
        // T2 still waiting plus T1 offered again
        assert_eq!(fx.queue.len().await, 2);

        let fatal = fx.worker("agentA", Arc::new(FailWith(HandlerError::Fatal("bad input".into()))), 60_000);
        assert_eq!(fatal.process(&t2).await, WorkOutcome::Failed);
        let task = fx.store.get(&t2).await.unwrap().task;
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.failure_reason.as_deref(), Some("bad input"));
    }

    #[tokio::test]
    async fn released_task_is_picked_up_again() {
        let fx = Fixture::new();
        let t = fx.submit("T").await;
        assert_eq!(fx.queue.pop(Duration::from_millis(10)).await.unwrap(), Some(t.clone()));

        let retry = fx.worker("agentA", Arc::new(FailWith(HandlerError::Retryable("busy".into()))), 60_000);
        assert_eq!(retry.process(&t).await, WorkOutcome::Released);
        let again = fx.queue.pop(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(again, t);

        let worker = fx.worker("agentB", Arc::new(Note), 60_000);
        assert_eq!(worker.process(&again).await, WorkOutcome::Completed);
        let task = fx.store.get(&t).await.unwrap().task;
        assert_eq!(task.status, TaskStatus::Done);
        assert_eq!(task.attempt, 2);
    }

    #[tokio::test]
    async fn held_task_is_skipped() {
        let fx = Fixture::new();
        let t = fx.submit("T").await;
        fx.store.claim(&t, &AgentId::new("agentB"), chrono::Duration::seconds(60)).await.unwrap();

        let worker = fx.worker("agentA", Arc::new(Note), 60_000);
        assert_eq!(worker.process(&t).await, WorkOutcome::Skipped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn group_drains_queue_and_reclaims_abandoned_work() {
        let fx = Fixture::new();
        let mut ids = Vec::new();
        for i in 0..6 {
            ids.push(fx.submit(&format!("T{i}")).await);
        }

        let handler: Arc<dyn TaskHandler> = Arc::new(Flaky {
            abandon: AtomicU32::new(1),
        });
        let mut group = WorkerGroup::new();
        group.spawn_worker(fx.worker("worker-1", handler.clone(), 100));
        group.spawn_worker(fx.worker("worker-2", handler.clone(), 100));
        group.spawn_reaper(ReaperLoop::new(fx.store.clone(), fx.queue.clone(), Duration::from_millis(30)));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if fx.store.counts().await.done == ids.len() {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "tasks did not finish");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        group.shutdown_and_join().await;

        let events = fx.store.all_events().await;
        let reclaims = events.iter().filter(|e| e.kind == EventKind::TaskReclaimed).count();
        assert_eq!(reclaims, 1);
        let tasks: Vec<Task> = fx.store.list().await.into_iter().map(|s| s.task).collect();
        assert!(crate::app::audit::audit(&tasks, &events).is_empty());
    }

    #[tokio::test]
    async fn shutdown_stops_idle_workers() {
        let fx = Fixture::new();
        let mut group = WorkerGroup::new();
        group.spawn_worker(fx.worker("worker-1", Arc::new(Note), 1_000));
        assert_eq!(group.len(), 1);

        tokio::time::timeout(Duration::from_secs(1), group.shutdown_and_join())
            .await
            .expect("workers should stop promptly");
    }
}
