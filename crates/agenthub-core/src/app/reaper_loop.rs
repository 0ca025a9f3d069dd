//! ReaperLoop - Lease 期限切れの再配送
//!
//! 期限切れは claim 時に遅延評価されるので、reaper は状態を書き換えない。
//! 期限切れタスクの id を DeliveryQueue に戻して、誰かが claim しに来るようにするだけ。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::ports::{DeliveryQueue, TaskStore};

/// ReaperLoop は lease が切れたタスクを定期的に再配送する
///
/// # フロー
/// 1. TaskStore::expired_leases() で期限切れを取得
/// 2. DeliveryQueue::push() で再配送（重複は queue 側で吸収）
pub struct ReaperLoop {
    store: Arc<dyn TaskStore>,
    queue: Arc<dyn DeliveryQueue>,
    interval: Duration,
}

impl ReaperLoop {
    pub fn new(store: Arc<dyn TaskStore>, queue: Arc<dyn DeliveryQueue>, interval: Duration) -> Self {
        Self {
            store,
            queue,
            interval,
        }
    }

    /// One pass. Returns how many ids were pushed back.
    pub async fn sweep(&self) -> usize {
        let mut pushed = 0;
        for task_id in self.store.expired_leases().await {
            tracing::warn!(task_id = %task_id, "lease expired; redelivering");
            if let Err(err) = self.queue.push(task_id).await {
                tracing::debug!(error = %err, "delivery queue closed; stopping sweep");
                break;
            }
            pushed += 1;
        }
        pushed
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }
        tracing::debug!("reaper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AgentId, TaskDraft, TaskId};
    use crate::impls::{InMemoryDeliveryQueue, InMemoryTaskStore};
    use crate::ports::ManualClock;
    use chrono::{TimeZone, Utc};

    fn setup() -> (Arc<ManualClock>, Arc<InMemoryTaskStore>, Arc<InMemoryDeliveryQueue>) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        let store = Arc::new(InMemoryTaskStore::new(clock.clone()));
        (clock, store, Arc::new(InMemoryDeliveryQueue::new()))
    }

    #[tokio::test]
    async fn sweep_pushes_only_expired_claims() {
        let (clock, store, queue) = setup();
        for id in ["T1", "T2", "T3"] {
            store.create(TaskDraft::new(id).with_id(id)).await.unwrap();
        }
        let agent = AgentId::new("agentA");
        store.claim(&TaskId::new("T1"), &agent, chrono::Duration::seconds(1)).await.unwrap();
        store.claim(&TaskId::new("T2"), &agent, chrono::Duration::seconds(60)).await.unwrap();
        clock.advance(chrono::Duration::seconds(2));

        let reaper = ReaperLoop::new(store.clone(), queue.clone(), Duration::from_millis(10));
        assert_eq!(reaper.sweep().await, 1);
        assert_eq!(queue.pop(Duration::from_millis(10)).await.unwrap(), Some(TaskId::new("T1")));

        // state is untouched until someone claims
        let snapshot = store.get(&TaskId::new("T1")).await.unwrap();
        assert_eq!(snapshot.task.owner(), Some(&agent));
        assert!(store.events(&TaskId::new("T1")).await.unwrap().len() == 1);
    }

    #[tokio::test]
    async fn sweep_stops_when_queue_closed() {
        let (clock, store, queue) = setup();
        store.create(TaskDraft::new("t").with_id("T1")).await.unwrap();
        store
            .claim(&TaskId::new("T1"), &AgentId::new("agentA"), chrono::Duration::seconds(1))
            .await
            .unwrap();
        clock.advance(chrono::Duration::seconds(5));
        queue.close();

        let reaper = ReaperLoop::new(store, queue, Duration::from_millis(10));
        assert_eq!(reaper.sweep().await, 0);
    }

    #[tokio::test]
    async fn run_exits_on_shutdown() {
        let (_clock, store, queue) = setup();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(ReaperLoop::new(store, queue, Duration::from_millis(10)).run(rx));

        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("reaper should stop")
            .unwrap();
    }
}
