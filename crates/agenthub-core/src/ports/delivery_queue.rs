//! DeliveryQueue port - 配送キュー
//!
//! DeliveryQueue は task_id のみを流します（状態や payload は含まない）。
//! pop できたからといって claim できるとは限らない（必ず TaskStore::claim を通す）。

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::TaskId;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("delivery queue closed")]
    Closed,
}

#[async_trait]
pub trait DeliveryQueue: Send + Sync {
    /// Offer a task id to idle workers. Ids already waiting are not duplicated.
    async fn push(&self, task_id: TaskId) -> Result<(), QueueError>;

    /// Wait up to `timeout` for an id.
    async fn pop(&self, timeout: Duration) -> Result<Option<TaskId>, QueueError>;

    async fn len(&self) -> usize;

    /// Stop accepting pushes and wake every waiter.
    fn close(&self);
}
