//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。
//! claim store の正本、配送キュー、成果物、時刻、ID 生成、イベント通知を trait で切り離す。

pub mod artifact_store;
pub mod clock;
pub mod delivery_queue;
pub mod event_sink;
pub mod id_generator;
pub mod task_store;

pub use self::artifact_store::{Artifact, ArtifactError, ArtifactStore, StoredArtifact};
pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::delivery_queue::{DeliveryQueue, QueueError};
pub use self::event_sink::{CollectingEventSink, EventSink, TracingEventSink};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::task_store::{ClaimGrant, TaskStore};
