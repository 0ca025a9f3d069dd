//! Impls - ports の実装（インメモリ）
//!
//! - **InMemoryTaskStore**: claim/lease の正本
//! - **InMemoryDeliveryQueue**: 配送キュー
//! - **InMemoryArtifactStore**: 成果物

pub mod inmem_artifact;
pub mod inmem_delivery;
pub mod inmem_store;

pub use self::inmem_artifact::InMemoryArtifactStore;
pub use self::inmem_delivery::InMemoryDeliveryQueue;
pub use self::inmem_store::InMemoryTaskStore;
