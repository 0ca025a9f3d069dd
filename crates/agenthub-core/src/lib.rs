//! agenthub-core
//!
//! Lease-based task claiming for a shared board of agent work.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, lease rules, state, events, errors）
//! - **ports**: 抽象化レイヤー（TaskStore, DeliveryQueue, ArtifactStore, Clock, IdGenerator, EventSink）
//! - **impls**: インメモリ実装（claim store の正本はここ）
//! - **app**: worker / reaper ループ、Hub の構築、集計と監査
//! - **config**: `agenthub.toml`

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
