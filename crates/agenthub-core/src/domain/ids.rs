//! Domain identifiers (strongly-typed IDs).
//!
//! タスク ID やエージェント ID は外部から文字列で渡される（"task-…", "agentA" など）ので、
//! 中身は `String` のまま、Phantom type で種類だけを区別します。
//!
//! - `TaskId` と `AgentId` は混同できない（コンパイル時エラー）
//! - 生成系の ID は `IdGenerator` が `prefix + ULID` で作る
//! - JSON 上はただの文字列（`#[serde(transparent)]`）

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// 生成時に使うプレフィックス（"task-", "agent-", "artifact-"）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Generic string identifier tagged with a marker type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    value: String,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    /// Wrap an externally supplied identifier as-is.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            _marker: PhantomData,
        }
    }

    /// Build a generated identifier: `{prefix}{ulid}`.
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self::new(format!("{}{}", T::prefix(), ulid))
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl<T: IdMarker> From<&str> for Id<T> {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl<T: IdMarker> From<String> for Id<T> {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl<T: IdMarker> Borrow<str> for Id<T> {
    fn borrow(&self) -> &str {
        &self.value
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}

// ========================================
// マーカー型の定義
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn prefix() -> &'static str {
        "task-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Agent {}

impl IdMarker for Agent {
    fn prefix() -> &'static str {
        "agent-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Artifact {}

impl IdMarker for Artifact {
    fn prefix() -> &'static str {
        "artifact-"
    }
}

/// Identifier of a task on the board.
pub type TaskId = Id<Task>;

/// Identity of a worker/supervisor/reviewer acting as claimant or owner.
pub type AgentId = Id<Agent>;

/// Reference to a stored result artifact.
pub type ArtifactRef = Id<Artifact>;
