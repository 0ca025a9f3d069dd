//! App - アプリケーション層
//!
//! ports を組み合わせてハブを動かす。
//!
//! # 主要コンポーネント
//! - **HubBuilder / Hub**: 構築とワイヤリング、タスク投入
//! - **WorkerLoop**: pop→claim→handle（lease 延長しながら）→complete/release/fail
//! - **ReaperLoop**: 期限切れ lease の再配送
//! - **audit**: イベントログの整合性チェック

pub mod audit;
pub mod builder;
pub mod reaper_loop;
pub mod worker_loop;

pub use self::audit::{Violation, audit};
pub use self::builder::{BuildError, Hub, HubBuilder, HubError};
pub use self::reaper_loop::ReaperLoop;
pub use self::worker_loop::{HandlerError, TaskHandler, WorkOutcome, WorkerGroup, WorkerLoop};
