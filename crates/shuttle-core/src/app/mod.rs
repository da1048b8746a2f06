//! App - アプリケーション層
//!
//! ports を組み合わせてスケジューラの操作を実装します。
//!
//! # 主要コンポーネント
//! - **SchedulerBuilder**: 構築とワイヤリング（起動時検証）
//! - **Scheduler**: すべての操作の入口（状態を持たないハンドル）
//! - **transition**: ValidatedTransition / UnconditionalBulkTransition
//! - **assign**: キュー割り当て（waiting -> queued）
//! - **lifecycle**: ワーカー報告と単一タスクの状態変更
//! - **tuner**: 失敗時の資源要求の引き上げ
//! - **bulk**: データセット単位・ID リスト単位の一括操作
//! - **records**: 作成・取得、データセット / ジョブの状態変更
//! - **status**: 集計クエリ

pub mod assign;
pub mod builder;
pub mod bulk;
pub mod lifecycle;
pub mod records;
pub mod scheduler;
pub mod status;
pub mod transition;
pub mod tuner;

pub use self::assign::queue_filter;
pub use self::builder::{BuildError, SchedulerBuilder};
pub use self::scheduler::Scheduler;
pub use self::status::{NameCounts, StatusCounts, TaskStats};
pub use self::transition::{Transition, UnconditionalBulkTransition, ValidatedTransition};
pub use self::tuner::RequirementTuner;
