//! Status - データセット・ジョブ・タスクの状態
//!
//! 各 enum は「その状態から遷移できる状態」(`successors`) を静的に持ちます。
//! 逆向きの索引（prev）は [`StatusTable`](super::status_table::StatusTable) が一度だけ構築します。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

/// 状態グラフを持つ状態型
pub trait Status:
    Copy + Eq + Hash + Ord + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    /// エンティティ種別（エラーメッセージ用）
    const ENTITY: &'static str;

    /// 作成直後の状態
    const START: Self;

    /// グラフ順に並べた全状態
    const ALL: &'static [Self];

    /// この状態から遷移できる状態
    fn successors(self) -> &'static [Self];

    fn as_str(self) -> &'static str;

    /// Is this a terminal state (no further transitions)?
    fn is_terminal(self) -> bool {
        self.successors().is_empty()
    }
}

/// 未知の状態文字列
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {entity} status: {input}")]
pub struct ParseStatusError {
    pub entity: &'static str,
    pub input: String,
}

fn parse_status<S: Status>(s: &str) -> Result<S, ParseStatusError> {
    S::ALL
        .iter()
        .copied()
        .find(|status| status.as_str() == s)
        .ok_or_else(|| ParseStatusError {
            entity: S::ENTITY,
            input: s.to_string(),
        })
}

/// Dataset status.
///
/// - processing: at least one job is processing
/// - suspended: put on hold
/// - errors: no jobs are active, and some jobs have errors
/// - complete: all jobs and tasks are complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetStatus {
    Processing,
    Suspended,
    Errors,
    Complete,
}

impl Status for DatasetStatus {
    const ENTITY: &'static str = "dataset";
    const START: Self = DatasetStatus::Processing;
    const ALL: &'static [Self] = &[
        DatasetStatus::Processing,
        DatasetStatus::Suspended,
        DatasetStatus::Errors,
        DatasetStatus::Complete,
    ];

    fn successors(self) -> &'static [Self] {
        use DatasetStatus::*;
        match self {
            Processing => &[Suspended, Errors, Complete],
            Suspended => &[Processing],
            Errors => &[Processing, Suspended],
            Complete => &[],
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            DatasetStatus::Processing => "processing",
            DatasetStatus::Suspended => "suspended",
            DatasetStatus::Errors => "errors",
            DatasetStatus::Complete => "complete",
        }
    }
}

/// Job status.
///
/// Same vocabulary as datasets, but an `errors` job can only go back to
/// `processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Suspended,
    Errors,
    Complete,
}

impl Status for JobStatus {
    const ENTITY: &'static str = "job";
    const START: Self = JobStatus::Processing;
    const ALL: &'static [Self] = &[
        JobStatus::Processing,
        JobStatus::Suspended,
        JobStatus::Errors,
        JobStatus::Complete,
    ];

    fn successors(self) -> &'static [Self] {
        use JobStatus::*;
        match self {
            Processing => &[Suspended, Errors, Complete],
            Suspended => &[Processing],
            Errors => &[Processing],
            Complete => &[],
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            JobStatus::Processing => "processing",
            JobStatus::Suspended => "suspended",
            JobStatus::Errors => "errors",
            JobStatus::Complete => "complete",
        }
    }
}

/// TaskStatus はタスクの状態を表現
///
/// # 状態遷移
/// - idle: 依存待ち、または優先度が低い
/// - waiting: 実行可能（キュー割り当て待ち）
/// - queued: ワーカーに割り当て済み（instance_id 発行済み）
/// - processing: ワーカーで実行中
/// - suspended: 手動で保留
/// - failed: エラー
/// - complete: 成功（終端）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Idle,
    Waiting,
    Queued,
    Processing,
    Suspended,
    Failed,
    Complete,
}

impl TaskStatus {
    /// instance_id を保持すべき状態か（queued / processing）
    pub fn is_active(self) -> bool {
        matches!(self, TaskStatus::Queued | TaskStatus::Processing)
    }
}

impl Status for TaskStatus {
    const ENTITY: &'static str = "task";
    const START: Self = TaskStatus::Idle;
    const ALL: &'static [Self] = &[
        TaskStatus::Idle,
        TaskStatus::Waiting,
        TaskStatus::Queued,
        TaskStatus::Processing,
        TaskStatus::Suspended,
        TaskStatus::Failed,
        TaskStatus::Complete,
    ];

    fn successors(self) -> &'static [Self] {
        use TaskStatus::*;
        match self {
            Idle => &[Waiting, Suspended],
            Waiting => &[Queued, Idle, Suspended],
            Queued => &[Processing, Idle, Waiting, Suspended, Failed],
            Processing => &[Idle, Waiting, Suspended, Failed, Complete],
            Suspended => &[Idle, Waiting],
            Failed => &[Idle, Waiting],
            Complete => &[],
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Idle => "idle",
            TaskStatus::Waiting => "waiting",
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Suspended => "suspended",
            TaskStatus::Failed => "failed",
            TaskStatus::Complete => "complete",
        }
    }
}

impl fmt::Display for DatasetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_status(s)
    }
}

impl FromStr for JobStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_status(s)
    }
}

impl FromStr for TaskStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_status(s)
    }
}
