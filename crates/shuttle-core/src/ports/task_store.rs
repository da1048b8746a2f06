//! TaskStore port - タスク・ジョブ・データセットの正本（source of truth）
//!
//! スケジューラ本体はロックを持ちません。必要なのはストアが提供する
//! 「1 レコードに対する条件付き read-modify-write」だけです。
//!
//! # 契約
//! - `find_one_and_update`: 条件に合う 1 件を選び、更新し、更新後のレコードを返す。
//!   選択と更新の間に他の呼び出しが割り込んではならない。
//! - `update_many`: レコード単位でアトミック（全体としてのトランザクションは不要）。
//! - `TaskChange::RaiseRequirement` は同じ更新の中で max を取る。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::StoreError;
use crate::domain::ids::{DatasetId, JobId, TaskId};
use crate::domain::job::{DatasetRecord, JobRecord};
use crate::domain::query::{Pick, TaskFilter, TaskUpdate};
use crate::domain::report::UpdateCount;
use crate::domain::status::{DatasetStatus, JobStatus};
use crate::domain::task::TaskRecord;

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// 新規タスクを保存（同じ ID があれば `StoreError::Duplicate`）
    async fn insert_task(&self, task: TaskRecord) -> Result<(), StoreError>;

    async fn get_task(&self, task_id: TaskId) -> Result<Option<TaskRecord>, StoreError>;

    /// 条件に合うタスクをストア順に返す
    async fn find_tasks(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>, StoreError>;

    /// 条件に合う 1 件をアトミックに更新し、更新後の値を返す（なければ `None`）
    async fn find_one_and_update(
        &self,
        filter: &TaskFilter,
        pick: Pick,
        update: &TaskUpdate,
    ) -> Result<Option<TaskRecord>, StoreError>;

    /// 条件に合うすべてのタスクを更新
    async fn update_many(
        &self,
        filter: &TaskFilter,
        update: &TaskUpdate,
    ) -> Result<UpdateCount, StoreError>;

    async fn insert_dataset(&self, dataset: DatasetRecord) -> Result<(), StoreError>;

    async fn get_dataset(&self, dataset_id: DatasetId) -> Result<Option<DatasetRecord>, StoreError>;

    /// 現在の状態が `allowed` に含まれるときだけ `target` に更新
    async fn update_dataset_status(
        &self,
        dataset_id: DatasetId,
        allowed: &[DatasetStatus],
        target: DatasetStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<DatasetRecord>, StoreError>;

    async fn insert_job(&self, job: JobRecord) -> Result<(), StoreError>;

    async fn get_job(&self, job_id: JobId) -> Result<Option<JobRecord>, StoreError>;

    /// 現在の状態が `allowed` に含まれるときだけ `target` に更新
    async fn update_job_status(
        &self,
        job_id: JobId,
        allowed: &[JobStatus],
        target: JobStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<JobRecord>, StoreError>;
}
