//! InMemoryTaskStore - 開発用・テスト用の正本
//!
//! # 実装詳細
//! - タスクは `BTreeMap<TaskId, TaskRecord>`（ULID 順 = 作成順がストア順）
//! - すべての操作を 1 つの `tokio::sync::Mutex` の中で行うので、
//!   `find_one_and_update` の選択と更新は分割されない
//! - 二次索引は持たず毎回スキャンする

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::errors::StoreError;
use crate::domain::ids::{DatasetId, JobId, TaskId};
use crate::domain::job::{DatasetRecord, JobRecord};
use crate::domain::query::{Pick, TaskFilter, TaskUpdate};
use crate::domain::report::UpdateCount;
use crate::domain::status::{DatasetStatus, JobStatus};
use crate::domain::task::TaskRecord;
use crate::ports::TaskStore;

#[derive(Default)]
struct State {
    tasks: BTreeMap<TaskId, TaskRecord>,
    datasets: HashMap<DatasetId, DatasetRecord>,
    jobs: HashMap<JobId, JobRecord>,
}

/// InMemoryTaskStore はプロセス内のストア
///
/// # 使用例
/// ```ignore
/// let store = Arc::new(InMemoryTaskStore::new());
/// let scheduler = SchedulerBuilder::new().store(store).build()?;
/// ```
#[derive(Default)]
pub struct InMemoryTaskStore {
    state: Mutex<State>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn task_count(&self) -> usize {
        self.state.lock().await.tasks.len()
    }
}

/// 最も優先度の高い候補（同点ならストア順で先のもの）
fn pick_candidate<'a>(
    mut candidates: impl Iterator<Item = &'a TaskRecord>,
    pick: Pick,
) -> Option<TaskId> {
    match pick {
        Pick::First => candidates.next().map(|t| t.task_id),
        Pick::HighestPriority => candidates
            .fold(None::<&TaskRecord>, |best, task| match best {
                Some(b) if task.priority.total_cmp(&b.priority) != Ordering::Greater => Some(b),
                _ => Some(task),
            })
            .map(|t| t.task_id),
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert_task(&self, task: TaskRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.tasks.contains_key(&task.task_id) {
            return Err(StoreError::Duplicate(task.task_id.to_string()));
        }
        state.tasks.insert(task.task_id, task);
        Ok(())
    }

    async fn get_task(&self, task_id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self.state.lock().await.tasks.get(&task_id).cloned())
    }

    async fn find_tasks(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .tasks
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect())
    }

    async fn find_one_and_update(
        &self,
        filter: &TaskFilter,
        pick: Pick,
        update: &TaskUpdate,
    ) -> Result<Option<TaskRecord>, StoreError> {
        let mut state = self.state.lock().await;
        let chosen = pick_candidate(state.tasks.values().filter(|t| filter.matches(t)), pick);
        let Some(task_id) = chosen else {
            return Ok(None);
        };
        let Some(task) = state.tasks.get_mut(&task_id) else {
            return Ok(None);
        };
        update.apply(task);
        Ok(Some(task.clone()))
    }

    async fn update_many(
        &self,
        filter: &TaskFilter,
        update: &TaskUpdate,
    ) -> Result<UpdateCount, StoreError> {
        let mut state = self.state.lock().await;
        let mut count = UpdateCount::default();
        for task in state.tasks.values_mut().filter(|t| filter.matches(t)) {
            count.matched += 1;
            if update.apply(task) {
                count.modified += 1;
            }
        }
        Ok(count)
    }

    async fn insert_dataset(&self, dataset: DatasetRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.datasets.contains_key(&dataset.dataset_id) {
            return Err(StoreError::Duplicate(dataset.dataset_id.to_string()));
        }
        state.datasets.insert(dataset.dataset_id, dataset);
        Ok(())
    }

    async fn get_dataset(&self, dataset_id: DatasetId) -> Result<Option<DatasetRecord>, StoreError> {
        Ok(self.state.lock().await.datasets.get(&dataset_id).cloned())
    }

    async fn update_dataset_status(
        &self,
        dataset_id: DatasetId,
        allowed: &[DatasetStatus],
        target: DatasetStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<DatasetRecord>, StoreError> {
        let mut state = self.state.lock().await;
        match state.datasets.get_mut(&dataset_id) {
            Some(d) if allowed.contains(&d.status) => {
                d.status = target;
                d.status_changed = at;
                Ok(Some(d.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn insert_job(&self, job: JobRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.jobs.contains_key(&job.job_id) {
            return Err(StoreError::Duplicate(job.job_id.to_string()));
        }
        state.jobs.insert(job.job_id, job);
        Ok(())
    }

    async fn get_job(&self, job_id: JobId) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.state.lock().await.jobs.get(&job_id).cloned())
    }

    async fn update_job_status(
        &self,
        job_id: JobId,
        allowed: &[JobStatus],
        target: JobStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<JobRecord>, StoreError> {
        let mut state = self.state.lock().await;
        match state.jobs.get_mut(&job_id) {
            Some(j) if allowed.contains(&j.status) => {
                j.status = target;
                j.status_changed = at;
                Ok(Some(j.clone()))
            }
            _ => Ok(None),
        }
    }
}
