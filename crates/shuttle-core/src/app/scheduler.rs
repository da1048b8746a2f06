//! Scheduler - すべての操作の入口
//!
//! `Scheduler` 自体は状態を持ちません（ストア・時計・ID 生成器・遷移表への参照だけ）。
//! 並行性はすべてストアの「1 レコード条件付き更新」に委ねます。
//! 操作ごとの実装は `assign` / `lifecycle` / `bulk` / `records` / `status` に分かれています。

use std::sync::Arc;

use crate::app::tuner::RequirementTuner;
use crate::config::SchedulerConfig;
use crate::domain::status_table::StatusTables;
use crate::ports::{Clock, IdGenerator, TaskStore};

/// Scheduler は安価に Clone できるハンドル
#[derive(Clone)]
pub struct Scheduler {
    pub(crate) store: Arc<dyn TaskStore>,
    pub(crate) tables: Arc<StatusTables>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) tuner: RequirementTuner,
    pub(crate) config: Arc<SchedulerConfig>,
}

impl Scheduler {
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn tables(&self) -> &StatusTables {
        &self.tables
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use chrono::{DateTime, TimeZone, Utc};

    use super::Scheduler;
    use crate::app::builder::SchedulerBuilder;
    use crate::config::SchedulerConfig;
    use crate::domain::ids::{DatasetId, JobId};
    use crate::domain::status::TaskStatus;
    use crate::domain::task::{NewTask, TaskRecord};
    use crate::impls::InMemoryTaskStore;
    use crate::ports::FixedClock;

    pub fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    pub fn test_scheduler() -> Scheduler {
        test_scheduler_with(SchedulerConfig::default())
    }

    pub fn test_scheduler_with(config: SchedulerConfig) -> Scheduler {
        SchedulerBuilder::new()
            .store(Arc::new(InMemoryTaskStore::new()))
            .clock(Arc::new(FixedClock::new(now())))
            .config(config)
            .build()
            .unwrap()
    }

    /// Dataset + job + one task per `NewTask` tweak, all under the same job.
    pub struct Fixture {
        pub scheduler: Scheduler,
        pub dataset_id: DatasetId,
        pub job_id: JobId,
    }

    impl Fixture {
        pub async fn new() -> Self {
            Self::with_scheduler(test_scheduler()).await
        }

        pub async fn with_scheduler(scheduler: Scheduler) -> Self {
            let dataset = scheduler.create_dataset().await.unwrap();
            let job = scheduler.create_job(dataset.dataset_id).await.unwrap();
            Self {
                scheduler,
                dataset_id: dataset.dataset_id,
                job_id: job.job_id,
            }
        }

        pub fn new_task(&self, name: &str) -> NewTask {
            NewTask::new(self.dataset_id, self.job_id, name)
        }

        pub async fn task(&self, new: NewTask) -> TaskRecord {
            self.scheduler.create_task(new).await.unwrap()
        }

        pub async fn task_in(&self, status: TaskStatus) -> TaskRecord {
            self.task(self.new_task("generate").with_status(status)).await
        }

        /// waiting -> queued -> processing; returns the processing record.
        pub async fn processing_task(&self, new: NewTask) -> TaskRecord {
            let task = self.task(new.with_status(TaskStatus::Waiting)).await;
            let queued = self
                .scheduler
                .set_task_status(
                    task.task_id,
                    crate::domain::report::DirectStatusChange {
                        status: TaskStatus::Queued,
                        instance_id: None,
                        dataset_id: None,
                    },
                )
                .await
                .unwrap();
            let token = queued.instance_id.unwrap();
            self.scheduler
                .mark_processing(
                    task.task_id,
                    crate::domain::report::ProcessingReport {
                        instance_id: token,
                        site: None,
                    },
                )
                .await
                .unwrap()
        }
    }
}
