//! Record creation and reads, plus dataset / job status transitions.

use crate::app::scheduler::Scheduler;
use crate::domain::errors::SchedulerError;
use crate::domain::ids::{DatasetId, JobId, TaskId};
use crate::domain::job::{DatasetRecord, JobRecord};
use crate::domain::query::TaskFilter;
use crate::domain::resources::Resource;
use crate::domain::status::{DatasetStatus, JobStatus, Status, TaskStatus};
use crate::domain::task::{NewTask, TaskRecord};

impl Scheduler {
    pub async fn create_dataset(&self) -> Result<DatasetRecord, SchedulerError> {
        let dataset = DatasetRecord {
            dataset_id: self.ids.generate_dataset_id(),
            status: DatasetStatus::START,
            status_changed: self.clock.now(),
        };
        self.store
            .insert_dataset(dataset.clone())
            .await
            .map_err(|e| self.store_failure("create_dataset", e))?;
        tracing::info!(dataset_id = %dataset.dataset_id, "dataset created");
        Ok(dataset)
    }

    pub async fn create_job(&self, dataset_id: DatasetId) -> Result<JobRecord, SchedulerError> {
        self.get_dataset(dataset_id).await?;
        let job = JobRecord {
            job_id: self.ids.generate_job_id(),
            dataset_id,
            status: JobStatus::START,
            status_changed: self.clock.now(),
        };
        self.store
            .insert_job(job.clone())
            .await
            .map_err(|e| self.store_failure("create_job", e))?;
        tracing::info!(job_id = %job.job_id, dataset_id = %dataset_id, "job created");
        Ok(job)
    }

    /// Create a task, idle unless `new.status` says otherwise.
    pub async fn create_task(&self, new: NewTask) -> Result<TaskRecord, SchedulerError> {
        if new.name.trim().is_empty() {
            return Err(SchedulerError::validation("task name must not be empty"));
        }
        let priority = new.priority.unwrap_or(1.0);
        if !priority.is_finite() {
            return Err(SchedulerError::validation("priority must be a finite number"));
        }
        for resource in Resource::ALL {
            if let Some(value) = new.requirements.get(resource.key())
                && !value.is_numeric()
            {
                return Err(SchedulerError::validation(format!(
                    "requirement {resource} must be numeric, got {value}"
                )));
            }
        }

        let status = new.status.unwrap_or(TaskStatus::START);
        let instance_id = match (status.is_active(), new.instance_id) {
            (true, Some(id)) => Some(id),
            (true, None) => Some(self.ids.generate_instance_id()),
            (false, Some(_)) => {
                return Err(SchedulerError::validation(format!(
                    "instance_id is only valid for queued or processing tasks, not {status}"
                )));
            }
            (false, None) => None,
        };

        let task = TaskRecord {
            task_id: self.ids.generate_task_id(),
            dataset_id: new.dataset_id,
            job_id: new.job_id,
            name: new.name,
            task_index: new.task_index,
            job_index: new.job_index,
            depends: new.depends,
            status,
            status_changed: self.clock.now(),
            instance_id,
            priority,
            requirements: new.requirements,
            failures: 0,
            walltime: 0.0,
            walltime_err: 0.0,
            walltime_err_n: 0,
            site: String::new(),
        };
        self.store
            .insert_task(task.clone())
            .await
            .map_err(|e| self.store_failure("create_task", e))?;
        tracing::debug!(task_id = %task.task_id, status = %task.status, "task created");
        Ok(task)
    }

    pub async fn get_task(&self, task_id: TaskId) -> Result<TaskRecord, SchedulerError> {
        self.store
            .get_task(task_id)
            .await
            .map_err(|e| self.store_failure("get_task", e))?
            .ok_or_else(|| SchedulerError::not_found(TaskStatus::ENTITY, task_id))
    }

    /// Like `get_task`, but the task must belong to `dataset_id`.
    pub async fn get_dataset_task(
        &self,
        dataset_id: DatasetId,
        task_id: TaskId,
    ) -> Result<TaskRecord, SchedulerError> {
        match self.get_task(task_id).await? {
            task if task.dataset_id == dataset_id => Ok(task),
            _ => Err(SchedulerError::not_found(TaskStatus::ENTITY, task_id)),
        }
    }

    pub async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>, SchedulerError> {
        self.store
            .find_tasks(filter)
            .await
            .map_err(|e| self.store_failure("list_tasks", e))
    }

    pub async fn get_dataset(&self, dataset_id: DatasetId) -> Result<DatasetRecord, SchedulerError> {
        self.store
            .get_dataset(dataset_id)
            .await
            .map_err(|e| self.store_failure("get_dataset", e))?
            .ok_or_else(|| SchedulerError::not_found(DatasetStatus::ENTITY, dataset_id))
    }

    pub async fn get_job(&self, job_id: JobId) -> Result<JobRecord, SchedulerError> {
        self.store
            .get_job(job_id)
            .await
            .map_err(|e| self.store_failure("get_job", e))?
            .ok_or_else(|| SchedulerError::not_found(JobStatus::ENTITY, job_id))
    }

    pub async fn set_dataset_status(
        &self,
        dataset_id: DatasetId,
        status: DatasetStatus,
    ) -> Result<DatasetRecord, SchedulerError> {
        let updated = self
            .store
            .update_dataset_status(
                dataset_id,
                self.tables.dataset.prev(status),
                status,
                self.clock.now(),
            )
            .await
            .map_err(|e| self.store_failure("set_dataset_status", e))?;
        if let Some(dataset) = updated {
            tracing::info!(dataset_id = %dataset_id, %status, "dataset status changed");
            return Ok(dataset);
        }

        let current = self.get_dataset(dataset_id).await?;
        if current.status == status && self.config.idempotent_repeats {
            return Ok(current);
        }
        Err(SchedulerError::conflict(
            DatasetStatus::ENTITY,
            dataset_id,
            format!("{} -> {status}", current.status),
        ))
    }

    pub async fn set_job_status(
        &self,
        job_id: JobId,
        status: JobStatus,
    ) -> Result<JobRecord, SchedulerError> {
        let updated = self
            .store
            .update_job_status(job_id, self.tables.job.prev(status), status, self.clock.now())
            .await
            .map_err(|e| self.store_failure("set_job_status", e))?;
        if let Some(job) = updated {
            tracing::info!(job_id = %job_id, %status, "job status changed");
            return Ok(job);
        }

        let current = self.get_job(job_id).await?;
        if current.status == status && self.config.idempotent_repeats {
            return Ok(current);
        }
        Err(SchedulerError::conflict(
            JobStatus::ENTITY,
            job_id,
            format!("{} -> {status}", current.status),
        ))
    }
}
