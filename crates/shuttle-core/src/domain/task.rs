//! Task record: the unit scheduled onto workers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{DatasetId, InstanceId, JobId, TaskId};
use super::resources::{RequirementValue, Requirements};
use super::status::TaskStatus;

/// One task as persisted by the store.
///
/// Design:
/// - This is the "single source of truth" for task state.
/// - Fields are only mutated through `TaskUpdate` (see `domain::query`),
///   so every store applies the same changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub dataset_id: DatasetId,
    pub job_id: JobId,
    pub name: String,
    pub task_index: u32,
    pub job_index: u32,

    /// Tasks this one depends on (resolved outside the scheduler core).
    #[serde(default)]
    pub depends: Vec<TaskId>,

    pub status: TaskStatus,
    pub status_changed: DateTime<Utc>,

    /// Fencing token, present while queued / processing.
    #[serde(default)]
    pub instance_id: Option<InstanceId>,

    pub priority: f64,

    #[serde(default)]
    pub requirements: Requirements,

    pub failures: u32,

    /// Hours of successful running.
    pub walltime: f64,
    /// Hours burnt by failed attempts.
    pub walltime_err: f64,
    /// Number of failed attempts contributing to `walltime_err`.
    pub walltime_err_n: u32,

    pub site: String,
}

impl TaskRecord {
    /// Look up a field by its dotted path, for caller-supplied queue filters.
    ///
    /// `requirements.<key>` reaches into the requirement map. Unknown paths
    /// return `None`.
    pub fn field(&self, path: &str) -> Option<serde_json::Value> {
        if let Some(key) = path.strip_prefix("requirements.") {
            return self
                .requirements
                .get(key)
                .and_then(|v| serde_json::to_value(v).ok());
        }
        let value = match path {
            "task_id" => self.task_id.to_string().into(),
            "dataset_id" => self.dataset_id.to_string().into(),
            "job_id" => self.job_id.to_string().into(),
            "name" => self.name.clone().into(),
            "task_index" => self.task_index.into(),
            "job_index" => self.job_index.into(),
            "status" => self.status.to_string().into(),
            "priority" => self.priority.into(),
            "failures" => self.failures.into(),
            "site" => self.site.clone().into(),
            "instance_id" => match self.instance_id {
                Some(id) => id.to_string().into(),
                None => serde_json::Value::Null,
            },
            _ => return None,
        };
        Some(value)
    }

    pub fn requirement(&self, key: &str) -> Option<&RequirementValue> {
        self.requirements.get(key)
    }
}

/// Input for creating a task (the upstream submission path).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub dataset_id: DatasetId,
    pub job_id: JobId,
    pub name: String,
    #[serde(default)]
    pub task_index: u32,
    #[serde(default)]
    pub job_index: u32,
    #[serde(default)]
    pub depends: Vec<TaskId>,
    #[serde(default)]
    pub requirements: Requirements,

    /// Defaults to the task start state.
    #[serde(default)]
    pub status: Option<TaskStatus>,
    /// Defaults to 1.0.
    #[serde(default)]
    pub priority: Option<f64>,
    #[serde(default)]
    pub instance_id: Option<InstanceId>,
}

impl NewTask {
    pub fn new(dataset_id: DatasetId, job_id: JobId, name: impl Into<String>) -> Self {
        Self {
            dataset_id,
            job_id,
            name: name.into(),
            task_index: 0,
            job_index: 0,
            depends: Vec::new(),
            requirements: Requirements::new(),
            status: None,
            priority: None,
            instance_id: None,
        }
    }

    pub fn with_requirement(mut self, key: &str, value: impl Into<RequirementValue>) -> Self {
        self.requirements.insert(key.to_string(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_instance(mut self, instance_id: InstanceId) -> Self {
        self.instance_id = Some(instance_id);
        self
    }

    pub fn with_indices(mut self, task_index: u32, job_index: u32) -> Self {
        self.task_index = task_index;
        self.job_index = job_index;
        self
    }
}
