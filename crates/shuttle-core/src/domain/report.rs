//! Worker reports and operator requests.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids::{DatasetId, InstanceId, JobId, TaskId};
use super::resources::Requirements;
use super::status::TaskStatus;

/// A worker asking for one task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueRequest {
    /// Resources the worker offers (`cpu`, `gpu`, `os`, `site`, ...).
    #[serde(default)]
    pub requirements: Requirements,
    /// Additional exact-match filters on task fields.
    #[serde(default)]
    pub query_params: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingReport {
    pub instance_id: InstanceId,
    #[serde(default)]
    pub site: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionReport {
    pub instance_id: InstanceId,
    /// Seconds the task ran.
    #[serde(default)]
    pub time_used: Option<f64>,
    #[serde(default)]
    pub site: Option<String>,
}

/// Reported by a worker when a task did not succeed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureReport {
    pub instance_id: InstanceId,
    /// Seconds the attempt ran.
    #[serde(default)]
    pub time_used: Option<f64>,
    /// Observed usage per resource; values may be numbers or numeric strings.
    #[serde(default)]
    pub resources: BTreeMap<String, Value>,
    #[serde(default)]
    pub site: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Where a failure report sends the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureTarget {
    /// Back to waiting, to be retried.
    Waiting,
    Failed,
}

impl FailureTarget {
    pub fn status(self) -> TaskStatus {
        match self {
            FailureTarget::Waiting => TaskStatus::Waiting,
            FailureTarget::Failed => TaskStatus::Failed,
        }
    }
}

/// Operator-driven single task status change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectStatusChange {
    pub status: TaskStatus,
    #[serde(default)]
    pub instance_id: Option<InstanceId>,
    #[serde(default)]
    pub dataset_id: Option<DatasetId>,
}

/// Optional narrowing of a dataset-wide bulk operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BulkScope {
    #[default]
    All,
    Jobs(Vec<JobId>),
    Tasks(Vec<TaskId>),
}

/// Matched / modified counts of a multi-record update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCount {
    pub matched: u64,
    pub modified: u64,
}
