//! Store-neutral filters and updates.
//!
//! Every operation hands the store a `TaskFilter` (which records) and a
//! `TaskUpdate` (what to change). The store only has to apply them to one
//! record atomically; it never needs to understand the status graphs.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::ids::{DatasetId, InstanceId, JobId, TaskId};
use super::resources::{RequirementValue, Resource};
use super::status::TaskStatus;
use super::task::TaskRecord;

/// Condition on one requirement key.
#[derive(Debug, Clone, PartialEq)]
pub enum RequirementClause {
    /// Absent, or numeric and `<= limit`.
    AbsentOrAtMost { key: String, limit: f64 },
    /// Absent, or accepted by `value` (see [`RequirementValue::accepts`]).
    AbsentOrEqual { key: String, value: RequirementValue },
    /// Present, numeric, and within `[min, max]`.
    Within { key: String, min: f64, max: f64 },
}

impl RequirementClause {
    pub fn key(&self) -> &str {
        match self {
            RequirementClause::AbsentOrAtMost { key, .. }
            | RequirementClause::AbsentOrEqual { key, .. }
            | RequirementClause::Within { key, .. } => key,
        }
    }

    pub fn matches(&self, task: &TaskRecord) -> bool {
        let stored = task.requirement(self.key());
        match self {
            RequirementClause::AbsentOrAtMost { limit, .. } => match stored {
                None => true,
                Some(v) => v.as_f64().is_some_and(|n| n <= *limit),
            },
            RequirementClause::AbsentOrEqual { value, .. } => match stored {
                None => true,
                Some(v) => v.accepts(value),
            },
            RequirementClause::Within { min, max, .. } => stored
                .and_then(RequirementValue::as_f64)
                .is_some_and(|n| n >= *min && n <= *max),
        }
    }
}

/// Which records an operation touches. Empty fields do not constrain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskFilter {
    pub task_ids: Option<HashSet<TaskId>>,
    pub dataset_id: Option<DatasetId>,
    pub job_ids: Option<HashSet<JobId>>,
    pub name: Option<String>,
    pub statuses: Option<Vec<TaskStatus>>,
    pub instance_id: Option<InstanceId>,
    pub requirements: Vec<RequirementClause>,
    /// Exact-match conditions on arbitrary fields (dotted paths).
    pub fields: BTreeMap<String, Value>,
}

impl TaskFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task(id: TaskId) -> Self {
        Self::new().with_task_ids([id])
    }

    pub fn with_task_ids(mut self, ids: impl IntoIterator<Item = TaskId>) -> Self {
        self.task_ids = Some(ids.into_iter().collect());
        self
    }

    pub fn with_dataset(mut self, dataset_id: DatasetId) -> Self {
        self.dataset_id = Some(dataset_id);
        self
    }

    pub fn with_job_ids(mut self, ids: impl IntoIterator<Item = JobId>) -> Self {
        self.job_ids = Some(ids.into_iter().collect());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_status(self, status: TaskStatus) -> Self {
        self.with_statuses([status])
    }

    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = TaskStatus>) -> Self {
        self.statuses = Some(statuses.into_iter().collect());
        self
    }

    pub fn with_instance(mut self, instance_id: InstanceId) -> Self {
        self.instance_id = Some(instance_id);
        self
    }

    pub fn with_requirement(mut self, clause: RequirementClause) -> Self {
        self.requirements.push(clause);
        self
    }

    pub fn with_field(mut self, path: impl Into<String>, value: Value) -> Self {
        self.fields.insert(path.into(), value);
        self
    }

    pub fn matches(&self, task: &TaskRecord) -> bool {
        if let Some(ids) = &self.task_ids
            && !ids.contains(&task.task_id)
        {
            return false;
        }
        if self.dataset_id.is_some_and(|d| d != task.dataset_id) {
            return false;
        }
        if let Some(jobs) = &self.job_ids
            && !jobs.contains(&task.job_id)
        {
            return false;
        }
        if self.name.as_deref().is_some_and(|n| n != task.name) {
            return false;
        }
        if let Some(statuses) = &self.statuses
            && !statuses.contains(&task.status)
        {
            return false;
        }
        if self.instance_id.is_some() && self.instance_id != task.instance_id {
            return false;
        }
        if !self.requirements.iter().all(|c| c.matches(task)) {
            return false;
        }
        self.fields
            .iter()
            .all(|(path, expected)| field_equals(task.field(path), expected))
    }
}

fn field_equals(actual: Option<Value>, expected: &Value) -> bool {
    match (actual, expected) {
        (None, Value::Null) => true,
        (None, _) => false,
        (Some(Value::Number(a)), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Some(a), b) => &a == b,
    }
}

/// Which matching record `find_one_and_update` picks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pick {
    /// Any match (single-record operations select by id).
    First,
    /// Highest `priority`; ties go to store order.
    HighestPriority,
}

/// One field change.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskChange {
    Status(TaskStatus),
    StatusChanged(DateTime<Utc>),
    AssignInstance(InstanceId),
    ClearInstance,
    Site(String),
    /// Successful run time in hours.
    Walltime(f64),
    AddFailure,
    ResetFailures,
    /// Adds hours to `walltime_err` and counts one more failed attempt.
    AddErrorWalltime(f64),
    /// `requirements[resource] = max(stored, value)`.
    RaiseRequirement { resource: Resource, value: RequirementValue },
    SetRequirement { key: String, value: RequirementValue },
}

/// Ordered list of changes applied to one record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub changes: Vec<TaskChange>,
}

impl TaskUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, change: TaskChange) -> Self {
        self.changes.push(change);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Apply every change; returns whether anything actually changed.
    pub fn apply(&self, task: &mut TaskRecord) -> bool {
        let before = task.clone();
        for change in &self.changes {
            match change {
                TaskChange::Status(s) => task.status = *s,
                TaskChange::StatusChanged(at) => task.status_changed = *at,
                TaskChange::AssignInstance(id) => task.instance_id = Some(*id),
                TaskChange::ClearInstance => task.instance_id = None,
                TaskChange::Site(site) => task.site.clone_from(site),
                TaskChange::Walltime(hours) => task.walltime = *hours,
                TaskChange::AddFailure => task.failures = task.failures.saturating_add(1),
                TaskChange::ResetFailures => task.failures = 0,
                TaskChange::AddErrorWalltime(hours) => {
                    task.walltime_err += hours;
                    task.walltime_err_n = task.walltime_err_n.saturating_add(1);
                }
                TaskChange::RaiseRequirement { resource, value } => {
                    raise_requirement(task, *resource, value);
                }
                TaskChange::SetRequirement { key, value } => {
                    task.requirements.insert(key.clone(), value.clone());
                }
            }
        }
        *task != before
    }
}

fn raise_requirement(task: &mut TaskRecord, resource: Resource, proposed: &RequirementValue) {
    let Some(proposed_amount) = proposed.as_f64() else {
        tracing::warn!(task_id = %task.task_id, %resource, %proposed, "non-numeric requirement proposal skipped");
        return;
    };
    match task.requirements.get(resource.key()) {
        // an absent key means the default amount
        None => {
            if proposed_amount > resource.default_amount() {
                task.requirements
                    .insert(resource.key().to_string(), proposed.clone());
            }
        }
        Some(stored) => match stored.as_f64() {
            Some(current) if proposed_amount > current => {
                task.requirements
                    .insert(resource.key().to_string(), proposed.clone());
            }
            Some(_) => {}
            None => {
                tracing::warn!(task_id = %task.task_id, %resource, %stored, "stored requirement is not numeric; not raised");
            }
        },
    }
}
