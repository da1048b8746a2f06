//! Transition model: the precondition + update pair every status change is built from.
//!
//! Two explicit variants share one store primitive:
//! - `ValidatedTransition` attaches "current status ∈ prev(target)" (and
//!   optionally the fencing token) to the filter.
//! - `UnconditionalBulkTransition` attaches nothing; operator overrides use it
//!   to move tasks regardless of the graph.

use chrono::{DateTime, Utc};

use crate::app::scheduler::Scheduler;
use crate::domain::errors::{SchedulerError, StoreError};
use crate::domain::ids::{DatasetId, InstanceId, TaskId};
use crate::domain::query::{Pick, TaskChange, TaskFilter, TaskUpdate};
use crate::domain::report::UpdateCount;
use crate::domain::status::{Status, TaskStatus};
use crate::domain::status_table::StatusTables;
use crate::domain::task::TaskRecord;

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedTransition {
    pub target: TaskStatus,
    pub allowed: Vec<TaskStatus>,
    pub instance_id: Option<InstanceId>,
}

impl ValidatedTransition {
    pub fn new(tables: &StatusTables, target: TaskStatus) -> Self {
        Self {
            target,
            allowed: tables.task.prev(target).to_vec(),
            instance_id: None,
        }
    }

    /// Require the record to carry this token.
    pub fn fenced(mut self, instance_id: InstanceId) -> Self {
        self.instance_id = Some(instance_id);
        self
    }

    fn token_matches(&self, task: &TaskRecord) -> bool {
        self.instance_id.is_none_or(|id| task.instance_id == Some(id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnconditionalBulkTransition {
    pub target: TaskStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Validated(ValidatedTransition),
    Unconditional(UnconditionalBulkTransition),
}

impl Transition {
    pub fn target(&self) -> TaskStatus {
        match self {
            Transition::Validated(t) => t.target,
            Transition::Unconditional(t) => t.target,
        }
    }

    /// Narrow `scope` by the precondition of this transition.
    pub fn precondition(&self, scope: TaskFilter) -> TaskFilter {
        match self {
            Transition::Validated(t) => {
                let filter = scope.with_statuses(t.allowed.iter().copied());
                match t.instance_id {
                    Some(id) => filter.with_instance(id),
                    None => filter,
                }
            }
            Transition::Unconditional(_) => scope,
        }
    }

    /// Status + timestamp, followed by the caller's extra changes.
    pub fn update(&self, at: DateTime<Utc>, extra: TaskUpdate) -> TaskUpdate {
        let mut update = TaskUpdate::new()
            .push(TaskChange::Status(self.target()))
            .push(TaskChange::StatusChanged(at));
        update.changes.extend(extra.changes);
        update
    }

    pub fn resets_failures(&self) -> bool {
        self.target() == TaskStatus::START
    }
}

impl From<ValidatedTransition> for Transition {
    fn from(t: ValidatedTransition) -> Self {
        Transition::Validated(t)
    }
}

impl From<UnconditionalBulkTransition> for Transition {
    fn from(t: UnconditionalBulkTransition) -> Self {
        Transition::Unconditional(t)
    }
}

impl Scheduler {
    pub(crate) fn store_failure(&self, op: &'static str, err: StoreError) -> SchedulerError {
        tracing::error!(op, error = %err, "task store failure");
        SchedulerError::Store(err)
    }

    /// Apply `transition` to one task. `None` means nothing matched.
    pub(crate) async fn transition_one(
        &self,
        op: &'static str,
        scope: TaskFilter,
        transition: &Transition,
        extra: TaskUpdate,
    ) -> Result<Option<TaskRecord>, SchedulerError> {
        let filter = transition.precondition(scope);
        let update = transition.update(self.clock.now(), extra);
        self.store
            .find_one_and_update(&filter, Pick::First, &update)
            .await
            .map_err(|e| self.store_failure(op, e))
    }

    /// Apply `transition` to every task in `scope`.
    pub(crate) async fn transition_many(
        &self,
        op: &'static str,
        scope: TaskFilter,
        transition: &Transition,
        extra: TaskUpdate,
    ) -> Result<UpdateCount, SchedulerError> {
        let filter = transition.precondition(scope);
        let update = transition.update(self.clock.now(), extra);
        self.store
            .update_many(&filter, &update)
            .await
            .map_err(|e| self.store_failure(op, e))
    }

    /// After a conditional update matched nothing: re-read and explain why.
    ///
    /// With `accept_repeat`, a task already in the target status with the
    /// same token counts as success.
    pub(crate) async fn explain_miss(
        &self,
        op: &'static str,
        task_id: TaskId,
        dataset_id: Option<DatasetId>,
        transition: &ValidatedTransition,
        accept_repeat: bool,
    ) -> Result<TaskRecord, SchedulerError> {
        let current = self
            .store
            .get_task(task_id)
            .await
            .map_err(|e| self.store_failure(op, e))?;
        let task = match current {
            Some(task) if dataset_id.is_none_or(|d| d == task.dataset_id) => task,
            _ => return Err(SchedulerError::not_found(TaskStatus::ENTITY, task_id)),
        };

        if accept_repeat
            && self.config.idempotent_repeats
            && task.status == transition.target
            && transition.token_matches(&task)
        {
            tracing::debug!(op, task_id = %task_id, status = %task.status, "repeated transition accepted");
            return Ok(task);
        }

        let reason = if !transition.allowed.contains(&task.status) {
            format!("{} -> {}", task.status, transition.target)
        } else if !transition.token_matches(&task) {
            "instance_id mismatch".to_string()
        } else {
            "record changed concurrently".to_string()
        };
        tracing::warn!(op, task_id = %task_id, status = %task.status, target = %transition.target, %reason, "transition rejected");
        Err(SchedulerError::conflict(TaskStatus::ENTITY, task_id, reason))
    }
}
