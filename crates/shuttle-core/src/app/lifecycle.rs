//! Lifecycle handlers: worker reports and single-task status changes.
//!
//! Every handler is one conditional update guarded by `prev(target)` and,
//! for worker reports, the fencing token handed out at queue time. When the
//! update misses, the record is re-read to tell "missing" from "wrong state".

use crate::app::scheduler::Scheduler;
use crate::app::transition::{Transition, ValidatedTransition};
use crate::app::tuner::observed_amount;
use crate::domain::errors::SchedulerError;
use crate::domain::failure::FailureReason;
use crate::domain::ids::TaskId;
use crate::domain::query::{TaskChange, TaskFilter, TaskUpdate};
use crate::domain::report::{
    CompletionReport, DirectStatusChange, FailureReport, FailureTarget, ProcessingReport,
    UpdateCount,
};
use crate::domain::resources::Resource;
use crate::domain::status::{Status, TaskStatus};
use crate::domain::task::TaskRecord;

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Reported runtime in hours; negative or non-finite seconds are rejected.
fn reported_hours(time_used: Option<f64>) -> Result<Option<f64>, SchedulerError> {
    match time_used {
        Some(seconds) if !seconds.is_finite() || seconds < 0.0 => Err(SchedulerError::validation(
            format!("time_used must be a non-negative number of seconds, got {seconds}"),
        )),
        Some(seconds) => Ok(Some(seconds / SECONDS_PER_HOUR)),
        None => Ok(None),
    }
}

impl Scheduler {
    /// queued -> processing
    pub async fn mark_processing(
        &self,
        task_id: TaskId,
        report: ProcessingReport,
    ) -> Result<TaskRecord, SchedulerError> {
        let transition =
            ValidatedTransition::new(&self.tables, TaskStatus::Processing).fenced(report.instance_id);
        let mut extra = TaskUpdate::new();
        if let Some(site) = report.site {
            extra = extra.push(TaskChange::Site(site));
        }

        let updated = self
            .transition_one(
                "mark_processing",
                TaskFilter::task(task_id),
                &transition.clone().into(),
                extra,
            )
            .await?;
        match updated {
            Some(task) => {
                tracing::info!(task_id = %task_id, site = %task.site, "task processing");
                Ok(task)
            }
            None => {
                self.explain_miss("mark_processing", task_id, None, &transition, true)
                    .await
            }
        }
    }

    /// processing -> complete
    pub async fn mark_complete(
        &self,
        task_id: TaskId,
        report: CompletionReport,
    ) -> Result<TaskRecord, SchedulerError> {
        let hours = reported_hours(report.time_used)?;
        let transition =
            ValidatedTransition::new(&self.tables, TaskStatus::Complete).fenced(report.instance_id);
        let mut extra = TaskUpdate::new().push(TaskChange::ClearInstance);
        if let Some(hours) = hours {
            extra = extra.push(TaskChange::Walltime(hours));
        }
        if let Some(site) = report.site {
            extra = extra.push(TaskChange::Site(site));
        }

        let updated = self
            .transition_one(
                "mark_complete",
                TaskFilter::task(task_id),
                &transition.clone().into(),
                extra,
            )
            .await?;
        match updated {
            Some(task) => {
                tracing::info!(task_id = %task_id, site = %task.site, walltime = task.walltime, "task complete");
                Ok(task)
            }
            None => {
                self.explain_miss("mark_complete", task_id, None, &transition, false)
                    .await
            }
        }
    }

    /// queued/processing -> waiting (retry) or failed.
    ///
    /// Counts the failure, books the wasted time and raises requirements
    /// from the reported usage, all in one update.
    pub async fn mark_failure(
        &self,
        task_id: TaskId,
        target: FailureTarget,
        report: FailureReport,
    ) -> Result<TaskRecord, SchedulerError> {
        let reported = reported_hours(report.time_used)?;
        let status = target.status();
        let transition =
            ValidatedTransition::new(&self.tables, status).fenced(report.instance_id);

        let current = self.get_task(task_id).await?;

        let mut extra = TaskUpdate::new()
            .push(TaskChange::ClearInstance)
            .push(TaskChange::AddFailure);
        if let Some(site) = &report.site {
            extra = extra.push(TaskChange::Site(site.clone()));
        }
        let error_hours = match reported {
            Some(hours) => Some(hours),
            None => report
                .resources
                .get(Resource::Time.key())
                .and_then(observed_amount)
                .filter(|h| h.is_finite() && *h >= 0.0),
        };
        if let Some(hours) = error_hours {
            extra = extra.push(TaskChange::AddErrorWalltime(hours));
        }
        for (resource, value) in self.tuner.propose(&current, &report.resources) {
            tracing::debug!(task_id = %task_id, %resource, %value, "requirement raise proposed");
            extra = extra.push(TaskChange::RaiseRequirement { resource, value });
        }

        let updated = self
            .transition_one(
                "mark_failure",
                TaskFilter::task(task_id),
                &transition.clone().into(),
                extra,
            )
            .await?;
        let task = match updated {
            Some(task) => task,
            None => {
                return self
                    .explain_miss("mark_failure", task_id, None, &transition, false)
                    .await;
            }
        };

        tracing::info!(task_id = %task_id, %status, failures = task.failures, "task failed");
        if let Some(reason) = report.reason.as_deref().filter(|r| !r.is_empty()) {
            let site = report.site.as_deref().unwrap_or(self.config.default_site.as_str());
            tracing::info!(
                target: "shuttle::metrics",
                site,
                status = %status,
                reason = %FailureReason::classify(reason),
                "task failure"
            );
        }
        Ok(task)
    }

    /// Operator-driven change along the graph.
    ///
    /// The token is checked only when supplied. Entering `queued` hands out
    /// a fresh token; entering anything but `processing` clears it.
    pub async fn set_task_status(
        &self,
        task_id: TaskId,
        change: DirectStatusChange,
    ) -> Result<TaskRecord, SchedulerError> {
        let target = change.status;
        let mut transition = ValidatedTransition::new(&self.tables, target);
        if let Some(token) = change.instance_id {
            transition = transition.fenced(token);
        }
        let transition_kind: Transition = transition.clone().into();

        let mut extra = TaskUpdate::new();
        match target {
            TaskStatus::Queued => {
                extra = extra.push(TaskChange::AssignInstance(self.ids.generate_instance_id()));
            }
            TaskStatus::Processing => {}
            _ => extra = extra.push(TaskChange::ClearInstance),
        }
        if transition_kind.resets_failures() {
            extra = extra.push(TaskChange::ResetFailures);
        }

        let mut scope = TaskFilter::task(task_id);
        if let Some(dataset_id) = change.dataset_id {
            scope = scope.with_dataset(dataset_id);
        }

        let updated = self
            .transition_one("set_task_status", scope, &transition_kind, extra)
            .await?;
        match updated {
            Some(task) => {
                tracing::info!(task_id = %task_id, status = %target, "task status set");
                Ok(task)
            }
            None => {
                self.explain_miss(
                    "set_task_status",
                    task_id,
                    change.dataset_id,
                    &transition,
                    true,
                )
                .await
            }
        }
    }

    /// idle -> waiting for up to `waiting_release_limit` tasks.
    pub async fn release_waiting(&self, task_ids: &[TaskId]) -> Result<UpdateCount, SchedulerError> {
        let limit = self.config.waiting_release_limit;
        if task_ids.len() > limit {
            return Err(SchedulerError::validation(format!(
                "too many tasks. must be <= {limit}"
            )));
        }
        let transition: Transition = ValidatedTransition {
            target: TaskStatus::Waiting,
            allowed: vec![TaskStatus::START],
            instance_id: None,
        }
        .into();
        let count = self
            .transition_many(
                "release_waiting",
                TaskFilter::new().with_task_ids(task_ids.iter().copied()),
                &transition,
                TaskUpdate::new(),
            )
            .await?;
        tracing::info!(waiting = count.modified, "tasks released to waiting");
        Ok(count)
    }
}
