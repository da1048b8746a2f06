//! Bulk operations over a dataset or an explicit id list.
//!
//! These are operator overrides: each record is updated atomically, but the
//! batch as a whole is not. Repeating a call is harmless.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::app::scheduler::Scheduler;
use crate::app::transition::{Transition, UnconditionalBulkTransition, ValidatedTransition};
use crate::domain::errors::SchedulerError;
use crate::domain::ids::{DatasetId, TaskId};
use crate::domain::query::{TaskChange, TaskFilter, TaskUpdate};
use crate::domain::report::{BulkScope, UpdateCount};
use crate::domain::resources::{OS_KEY, RequirementValue, Resource, SITE_KEY};
use crate::domain::status::{Status, TaskStatus};

impl Scheduler {
    fn check_bulk_len(&self, what: &str, len: usize) -> Result<(), SchedulerError> {
        let limit = self.config.bulk_limit;
        if len > limit {
            return Err(SchedulerError::validation(format!(
                "too many {what} specified (limit: {limit})"
            )));
        }
        Ok(())
    }

    fn dataset_scope(
        &self,
        dataset_id: DatasetId,
        scope: BulkScope,
    ) -> Result<TaskFilter, SchedulerError> {
        let filter = TaskFilter::new().with_dataset(dataset_id);
        match scope {
            BulkScope::All => Ok(filter),
            BulkScope::Jobs(ids) => {
                self.check_bulk_len("jobs", ids.len())?;
                Ok(filter.with_job_ids(ids))
            }
            BulkScope::Tasks(ids) => {
                self.check_bulk_len("tasks", ids.len())?;
                Ok(filter.with_task_ids(ids))
            }
        }
    }

    /// Force `status` onto the listed tasks, ignoring the graph.
    ///
    /// Entering `queued` or `processing` hands each task its own fresh token;
    /// any other target clears it. Zero matches is `NotFound`.
    pub async fn bulk_set_status(
        &self,
        dataset_id: Option<DatasetId>,
        status: TaskStatus,
        task_ids: &[TaskId],
    ) -> Result<UpdateCount, SchedulerError> {
        if task_ids.is_empty() {
            return Err(SchedulerError::validation("missing tasks"));
        }
        self.check_bulk_len("tasks", task_ids.len())?;

        let transition: Transition = UnconditionalBulkTransition { target: status }.into();
        let mut extra = TaskUpdate::new();
        if transition.resets_failures() {
            extra = extra.push(TaskChange::ResetFailures);
        }
        let scoped = |filter: TaskFilter| match dataset_id {
            Some(dataset_id) => filter.with_dataset(dataset_id),
            None => filter,
        };

        let count = if status.is_active() {
            // トークンはタスクごとに別の値にするため 1 件ずつ更新
            let mut count = UpdateCount::default();
            let unique: BTreeSet<TaskId> = task_ids.iter().copied().collect();
            for task_id in unique {
                let update = extra
                    .clone()
                    .push(TaskChange::AssignInstance(self.ids.generate_instance_id()));
                let scope = scoped(TaskFilter::task(task_id));
                let updated = self
                    .transition_one("bulk_set_status", scope, &transition, update)
                    .await?;
                if updated.is_some() {
                    count.matched += 1;
                    count.modified += 1;
                }
            }
            count
        } else {
            let scope = scoped(TaskFilter::new().with_task_ids(task_ids.iter().copied()));
            self.transition_many(
                "bulk_set_status",
                scope,
                &transition,
                extra.push(TaskChange::ClearInstance),
            )
            .await?
        };
        if count.matched == 0 {
            return Err(SchedulerError::NotFound {
                entity: TaskStatus::ENTITY,
                id: format!("{} requested ids", task_ids.len()),
            });
        }
        tracing::info!(%status, matched = count.matched, modified = count.modified, "bulk status set");
        Ok(count)
    }

    /// Suspend every task in scope that may legally be suspended.
    pub async fn bulk_suspend(
        &self,
        dataset_id: DatasetId,
        scope: BulkScope,
    ) -> Result<UpdateCount, SchedulerError> {
        let scope = self.dataset_scope(dataset_id, scope)?;
        let transition: Transition =
            ValidatedTransition::new(&self.tables, TaskStatus::Suspended).into();
        let extra = TaskUpdate::new().push(TaskChange::ClearInstance);

        let count = self
            .transition_many("bulk_suspend", scope, &transition, extra)
            .await?;
        tracing::info!(dataset_id = %dataset_id, suspended = count.modified, "bulk suspend");
        Ok(count)
    }

    /// Send every task in scope that may legally return to the start state back there.
    ///
    /// Failure counts are kept; use `bulk_hard_reset` to clear them.
    pub async fn bulk_reset(
        &self,
        dataset_id: DatasetId,
        scope: BulkScope,
    ) -> Result<UpdateCount, SchedulerError> {
        let scope = self.dataset_scope(dataset_id, scope)?;
        let transition: Transition =
            ValidatedTransition::new(&self.tables, TaskStatus::START).into();
        let extra = TaskUpdate::new().push(TaskChange::ClearInstance);

        let count = self
            .transition_many("bulk_reset", scope, &transition, extra)
            .await?;
        tracing::info!(dataset_id = %dataset_id, reset = count.modified, "bulk reset");
        Ok(count)
    }

    /// Unconditionally return every task in scope (complete ones included)
    /// to the start state with a clean slate.
    pub async fn bulk_hard_reset(
        &self,
        dataset_id: DatasetId,
        scope: BulkScope,
    ) -> Result<UpdateCount, SchedulerError> {
        let scope = self.dataset_scope(dataset_id, scope)?;
        let transition: Transition = UnconditionalBulkTransition {
            target: TaskStatus::START,
        }
        .into();
        let extra = TaskUpdate::new()
            .push(TaskChange::ResetFailures)
            .push(TaskChange::Site(String::new()))
            .push(TaskChange::ClearInstance);

        let count = self
            .transition_many("bulk_hard_reset", scope, &transition, extra)
            .await?;
        tracing::info!(dataset_id = %dataset_id, reset = count.modified, "bulk hard reset");
        Ok(count)
    }

    /// Overwrite requirements of every task named `name` in the dataset.
    pub async fn bulk_set_requirements(
        &self,
        dataset_id: DatasetId,
        name: &str,
        edits: &BTreeMap<String, Value>,
    ) -> Result<UpdateCount, SchedulerError> {
        if edits.is_empty() {
            return Err(SchedulerError::validation("missing requirements"));
        }
        let mut update = TaskUpdate::new();
        for (key, value) in edits {
            update = update.push(TaskChange::SetRequirement {
                key: key.clone(),
                value: checked_requirement(key, value)?,
            });
        }

        let scope = TaskFilter::new().with_dataset(dataset_id).with_name(name);
        let count = self
            .store
            .update_many(&scope, &update)
            .await
            .map_err(|e| self.store_failure("bulk_set_requirements", e))?;
        if count.matched == 0 {
            return Err(SchedulerError::not_found(TaskStatus::ENTITY, name));
        }
        tracing::info!(dataset_id = %dataset_id, name, modified = count.modified, "bulk requirements set");
        Ok(count)
    }
}

/// Type-check one requirement edit.
fn checked_requirement(key: &str, value: &Value) -> Result<RequirementValue, SchedulerError> {
    if key == OS_KEY {
        return match value {
            Value::Array(items) => items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .map(RequirementValue::List)
                .ok_or_else(|| SchedulerError::validation("bad type for os, should be list of strings")),
            _ => Err(SchedulerError::validation("bad type for os, should be list")),
        };
    }
    if key == SITE_KEY {
        return Ok(match value {
            Value::String(s) => RequirementValue::Text(s.clone()),
            other => RequirementValue::Text(other.to_string()),
        });
    }
    let resource = Resource::from_key(key)
        .ok_or_else(|| SchedulerError::validation(format!("invalid resource type: {key}")))?;
    if resource.is_count() {
        value
            .as_i64()
            .map(RequirementValue::Int)
            .ok_or_else(|| SchedulerError::validation(format!("bad type for {key}, should be int")))
    } else {
        value
            .as_f64()
            .map(RequirementValue::Float)
            .ok_or_else(|| SchedulerError::validation(format!("bad type for {key}, should be float")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::scheduler::testing::Fixture;
    use crate::config::SchedulerConfig;
    use crate::domain::errors::ErrorKind;
    use rstest::rstest;
    use serde_json::json;
    use ulid::Ulid;

    #[tokio::test]
    async fn hard_reset_returns_everything_to_idle() {
        let fx = Fixture::new().await;
        let mut ids = Vec::new();
        for &status in TaskStatus::ALL {
            ids.push(fx.task_in(status).await.task_id);
        }
        let processing = fx.processing_task(fx.new_task("generate")).await;
        let failed = fx
            .scheduler
            .mark_failure(
                processing.task_id,
                crate::domain::report::FailureTarget::Failed,
                crate::domain::report::FailureReport {
                    instance_id: processing.instance_id.unwrap(),
                    time_used: None,
                    resources: BTreeMap::new(),
                    site: Some("Madison".into()),
                    reason: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(failed.failures, 1);
        ids.push(failed.task_id);

        let count = fx.scheduler.bulk_hard_reset(fx.dataset_id, BulkScope::All).await.unwrap();
        assert_eq!(count.matched, ids.len() as u64);

        for id in ids {
            let task = fx.scheduler.get_task(id).await.unwrap();
            assert_eq!(task.status, TaskStatus::Idle);
            assert_eq!(task.failures, 0);
            assert_eq!(task.instance_id, None);
            assert_eq!(task.site, "");
        }
    }

    #[tokio::test]
    async fn hard_reset_respects_job_scope() {
        let fx = Fixture::new().await;
        let other_job = fx.scheduler.create_job(fx.dataset_id).await.unwrap();
        let inside = fx.task_in(TaskStatus::Complete).await;
        let mut outside = fx.new_task("generate").with_status(TaskStatus::Complete);
        outside.job_id = other_job.job_id;
        let outside = fx.task(outside).await;

        fx.scheduler
            .bulk_hard_reset(fx.dataset_id, BulkScope::Jobs(vec![fx.job_id]))
            .await
            .unwrap();
        assert_eq!(fx.scheduler.get_task(inside.task_id).await.unwrap().status, TaskStatus::Idle);
        assert_eq!(
            fx.scheduler.get_task(outside.task_id).await.unwrap().status,
            TaskStatus::Complete
        );
    }

    #[tokio::test]
    async fn suspend_only_touches_legal_predecessors() {
        let fx = Fixture::new().await;
        let queued = fx.task_in(TaskStatus::Queued).await;
        let complete = fx.task_in(TaskStatus::Complete).await;
        let failed = fx.task_in(TaskStatus::Failed).await;

        let count = fx.scheduler.bulk_suspend(fx.dataset_id, BulkScope::All).await.unwrap();
        assert_eq!(count.modified, 1);

        let suspended = fx.scheduler.get_task(queued.task_id).await.unwrap();
        assert_eq!(suspended.status, TaskStatus::Suspended);
        assert_eq!(suspended.instance_id, None);
        assert_eq!(
            fx.scheduler.get_task(complete.task_id).await.unwrap().status,
            TaskStatus::Complete
        );
        assert_eq!(
            fx.scheduler.get_task(failed.task_id).await.unwrap().status,
            TaskStatus::Failed
        );
    }

    #[tokio::test]
    async fn reset_keeps_failures_and_skips_complete() {
        let fx = Fixture::new().await;
        let processing = fx.processing_task(fx.new_task("generate")).await;
        let failed = fx
            .scheduler
            .mark_failure(
                processing.task_id,
                crate::domain::report::FailureTarget::Failed,
                crate::domain::report::FailureReport {
                    instance_id: processing.instance_id.unwrap(),
                    time_used: None,
                    resources: BTreeMap::new(),
                    site: None,
                    reason: None,
                },
            )
            .await
            .unwrap();
        let complete = fx.task_in(TaskStatus::Complete).await;

        let count = fx
            .scheduler
            .bulk_reset(fx.dataset_id, BulkScope::Tasks(vec![failed.task_id, complete.task_id]))
            .await
            .unwrap();
        assert_eq!(count.matched, 1);
        let reset = fx.scheduler.get_task(failed.task_id).await.unwrap();
        assert_eq!(reset.status, TaskStatus::Idle);
        assert_eq!(reset.failures, 1);
    }

    #[tokio::test]
    async fn bulk_status_ignores_the_graph() {
        let fx = Fixture::new().await;
        let complete = fx.task_in(TaskStatus::Complete).await;
        let queued = fx.task_in(TaskStatus::Queued).await;

        let count = fx
            .scheduler
            .bulk_set_status(
                Some(fx.dataset_id),
                TaskStatus::Waiting,
                &[complete.task_id, queued.task_id],
            )
            .await
            .unwrap();
        assert_eq!(count, UpdateCount { matched: 2, modified: 2 });
        for id in [complete.task_id, queued.task_id] {
            let task = fx.scheduler.get_task(id).await.unwrap();
            assert_eq!(task.status, TaskStatus::Waiting);
            assert_eq!(task.instance_id, None);
        }
    }

    #[rstest]
    #[case::queued(TaskStatus::Queued)]
    #[case::processing(TaskStatus::Processing)]
    #[tokio::test]
    async fn bulk_status_into_active_states_issues_tokens(#[case] target: TaskStatus) {
        let fx = Fixture::new().await;
        let a = fx.task_in(TaskStatus::Waiting).await;
        let b = fx.task_in(TaskStatus::Failed).await;

        let count = fx
            .scheduler
            .bulk_set_status(None, target, &[a.task_id, b.task_id, a.task_id])
            .await
            .unwrap();
        assert_eq!(count, UpdateCount { matched: 2, modified: 2 });

        let a = fx.scheduler.get_task(a.task_id).await.unwrap();
        let b = fx.scheduler.get_task(b.task_id).await.unwrap();
        assert_eq!((a.status, b.status), (target, target));
        assert!(a.instance_id.is_some());
        assert!(b.instance_id.is_some());
        assert_ne!(a.instance_id, b.instance_id);
    }

    #[tokio::test]
    async fn bulk_queued_task_accepts_worker_reports() {
        let fx = Fixture::new().await;
        let task = fx.task_in(TaskStatus::Waiting).await;
        fx.scheduler
            .bulk_set_status(None, TaskStatus::Queued, &[task.task_id])
            .await
            .unwrap();
        let token = fx.scheduler.get_task(task.task_id).await.unwrap().instance_id.unwrap();

        let processing = fx
            .scheduler
            .mark_processing(
                task.task_id,
                crate::domain::report::ProcessingReport {
                    instance_id: token,
                    site: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(processing.status, TaskStatus::Processing);
    }

    #[tokio::test]
    async fn bulk_status_with_no_match_is_not_found() {
        let fx = Fixture::new().await;
        let task = fx.task_in(TaskStatus::Idle).await;
        let other_dataset = DatasetId::from_ulid(Ulid::new());
        let err = fx
            .scheduler
            .bulk_set_status(Some(other_dataset), TaskStatus::Waiting, &[task.task_id])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let empty = fx
            .scheduler
            .bulk_set_status(None, TaskStatus::Waiting, &[])
            .await
            .unwrap_err();
        assert_eq!(empty.kind(), ErrorKind::Client);
    }

    #[tokio::test]
    async fn scope_lists_are_limited() {
        let config = SchedulerConfig {
            bulk_limit: 2,
            ..Default::default()
        };
        let fx = Fixture::with_scheduler(crate::app::scheduler::testing::test_scheduler_with(config)).await;
        let ids: Vec<TaskId> = (0..3).map(|_| TaskId::from_ulid(Ulid::new())).collect();

        let err = fx
            .scheduler
            .bulk_suspend(fx.dataset_id, BulkScope::Tasks(ids.clone()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Client);
        let err = fx
            .scheduler
            .bulk_set_status(None, TaskStatus::Idle, &ids)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Client);
    }

    #[tokio::test]
    async fn requirement_edit_overwrites_by_name() {
        let fx = Fixture::new().await;
        let target = fx.task(fx.new_task("filter").with_requirement("memory", 8.0)).await;
        let other = fx.task(fx.new_task("generate")).await;

        let edits: BTreeMap<String, Value> = serde_json::from_value(json!({
            "memory": 2,
            "cpu": 4,
            "os": ["RHEL_8"],
            "site": 42
        }))
        .unwrap();
        let count = fx
            .scheduler
            .bulk_set_requirements(fx.dataset_id, "filter", &edits)
            .await
            .unwrap();
        assert_eq!(count.matched, 1);

        let task = fx.scheduler.get_task(target.task_id).await.unwrap();
        assert_eq!(task.requirements["memory"], RequirementValue::Float(2.0));
        assert_eq!(task.requirements["cpu"], RequirementValue::Int(4));
        assert_eq!(task.requirements["os"], RequirementValue::List(vec!["RHEL_8".into()]));
        assert_eq!(task.requirements["site"], RequirementValue::Text("42".into()));
        assert!(fx.scheduler.get_task(other.task_id).await.unwrap().requirements.is_empty());

        let missing = fx
            .scheduler
            .bulk_set_requirements(fx.dataset_id, "nonexistent", &edits)
            .await
            .unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::NotFound);
    }

    #[rstest]
    #[case::unknown_key("colour", json!("red"))]
    #[case::fractional_cpu("cpu", json!(1.5))]
    #[case::text_gpu("gpu", json!("1"))]
    #[case::text_memory("memory", json!("big"))]
    #[case::os_not_list("os", json!("RHEL_8"))]
    #[case::os_list_of_numbers("os", json!([7]))]
    fn bad_requirement_edits_are_rejected(#[case] key: &str, #[case] value: Value) {
        let err = checked_requirement(key, &value).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Client);
    }
}
