//! Queue assignment: pop one waiting task that fits a worker's offer.
//!
//! Selection and claim happen in a single `find_one_and_update`, so two
//! workers can never receive the same task.

use crate::app::scheduler::Scheduler;
use crate::domain::errors::SchedulerError;
use crate::domain::query::{Pick, RequirementClause, TaskChange, TaskFilter, TaskUpdate};
use crate::domain::report::QueueRequest;
use crate::domain::resources::{RequirementValue, Resource, SITE_KEY};
use crate::domain::status::TaskStatus;
use crate::domain::task::TaskRecord;

const STATUS_FIELD: &str = "status";

/// Build the eligibility filter for `request`.
///
/// Rejects extra filters that would override a condition derived from the
/// offer (`status`, or `requirements.<k>` for an offered `k`).
pub fn queue_filter(request: &QueueRequest) -> Result<TaskFilter, SchedulerError> {
    let mut filter = TaskFilter::new().with_status(TaskStatus::Waiting);

    for (key, offered) in &request.requirements {
        let gpu_count = if key == Resource::Gpu.key() {
            offered.as_f64().filter(|n| *n > 0.0)
        } else {
            None
        };
        let clause = match (gpu_count, offered.as_f64()) {
            (Some(max), _) => RequirementClause::Within {
                key: key.clone(),
                min: 1.0,
                max,
            },
            (None, Some(limit)) => RequirementClause::AbsentOrAtMost {
                key: key.clone(),
                limit,
            },
            (None, None) => RequirementClause::AbsentOrEqual {
                key: key.clone(),
                value: offered.clone(),
            },
        };
        filter = filter.with_requirement(clause);
    }

    for (path, value) in &request.query_params {
        let collides = path == STATUS_FIELD
            || path
                .strip_prefix("requirements.")
                .is_some_and(|k| request.requirements.contains_key(k));
        if collides {
            return Err(SchedulerError::validation(format!(
                "param {path} would override an already set filter"
            )));
        }
        filter = filter.with_field(path.clone(), value.clone());
    }

    tracing::debug!(?filter, "queue filter built");
    Ok(filter)
}

fn offered_site(request: &QueueRequest) -> Option<String> {
    request.requirements.get(SITE_KEY).map(|v| match v {
        RequirementValue::Text(s) => s.clone(),
        other => other.to_string(),
    })
}

impl Scheduler {
    /// Claim the best waiting task for this offer.
    ///
    /// Returns `Ok(None)` when nothing is eligible.
    pub async fn assign(&self, request: &QueueRequest) -> Result<Option<TaskRecord>, SchedulerError> {
        let filter = queue_filter(request)?;
        let site = offered_site(request).unwrap_or_else(|| self.config.default_site.clone());
        let update = TaskUpdate::new()
            .push(TaskChange::Status(TaskStatus::Queued))
            .push(TaskChange::StatusChanged(self.clock.now()))
            .push(TaskChange::Site(site.clone()))
            .push(TaskChange::AssignInstance(self.ids.generate_instance_id()));

        let claimed = self
            .store
            .find_one_and_update(&filter, Pick::HighestPriority, &update)
            .await
            .map_err(|e| self.store_failure("assign", e))?;

        match &claimed {
            Some(task) => {
                tracing::info!(task_id = %task.task_id, %site, priority = task.priority, "task queued");
            }
            None => {
                tracing::info!(%site, "no eligible waiting task");
            }
        }
        Ok(claimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::scheduler::testing::{Fixture, now};
    use crate::domain::errors::ErrorKind;
    use crate::domain::resources::Requirements;
    use rstest::rstest;
    use serde_json::{Value, json};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn offer(json: Value) -> QueueRequest {
        let requirements: Requirements = serde_json::from_value(json).unwrap();
        QueueRequest {
            requirements,
            query_params: BTreeMap::new(),
        }
    }

    #[rstest]
    #[case::cpu_fits(json!({"cpu": 2}), json!({"cpu": 4}), true)]
    #[case::cpu_too_small(json!({"cpu": 2}), json!({"cpu": 1}), false)]
    #[case::absent_requirement_matches(json!({}), json!({"cpu": 1, "memory": 2.0}), true)]
    #[case::os_list_contains(json!({"os": ["RHEL_7", "RHEL_8"]}), json!({"os": "RHEL_8"}), true)]
    #[case::os_mismatch(json!({"os": ["RHEL_7"]}), json!({"os": "Ubuntu"}), false)]
    #[case::site_text(json!({"site": "Madison"}), json!({"site": "Madison"}), true)]
    #[case::gpu_one_in_two(json!({"gpu": 1}), json!({"gpu": 2}), true)]
    #[case::gpu_two_in_two(json!({"gpu": 2}), json!({"gpu": 2}), true)]
    #[case::gpu_zero_with_gpu_offer(json!({"gpu": 0}), json!({"gpu": 2}), false)]
    #[case::gpu_absent_with_gpu_offer(json!({}), json!({"gpu": 2}), false)]
    #[case::gpu_three_in_two(json!({"gpu": 3}), json!({"gpu": 2}), false)]
    #[case::gpu_offer_zero_falls_back(json!({}), json!({"gpu": 0}), true)]
    #[case::gpu_task_rejects_zero_offer(json!({"gpu": 1}), json!({"gpu": 0}), false)]
    #[tokio::test]
    async fn offer_matching(#[case] task_reqs: Value, #[case] offered: Value, #[case] matches: bool) {
        let fx = Fixture::new().await;
        let mut new = fx.new_task("generate").with_status(TaskStatus::Waiting);
        new.requirements = serde_json::from_value(task_reqs).unwrap();
        let task = fx.task(new).await;

        let claimed = fx.scheduler.assign(&offer(offered)).await.unwrap();
        assert_eq!(claimed.map(|t| t.task_id), matches.then_some(task.task_id));
    }

    #[tokio::test]
    async fn claim_sets_queue_fields() {
        let fx = Fixture::new().await;
        let task = fx.task_in(TaskStatus::Waiting).await;

        let claimed = fx
            .scheduler
            .assign(&offer(json!({"site": "Madison"})))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.task_id, task.task_id);
        assert_eq!(claimed.status, TaskStatus::Queued);
        assert_eq!(claimed.site, "Madison");
        assert!(claimed.instance_id.is_some());
        assert_eq!(claimed.status_changed, now());
    }

    #[tokio::test]
    async fn missing_site_defaults_to_unknown() {
        let fx = Fixture::new().await;
        fx.task_in(TaskStatus::Waiting).await;
        let claimed = fx.scheduler.assign(&QueueRequest::default()).await.unwrap().unwrap();
        assert_eq!(claimed.site, "unknown");
    }

    #[tokio::test]
    async fn only_waiting_tasks_are_eligible() {
        let fx = Fixture::new().await;
        for status in [TaskStatus::Idle, TaskStatus::Suspended, TaskStatus::Failed] {
            fx.task_in(status).await;
        }
        assert!(fx.scheduler.assign(&QueueRequest::default()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn highest_priority_first() {
        let fx = Fixture::new().await;
        let low = fx.task(fx.new_task("a").with_status(TaskStatus::Waiting).with_priority(0.5)).await;
        let high = fx.task(fx.new_task("b").with_status(TaskStatus::Waiting).with_priority(9.0)).await;

        let first = fx.scheduler.assign(&QueueRequest::default()).await.unwrap().unwrap();
        let second = fx.scheduler.assign(&QueueRequest::default()).await.unwrap().unwrap();
        assert_eq!(first.task_id, high.task_id);
        assert_eq!(second.task_id, low.task_id);
        assert_ne!(first.instance_id, second.instance_id);
    }

    #[tokio::test]
    async fn query_params_narrow_the_match() {
        let fx = Fixture::new().await;
        fx.task(fx.new_task("a").with_status(TaskStatus::Waiting)).await;
        let wanted = fx.task(fx.new_task("b").with_status(TaskStatus::Waiting)).await;

        let mut request = QueueRequest::default();
        request.query_params.insert("name".into(), json!("b"));
        let claimed = fx.scheduler.assign(&request).await.unwrap().unwrap();
        assert_eq!(claimed.task_id, wanted.task_id);
    }

    #[rstest]
    #[case::status("status")]
    #[case::offered_requirement("requirements.cpu")]
    fn colliding_query_params_are_rejected(#[case] path: &str) {
        let mut request = offer(json!({"cpu": 4}));
        request.query_params.insert(path.into(), json!("x"));
        let err = queue_filter(&request).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Client);
    }

    #[test]
    fn non_offered_requirement_param_is_allowed() {
        let mut request = offer(json!({"cpu": 4}));
        request.query_params.insert("requirements.os".into(), json!(["RHEL_7"]));
        assert!(queue_filter(&request).is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_never_share_a_task() {
        let fx = Fixture::new().await;
        let task = fx.task_in(TaskStatus::Waiting).await;
        let scheduler = Arc::new(fx.scheduler.clone());

        let mut handles = Vec::new();
        for _ in 0..32 {
            let scheduler = scheduler.clone();
            handles.push(tokio::spawn(async move {
                scheduler.assign(&QueueRequest::default()).await.unwrap()
            }));
        }

        let mut winners = Vec::new();
        let mut misses = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Some(t) => winners.push(t),
                None => misses += 1,
            }
        }
        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].task_id, task.task_id);
        assert_eq!(misses, 31);
    }
}
