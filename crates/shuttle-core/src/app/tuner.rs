//! Requirement tuner: turns observed usage on failure into raised estimates.
//!
//! Proposals are applied by the store as `max(stored, proposal)`, so the
//! tuner never lowers a requirement even when reports race.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::config::TuningConfig;
use crate::domain::resources::{RequirementValue, Resource, requested_amount};
use crate::domain::task::TaskRecord;

#[derive(Debug, Clone)]
pub struct RequirementTuner {
    config: TuningConfig,
}

/// Reported usage as a number. Accepts numbers and numeric strings.
pub fn observed_amount(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

impl RequirementTuner {
    pub fn new(config: TuningConfig) -> Self {
        Self { config }
    }

    /// Raised requirements for `task`, given the usage a worker reported.
    pub fn propose(
        &self,
        task: &TaskRecord,
        reported: &BTreeMap<String, Value>,
    ) -> Vec<(Resource, RequirementValue)> {
        let mut proposals = Vec::new();
        for resource in Resource::TUNABLE {
            let Some(raw) = reported.get(resource.key()) else {
                continue;
            };
            let Some(observed) = observed_amount(raw) else {
                tracing::info!(task_id = %task.task_id, %resource, value = %raw, "unparseable resource usage ignored");
                continue;
            };
            let Some(current) = requested_amount(&task.requirements, resource) else {
                tracing::info!(task_id = %task.task_id, %resource, "stored requirement is not numeric; skipped");
                continue;
            };
            if let Some(amount) = self.propose_amount(resource, observed, current) {
                proposals.push((resource, resource.value_of(amount)));
            }
        }
        proposals
    }

    fn propose_amount(&self, resource: Resource, observed: f64, current: f64) -> Option<f64> {
        let c = &self.config;
        match resource {
            Resource::Cpu => {
                if observed <= c.cpu_noise_floor || observed > c.cpu_ceiling {
                    tracing::debug!(observed, "cpu usage outside the trusted range");
                    return None;
                }
                if observed < current * c.cpu_overuse_ratio {
                    return None;
                }
                Some(current + c.cpu_step)
            }
            Resource::Gpu => None,
            Resource::Memory | Resource::Disk | Resource::Time => {
                if observed < c.quantity_noise_floor {
                    tracing::debug!(%resource, observed, "usage below noise floor ignored");
                    return None;
                }
                Some(observed * c.quantity_margin)
            }
        }
    }
}

impl Default for RequirementTuner {
    fn default() -> Self {
        Self::new(TuningConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::{DatasetId, JobId, TaskId};
    use crate::domain::query::{TaskChange, TaskUpdate};
    use crate::domain::resources::Requirements;
    use crate::domain::status::TaskStatus;
    use chrono::Utc;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rstest::rstest;
    use serde_json::json;
    use ulid::Ulid;

    fn task(reqs: Requirements) -> TaskRecord {
        TaskRecord {
            task_id: TaskId::from_ulid(Ulid::new()),
            dataset_id: DatasetId::from_ulid(Ulid::new()),
            job_id: JobId::from_ulid(Ulid::new()),
            name: "generate".into(),
            task_index: 0,
            job_index: 0,
            depends: vec![],
            status: TaskStatus::Processing,
            status_changed: Utc::now(),
            instance_id: None,
            priority: 1.0,
            requirements: reqs,
            failures: 0,
            walltime: 0.0,
            walltime_err: 0.0,
            walltime_err_n: 0,
            site: String::new(),
        }
    }

    fn cpu_task(cpu: i64) -> TaskRecord {
        task([("cpu".to_string(), RequirementValue::Int(cpu))].into_iter().collect())
    }

    fn report(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[rstest]
    #[case::within_ten_percent(2.15, None)]
    #[case::just_over_ten_percent(2.3, Some(RequirementValue::Int(3)))]
    #[case::clear_overuse(3.0, Some(RequirementValue::Int(3)))]
    #[case::far_over_still_one_step(9.0, Some(RequirementValue::Int(3)))]
    #[case::noise(1.05, None)]
    #[case::bogus(25.0, None)]
    fn cpu_steps_up_by_one(#[case] observed: f64, #[case] expected: Option<RequirementValue>) {
        let tuner = RequirementTuner::default();
        let proposals = tuner.propose(&cpu_task(2), &report(&[("cpu", json!(observed))]));
        let cpu = proposals
            .into_iter()
            .find(|(r, _)| *r == Resource::Cpu)
            .map(|(_, v)| v);
        assert_eq!(cpu, expected);
    }

    #[test]
    fn cpu_without_stored_requirement_uses_default() {
        let tuner = RequirementTuner::default();
        let proposals = tuner.propose(&task(Requirements::new()), &report(&[("cpu", json!(1.5))]));
        assert_eq!(proposals, vec![(Resource::Cpu, RequirementValue::Int(2))]);
    }

    #[rstest]
    #[case::memory("memory", 4.0, Some(6.0))]
    #[case::disk("disk", 20.0, Some(30.0))]
    #[case::time("time", 2.0, Some(3.0))]
    #[case::below_floor("memory", 0.4, None)]
    fn quantities_get_a_margin(
        #[case] key: &str,
        #[case] observed: f64,
        #[case] expected: Option<f64>,
    ) {
        let tuner = RequirementTuner::default();
        let proposals = tuner.propose(&task(Requirements::new()), &report(&[(key, json!(observed))]));
        let got = proposals.first().and_then(|(_, v)| v.as_f64());
        assert_eq!(got, expected);
    }

    #[test]
    fn numeric_strings_are_accepted_and_garbage_is_skipped() {
        let tuner = RequirementTuner::default();
        let proposals = tuner.propose(
            &task(Requirements::new()),
            &report(&[("memory", json!("2.0")), ("disk", json!("lots")), ("gpu", json!(4))]),
        );
        assert_eq!(proposals, vec![(Resource::Memory, RequirementValue::Float(3.0))]);
    }

    #[test]
    fn non_numeric_stored_requirement_is_skipped() {
        let tuner = RequirementTuner::default();
        let t = task([("memory".to_string(), RequirementValue::Text("big".into()))].into_iter().collect());
        assert!(tuner.propose(&t, &report(&[("memory", json!(8.0))])).is_empty());
    }

    #[test]
    fn ratchet_never_lowers_requirements() {
        let tuner = RequirementTuner::default();
        let mut rng = StdRng::seed_from_u64(7);
        let mut t = task(Requirements::new());

        for _ in 0..500 {
            let usage = report(&[
                ("cpu", json!(rng.gen_range(0.0..24.0))),
                ("memory", json!(rng.gen_range(0.0..16.0))),
                ("disk", json!(rng.gen_range(0.0..64.0))),
                ("time", json!(rng.gen_range(0.0..12.0))),
            ]);
            let before: Vec<f64> = Resource::TUNABLE
                .iter()
                .map(|&r| requested_amount(&t.requirements, r).unwrap())
                .collect();

            let mut update = TaskUpdate::new();
            for (resource, value) in tuner.propose(&t, &usage) {
                update = update.push(TaskChange::RaiseRequirement { resource, value });
            }
            update.apply(&mut t);

            for (i, &r) in Resource::TUNABLE.iter().enumerate() {
                let after = requested_amount(&t.requirements, r).unwrap();
                assert!(after >= before[i], "{r} went from {} to {after}", before[i]);
            }
        }
    }
}
