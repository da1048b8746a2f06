//! Status - 集計クエリ
//!
//! 状態ごとの件数・タスク名ごとの件数・完了タスクの統計を返します。
//! `BTreeMap<TaskStatus, _>` は状態グラフの順（idle, waiting, ...）で並びます。

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::app::scheduler::Scheduler;
use crate::domain::errors::SchedulerError;
use crate::domain::ids::{DatasetId, TaskId};
use crate::domain::query::TaskFilter;
use crate::domain::resources::Resource;
use crate::domain::status::{Status, TaskStatus};
use crate::domain::task::TaskRecord;

pub type StatusCounts = BTreeMap<TaskStatus, u64>;

/// Counts for one task name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NameCounts {
    pub name: String,
    pub counts: StatusCounts,
}

/// Statistics over the complete tasks sharing one name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskStats {
    pub name: String,
    pub count: u64,
    pub gpu: f64,
    pub total_hrs: f64,
    pub total_err_hrs: f64,
    pub avg_hrs: f64,
    /// Sample standard deviation; `None` with fewer than two tasks.
    pub stddev_hrs: Option<f64>,
    pub min_hrs: f64,
    pub max_hrs: f64,
    /// `total / (total + err)`, 0 when both are 0.
    pub efficiency: f64,
}

/// Group tasks by name, names ordered by the `task_index` of their first task.
fn group_by_name(tasks: Vec<TaskRecord>) -> Vec<(String, Vec<TaskRecord>)> {
    let mut groups: Vec<(String, u32, Vec<TaskRecord>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for task in tasks {
        match index.get(&task.name) {
            Some(&i) => groups[i].2.push(task),
            None => {
                index.insert(task.name.clone(), groups.len());
                groups.push((task.name.clone(), task.task_index, vec![task]));
            }
        }
    }
    groups.sort_by_key(|(_, ordering, _)| *ordering);
    groups
        .into_iter()
        .map(|(name, _, tasks)| (name, tasks))
        .collect()
}

fn count_statuses<'a>(tasks: impl IntoIterator<Item = &'a TaskRecord>) -> StatusCounts {
    let mut counts = StatusCounts::new();
    for task in tasks {
        *counts.entry(task.status).or_default() += 1;
    }
    counts
}

fn stats_for(name: String, tasks: &[TaskRecord]) -> TaskStats {
    let hours: Vec<f64> = tasks.iter().map(|t| t.walltime).collect();
    let count = hours.len() as u64;
    let total_hrs: f64 = hours.iter().sum();
    let total_err_hrs: f64 = tasks.iter().map(|t| t.walltime_err).sum();
    let avg_hrs = if count > 0 { total_hrs / count as f64 } else { 0.0 };
    let stddev_hrs = (count > 1).then(|| {
        let var = hours.iter().map(|h| (h - avg_hrs).powi(2)).sum::<f64>() / (count - 1) as f64;
        var.sqrt()
    });
    let gpu = tasks
        .iter()
        .filter_map(|t| t.requirement(Resource::Gpu.key()))
        .filter_map(|v| v.as_f64())
        .sum();
    let denom = total_hrs + total_err_hrs;

    TaskStats {
        name,
        count,
        gpu,
        total_hrs,
        total_err_hrs,
        avg_hrs,
        stddev_hrs,
        min_hrs: hours.iter().copied().reduce(f64::min).unwrap_or(0.0),
        max_hrs: hours.iter().copied().reduce(f64::max).unwrap_or(0.0),
        efficiency: if denom > 0.0 { total_hrs / denom } else { 0.0 },
    }
}

impl Scheduler {
    /// Counts of every task status across all datasets (zeros included).
    pub async fn task_counts_by_status(&self) -> Result<StatusCounts, SchedulerError> {
        let tasks = self.list_tasks(&TaskFilter::new()).await?;
        let mut counts: StatusCounts = TaskStatus::ALL.iter().map(|&s| (s, 0)).collect();
        for (status, n) in count_statuses(&tasks) {
            counts.insert(status, n);
        }
        Ok(counts)
    }

    /// Counts by status for one dataset (only statuses present).
    pub async fn dataset_task_counts(
        &self,
        dataset_id: DatasetId,
    ) -> Result<StatusCounts, SchedulerError> {
        let tasks = self.list_tasks(&TaskFilter::new().with_dataset(dataset_id)).await?;
        Ok(count_statuses(&tasks))
    }

    pub async fn dataset_task_counts_by_name(
        &self,
        dataset_id: DatasetId,
    ) -> Result<Vec<NameCounts>, SchedulerError> {
        let tasks = self.list_tasks(&TaskFilter::new().with_dataset(dataset_id)).await?;
        Ok(group_by_name(tasks)
            .into_iter()
            .map(|(name, tasks)| NameCounts {
                name,
                counts: count_statuses(&tasks),
            })
            .collect())
    }

    /// Task ids grouped by status.
    pub async fn dataset_task_summary(
        &self,
        dataset_id: DatasetId,
    ) -> Result<BTreeMap<TaskStatus, Vec<TaskId>>, SchedulerError> {
        let tasks = self.list_tasks(&TaskFilter::new().with_dataset(dataset_id)).await?;
        let mut summary: BTreeMap<TaskStatus, Vec<TaskId>> = BTreeMap::new();
        for task in tasks {
            summary.entry(task.status).or_default().push(task.task_id);
        }
        Ok(summary)
    }

    /// Walltime statistics of complete tasks, per task name.
    pub async fn dataset_task_stats(
        &self,
        dataset_id: DatasetId,
    ) -> Result<Vec<TaskStats>, SchedulerError> {
        let filter = TaskFilter::new()
            .with_dataset(dataset_id)
            .with_status(TaskStatus::Complete);
        let tasks = self.list_tasks(&filter).await?;
        Ok(group_by_name(tasks)
            .into_iter()
            .map(|(name, tasks)| stats_for(name, &tasks))
            .collect())
    }
}
