//! In-process demo: seed one dataset and let a few simulated workers drain it.
//!
//! 各ワーカーは queue -> processing -> complete / reset / failed を繰り返します。
//! 失敗報告には実測リソースを付けるので、要求値の引き上げもログで確認できます。

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::json;
use shuttle_core::Scheduler;
use shuttle_core::domain::{
    CompletionReport, FailureReport, FailureTarget, NewTask, ProcessingReport, QueueRequest,
    RequirementValue, TaskRecord, TaskStatus,
};

#[derive(Debug, Clone)]
pub struct DemoOptions {
    pub tasks: u32,
    pub workers: u32,
    /// Probability that one attempt fails.
    pub failure_rate: f64,
    /// Attempts after which a task is given up on.
    pub max_failures: u32,
    pub seed: u64,
}

/// Seed a dataset, run the workers until nothing is left, print the counts.
pub async fn run(scheduler: Scheduler, options: DemoOptions) -> Result<()> {
    anyhow::ensure!(
        (0.0..=1.0).contains(&options.failure_rate),
        "failure rate must be within 0..=1, got {}",
        options.failure_rate
    );
    let dataset = scheduler.create_dataset().await.context("create dataset")?;
    let job = scheduler
        .create_job(dataset.dataset_id)
        .await
        .context("create job")?;

    let mut ids = Vec::new();
    for i in 0..options.tasks {
        let new = NewTask::new(dataset.dataset_id, job.job_id, "generate")
            .with_indices(0, i)
            .with_priority(f64::from(i % 3) + 1.0)
            .with_requirement("cpu", 1_i64)
            .with_requirement("memory", 1.0);
        ids.push(scheduler.create_task(new).await?.task_id);
    }
    for chunk in ids.chunks(scheduler.config().waiting_release_limit) {
        scheduler.release_waiting(chunk).await?;
    }
    tracing::info!(dataset_id = %dataset.dataset_id, tasks = ids.len(), "dataset seeded");

    let options = Arc::new(options);
    let mut handles = Vec::new();
    for n in 0..options.workers {
        let scheduler = scheduler.clone();
        let options = options.clone();
        handles.push(tokio::spawn(async move {
            worker_loop(n, scheduler, options).await
        }));
    }
    for handle in handles {
        handle.await.context("worker panicked")??;
    }

    let counts = scheduler.dataset_task_counts(dataset.dataset_id).await?;
    println!("final counts: {}", serde_json::to_string(&counts)?);
    for stats in scheduler.dataset_task_stats(dataset.dataset_id).await? {
        println!(
            "{}: complete={} avg_hrs={:.3} efficiency={:.2}",
            stats.name, stats.count, stats.avg_hrs, stats.efficiency
        );
    }
    Ok(())
}

/// worker：Scheduler の報告 API をつなぐ接着剤
async fn worker_loop(n: u32, scheduler: Scheduler, options: Arc<DemoOptions>) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(options.seed.wrapping_add(u64::from(n)));
    let site = format!("site-{n}");
    let mut offer = QueueRequest::default();
    offer.requirements.insert("cpu".into(), RequirementValue::Int(8));
    offer.requirements.insert("memory".into(), RequirementValue::Float(16.0));
    offer.requirements.insert("site".into(), RequirementValue::Text(site.clone()));

    loop {
        // 1) 条件に合うタスクを1件取る（waiting -> queued）
        let Some(task) = scheduler.assign(&offer).await? else {
            tracing::info!(worker = n, "queue drained");
            return Ok(());
        };
        let Some(token) = task.instance_id else {
            continue;
        };

        // 2) 実行開始を報告（queued -> processing）
        scheduler
            .mark_processing(
                task.task_id,
                ProcessingReport {
                    instance_id: token,
                    site: Some(site.clone()),
                },
            )
            .await?;
        tokio::time::sleep(Duration::from_millis(rng.gen_range(1..10))).await;
        let seconds = rng.gen_range(60.0..3600.0);

        // 3) 結果を報告
        if rng.gen_bool(options.failure_rate) {
            report_failure(&scheduler, &task, &mut rng, seconds, &options).await?;
        } else {
            scheduler
                .mark_complete(
                    task.task_id,
                    CompletionReport {
                        instance_id: token,
                        time_used: Some(seconds),
                        site: Some(site.clone()),
                    },
                )
                .await?;
        }
    }
}

async fn report_failure(
    scheduler: &Scheduler,
    task: &TaskRecord,
    rng: &mut StdRng,
    seconds: f64,
    options: &DemoOptions,
) -> Result<()> {
    let Some(token) = task.instance_id else {
        return Ok(());
    };
    let target = if task.failures + 1 >= options.max_failures {
        FailureTarget::Failed
    } else {
        FailureTarget::Waiting
    };
    let report = FailureReport {
        instance_id: token,
        time_used: Some(seconds),
        resources: [
            ("cpu".to_string(), json!(rng.gen_range(1.0..4.0))),
            ("memory".to_string(), json!(rng.gen_range(0.5..6.0))),
        ]
        .into_iter()
        .collect(),
        site: None,
        reason: Some("Job was evicted: memory usage exceeded".to_string()),
    };
    let updated = scheduler.mark_failure(task.task_id, target, report).await?;
    if updated.status == TaskStatus::Failed {
        tracing::warn!(task_id = %task.task_id, failures = updated.failures, "task gave up");
    }
    Ok(())
}
