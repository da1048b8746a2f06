//! HTTP control plane (axum)
//!
//! ワーカー向けの報告 API と運用者向けの一括操作 API を公開します。
//! ハンドラは薄く、`Scheduler` の操作を呼んで結果を JSON にするだけです。
//!
//! エラー応答はすべて `{"error": "..."}` の形:
//! - Validation / JSON 不正 → 400
//! - NotFound → 404
//! - Conflict → 400 `"Bad state transition for status"`
//! - Store → 500

use std::collections::BTreeMap;

use anyhow::Context;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use shuttle_core::domain::{
    BulkScope, CompletionReport, DatasetId, DatasetRecord, DatasetStatus, DirectStatusChange,
    FailureReport, FailureTarget, JobId, JobRecord, JobStatus, NewTask, ProcessingReport,
    QueueRequest, TaskFilter, TaskId, TaskRecord, TaskStatus, UpdateCount,
};
use shuttle_core::{ErrorKind, Scheduler, SchedulerError};
use shuttle_core::app::{NameCounts, StatusCounts, TaskStats};

const BAD_TRANSITION: &str = "Bad state transition for status";

/// Error response of every handler.
#[derive(Debug)]
pub enum ApiError {
    Scheduler(SchedulerError),
    /// Malformed body (including a missing `instance_id`).
    BadRequest(String),
    /// Nothing to hand out for a queue request.
    NoTask,
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        ApiError::Scheduler(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::NoTask => (StatusCode::NOT_FOUND, "no task available".to_string()),
            ApiError::Scheduler(err) => match err.kind() {
                ErrorKind::Client => (StatusCode::BAD_REQUEST, err.to_string()),
                ErrorKind::NotFound => (StatusCode::NOT_FOUND, err.to_string()),
                ErrorKind::Conflict => {
                    tracing::warn!(error = %err, "rejected transition");
                    (StatusCode::BAD_REQUEST, BAD_TRANSITION.to_string())
                }
                ErrorKind::Infrastructure => {
                    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
                }
            },
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// `Path` whose rejection is rendered as `{"error": ..}` like every other error.
struct ApiPath<T>(T);

impl<S, T> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state).await?;
        Ok(ApiPath(value))
    }
}

/// Parse an optional JSON body; an empty body means `T::default()`.
fn optional_body<T: DeserializeOwned + Default>(body: &str) -> Result<T, ApiError> {
    if body.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(body).map_err(|e| ApiError::BadRequest(e.to_string()))
}

/// Build the full router over `scheduler`.
pub fn router(scheduler: Scheduler) -> Router {
    Router::new()
        // worker API
        .route("/task_actions/queue", post(queue_task))
        .route("/tasks/{id}/task_actions/processing", post(mark_processing))
        .route("/tasks/{id}/task_actions/reset", post(mark_reset))
        .route("/tasks/{id}/task_actions/failed", post(mark_failed))
        .route("/tasks/{id}/task_actions/complete", post(mark_complete))
        // records
        .route("/tasks", post(create_task))
        .route("/tasks/{id}", get(get_task))
        .route("/tasks/{id}/status", put(set_task_status))
        .route("/task_actions/waiting", post(release_waiting))
        .route("/datasets", post(create_dataset))
        .route("/datasets/{id}", get(get_dataset))
        .route("/datasets/{id}/status", put(set_dataset_status))
        .route("/datasets/{id}/jobs", post(create_job))
        .route("/datasets/{id}/tasks", get(list_dataset_tasks))
        .route("/datasets/{id}/tasks/{task_id}", get(get_dataset_task))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/status", put(set_job_status))
        // bulk
        .route("/task_actions/bulk_status/{status}", post(bulk_status))
        .route(
            "/datasets/{id}/task_actions/bulk_status/{status}",
            post(dataset_bulk_status),
        )
        .route("/datasets/{id}/task_actions/bulk_suspend", post(bulk_suspend))
        .route("/datasets/{id}/task_actions/bulk_reset", post(bulk_reset))
        .route(
            "/datasets/{id}/task_actions/bulk_hard_reset",
            post(bulk_hard_reset),
        )
        .route(
            "/datasets/{id}/task_actions/bulk_requirements/{name}",
            patch(bulk_requirements),
        )
        // summaries
        .route("/task_counts/status", get(task_counts))
        .route("/datasets/{id}/task_counts/status", get(dataset_task_counts))
        .route("/datasets/{id}/task_counts/name", get(dataset_task_counts_by_name))
        .route("/datasets/{id}/task_summaries/status", get(dataset_task_summary))
        .route("/datasets/{id}/task_stats", get(dataset_task_stats))
        .with_state(scheduler)
}

/// Bind `addr` and serve until ctrl-c.
pub async fn serve(addr: &str, scheduler: Scheduler) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Cannot bind {addr}"))?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, router(scheduler))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

// ========================================
// worker API
// ========================================

/// An empty body asks for the best waiting task with no offer and no filters.
async fn queue_task(
    State(scheduler): State<Scheduler>,
    body: String,
) -> ApiResult<TaskRecord> {
    let request: QueueRequest = optional_body(&body)?;
    scheduler
        .assign(&request)
        .await?
        .map(Json)
        .ok_or(ApiError::NoTask)
}

async fn mark_processing(
    State(scheduler): State<Scheduler>,
    ApiPath(id): ApiPath<TaskId>,
    body: Result<Json<ProcessingReport>, JsonRejection>,
) -> ApiResult<TaskRecord> {
    let Json(report) = body?;
    Ok(Json(scheduler.mark_processing(id, report).await?))
}

async fn mark_reset(
    State(scheduler): State<Scheduler>,
    ApiPath(id): ApiPath<TaskId>,
    body: Result<Json<FailureReport>, JsonRejection>,
) -> ApiResult<TaskRecord> {
    let Json(report) = body?;
    Ok(Json(
        scheduler.mark_failure(id, FailureTarget::Waiting, report).await?,
    ))
}

async fn mark_failed(
    State(scheduler): State<Scheduler>,
    ApiPath(id): ApiPath<TaskId>,
    body: Result<Json<FailureReport>, JsonRejection>,
) -> ApiResult<TaskRecord> {
    let Json(report) = body?;
    Ok(Json(
        scheduler.mark_failure(id, FailureTarget::Failed, report).await?,
    ))
}

async fn mark_complete(
    State(scheduler): State<Scheduler>,
    ApiPath(id): ApiPath<TaskId>,
    body: Result<Json<CompletionReport>, JsonRejection>,
) -> ApiResult<TaskRecord> {
    let Json(report) = body?;
    Ok(Json(scheduler.mark_complete(id, report).await?))
}

// ========================================
// records
// ========================================

async fn create_task(
    State(scheduler): State<Scheduler>,
    body: Result<Json<NewTask>, JsonRejection>,
) -> Result<(StatusCode, Json<TaskRecord>), ApiError> {
    let Json(new) = body?;
    let task = scheduler.create_task(new).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task(
    State(scheduler): State<Scheduler>,
    ApiPath(id): ApiPath<TaskId>,
) -> ApiResult<TaskRecord> {
    Ok(Json(scheduler.get_task(id).await?))
}

/// Returns `{}` on success.
async fn set_task_status(
    State(scheduler): State<Scheduler>,
    ApiPath(id): ApiPath<TaskId>,
    body: Result<Json<DirectStatusChange>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(change) = body?;
    scheduler.set_task_status(id, change).await?;
    Ok(Json(json!({})))
}

#[derive(Debug, Deserialize)]
struct TaskIdsBody {
    #[serde(default)]
    tasks: Vec<TaskId>,
}

#[derive(Debug, Deserialize)]
struct ReleaseBody {
    #[serde(default)]
    task_ids: Vec<TaskId>,
}

/// idle -> waiting; answers `{"waiting": <moved>}`.
async fn release_waiting(
    State(scheduler): State<Scheduler>,
    body: Result<Json<ReleaseBody>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(body) = body?;
    let count = scheduler.release_waiting(&body.task_ids).await?;
    Ok(Json(json!({ "waiting": count.modified })))
}

async fn create_dataset(
    State(scheduler): State<Scheduler>,
) -> Result<(StatusCode, Json<DatasetRecord>), ApiError> {
    Ok((StatusCode::CREATED, Json(scheduler.create_dataset().await?)))
}

async fn get_dataset(
    State(scheduler): State<Scheduler>,
    ApiPath(id): ApiPath<DatasetId>,
) -> ApiResult<DatasetRecord> {
    Ok(Json(scheduler.get_dataset(id).await?))
}

#[derive(Debug, Deserialize)]
struct DatasetStatusBody {
    status: DatasetStatus,
}

async fn set_dataset_status(
    State(scheduler): State<Scheduler>,
    ApiPath(id): ApiPath<DatasetId>,
    body: Result<Json<DatasetStatusBody>, JsonRejection>,
) -> ApiResult<DatasetRecord> {
    let Json(body) = body?;
    Ok(Json(scheduler.set_dataset_status(id, body.status).await?))
}

async fn create_job(
    State(scheduler): State<Scheduler>,
    ApiPath(id): ApiPath<DatasetId>,
) -> Result<(StatusCode, Json<JobRecord>), ApiError> {
    Ok((StatusCode::CREATED, Json(scheduler.create_job(id).await?)))
}

async fn get_job(
    State(scheduler): State<Scheduler>,
    ApiPath(id): ApiPath<JobId>,
) -> ApiResult<JobRecord> {
    Ok(Json(scheduler.get_job(id).await?))
}

#[derive(Debug, Deserialize)]
struct JobStatusBody {
    status: JobStatus,
}

async fn set_job_status(
    State(scheduler): State<Scheduler>,
    ApiPath(id): ApiPath<JobId>,
    body: Result<Json<JobStatusBody>, JsonRejection>,
) -> ApiResult<JobRecord> {
    let Json(body) = body?;
    Ok(Json(scheduler.set_job_status(id, body.status).await?))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<TaskStatus>,
}

async fn list_dataset_tasks(
    State(scheduler): State<Scheduler>,
    ApiPath(id): ApiPath<DatasetId>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<TaskRecord>> {
    let mut filter = TaskFilter::new().with_dataset(id);
    if let Some(status) = query.status {
        filter = filter.with_status(status);
    }
    Ok(Json(scheduler.list_tasks(&filter).await?))
}

async fn get_dataset_task(
    State(scheduler): State<Scheduler>,
    ApiPath((id, task_id)): ApiPath<(DatasetId, TaskId)>,
) -> ApiResult<TaskRecord> {
    Ok(Json(scheduler.get_dataset_task(id, task_id).await?))
}

// ========================================
// bulk
// ========================================

async fn bulk_status(
    State(scheduler): State<Scheduler>,
    ApiPath(status): ApiPath<TaskStatus>,
    body: Result<Json<TaskIdsBody>, JsonRejection>,
) -> ApiResult<UpdateCount> {
    let Json(body) = body?;
    Ok(Json(scheduler.bulk_set_status(None, status, &body.tasks).await?))
}

async fn dataset_bulk_status(
    State(scheduler): State<Scheduler>,
    ApiPath((id, status)): ApiPath<(DatasetId, TaskStatus)>,
    body: Result<Json<TaskIdsBody>, JsonRejection>,
) -> ApiResult<UpdateCount> {
    let Json(body) = body?;
    Ok(Json(
        scheduler.bulk_set_status(Some(id), status, &body.tasks).await?,
    ))
}

/// Optional `jobs` / `tasks` narrowing; at most one of them.
#[derive(Debug, Default, Deserialize)]
struct ScopeBody {
    jobs: Option<Vec<JobId>>,
    tasks: Option<Vec<TaskId>>,
}

impl TryFrom<ScopeBody> for BulkScope {
    type Error = ApiError;

    fn try_from(body: ScopeBody) -> Result<Self, Self::Error> {
        match (body.jobs, body.tasks) {
            (Some(_), Some(_)) => Err(ApiError::BadRequest(
                "give either jobs or tasks, not both".to_string(),
            )),
            (Some(jobs), None) => Ok(BulkScope::Jobs(jobs)),
            (None, Some(tasks)) => Ok(BulkScope::Tasks(tasks)),
            (None, None) => Ok(BulkScope::All),
        }
    }
}

/// An empty body means the whole dataset.
fn scope_from(body: &str) -> Result<BulkScope, ApiError> {
    optional_body::<ScopeBody>(body)?.try_into()
}

async fn bulk_suspend(
    State(scheduler): State<Scheduler>,
    ApiPath(id): ApiPath<DatasetId>,
    body: String,
) -> ApiResult<UpdateCount> {
    let scope = scope_from(&body)?;
    Ok(Json(scheduler.bulk_suspend(id, scope).await?))
}

async fn bulk_reset(
    State(scheduler): State<Scheduler>,
    ApiPath(id): ApiPath<DatasetId>,
    body: String,
) -> ApiResult<UpdateCount> {
    let scope = scope_from(&body)?;
    Ok(Json(scheduler.bulk_reset(id, scope).await?))
}

async fn bulk_hard_reset(
    State(scheduler): State<Scheduler>,
    ApiPath(id): ApiPath<DatasetId>,
    body: String,
) -> ApiResult<UpdateCount> {
    let scope = scope_from(&body)?;
    Ok(Json(scheduler.bulk_hard_reset(id, scope).await?))
}

async fn bulk_requirements(
    State(scheduler): State<Scheduler>,
    ApiPath((id, name)): ApiPath<(DatasetId, String)>,
    body: Result<Json<BTreeMap<String, Value>>, JsonRejection>,
) -> ApiResult<UpdateCount> {
    let Json(edits) = body?;
    Ok(Json(scheduler.bulk_set_requirements(id, &name, &edits).await?))
}

// ========================================
// summaries
// ========================================

async fn task_counts(State(scheduler): State<Scheduler>) -> ApiResult<StatusCounts> {
    Ok(Json(scheduler.task_counts_by_status().await?))
}

async fn dataset_task_counts(
    State(scheduler): State<Scheduler>,
    ApiPath(id): ApiPath<DatasetId>,
) -> ApiResult<StatusCounts> {
    Ok(Json(scheduler.dataset_task_counts(id).await?))
}

async fn dataset_task_counts_by_name(
    State(scheduler): State<Scheduler>,
    ApiPath(id): ApiPath<DatasetId>,
) -> ApiResult<Vec<NameCounts>> {
    Ok(Json(scheduler.dataset_task_counts_by_name(id).await?))
}

async fn dataset_task_summary(
    State(scheduler): State<Scheduler>,
    ApiPath(id): ApiPath<DatasetId>,
) -> ApiResult<BTreeMap<TaskStatus, Vec<TaskId>>> {
    Ok(Json(scheduler.dataset_task_summary(id).await?))
}

async fn dataset_task_stats(
    State(scheduler): State<Scheduler>,
    ApiPath(id): ApiPath<DatasetId>,
) -> ApiResult<Vec<TaskStats>> {
    Ok(Json(scheduler.dataset_task_stats(id).await?))
}
