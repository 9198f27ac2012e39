//! The worker job protocol: pull, heartbeat, submit.
//!
//! Pull verifies the worker will accept work (a DRAINING worker gets 204),
//! claims tasks atomically, and binds the worker's counters. Submit rejects
//! with 409 when the task is not IN_PROGRESS with the reporting worker,
//! which protects against ghost completions after orphan recovery already
//! reassigned the task.

use axum::extract::{Extension, Path, Query};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::common::{Error, Result};
use crate::domains::tasks::{Task, TaskOutcome, TaskStatus};
use crate::domains::workers::WorkerStatus;
use crate::server::app::AppState;

#[derive(Serialize)]
pub struct JobItem {
    pub id: String,
    pub input: Option<serde_json::Value>,
}

#[derive(Deserialize)]
pub struct BatchQuery {
    pub n: Option<i64>,
}

#[derive(Serialize)]
pub struct PingResponse {
    pub concurrency: i32,
}

#[derive(Deserialize)]
pub struct SubmitRequest {
    pub status: String,
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Deserialize)]
pub struct StreamRequest {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// `GET /v2/{endpoint}/job-take/{worker_id}`
pub async fn job_take(
    Path((endpoint, worker_id)): Path<(String, String)>,
    Extension(state): Extension<AppState>,
) -> Result<Response> {
    pull(&state, &endpoint, &worker_id, 1).await
}

/// `GET /v2/{endpoint}/job-take-batch/{worker_id}?n=`
pub async fn job_take_batch(
    Path((endpoint, worker_id)): Path<(String, String)>,
    Query(query): Query<BatchQuery>,
    Extension(state): Extension<AppState>,
) -> Result<Response> {
    let concurrency = match state.kernel.endpoints.get(&endpoint).await {
        Ok(ep) => ep.concurrency.max(1) as i64,
        Err(Error::NotFound(_)) => 1,
        Err(e) => return Err(e),
    };
    let limit = query.n.unwrap_or(concurrency).clamp(1, concurrency);
    pull(&state, &endpoint, &worker_id, limit).await
}

async fn pull(state: &AppState, endpoint: &str, worker_id: &str, limit: i64) -> Result<Response> {
    // First contact from a pod registers it; any contact refreshes the
    // heartbeat.
    let worker = state.kernel.workers.upsert_ready(worker_id, endpoint).await?;
    if worker.status == WorkerStatus::Draining {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let tasks = state
        .kernel
        .tasks
        .assign_pending(endpoint, limit, worker_id)
        .await?;
    if tasks.is_empty() {
        return Ok(Json(Vec::<JobItem>::new()).into_response());
    }

    let ids: Vec<String> = tasks.iter().map(|t| t.task_id.clone()).collect();
    if let Err(e) = state.kernel.workers.assign(worker_id, &ids).await {
        // The worker went draining/offline between the check and the bind;
        // put the claims back before refusing.
        for id in &ids {
            if let Err(re) = state.kernel.tasks.requeue(id).await {
                tracing::warn!(task = %id, error = %re, "failed to requeue after refused assignment");
            }
        }
        tracing::debug!(worker = %worker_id, error = %e, "assignment refused, claims returned");
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let items: Vec<JobItem> = tasks
        .into_iter()
        .map(|t| JobItem {
            id: t.task_id,
            input: t.input,
        })
        .collect();
    Ok(Json(items).into_response())
}

/// `GET /v2/{endpoint}/ping/{worker_id}`
pub async fn ping(
    Path((endpoint, worker_id)): Path<(String, String)>,
    Extension(state): Extension<AppState>,
) -> Result<Json<PingResponse>> {
    state.kernel.workers.upsert_ready(&worker_id, &endpoint).await?;

    let concurrency = match state.kernel.endpoints.get(&endpoint).await {
        Ok(ep) => ep.concurrency.max(1),
        Err(Error::NotFound(_)) => 1,
        Err(e) => return Err(e),
    };
    Ok(Json(PingResponse { concurrency }))
}

/// `POST /v2/{endpoint}/job-done/{worker_id}/{task_id}`
pub async fn job_done(
    Path((endpoint, worker_id, task_id)): Path<(String, String, String)>,
    Extension(state): Extension<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<Response> {
    let outcome = parse_outcome(&request.status, request.output, request.error)?;
    submit(&state, &endpoint, &worker_id, &task_id, outcome).await
}

/// `POST /v2/{endpoint}/job-stream/{worker_id}/{task_id}`
///
/// Stores intermediate output while the task is still running; a terminal
/// status in the body completes the task exactly like job-done.
pub async fn job_stream(
    Path((endpoint, worker_id, task_id)): Path<(String, String, String)>,
    Extension(state): Extension<AppState>,
    Json(request): Json<StreamRequest>,
) -> Result<Response> {
    match request.status.as_deref() {
        Some(status) if status == "COMPLETED" || status == "FAILED" => {
            let outcome = parse_outcome(status, request.output, request.error)?;
            submit(&state, &endpoint, &worker_id, &task_id, outcome).await
        }
        _ => {
            let output = request.output.unwrap_or(serde_json::Value::Null);
            state
                .kernel
                .tasks
                .store_partial_output(&task_id, &worker_id, output)
                .await?;
            Ok(Json(json!({ "status": "IN_PROGRESS" })).into_response())
        }
    }
}

fn parse_outcome(
    status: &str,
    output: Option<serde_json::Value>,
    error: Option<String>,
) -> Result<TaskOutcome> {
    match status {
        "COMPLETED" => Ok(TaskOutcome::Completed(output)),
        "FAILED" => Ok(TaskOutcome::Failed(error)),
        other => Err(Error::PreconditionFailed(format!(
            "unsupported result status: {other}"
        ))),
    }
}

async fn submit(
    state: &AppState,
    endpoint: &str,
    worker_id: &str,
    task_id: &str,
    outcome: TaskOutcome,
) -> Result<Response> {
    match state.kernel.tasks.complete(task_id, worker_id, &outcome).await {
        Ok(task) => {
            if let Err(e) = state.kernel.workers.complete(worker_id, task_id).await {
                tracing::warn!(worker = %worker_id, error = %e, "failed to release worker counter");
            }
            if let Err(e) = state.kernel.endpoints.touch_last_task(endpoint).await {
                tracing::warn!(endpoint = %endpoint, error = %e, "failed to stamp last task time");
            }
            Ok(submit_response(&task))
        }
        Err(Error::Conflict(message)) => {
            // Repeating the same submit must be a no-op with the same
            // answer; anyone else gets the conflict.
            let task = state.kernel.tasks.get(task_id).await?;
            if task.status == outcome.status()
                && task.last_execution_worker() == Some(worker_id)
            {
                return Ok(submit_response(&task));
            }
            Err(Error::Conflict(message))
        }
        Err(e) => Err(e),
    }
}

fn submit_response(task: &Task) -> Response {
    let status = match task.status {
        TaskStatus::Completed => "COMPLETED",
        TaskStatus::Failed => "FAILED",
        _ => "IN_PROGRESS",
    };
    Json(json!({ "id": task.task_id, "status": status })).into_response()
}
