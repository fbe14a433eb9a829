use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Extension, Path};
use axum::Json;
use serde::de::DeserializeOwned;

use jobward_core::{Clock, JobId, JobResult};
use jobward_events::{ApprovalRecord, CheckpointRecord};
use jobward_infra::SubmitOptions;

use crate::app::AppState;
use crate::app::dto::{
    ApproveRequest, CancelRequest, StatusResponse, SubmitRequest, SubmitResponse,
};
use crate::app::errors::ApiError;

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Run a blocking store operation off the async executor.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> JobResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::internal(format!("worker task failed: {e}")))?
        .map_err(ApiError::from)
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("invalid request body: {e}")))
}

/// Split `name:verb`; the id part never contains a colon.
fn split_action(target: &str) -> Result<(&str, &str), ApiError> {
    target
        .rsplit_once(':')
        .ok_or_else(|| ApiError::not_found(format!("no such route: {target}")))
}

fn job_id(raw: &str) -> Result<JobId, ApiError> {
    JobId::parse(raw).map_err(ApiError::from)
}

/// `POST /v1/jobs:submit`
pub async fn collection_action(
    Extension(state): Extension<Arc<AppState>>,
    Path(target): Path<String>,
    body: Bytes,
) -> ApiResult<SubmitResponse> {
    match split_action(&target)? {
        ("jobs", "submit") => submit(state, parse_body(&body)?).await,
        _ => Err(ApiError::not_found(format!("no such route: /v1/{target}"))),
    }
}

async fn submit(state: Arc<AppState>, req: SubmitRequest) -> ApiResult<SubmitResponse> {
    let opts = SubmitOptions {
        job_id: req.job_id,
        synchronous: req.synchronous,
        worker_id: Some(state.config.worker_id.clone()),
    };

    let dispatcher = state.dispatcher.clone();
    let result = match (req.spec, req.spec_path) {
        (Some(spec), None) => blocking(move || dispatcher.submit_spec(spec, opts)).await?,
        (None, Some(path)) => {
            blocking(move || dispatcher.submit(&PathBuf::from(path), opts)).await?
        }
        _ => {
            return Err(ApiError::bad_request(
                "exactly one of spec and spec_path is required",
            ));
        }
    };

    if state.config.auto_advance && !req.synchronous {
        state.spawn_advance(result.job_id.clone());
    }

    Ok(Json(SubmitResponse {
        job_id: result.job_id.to_string(),
        status: result.status,
    }))
}

/// `GET /v1/jobs/{id}:status`
pub async fn job_query(
    Extension(state): Extension<Arc<AppState>>,
    Path(target): Path<String>,
) -> ApiResult<StatusResponse> {
    let (raw_id, verb) = split_action(&target)?;
    if verb != "status" {
        return Err(ApiError::not_found(format!("no such route: /v1/jobs/{target}")));
    }
    let job_id = job_id(raw_id)?;
    status(state, job_id).await
}

async fn status(state: Arc<AppState>, job_id: JobId) -> ApiResult<StatusResponse> {
    let runner = state.runner().clone();
    let job = blocking(move || runner.recover(&job_id)).await?;
    let now = state.runner().clock().now();
    Ok(Json(StatusResponse::from_state(&job, now)))
}

/// `POST /v1/jobs/{id}:approve`, `POST /v1/jobs/{id}:cancel` and
/// `POST /v1/jobs/{id}:resume`
pub async fn job_action(
    Extension(state): Extension<Arc<AppState>>,
    Path(target): Path<String>,
    body: Bytes,
) -> Result<axum::response::Response, ApiError> {
    use axum::response::IntoResponse;

    let (raw_id, verb) = split_action(&target)?;
    match verb {
        "approve" => {
            let job_id = job_id(raw_id)?;
            Ok(approve(state, job_id, parse_body(&body)?).await?.into_response())
        }
        "cancel" => {
            let job_id = job_id(raw_id)?;
            Ok(cancel(state, job_id, parse_body(&body)?).await?.into_response())
        }
        "resume" => {
            let job_id = job_id(raw_id)?;
            Ok(resume(state, job_id).await?.into_response())
        }
        _ => Err(ApiError::not_found(format!("no such route: /v1/jobs/{target}"))),
    }
}

async fn approve(
    state: Arc<AppState>,
    job_id: JobId,
    req: ApproveRequest,
) -> ApiResult<ApprovalRecord> {
    let approved_by = req
        .approved_by
        .filter(|a| !a.trim().is_empty())
        .unwrap_or_else(|| state.config.default_approver.clone());

    let runner = state.runner().clone();
    let id = job_id.clone();
    let approval = blocking(move || {
        runner.approve_checkpoint(&id, &req.checkpoint_id, &req.reason, &approved_by)
    })
    .await?;

    if state.config.auto_advance {
        state.spawn_advance(job_id);
    }
    Ok(Json(approval))
}

async fn cancel(state: Arc<AppState>, job_id: JobId, req: CancelRequest) -> ApiResult<StatusResponse> {
    let runner = state.runner().clone();
    let job = blocking(move || runner.cancel(&job_id, &req.reason)).await?;
    let now = state.runner().clock().now();
    Ok(Json(StatusResponse::from_state(&job, now)))
}

/// Advance an existing job with this server's worker identity, e.g. one left
/// `running` by a crashed process.
async fn resume(state: Arc<AppState>, job_id: JobId) -> ApiResult<StatusResponse> {
    let runner = state.runner().clone();
    let worker_id = state.config.worker_id.clone();
    let job = blocking(move || runner.advance(&job_id, &worker_id)).await?;
    let now = state.runner().clock().now();
    Ok(Json(StatusResponse::from_state(&job, now)))
}

/// `GET /v1/jobs/{id}/checkpoints`
pub async fn list_checkpoints(
    Extension(state): Extension<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> ApiResult<Vec<CheckpointRecord>> {
    let job_id = job_id(&raw_id)?;
    let runner = state.runner().clone();
    Ok(Json(blocking(move || runner.list_checkpoints(&job_id)).await?))
}

/// `GET /v1/jobs/{id}/checkpoints/{cp}`
pub async fn get_checkpoint(
    Extension(state): Extension<Arc<AppState>>,
    Path((raw_id, checkpoint_id)): Path<(String, String)>,
) -> ApiResult<CheckpointRecord> {
    let job_id = job_id(&raw_id)?;
    jobward_core::reject_traversal("checkpoint_id", &checkpoint_id)?;
    let runner = state.runner().clone();
    Ok(Json(
        blocking(move || runner.get_checkpoint(&job_id, &checkpoint_id)).await?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_split_on_the_last_colon() {
        assert_eq!(split_action("jobs:submit").unwrap(), ("jobs", "submit"));
        assert_eq!(split_action("job_1:status").unwrap(), ("job_1", "status"));
        assert!(split_action("job_1").is_err());
    }
}
