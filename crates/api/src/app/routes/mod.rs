use axum::{Router, routing::get};

pub mod jobs;
pub mod system;

/// Router for the `/v1` job endpoints.
///
/// Actions use the `resource:verb` form (`/v1/jobs:submit`,
/// `/v1/jobs/{id}:approve`, `/v1/jobs/{id}:resume`), so the verb is split off
/// the last path segment.
pub fn router() -> Router {
    Router::new()
        .route("/v1/:target", axum::routing::post(jobs::collection_action))
        .route(
            "/v1/jobs/:target",
            get(jobs::job_query).post(jobs::job_action),
        )
        .route("/v1/jobs/:job_id/checkpoints", get(jobs::list_checkpoints))
        .route(
            "/v1/jobs/:job_id/checkpoints/:checkpoint_id",
            get(jobs::get_checkpoint),
        )
}
