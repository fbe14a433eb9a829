use std::collections::BTreeMap;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value as JsonValue, json};

use jobward_core::{ErrorKind, JobError};

/// Error returned by every handler; rendered as `{error, message, details}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: BTreeMap<String, JsonValue>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_input", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidInput | ErrorKind::InvalidState | ErrorKind::AlreadyExists => {
            StatusCode::BAD_REQUEST
        }
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::LeaseHeld | ErrorKind::LeaseMismatch => StatusCode::CONFLICT,
        ErrorKind::CorruptLog | ErrorKind::IoFailure => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        Self {
            status: status_for(err.kind()),
            code: err.kind().as_str(),
            message: err.message().to_string(),
            details: err.details().clone(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = self.code, message = %self.message, "request failed");
        }
        json_error(self.status, self.code, self.message, self.details)
    }
}

pub fn json_error(
    status: StatusCode,
    code: &str,
    message: impl Into<String>,
    details: BTreeMap<String, JsonValue>,
) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
            "details": details,
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_map_to_http_statuses() {
        assert_eq!(status_for(ErrorKind::InvalidState), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::AlreadyExists), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::LeaseHeld), StatusCode::CONFLICT);
        assert_eq!(
            status_for(ErrorKind::CorruptLog),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn job_error_details_are_carried_over() {
        let err = ApiError::from(JobError::not_found("missing").with_detail("job_id", "abc"));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.code, "not_found");
        assert_eq!(err.details["job_id"], "abc");
    }
}
