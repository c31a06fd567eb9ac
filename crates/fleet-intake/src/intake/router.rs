use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;

use super::audit::AuditLog;
use super::domain::BatchId;
use super::partition::{PartitionDirectory, PartitionError};
use super::repository::IntakeRepository;
use super::service::{IntakeError, IntakeRequest, IntakeService};

/// Router builder exposing preview, commit, batch audit, and format catalog endpoints.
pub fn intake_router<R, A, D>(service: Arc<IntakeService<R, A, D>>) -> Router
where
    R: IntakeRepository + 'static,
    A: AuditLog + 'static,
    D: PartitionDirectory + 'static,
{
    // JSON escaping inflates the raw content.
    let body_limit = service.settings().max_upload_bytes.saturating_mul(2);

    Router::new()
        .route("/api/v1/intake/preview", post(preview_handler::<R, A, D>))
        .route("/api/v1/intake/commit", post(commit_handler::<R, A, D>))
        .route(
            "/api/v1/intake/batches/:batch_id",
            get(batch_handler::<R, A, D>),
        )
        .route("/api/v1/intake/formats", get(formats_handler::<R, A, D>))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(service)
}

/// HTTP status for each intake failure.
pub fn intake_status(error: &IntakeError) -> StatusCode {
    match error {
        IntakeError::Partition(PartitionError::Missing { .. }) => StatusCode::BAD_REQUEST,
        IntakeError::Partition(PartitionError::Invalid { .. })
        | IntakeError::Detection(_)
        | IntakeError::Structural(_) => StatusCode::UNPROCESSABLE_ENTITY,
        IntakeError::DuplicateFile { .. } => StatusCode::CONFLICT,
        IntakeError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        IntakeError::UnknownBatch(_) => StatusCode::NOT_FOUND,
        IntakeError::Partition(PartitionError::Directory(_))
        | IntakeError::Repository(_)
        | IntakeError::Audit(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn intake_error_response(error: IntakeError) -> Response {
    let status = intake_status(&error);
    let mut payload = json!({
        "error": error.to_string(),
        "kind": error.kind(),
    });
    if let IntakeError::DuplicateFile {
        batch_id: Some(batch_id),
    } = &error
    {
        payload["batch_id"] = json!(batch_id);
    }
    (status, axum::Json(payload)).into_response()
}

pub(crate) async fn preview_handler<R, A, D>(
    State(service): State<Arc<IntakeService<R, A, D>>>,
    axum::Json(request): axum::Json<IntakeRequest>,
) -> Response
where
    R: IntakeRepository + 'static,
    A: AuditLog + 'static,
    D: PartitionDirectory + 'static,
{
    match service.preview(&request) {
        Ok(result) => (StatusCode::OK, axum::Json(result)).into_response(),
        Err(error) => intake_error_response(error),
    }
}

pub(crate) async fn commit_handler<R, A, D>(
    State(service): State<Arc<IntakeService<R, A, D>>>,
    axum::Json(request): axum::Json<IntakeRequest>,
) -> Response
where
    R: IntakeRepository + 'static,
    A: AuditLog + 'static,
    D: PartitionDirectory + 'static,
{
    match service.commit(&request) {
        Ok(result) => (StatusCode::CREATED, axum::Json(result)).into_response(),
        Err(error) => intake_error_response(error),
    }
}

pub(crate) async fn batch_handler<R, A, D>(
    State(service): State<Arc<IntakeService<R, A, D>>>,
    Path(batch_id): Path<String>,
) -> Response
where
    R: IntakeRepository + 'static,
    A: AuditLog + 'static,
    D: PartitionDirectory + 'static,
{
    let Some(id) = BatchId::parse(&batch_id) else {
        let payload = json!({
            "error": format!("'{batch_id}' is not a batch id"),
            "kind": "invalid_batch_id",
        });
        return (StatusCode::BAD_REQUEST, axum::Json(payload)).into_response();
    };

    match service.audit_batch(&id) {
        Ok(audit) => (StatusCode::OK, axum::Json(audit)).into_response(),
        Err(error) => intake_error_response(error),
    }
}

pub(crate) async fn formats_handler<R, A, D>(
    State(service): State<Arc<IntakeService<R, A, D>>>,
) -> Response
where
    R: IntakeRepository + 'static,
    A: AuditLog + 'static,
    D: PartitionDirectory + 'static,
{
    (StatusCode::OK, axum::Json(service.catalog())).into_response()
}
