//! REST API handlers.
//!
//! Each handler calls into the `Orchestrator` and maps its errors onto
//! HTTP status codes.

use axum::Json;
use axum::extract::{Multipart, Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tracing::{debug, error, warn};

use launchpad_driver::DriverError;
use launchpad_orchestrator::OrchestratorError;
use launchpad_state::{Job, JobState};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

/// Job snapshot as served over HTTP.
///
/// `status` mirrors `state` for dashboards written against the older
/// server, which read `project.status`.
#[derive(serde::Serialize)]
pub struct ProjectView {
    #[serde(flatten)]
    pub job: Job,
    pub status: JobState,
}

impl From<Job> for ProjectView {
    fn from(job: Job) -> Self {
        let status = job.state;
        Self { job, status }
    }
}

/// Body of a successful upload: `{ "success": true, "project": ... }`.
#[derive(serde::Serialize)]
struct Created {
    success: bool,
    project: ProjectView,
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

/// HTTP status for an orchestrator failure.
pub fn status_for(err: &OrchestratorError) -> StatusCode {
    match err {
        OrchestratorError::Validation(_) => StatusCode::BAD_REQUEST,
        OrchestratorError::NotFound(_) | OrchestratorError::NotCompleted(_) => {
            StatusCode::NOT_FOUND
        }
        OrchestratorError::Conflict { .. } | OrchestratorError::AlreadyProvisioned(_) => {
            StatusCode::CONFLICT
        }
        OrchestratorError::Driver(DriverError::ObjectNotFound(_)) => StatusCode::NOT_FOUND,
        OrchestratorError::Driver(_) => StatusCode::BAD_GATEWAY,
        OrchestratorError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn failure(err: OrchestratorError) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        error!(error = %err, "request failed");
    } else {
        debug!(error = %err, %status, "request rejected");
    }
    error_response(&err.to_string(), status)
}

// ── Health ─────────────────────────────────────────────────────

/// GET /healthz
pub async fn healthz() -> &'static str {
    "ok"
}

// ── Projects ───────────────────────────────────────────────────

/// GET /projects
///
/// A bare JSON array of snapshots, without the envelope.
pub async fn list_projects(State(state): State<ApiState>) -> Response {
    match state.orchestrator.list() {
        Ok(jobs) => {
            let views: Vec<ProjectView> = jobs.into_iter().map(ProjectView::from).collect();
            Json(views).into_response()
        }
        Err(e) => failure(e),
    }
}

/// GET /projects/{name}
pub async fn get_project(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    match state.orchestrator.get(&name) {
        Ok(job) => ApiResponse::ok(ProjectView::from(job)).into_response(),
        Err(e) => failure(e),
    }
}

/// POST /projects
///
/// Multipart body with the project name in `name` (or `projectName`) and
/// the artifact in `file` (or `projectFile`).
pub async fn create_project(State(state): State<ApiState>, mut multipart: Multipart) -> Response {
    let mut name = None;
    let mut artifact: Option<(String, Bytes)> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return error_response(&format!("invalid multipart body: {e}"), StatusCode::BAD_REQUEST);
            }
        };
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "name" | "projectName" => match field.text().await {
                Ok(text) => name = Some(text.trim().to_string()),
                Err(e) => {
                    return error_response(&format!("unreadable {field_name}: {e}"), StatusCode::BAD_REQUEST);
                }
            },
            "file" | "projectFile" => {
                let file_name = field.file_name().unwrap_or("artifact").to_string();
                match field.bytes().await {
                    Ok(bytes) => artifact = Some((file_name, bytes)),
                    Err(e) => {
                        return error_response(&format!("unreadable {field_name}: {e}"), StatusCode::BAD_REQUEST);
                    }
                }
            }
            other => debug!(field = %other, "ignoring multipart field"),
        }
    }

    let (Some(name), Some((file_name, bytes))) = (name, artifact) else {
        return error_response("project name and file are required", StatusCode::BAD_REQUEST);
    };

    match state.orchestrator.create(&name, &file_name, bytes).await {
        Ok(job) => (
            StatusCode::CREATED,
            Json(Created {
                success: true,
                project: job.into(),
            }),
        )
            .into_response(),
        Err(e) => failure(e),
    }
}

/// POST /projects/{name}/start
pub async fn start_project(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    let job = match state.orchestrator.get(&name) {
        Ok(job) => job,
        Err(e) => return failure(e),
    };
    let bootstrap = state.config.bootstrap.render(
        &name,
        &job.artifact_location,
        &state.orchestrator.output_locator(&name),
        &state.config.complete_url(&name),
    );
    match state.orchestrator.start(&name, &bootstrap).await {
        Ok(job) => ApiResponse::ok(ProjectView::from(job)).into_response(),
        Err(e) => failure(e),
    }
}

/// POST /projects/{name}/stop
pub async fn stop_project(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    match state.orchestrator.stop(&name).await {
        Ok(job) => ApiResponse::ok(ProjectView::from(job)).into_response(),
        Err(e) => failure(e),
    }
}

/// POST /projects/{name}/delete, DELETE /projects/{name}
pub async fn delete_project(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    match state.orchestrator.delete(&name).await {
        Ok(job) => ApiResponse::ok(ProjectView::from(job)).into_response(),
        Err(e) => failure(e),
    }
}

/// Completion callback body. Both the body and the field are optional.
#[derive(Debug, Default, serde::Deserialize)]
pub struct CompleteRequest {
    #[serde(default)]
    pub output: Option<String>,
}

/// POST /projects/{name}/complete
pub async fn complete_project(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Response {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        CompleteRequest::default()
    } else {
        match serde_json::from_slice::<CompleteRequest>(&body) {
            Ok(request) => request,
            Err(e) => {
                warn!(job = %name, error = %e, "malformed completion body");
                return error_response(&format!("invalid completion body: {e}"), StatusCode::BAD_REQUEST);
            }
        }
    };
    match state.orchestrator.notify_complete(&name, request.output).await {
        Ok(job) => ApiResponse::ok(ProjectView::from(job)).into_response(),
        Err(e) => failure(e),
    }
}

/// GET /projects/{name}/download
pub async fn download_output(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    match state.orchestrator.fetch_output(&name).await {
        Ok(bytes) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename={name}_output.txt"),
                ),
            ],
            bytes,
        )
            .into_response(),
        Err(e) => failure(e),
    }
}
