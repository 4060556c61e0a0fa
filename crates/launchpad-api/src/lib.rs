//! launchpad-api — REST API for Launchpad.
//!
//! Provides axum route handlers over the [`Orchestrator`]. JSON responses
//! use the `{ success, data, error }` envelope, except the listing (a bare
//! array) and uploads (`{ success, project }`). Snapshots carry `status`
//! as an alias of `state`. CORS is permissive so a dashboard served from
//! another origin can call the API.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/projects` | List all projects |
//! | POST | `/projects` | Upload an artifact (multipart `name` + `file`) |
//! | GET | `/projects/{name}` | Get one project |
//! | DELETE | `/projects/{name}` | Delete a project |
//! | POST | `/projects/{name}/start` | Provision and run |
//! | POST | `/projects/{name}/stop` | Stop the instance |
//! | POST | `/projects/{name}/delete` | Delete a project |
//! | POST | `/projects/{name}/complete` | Completion callback from the instance |
//! | GET | `/projects/{name}/download` | Download the output |
//! | GET | `/healthz` | Liveness |
//!
//! `POST /upload` and the `/project/{name}/...` forms are kept as aliases
//! for older clients and bootstrap scripts.

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;

use launchpad_core::LaunchpadConfig;
use launchpad_orchestrator::Orchestrator;

/// Largest accepted upload body.
pub const MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    /// Source of the bootstrap template and the public callback URL.
    pub config: Arc<LaunchpadConfig>,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let legacy = Router::new()
        .route("/upload", post(handlers::create_project))
        .route("/project/{name}/start", post(handlers::start_project))
        .route("/project/{name}/stop", post(handlers::stop_project))
        .route("/project/{name}/delete", post(handlers::delete_project))
        .route("/project/{name}/complete", post(handlers::complete_project))
        .route("/project/{name}/download", get(handlers::download_output));

    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route(
            "/projects",
            get(handlers::list_projects).post(handlers::create_project),
        )
        .route(
            "/projects/{name}",
            get(handlers::get_project).delete(handlers::delete_project),
        )
        .route("/projects/{name}/start", post(handlers::start_project))
        .route("/projects/{name}/stop", post(handlers::stop_project))
        .route("/projects/{name}/delete", post(handlers::delete_project))
        .route("/projects/{name}/complete", post(handlers::complete_project))
        .route("/projects/{name}/download", get(handlers::download_output))
        .merge(legacy)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
