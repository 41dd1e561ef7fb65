mod auth;
mod rovers;
mod session;

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::{dispatch::DispatchError, orchestrator::OrchestratorError, state::AppState};

pub use session::Operator;

/// Where unauthenticated browsers are sent.
pub const LOGIN_PAGE: &str = "/index.html";
/// Where a browser lands after a successful login or create.
pub const DASHBOARD_PAGE: &str = "/controlpanel.html";

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/rovers", get(rovers::list_rovers).post(rovers::create_rover))
        .route(
            "/rovers/:rover_id",
            get(rovers::get_rover).delete(rovers::delete_rover),
        )
        .route("/rovers/:rover_id/command", post(rovers::send_command))
        .route("/health", get(rovers::health_check));

    let mut router = Router::new().nest("/api", api);
    if let Some(dir) = state.public_dir() {
        router = router.fallback_service(ServeDir::new(dir));
    }
    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// A plain `302 Found`, the browser-facing answer of the control panel.
pub(crate) fn found(location: &'static str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    /// Soft failure: send the browser back to a page.
    Redirect(&'static str),
    Fleet(OrchestratorError),
    Dispatch(DispatchError),
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        ApiError::Fleet(err)
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Fleet(err) => ApiError::Fleet(err),
            other => ApiError::Dispatch(other),
        }
    }
}

#[derive(Debug, Serialize)]
struct ApiErrorBody<'a> {
    error: &'a str,
    message: String,
}

fn json_error(status: StatusCode, error: &str, message: String) -> Response {
    (status, Json(ApiErrorBody { error, message })).into_response()
}

fn fleet_response(err: OrchestratorError) -> Response {
    let (status, kind) = match &err {
        OrchestratorError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        OrchestratorError::AlreadyExists(_) => (StatusCode::CONFLICT, "already_exists"),
        OrchestratorError::InvalidName(_) => (StatusCode::BAD_REQUEST, "invalid_name"),
        OrchestratorError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "substrate_timeout"),
        OrchestratorError::Substrate { .. } => (StatusCode::BAD_GATEWAY, "substrate_error"),
    };
    json_error(status, kind, err.to_string())
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Redirect(location) => found(location),
            ApiError::Fleet(err) => fleet_response(err),
            ApiError::Dispatch(err) => dispatch_response(err),
        }
    }
}

fn dispatch_response(err: DispatchError) -> Response {
    let (status, kind) = match err {
        DispatchError::Fleet(err) => return fleet_response(err),
        // The agent's own error text goes back untouched.
        DispatchError::Execution {
            status, message, ..
        } => {
            let status = if (400..500).contains(&status) {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::BAD_GATEWAY
            };
            return (status, message).into_response();
        }
        DispatchError::AddressPending { .. } => (StatusCode::CONFLICT, "address_pending"),
        DispatchError::InvalidCommand(_) => (StatusCode::BAD_REQUEST, "invalid_command"),
        DispatchError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "rover_timeout"),
        DispatchError::Transport { .. } => (StatusCode::BAD_GATEWAY, "rover_unreachable"),
    };
    json_error(status, kind, err.to_string())
}
