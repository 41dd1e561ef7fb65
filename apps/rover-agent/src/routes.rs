use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rover_proto::{render_output_header, CommandRequest, COMMAND_OUTPUT_HEADER, COMMAND_PATH};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::executor::{ExecError, Executor};

#[derive(Clone)]
pub struct AgentState {
    executor: Executor,
}

impl AgentState {
    pub fn new(executor: Executor) -> Self {
        Self { executor }
    }
}

pub fn build_router(state: AgentState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(COMMAND_PATH, post(run_command))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}

async fn run_command(
    State(state): State<AgentState>,
    payload: Result<Json<CommandRequest>, JsonRejection>,
) -> Result<Response, AgentError> {
    let Json(request) = payload.map_err(|rejection| AgentError::BadRequest(rejection.body_text()))?;

    let output = match state.executor.run(&request.command).await {
        Ok(output) => output,
        Err(err) => {
            warn!(command = %request.command, error = %err, "command failed");
            return Err(AgentError::Exec(err));
        }
    };
    info!(command = %request.command, bytes = output.len(), "command executed");

    let indicator = HeaderValue::from_str(&render_output_header(&output))
        .unwrap_or_else(|_| HeaderValue::from_static(""));
    Ok(([(COMMAND_OUTPUT_HEADER, indicator)], output).into_response())
}

#[derive(Debug)]
pub enum AgentError {
    BadRequest(String),
    Exec(ExecError),
}

impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        match self {
            AgentError::BadRequest(message) => (StatusCode::BAD_REQUEST, message).into_response(),
            AgentError::Exec(err) => {
                let status = match err {
                    ExecError::TimedOut(_) => StatusCode::GATEWAY_TIMEOUT,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.to_string()).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecPolicy;
    use axum::{
        body::{self, Body},
        http::Request,
    };
    use std::time::Duration;
    use tower::util::ServiceExt;

    fn app() -> Router {
        let executor = Executor::new(ExecPolicy {
            workdir: std::env::temp_dir(),
            timeout: Duration::from_secs(5),
            ..ExecPolicy::default()
        });
        build_router(AgentState::new(executor))
    }

    fn command_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(COMMAND_PATH)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn command_output_is_header_and_body() {
        let response = app()
            .oneshot(command_request(r#"{"command":"printf 'one\ntwo\n'"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(COMMAND_OUTPUT_HEADER).unwrap(),
            "one two"
        );
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"one\ntwo\n");
    }

    #[tokio::test]
    async fn failing_command_returns_error_text() {
        let response = app()
            .oneshot(command_request(r#"{"command":"echo nope >&2; exit 1"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get(COMMAND_OUTPUT_HEADER).is_none());
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("nope"), "{text}");
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let response = app().oneshot(command_request("echo hi")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_is_ok() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
