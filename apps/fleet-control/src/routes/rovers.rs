use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use rover_proto::{RELAYED_OUTPUT_HEADER, ROVER_ID_HEADER};
use serde::Deserialize;
use tracing::{error, info, warn};

use super::{found, ApiError, ApiResult, Operator, DASHBOARD_PAGE};
use crate::{
    dispatch::DispatchError,
    orchestrator::{MemberStatus, OrchestratorError},
    state::AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct CreateRoverParams {
    #[serde(default)]
    pub name: Option<String>,
}

fn map_fleet_err(operation: &str, rover: Option<&str>, err: OrchestratorError) -> ApiError {
    match &err {
        OrchestratorError::NotFound(_) | OrchestratorError::InvalidName(_) => {
            warn!(operation, rover, error = %err, "fleet request refused");
        }
        _ => {
            error!(operation, rover, error = %err, "fleet operation failed");
        }
    }
    ApiError::from(err)
}

pub async fn list_rovers(
    State(state): State<AppState>,
    _operator: Operator,
) -> ApiResult<Vec<String>> {
    let names = state
        .fleet()
        .list_members()
        .await
        .map_err(|err| map_fleet_err("list", None, err))?;
    Ok(Json(names))
}

pub async fn create_rover(
    State(state): State<AppState>,
    operator: Operator,
    Query(params): Query<CreateRoverParams>,
) -> Result<Response, ApiError> {
    let name = state
        .fleet()
        .create_member(params.name)
        .await
        .map_err(|err| map_fleet_err("create", None, err))?;
    info!(operator = %operator.identity, rover = %name, "rover created");

    let mut response = found(DASHBOARD_PAGE);
    if let Ok(value) = HeaderValue::from_str(&name) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(ROVER_ID_HEADER), value);
    }
    Ok(response)
}

pub async fn get_rover(
    State(state): State<AppState>,
    _operator: Operator,
    Path(rover_id): Path<String>,
) -> ApiResult<MemberStatus> {
    let member = state
        .fleet()
        .get_member(&rover_id)
        .await
        .map_err(|err| map_fleet_err("get", Some(&rover_id), err))?;
    Ok(Json(member))
}

pub async fn delete_rover(
    State(state): State<AppState>,
    operator: Operator,
    Path(rover_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .fleet()
        .delete_member(&rover_id)
        .await
        .map_err(|err| map_fleet_err("delete", Some(&rover_id), err))?;
    info!(operator = %operator.identity, rover = %rover_id, "rover deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn send_command(
    State(state): State<AppState>,
    operator: Operator,
    Path(rover_id): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    info!(
        operator = %operator.identity,
        rover = %rover_id,
        command = %String::from_utf8_lossy(&body),
        "dispatching command"
    );
    let outcome = state
        .dispatcher()
        .dispatch(state.fleet().as_ref(), &rover_id, &body)
        .await
        .map_err(|err| match err {
            DispatchError::Fleet(err) => map_fleet_err("dispatch", Some(&rover_id), err),
            other => ApiError::from(other),
        })?;

    let mut response = outcome.output.into_response();
    if let Some(indicator) = outcome.indicator {
        response
            .headers_mut()
            .insert(HeaderName::from_static(RELAYED_OUTPUT_HEADER), indicator);
    }
    Ok(response)
}

/// Healthy means the substrate answers a listing.
pub async fn health_check(State(state): State<AppState>) -> Response {
    match state.fleet().list_members().await {
        Ok(_) => (StatusCode::OK, "OK").into_response(),
        Err(err) => {
            error!(error = %err, "health check failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "fleet unavailable").into_response()
        }
    }
}
