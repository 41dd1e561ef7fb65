use axum::{
    extract::{rejection::FormRejection, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Form,
};
use serde::Deserialize;
use tracing::{error, info, warn};

use super::{
    found,
    session::{expired_session_cookie, session_cookie, session_token},
    DASHBOARD_PAGE, LOGIN_PAGE,
};
use crate::{auth::AuthError, state::AppState};

/// Deliberately not `Debug`: the password must never reach a log line.
#[derive(Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

pub async fn login(
    State(state): State<AppState>,
    form: Result<Form<LoginForm>, FormRejection>,
) -> Response {
    let Ok(Form(form)) = form else {
        warn!("malformed login form");
        return found(LOGIN_PAGE);
    };

    match state.auth().login(&form.username, &form.password).await {
        Ok(token) => {
            info!(username = %form.username, "operator logged in");
            let cookie = session_cookie(token.as_str(), state.secure_cookies());
            (
                StatusCode::FOUND,
                [
                    (header::LOCATION, DASHBOARD_PAGE.to_string()),
                    (header::SET_COOKIE, cookie),
                ],
            )
                .into_response()
        }
        Err(AuthError::Rejected) => {
            warn!(username = %form.username, "login rejected");
            found(LOGIN_PAGE)
        }
        Err(err @ AuthError::DirectoryUnavailable(_)) => {
            error!(username = %form.username, error = %err, "login failed");
            found(LOGIN_PAGE)
        }
    }
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(token) = session_token(&headers) else {
        return found(LOGIN_PAGE);
    };
    if let Some(identity) = state.auth().logout(&token) {
        info!(%identity, "operator logged out");
    }
    (
        [(header::SET_COOKIE, expired_session_cookie(state.secure_cookies()))],
        "logged out",
    )
        .into_response()
}
