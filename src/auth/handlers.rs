use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use tracing::{instrument, warn};

use crate::{
    auth::{
        dto::{LoginRequest, PublicUser, SignupRequest},
        error::AuthError,
        services::AuthService,
    },
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/user", post(signup).get(login))
        .route("/user/login", post(login))
}

#[instrument(skip_all)]
pub async fn signup(
    State(auth): State<Arc<AuthService>>,
    payload: Result<Json<SignupRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<PublicUser>), AuthError> {
    let Json(payload) = payload.map_err(|e| {
        warn!(error = %e, "rejected signup body");
        AuthError::from(e)
    })?;
    let user = auth.signup(payload).await?;
    Ok((StatusCode::ACCEPTED, Json(user)))
}

#[instrument(skip_all)]
pub async fn login(
    State(auth): State<Arc<AuthService>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<PublicUser>, AuthError> {
    let Json(payload) = payload.map_err(|e| {
        warn!(error = %e, "rejected login body");
        AuthError::from(e)
    })?;
    let user = auth.login(payload).await?;
    Ok(Json(user))
}
