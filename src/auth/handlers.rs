use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument};

use crate::{
    auth::{
        dto::{CreateUserRequest, TokenRequest, TokenResponse, UpdateMeRequest, UserView},
        extractors::AuthUser,
        services::{self, Privileges},
    },
    error::{method_not_allowed, ApiError},
    extract::ValidJson,
    state::AppState,
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/user/create", post(create).fallback(method_not_allowed))
        .route("/user/token", post(token).fallback(method_not_allowed))
        .route(
            "/user/me",
            get(get_me).patch(update_me).fallback(method_not_allowed),
        )
}

#[instrument(skip(state, payload))]
pub async fn create(
    State(state): State<AppState>,
    ValidJson(payload): ValidJson<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserView>), ApiError> {
    let user = services::create_user(
        state.users.as_ref(),
        &payload.email,
        &payload.password,
        &payload.name,
        Privileges::default(),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(UserView::from(&user))))
}

#[instrument(skip(state, payload))]
pub async fn token(
    State(state): State<AppState>,
    payload: Result<Json<TokenRequest>, axum::extract::rejection::JsonRejection>,
) -> Result<Json<TokenResponse>, ApiError> {
    let Json(payload) = payload.map_err(|_| {
        ApiError::Unauthorized("Unable to authenticate with provided credentials".into())
    })?;
    let (token, user) =
        services::obtain_token(state.users.as_ref(), &state.jwt, &payload.email, &payload.password)
            .await?;
    Ok(Json(TokenResponse {
        token,
        user: UserView::from(&user),
    }))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn get_me(AuthUser(user): AuthUser) -> Json<UserView> {
    Json(UserView::from(&user))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn update_me(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ValidJson(payload): ValidJson<UpdateMeRequest>,
) -> Result<Json<UserView>, ApiError> {
    let password_changed = payload.password.is_some();
    let updated =
        services::update_profile(state.users.as_ref(), &user, payload.name, payload.password).await?;
    info!(password_changed, "profile updated");
    Ok(Json(UserView::from(&updated)))
}
