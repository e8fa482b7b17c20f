use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use time::OffsetDateTime;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    auth::extractors::AuthUser,
    error::AppResult,
    extract::{AppJson, AppPath},
    state::AppState,
    users::{
        dto::{LoginRequest, RegisterRequest, TokenResponse, UpdateProfileRequest, UserResponse},
        services::{self, Registration},
    },
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/verify-email/:id/:token", get(verify_email))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me).put(update_me))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    AppJson(payload): AppJson<RegisterRequest>,
) -> AppResult<impl IntoResponse> {
    let user = services::create_account(&state, payload, Registration::SelfService).await?;
    let location = format!("/users/{}", user.id);
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(UserResponse::from_user(user, OffsetDateTime::now_utc())),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    AppJson(payload): AppJson<LoginRequest>,
) -> AppResult<Json<TokenResponse>> {
    let (_, access_token) = services::login(&state, &payload.email, &payload.password).await?;
    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer".into(),
    }))
}

#[instrument(skip(state, token))]
pub async fn verify_email(
    State(state): State<AppState>,
    AppPath((id, token)): AppPath<(Uuid, String)>,
) -> AppResult<Json<UserResponse>> {
    let user = services::verify_email(&state, id, &token).await?;
    Ok(Json(UserResponse::from_user(user, OffsetDateTime::now_utc())))
}

#[instrument(skip(state), fields(user_id = %me.id))]
pub async fn get_me(
    State(state): State<AppState>,
    me: AuthUser,
) -> AppResult<Json<UserResponse>> {
    let user = services::get_user(&state, me.id).await?;
    Ok(Json(UserResponse::from_user(user, OffsetDateTime::now_utc())))
}

#[instrument(skip(state, payload), fields(user_id = %me.id))]
pub async fn update_me(
    State(state): State<AppState>,
    me: AuthUser,
    AppJson(payload): AppJson<UpdateProfileRequest>,
) -> AppResult<Json<UserResponse>> {
    let user = services::update_profile(&state, &me, me.id, payload).await?;
    Ok(Json(UserResponse::from_user(user, OffsetDateTime::now_utc())))
}
