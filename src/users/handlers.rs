use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use time::OffsetDateTime;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    auth::extractors::AuthUser,
    error::AppResult,
    extract::{AppJson, AppPath, AppQuery},
    state::AppState,
};

use super::dto::{
    CreateUserRequest, ProfessionalStatusRequest, RoleChangeRequest, UpdateProfileRequest,
    UserResponse,
};
use super::search::{Page, SearchParams};
use super::services::{self, Registration};

pub fn staff_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route("/users/search", get(search_users))
        .route("/users/:id", get(get_user).put(update_user))
        .route("/users/:id/role", patch(change_role))
        .route("/users/:id/professional", patch(set_professional))
        .route("/users/:id/unlock", post(unlock_user))
}

fn respond(user: crate::users::repo_types::User) -> Json<UserResponse> {
    Json(UserResponse::from_user(user, OffsetDateTime::now_utc()))
}

#[instrument(skip(state, payload), fields(actor_id = %actor.id))]
pub async fn create_user(
    State(state): State<AppState>,
    actor: AuthUser,
    AppJson(payload): AppJson<CreateUserRequest>,
) -> AppResult<impl IntoResponse> {
    actor.require_staff()?;
    let registration = Registration::ByStaff {
        actor: actor.role,
        role: payload.role,
    };
    let user = services::create_account(&state, payload.account, registration).await?;
    let location = format!("/users/{}", user.id);
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        respond(user),
    ))
}

async fn page_of_users(
    state: &AppState,
    params: &SearchParams,
    endpoint: &str,
) -> AppResult<Json<Page<UserResponse>>> {
    let page = services::search_users(state, params, endpoint).await?;
    let now = OffsetDateTime::now_utc();
    Ok(Json(page.map(|u| UserResponse::from_user(u, now))))
}

/// Plain listing; filters are accepted here too.
#[instrument(skip(state), fields(actor_id = %actor.id))]
pub async fn list_users(
    State(state): State<AppState>,
    actor: AuthUser,
    AppQuery(params): AppQuery<SearchParams>,
) -> AppResult<Json<Page<UserResponse>>> {
    actor.require_staff()?;
    page_of_users(&state, &params, "/users").await
}

#[instrument(skip(state), fields(actor_id = %actor.id))]
pub async fn search_users(
    State(state): State<AppState>,
    actor: AuthUser,
    AppQuery(params): AppQuery<SearchParams>,
) -> AppResult<Json<Page<UserResponse>>> {
    actor.require_staff()?;
    page_of_users(&state, &params, "/users/search").await
}

#[instrument(skip(state), fields(actor_id = %actor.id))]
pub async fn get_user(
    State(state): State<AppState>,
    actor: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<UserResponse>> {
    actor.require_staff()?;
    Ok(respond(services::get_user(&state, id).await?))
}

#[instrument(skip(state, payload), fields(actor_id = %actor.id))]
pub async fn update_user(
    State(state): State<AppState>,
    actor: AuthUser,
    AppPath(id): AppPath<Uuid>,
    AppJson(payload): AppJson<UpdateProfileRequest>,
) -> AppResult<Json<UserResponse>> {
    actor.require_staff()?;
    Ok(respond(services::update_profile(&state, &actor, id, payload).await?))
}

#[instrument(skip(state), fields(actor_id = %actor.id))]
pub async fn change_role(
    State(state): State<AppState>,
    actor: AuthUser,
    AppPath(id): AppPath<Uuid>,
    AppJson(payload): AppJson<RoleChangeRequest>,
) -> AppResult<Json<UserResponse>> {
    actor.require_staff()?;
    Ok(respond(
        services::change_role(&state, &actor, id, payload.role).await?,
    ))
}

#[instrument(skip(state), fields(actor_id = %actor.id))]
pub async fn set_professional(
    State(state): State<AppState>,
    actor: AuthUser,
    AppPath(id): AppPath<Uuid>,
    AppJson(payload): AppJson<ProfessionalStatusRequest>,
) -> AppResult<Json<UserResponse>> {
    actor.require_staff()?;
    Ok(respond(
        services::set_professional_status(&state, id, payload.is_professional).await?,
    ))
}

#[instrument(skip(state), fields(actor_id = %actor.id))]
pub async fn unlock_user(
    State(state): State<AppState>,
    actor: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<UserResponse>> {
    actor.require_staff()?;
    Ok(respond(services::unlock(&state, id).await?))
}
