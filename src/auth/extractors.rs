use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use tracing::warn;
use uuid::Uuid;

use super::jwt::JwtKeys;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::users::repo_types::Role;

/// Caller identity taken from a valid bearer token. The account must still
/// exist and hold the role the token was issued for.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: Role,
}

impl AuthUser {
    /// Manager or admin, otherwise `PermissionDenied`.
    pub fn require_staff(&self) -> AppResult<()> {
        if self.role.is_staff() {
            Ok(())
        } else {
            warn!(user_id = %self.id, role = %self.role, "staff endpoint refused");
            Err(AppError::PermissionDenied)
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app = AppState::from_ref(state);
        let keys = JwtKeys::from_ref(&app);

        // Read Authorization header
        let auth = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".into()))?;

        // Expect "Bearer <token>"
        let token = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            .ok_or_else(|| AppError::Unauthorized("Invalid Authorization header".into()))?;

        let claims = keys.verify(token).map_err(|_| {
            warn!("invalid or expired token");
            AppError::Unauthorized("Invalid or expired token".into())
        })?;

        let current = app.store.get(claims.sub).await?.ok_or_else(|| {
            warn!(user_id = %claims.sub, "token for unknown account");
            AppError::Unauthorized("Account no longer exists".into())
        })?;
        if current.role != claims.role {
            warn!(
                user_id = %claims.sub,
                token_role = %claims.role,
                role = %current.role,
                "token role is stale"
            );
            return Err(AppError::Unauthorized(
                "Role has changed; sign in again".into(),
            ));
        }

        Ok(AuthUser {
            id: current.id,
            role: current.role,
        })
    }
}
