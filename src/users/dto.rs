use serde::{Deserialize, Deserializer, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::users::account::AccountState;
use crate::users::repo_types::{Role, User};

/// Request body for self-registration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub profile_picture_url: Option<String>,
    #[serde(default)]
    pub linkedin_profile_url: Option<String>,
    #[serde(default)]
    pub github_profile_url: Option<String>,
}

/// Staff-created account; same fields as registration plus a role.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserRequest {
    #[serde(flatten)]
    pub account: RegisterRequest,
    #[serde(default)]
    pub role: Option<Role>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

/// Distinguishes an absent field (`None`) from an explicit `null`
/// (`Some(None)`).
fn double_option<'de, D, T>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

/// Partial profile update. Absent fields are left alone; `null` or a blank
/// string clears an optional field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub first_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub last_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub bio: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub profile_picture_url: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub linkedin_profile_url: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub github_profile_url: Option<Option<String>>,
}

#[derive(Debug, Deserialize)]
pub struct RoleChangeRequest {
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct ProfessionalStatusRequest {
    pub is_professional: bool,
}

/// Public view of a user. Never carries the hash or the token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub nickname: String,
    pub email: String,
    pub role: Role,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
    pub profile_picture_url: Option<String>,
    pub linkedin_profile_url: Option<String>,
    pub github_profile_url: Option<String>,
    pub is_professional: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub professional_status_updated_at: Option<OffsetDateTime>,
    pub email_verified: bool,
    pub is_locked: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub locked_until: Option<OffsetDateTime>,
    pub failed_login_count: u32,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_login_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl UserResponse {
    /// Lock status is evaluated at `now`.
    pub fn from_user(u: User, now: OffsetDateTime) -> Self {
        let locked_until = match u.state_at(now) {
            AccountState::Locked { until } => Some(until),
            AccountState::Verified | AccountState::Unverified => None,
        };
        Self {
            email_verified: u.is_verified(),
            is_locked: locked_until.is_some(),
            locked_until,
            failed_login_count: u.lockout.failed_attempts(),
            id: u.id,
            nickname: u.nickname,
            email: u.email,
            role: u.role,
            first_name: u.first_name,
            last_name: u.last_name,
            bio: u.bio,
            profile_picture_url: u.profile_picture_url,
            linkedin_profile_url: u.linkedin_profile_url,
            github_profile_url: u.github_profile_url,
            is_professional: u.is_professional,
            professional_status_updated_at: u.professional_status_updated_at,
            last_login_at: u.last_login_at,
            created_at: u.created_at,
            updated_at: u.updated_at,
        }
    }
}
