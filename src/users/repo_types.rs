use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Anonymous,
    Authenticated,
    Manager,
    Admin,
}

impl Role {
    /// Managers and admins run the `/users` endpoints.
    pub fn is_staff(self) -> bool {
        matches!(self, Role::Manager | Role::Admin)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Anonymous => "ANONYMOUS",
            Role::Authenticated => "AUTHENTICATED",
            Role::Manager => "MANAGER",
            Role::Admin => "ADMIN",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ANONYMOUS" => Ok(Role::Anonymous),
            "AUTHENTICATED" => Ok(Role::Authenticated),
            "MANAGER" => Ok(Role::Manager),
            "ADMIN" => Ok(Role::Admin),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

/// Outstanding email verification token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationToken {
    pub value: String,
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// `None` when no token is outstanding (e.g. it was never issued).
    Pending(Option<VerificationToken>),
    Verified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lockout {
    Clear { failed_attempts: u32 },
    Locked { failed_attempts: u32, until: OffsetDateTime },
}

impl Lockout {
    pub fn failed_attempts(&self) -> u32 {
        match *self {
            Lockout::Clear { failed_attempts } | Lockout::Locked { failed_attempts, .. } => {
                failed_attempts
            }
        }
    }

    pub fn locked_until(&self) -> Option<OffsetDateTime> {
        match *self {
            Lockout::Clear { .. } => None,
            Lockout::Locked { until, .. } => Some(until),
        }
    }
}

impl Default for Lockout {
    fn default() -> Self {
        Lockout::Clear { failed_attempts: 0 }
    }
}

/// User record as the rest of the crate sees it.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub nickname: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
    pub profile_picture_url: Option<String>,
    pub linkedin_profile_url: Option<String>,
    pub github_profile_url: Option<String>,
    pub is_professional: bool,
    pub professional_status_updated_at: Option<OffsetDateTime>,
    pub verification: Verification,
    pub lockout: Lockout,
    pub last_login_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Flat `users` table row.
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub nickname: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
    pub profile_picture_url: Option<String>,
    pub linkedin_profile_url: Option<String>,
    pub github_profile_url: Option<String>,
    pub is_professional: bool,
    pub professional_status_updated_at: Option<OffsetDateTime>,
    pub email_verified: bool,
    pub verification_token: Option<String>,
    pub verification_token_expires_at: Option<OffsetDateTime>,
    pub failed_login_count: i32,
    pub locked_until: Option<OffsetDateTime>,
    pub last_login_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

pub const USER_COLUMNS: &str = "id, nickname, email, password_hash, role, first_name, last_name, \
     bio, profile_picture_url, linkedin_profile_url, github_profile_url, is_professional, \
     professional_status_updated_at, email_verified, verification_token, \
     verification_token_expires_at, failed_login_count, locked_until, last_login_at, \
     created_at, updated_at";

impl From<UserRow> for User {
    fn from(r: UserRow) -> Self {
        let verification = if r.email_verified {
            Verification::Verified
        } else {
            let token = match (r.verification_token, r.verification_token_expires_at) {
                (Some(value), Some(expires_at)) => Some(VerificationToken { value, expires_at }),
                _ => None,
            };
            Verification::Pending(token)
        };
        let failed_attempts = r.failed_login_count.max(0) as u32;
        let lockout = match r.locked_until {
            Some(until) => Lockout::Locked {
                failed_attempts,
                until,
            },
            None => Lockout::Clear { failed_attempts },
        };
        Self {
            id: r.id,
            nickname: r.nickname,
            email: r.email,
            password_hash: r.password_hash,
            role: r.role,
            first_name: r.first_name,
            last_name: r.last_name,
            bio: r.bio,
            profile_picture_url: r.profile_picture_url,
            linkedin_profile_url: r.linkedin_profile_url,
            github_profile_url: r.github_profile_url,
            is_professional: r.is_professional,
            professional_status_updated_at: r.professional_status_updated_at,
            verification,
            lockout,
            last_login_at: r.last_login_at,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

impl From<&User> for UserRow {
    fn from(u: &User) -> Self {
        let (email_verified, token) = match &u.verification {
            Verification::Verified => (true, None),
            Verification::Pending(token) => (false, token.clone()),
        };
        Self {
            id: u.id,
            nickname: u.nickname.clone(),
            email: u.email.clone(),
            password_hash: u.password_hash.clone(),
            role: u.role,
            first_name: u.first_name.clone(),
            last_name: u.last_name.clone(),
            bio: u.bio.clone(),
            profile_picture_url: u.profile_picture_url.clone(),
            linkedin_profile_url: u.linkedin_profile_url.clone(),
            github_profile_url: u.github_profile_url.clone(),
            is_professional: u.is_professional,
            professional_status_updated_at: u.professional_status_updated_at,
            email_verified,
            verification_token: token.as_ref().map(|t| t.value.clone()),
            verification_token_expires_at: token.map(|t| t.expires_at),
            failed_login_count: u.lockout.failed_attempts() as i32,
            locked_until: u.lockout.locked_until(),
            last_login_at: u.last_login_at,
            created_at: u.created_at,
            updated_at: u.updated_at,
        }
    }
}
