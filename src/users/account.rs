//! Account state machine: verification, lockout and role transitions.
//!
//! The stored record carries two tagged states, [`Verification`] and
//! [`Lockout`]. [`AccountState`] is the view derived from them plus the role,
//! with admins always reading as verified. Every transition takes `now`
//! explicitly and either applies completely or leaves the record untouched.

use rand::{distributions::Alphanumeric, Rng};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::users::repo_types::{Lockout, Role, User, Verification, VerificationToken};

const TOKEN_LENGTH: usize = 32;

/// Compares without short-circuiting on the first differing byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountState {
    Unverified,
    Verified,
    Locked { until: OffsetDateTime },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    pub threshold: u32,
    pub duration: Duration,
}

impl LockoutPolicy {
    pub fn new(threshold: u32, duration: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            duration,
        }
    }
}

/// What a recorded login failure did to the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    Counted { failed_attempts: u32 },
    Locked { until: OffsetDateTime },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified,
    AlreadyVerified,
}

impl VerificationToken {
    pub fn generate(now: OffsetDateTime, ttl: Duration) -> Self {
        let value: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LENGTH)
            .map(char::from)
            .collect();
        Self {
            value,
            expires_at: now + ttl,
        }
    }
}

impl User {
    /// Admin bypass: admins count as verified whatever the stored flag says.
    pub fn is_verified(&self) -> bool {
        self.role == Role::Admin || self.verification == Verification::Verified
    }

    pub fn is_locked_at(&self, now: OffsetDateTime) -> bool {
        matches!(self.state_at(now), AccountState::Locked { .. })
    }

    pub fn state_at(&self, now: OffsetDateTime) -> AccountState {
        match self.lockout {
            Lockout::Locked { until, .. } if until > now => AccountState::Locked { until },
            _ if self.is_verified() => AccountState::Verified,
            _ => AccountState::Unverified,
        }
    }

    pub fn ensure_not_locked(&self, now: OffsetDateTime) -> AppResult<()> {
        match self.state_at(now) {
            AccountState::Locked { until } => Err(AppError::AccountLocked(until)),
            _ => Ok(()),
        }
    }

    /// Profile edits by someone other than the owner need staff rights, and
    /// only an admin may touch an admin account.
    pub fn ensure_editable_by(&self, actor_id: Uuid, actor: Role) -> AppResult<()> {
        if actor_id == self.id {
            return Ok(());
        }
        if !actor.is_staff() || (self.role == Role::Admin && actor != Role::Admin) {
            return Err(AppError::PermissionDenied);
        }
        Ok(())
    }

    /// Outstanding token, if the account still needs one.
    pub fn pending_token(&self) -> Option<&VerificationToken> {
        match &self.verification {
            Verification::Pending(token) if self.role != Role::Admin => token.as_ref(),
            _ => None,
        }
    }

    pub fn verify(&mut self, token: &str, now: OffsetDateTime) -> AppResult<VerifyOutcome> {
        if self.role == Role::Admin {
            self.verification = Verification::Verified;
            return Ok(VerifyOutcome::AlreadyVerified);
        }
        match &self.verification {
            Verification::Pending(Some(outstanding))
                if constant_time_eq(outstanding.value.as_bytes(), token.as_bytes())
                    && now <= outstanding.expires_at =>
            {
                self.verification = Verification::Verified;
                if self.role == Role::Anonymous {
                    self.role = Role::Authenticated;
                }
                Ok(VerifyOutcome::Verified)
            }
            _ => Err(AppError::InvalidOrExpiredToken),
        }
    }

    /// Returns whether the role actually changed.
    pub fn change_role(&mut self, actor: Role, new_role: Role) -> AppResult<bool> {
        if !actor.is_staff() {
            return Err(AppError::PermissionDenied);
        }
        if (new_role == Role::Admin || self.role == Role::Admin) && actor != Role::Admin {
            return Err(AppError::PermissionDenied);
        }
        if new_role == Role::Admin {
            self.verification = Verification::Verified;
        }
        let changed = self.role != new_role;
        self.role = new_role;
        Ok(changed)
    }

    pub fn record_login_failure(
        &mut self,
        policy: &LockoutPolicy,
        now: OffsetDateTime,
    ) -> FailureOutcome {
        let failed_attempts = match self.lockout {
            Lockout::Clear { failed_attempts } => failed_attempts + 1,
            // expired lock: a new window starts
            Lockout::Locked { until, .. } if until <= now => 1,
            Lockout::Locked {
                failed_attempts, ..
            } => failed_attempts + 1,
        };
        if failed_attempts >= policy.threshold {
            let until = now + policy.duration;
            self.lockout = Lockout::Locked {
                failed_attempts,
                until,
            };
            FailureOutcome::Locked { until }
        } else {
            self.lockout = Lockout::Clear { failed_attempts };
            FailureOutcome::Counted { failed_attempts }
        }
    }

    pub fn record_login_success(&mut self, now: OffsetDateTime) -> AppResult<()> {
        self.ensure_not_locked(now)?;
        self.lockout = Lockout::Clear { failed_attempts: 0 };
        self.last_login_at = Some(now);
        Ok(())
    }

    pub fn unlock(&mut self) {
        self.lockout = Lockout::Clear { failed_attempts: 0 };
    }

    /// Returns whether anything changed; the timestamp only moves on change.
    pub fn update_professional_status(&mut self, is_professional: bool, now: OffsetDateTime) -> bool {
        if self.is_professional == is_professional {
            return false;
        }
        self.is_professional = is_professional;
        self.professional_status_updated_at = Some(now);
        true
    }

    /// Swaps the email. Non-admin accounts go back to pending with `token`.
    pub fn change_email(&mut self, email: String, token: VerificationToken) {
        self.email = email;
        if self.role != Role::Admin {
            self.verification = Verification::Pending(Some(token));
        }
    }
}
