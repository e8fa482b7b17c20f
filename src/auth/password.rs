use std::fmt;

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use tracing::error;

pub const MIN_PASSWORD_LENGTH: usize = 8;
/// Bounds the argon2 work a single request can cause.
pub const MAX_PASSWORD_LENGTH: usize = 128;

/// Composition rules a password has to satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordRule {
    MinLength,
    MaxLength,
    Uppercase,
    Lowercase,
    Digit,
    Special,
}

impl PasswordRule {
    pub const ALL: [PasswordRule; 6] = [
        PasswordRule::MinLength,
        PasswordRule::MaxLength,
        PasswordRule::Uppercase,
        PasswordRule::Lowercase,
        PasswordRule::Digit,
        PasswordRule::Special,
    ];

    fn is_met_by(self, candidate: &str) -> bool {
        match self {
            PasswordRule::MinLength => candidate.chars().count() >= MIN_PASSWORD_LENGTH,
            PasswordRule::MaxLength => candidate.chars().count() <= MAX_PASSWORD_LENGTH,
            PasswordRule::Uppercase => candidate.chars().any(char::is_uppercase),
            PasswordRule::Lowercase => candidate.chars().any(char::is_lowercase),
            PasswordRule::Digit => candidate.chars().any(|c| c.is_ascii_digit()),
            PasswordRule::Special => candidate.chars().any(|c| !c.is_alphanumeric()),
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            PasswordRule::MinLength => "Password must be at least 8 characters long",
            PasswordRule::MaxLength => "Password must be at most 128 characters long",
            PasswordRule::Uppercase => "Password must contain at least one uppercase letter",
            PasswordRule::Lowercase => "Password must contain at least one lowercase letter",
            PasswordRule::Digit => "Password must contain at least one digit",
            PasswordRule::Special => "Password must contain at least one special character",
        }
    }
}

/// Every rule a rejected password failed, in rule order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyViolations(Vec<PasswordRule>);

impl PolicyViolations {
    pub fn rules(&self) -> &[PasswordRule] {
        &self.0
    }
}

impl fmt::Display for PolicyViolations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<&str> = self.rules().iter().map(|r| r.message()).collect();
        f.write_str(&messages.join("; "))
    }
}

impl std::error::Error for PolicyViolations {}

/// A plaintext password that passed [`PasswordPolicy::check`]. The only input
/// [`hash_password`] accepts.
#[derive(Clone, Copy)]
pub struct AcceptedPassword<'a>(&'a str);

impl fmt::Debug for AcceptedPassword<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AcceptedPassword([REDACTED])")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordPolicy {
    enforced: bool,
}

impl PasswordPolicy {
    pub const fn strict() -> Self {
        Self { enforced: true }
    }

    /// Accepts anything. Only reachable from test builds.
    #[cfg(test)]
    pub const fn disabled() -> Self {
        Self { enforced: false }
    }

    pub fn check<'a>(&self, candidate: &'a str) -> Result<AcceptedPassword<'a>, PolicyViolations> {
        if !self.enforced {
            return Ok(AcceptedPassword(candidate));
        }
        let failed: Vec<PasswordRule> = PasswordRule::ALL
            .into_iter()
            .filter(|rule| !rule.is_met_by(candidate))
            .collect();
        if failed.is_empty() {
            Ok(AcceptedPassword(candidate))
        } else {
            Err(PolicyViolations(failed))
        }
    }
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self::strict()
    }
}

pub fn hash_password(password: AcceptedPassword<'_>) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.0.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

pub fn verify_password(plain: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        anyhow::anyhow!(e.to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}
