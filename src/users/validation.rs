use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{AppError, AppResult};

pub const NICKNAME_MIN: usize = 3;
pub const NICKNAME_MAX: usize = 50;
pub const EMAIL_MAX: usize = 255;
pub const NAME_MAX: usize = 100;
pub const BIO_MAX: usize = 500;
pub const URL_MAX: usize = 255;

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    static ref NICKNAME_RE: Regex = Regex::new(r"^[A-Za-z0-9_-]+$").unwrap();
    static ref URL_RE: Regex = Regex::new(r"^https?://[^\s/$.?#][^\s]*$").unwrap();
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Trims and lowercases, so uniqueness is case-insensitive.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Optional text input: blank means "not set".
pub fn normalize_optional(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Collects every field problem so one response can list them all.
#[derive(Debug, Default)]
pub struct FieldErrors(Vec<String>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn email(&mut self, email: &str) -> &mut Self {
        if email.chars().count() > EMAIL_MAX {
            self.0.push(format!("email must be at most {} characters", EMAIL_MAX));
        } else if !is_valid_email(email) {
            self.0.push("email is not a valid email address".into());
        }
        self
    }

    pub fn nickname(&mut self, nickname: &str) -> &mut Self {
        let len = nickname.chars().count();
        if !(NICKNAME_MIN..=NICKNAME_MAX).contains(&len) {
            self.0.push(format!(
                "nickname must be between {} and {} characters",
                NICKNAME_MIN, NICKNAME_MAX
            ));
        } else if !NICKNAME_RE.is_match(nickname) {
            self.0
                .push("nickname may only contain letters, digits, '_' and '-'".into());
        }
        self
    }

    pub fn max_len(&mut self, field: &str, value: Option<&str>, max: usize) -> &mut Self {
        if let Some(v) = value {
            if v.chars().count() > max {
                self.0
                    .push(format!("{} must be at most {} characters", field, max));
            }
        }
        self
    }

    pub fn url(&mut self, field: &str, value: Option<&str>) -> &mut Self {
        if let Some(v) = value {
            if v.chars().count() > URL_MAX {
                self.0
                    .push(format!("{} must be at most {} characters", field, URL_MAX));
            } else if !URL_RE.is_match(v) {
                self.0.push(format!("{} must be an http(s) URL", field));
            }
        }
        self
    }

    pub fn push(&mut self, msg: impl Into<String>) -> &mut Self {
        self.0.push(msg.into());
        self
    }

    pub fn finish(&mut self) -> AppResult<()> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(std::mem::take(&mut self.0).join("; ")))
        }
    }
}
