use std::str::FromStr;

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct LockoutConfig {
    pub threshold: u32,
    pub minutes: i64,
}

#[derive(Debug, Clone)]
pub struct PagingConfig {
    pub default_size: usize,
    pub max_size: usize,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// `None` runs on the in-memory store.
    pub database_url: Option<String>,
    /// Public origin used in verification and pagination links.
    pub base_url: String,
    pub jwt: JwtConfig,
    pub lockout: LockoutConfig,
    pub verification_ttl_hours: i64,
    pub paging: PagingConfig,
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(v) => v.trim().parse::<T>().with_context(|| format!("parse {}", key)),
        Err(_) => Ok(default),
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty());
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "usermgmt".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "usermgmt-users".into()),
            ttl_minutes: env_or("JWT_TTL_MINUTES", 60)?,
        };
        let lockout = LockoutConfig {
            threshold: env_or("LOCKOUT_THRESHOLD", 5)?,
            minutes: env_or("LOCKOUT_MINUTES", 15)?,
        };
        let paging = PagingConfig {
            default_size: env_or("DEFAULT_PAGE_SIZE", 10)?,
            max_size: env_or("MAX_PAGE_SIZE", 100)?,
        };
        Ok(Self {
            database_url,
            base_url: std::env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".into())
                .trim_end_matches('/')
                .to_string(),
            jwt,
            lockout,
            verification_ttl_hours: env_or("VERIFICATION_TTL_HOURS", 24)?,
            paging,
        })
    }
}

#[cfg(test)]
impl AppConfig {
    pub fn for_tests() -> Self {
        Self {
            database_url: None,
            base_url: "http://test.local".into(),
            jwt: JwtConfig {
                secret: "test-secret".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 5,
            },
            lockout: LockoutConfig {
                threshold: 3,
                minutes: 15,
            },
            verification_ttl_hours: 24,
            paging: PagingConfig {
                default_size: 10,
                max_size: 50,
            },
        }
    }
}
