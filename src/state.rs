use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use time::Duration;
use tracing::{info, warn};

use crate::auth::password::PasswordPolicy;
use crate::config::AppConfig;
use crate::mail::{LogMailer, Mailer};
use crate::users::account::LockoutPolicy;
use crate::users::memory::InMemoryUserStore;
use crate::users::repo::{PgUserStore, UserStore};
use crate::users::search::Paging;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn UserStore>,
    pub mailer: Arc<dyn Mailer>,
    pub config: Arc<AppConfig>,
    pub password_policy: PasswordPolicy,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let store: Arc<dyn UserStore> = match &config.database_url {
            Some(url) => {
                let db = PgPoolOptions::new()
                    .max_connections(10)
                    .connect(url)
                    .await
                    .context("connect to database")?;
                sqlx::migrate!("./migrations")
                    .run(&db)
                    .await
                    .context("run migrations")?;
                info!("using postgres user store");
                Arc::new(PgUserStore::new(db))
            }
            None => {
                warn!("DATABASE_URL not set; users are kept in memory only");
                Arc::new(InMemoryUserStore::new())
            }
        };

        Ok(Self::from_parts(store, Arc::new(LogMailer), config))
    }

    pub fn from_parts(
        store: Arc<dyn UserStore>,
        mailer: Arc<dyn Mailer>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            store,
            mailer,
            config,
            password_policy: PasswordPolicy::strict(),
        }
    }

    pub fn lockout_policy(&self) -> LockoutPolicy {
        LockoutPolicy::new(
            self.config.lockout.threshold,
            Duration::minutes(self.config.lockout.minutes),
        )
    }

    pub fn verification_ttl(&self) -> Duration {
        Duration::hours(self.config.verification_ttl_hours)
    }

    pub fn paging(&self) -> Paging {
        Paging {
            default_size: self.config.paging.default_size,
            max_size: self.config.paging.max_size,
        }
    }
}

#[cfg(test)]
impl AppState {
    /// In-memory store, recording mailer, test config.
    pub fn fake() -> (Self, Arc<crate::mail::testing::RecordingMailer>) {
        let mailer = Arc::new(crate::mail::testing::RecordingMailer::default());
        let state = Self::from_parts(
            Arc::new(InMemoryUserStore::new()),
            mailer.clone(),
            Arc::new(AppConfig::for_tests()),
        );
        (state, mailer)
    }
}
