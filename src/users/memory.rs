use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AppError, AppResult, EMAIL_TAKEN, NICKNAME_TAKEN};
use crate::users::repo::{Mutation, UserStore};
use crate::users::repo_types::User;
use crate::users::search::{self, PageRequest, UserFilter};

/// Process-local store, used when no `DATABASE_URL` is configured and in
/// tests. One write guard covers every check-and-write.
#[derive(Debug, Default, Clone)]
pub struct InMemoryUserStore {
    users: Arc<RwLock<HashMap<Uuid, User>>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_unique(users: &HashMap<Uuid, User>, candidate: &User) -> AppResult<()> {
    let nickname = candidate.nickname.to_lowercase();
    let email = candidate.email.to_lowercase();
    for other in users.values().filter(|u| u.id != candidate.id) {
        if other.nickname.to_lowercase() == nickname {
            return Err(AppError::Conflict(NICKNAME_TAKEN.into()));
        }
        if other.email.to_lowercase() == email {
            return Err(AppError::Conflict(EMAIL_TAKEN.into()));
        }
    }
    Ok(())
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn is_empty(&self) -> AppResult<bool> {
        Ok(self.users.read().await.is_empty())
    }

    async fn insert(&self, user: User) -> AppResult<User> {
        let mut users = self.users.write().await;
        check_unique(&users, &user)?;
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let email = email.to_lowercase();
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| u.email.to_lowercase() == email)
            .cloned())
    }

    async fn update<'a>(&self, id: Uuid, mutation: Mutation<'a>) -> AppResult<User> {
        let mut users = self.users.write().await;
        let mut user = users.get(&id).cloned().ok_or(AppError::NotFound(id))?;
        mutation(&mut user)?;
        check_unique(&users, &user)?;
        user.updated_at = OffsetDateTime::now_utc();
        users.insert(id, user.clone());
        Ok(user)
    }

    async fn search(
        &self,
        filter: &UserFilter,
        page: PageRequest,
        now: OffsetDateTime,
    ) -> AppResult<(Vec<User>, usize)> {
        let users = self.users.read().await;
        Ok(search::search(users.values(), filter, page, now))
    }
}
