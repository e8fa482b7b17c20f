use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::users::repo_types::{User, UserRow, USER_COLUMNS};
use crate::users::search::{DateRange, PageRequest, UserFilter};

/// Read-modify-write step run while the store holds the record exclusively.
/// An `Err` aborts the write and leaves the stored record unchanged.
pub type Mutation<'a> = Box<dyn FnOnce(&mut User) -> AppResult<()> + Send + 'a>;

/// Persistence for user records. Implementations keep nickname and email
/// unique (case-insensitively) and run [`UserStore::update`] atomically.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn is_empty(&self) -> AppResult<bool>;

    /// Fails with `Conflict` on a duplicate nickname or email.
    async fn insert(&self, user: User) -> AppResult<User>;

    async fn get(&self, id: Uuid) -> AppResult<Option<User>>;

    async fn find_by_email(&self, email: &str) -> AppResult<Option<User>>;

    /// Applies `mutation` under an exclusive hold on the record, bumps
    /// `updated_at` and persists. Uniqueness is re-checked on write.
    async fn update<'a>(&self, id: Uuid, mutation: Mutation<'a>) -> AppResult<User>;

    /// Page of matches plus the total match count.
    async fn search(
        &self,
        filter: &UserFilter,
        page: PageRequest,
        now: OffsetDateTime,
    ) -> AppResult<(Vec<User>, usize)>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn is_empty(&self) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users)")
            .fetch_one(&self.db)
            .await?;
        Ok(!exists)
    }

    async fn insert(&self, user: User) -> AppResult<User> {
        let r = UserRow::from(&user);
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users ({USER_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(r.id)
        .bind(r.nickname)
        .bind(r.email)
        .bind(r.password_hash)
        .bind(r.role)
        .bind(r.first_name)
        .bind(r.last_name)
        .bind(r.bio)
        .bind(r.profile_picture_url)
        .bind(r.linkedin_profile_url)
        .bind(r.github_profile_url)
        .bind(r.is_professional)
        .bind(r.professional_status_updated_at)
        .bind(r.email_verified)
        .bind(r.verification_token)
        .bind(r.verification_token_expires_at)
        .bind(r.failed_login_count)
        .bind(r.locked_until)
        .bind(r.last_login_at)
        .bind(r.created_at)
        .bind(r.updated_at)
        .fetch_one(&self.db)
        .await?;
        debug!(user_id = %row.id, "user row inserted");
        Ok(row.into())
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn find_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1)"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn update<'a>(&self, id: Uuid, mutation: Mutation<'a>) -> AppResult<User> {
        let mut tx = self.db.begin().await?;
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let mut user: User = row.ok_or(AppError::NotFound(id))?.into();

        // dropping `tx` on error rolls back and releases the row lock
        mutation(&mut user)?;
        user.updated_at = OffsetDateTime::now_utc();

        let r = UserRow::from(&user);
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users SET
                nickname = $2, email = $3, password_hash = $4, role = $5,
                first_name = $6, last_name = $7, bio = $8, profile_picture_url = $9,
                linkedin_profile_url = $10, github_profile_url = $11, is_professional = $12,
                professional_status_updated_at = $13, email_verified = $14,
                verification_token = $15, verification_token_expires_at = $16,
                failed_login_count = $17, locked_until = $18, last_login_at = $19,
                updated_at = $20
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(r.id)
        .bind(r.nickname)
        .bind(r.email)
        .bind(r.password_hash)
        .bind(r.role)
        .bind(r.first_name)
        .bind(r.last_name)
        .bind(r.bio)
        .bind(r.profile_picture_url)
        .bind(r.linkedin_profile_url)
        .bind(r.github_profile_url)
        .bind(r.is_professional)
        .bind(r.professional_status_updated_at)
        .bind(r.email_verified)
        .bind(r.verification_token)
        .bind(r.verification_token_expires_at)
        .bind(r.failed_login_count)
        .bind(r.locked_until)
        .bind(r.last_login_at)
        .bind(r.updated_at)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(row.into())
    }

    async fn search(
        &self,
        filter: &UserFilter,
        page: PageRequest,
        now: OffsetDateTime,
    ) -> AppResult<(Vec<User>, usize)> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users");
        push_filter(&mut count, filter, now);
        let total: i64 = count.build_query_scalar().fetch_one(&self.db).await?;

        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT {USER_COLUMNS} FROM users"));
        push_filter(&mut select, filter, now);
        select
            .push(" ORDER BY created_at ASC, id ASC LIMIT ")
            .push_bind(i64::try_from(page.limit).unwrap_or(i64::MAX))
            .push(" OFFSET ")
            .push_bind(i64::try_from(page.skip).unwrap_or(i64::MAX));
        let rows: Vec<UserRow> = select.build_query_as().fetch_all(&self.db).await?;

        Ok((rows.into_iter().map(Into::into).collect(), total.max(0) as usize))
    }
}

fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn push_range(qb: &mut QueryBuilder<'_, Postgres>, column: &str, range: &DateRange) {
    if let Some(from) = range.from {
        qb.push(format!(" AND {column} >= ")).push_bind(from);
    }
    if let Some(to) = range.to {
        qb.push(format!(" AND {column} <= ")).push_bind(to);
    }
}

/// SQL rendering of [`UserFilter::matches`].
fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &UserFilter, now: OffsetDateTime) {
    qb.push(" WHERE TRUE");
    if let Some(term) = &filter.term {
        let pattern = format!("%{}%", escape_like(term));
        qb.push(" AND (nickname ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR email ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR first_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR last_name ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(role) = filter.role {
        qb.push(" AND role = ").push_bind(role);
    }
    match filter.verified {
        Some(true) => {
            qb.push(" AND (email_verified OR role = 'ADMIN')");
        }
        Some(false) => {
            qb.push(" AND NOT email_verified AND role <> 'ADMIN'");
        }
        None => {}
    }
    match filter.locked {
        Some(true) => {
            qb.push(" AND locked_until > ").push_bind(now);
        }
        Some(false) => {
            qb.push(" AND (locked_until IS NULL OR locked_until <= ")
                .push_bind(now)
                .push(")");
        }
        None => {}
    }
    if let Some(professional) = filter.professional {
        qb.push(" AND is_professional = ").push_bind(professional);
    }
    push_range(qb, "created_at", &filter.created);
    push_range(qb, "updated_at", &filter.updated);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::repo_types::Role;
    use time::macros::datetime;

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like(r"50%_off\"), r"50\%\_off\\");
    }

    #[test]
    fn filter_renders_every_criterion() {
        let filter = UserFilter {
            term: Some("ana".into()),
            role: Some(Role::Manager),
            verified: Some(false),
            locked: Some(true),
            professional: Some(true),
            created: DateRange {
                from: Some(datetime!(2025-01-01 0:00 UTC)),
                to: None,
            },
            updated: DateRange {
                from: None,
                to: Some(datetime!(2025-02-01 0:00 UTC)),
            },
        };
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users");
        push_filter(&mut qb, &filter, datetime!(2025-01-15 0:00 UTC));
        let sql = qb.sql();
        assert!(sql.contains("nickname ILIKE $1"));
        assert!(sql.contains("last_name ILIKE $4"));
        assert!(sql.contains("role = $5"));
        assert!(sql.contains("NOT email_verified AND role <> 'ADMIN'"));
        assert!(sql.contains("locked_until > $6"));
        assert!(sql.contains("is_professional = $7"));
        assert!(sql.contains("created_at >= $8"));
        assert!(sql.contains("updated_at <= $9"));
    }

    #[test]
    fn empty_filter_matches_everything() {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users");
        push_filter(&mut qb, &UserFilter::default(), datetime!(2025-01-15 0:00 UTC));
        assert_eq!(qb.sql(), "SELECT COUNT(*) FROM users WHERE TRUE");
    }
}
