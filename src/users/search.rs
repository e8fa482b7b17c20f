//! Search, filtering and pagination over user records.
//!
//! [`SearchParams`] is the raw query string. [`SearchParams::parse`] turns it
//! into a [`UserFilter`] plus a clamped [`PageRequest`]; the in-memory store
//! runs [`search`] directly and the Postgres store renders the same filter to
//! SQL. [`Page`] carries the navigation links back out.

use serde::{Deserialize, Deserializer, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::error::{AppError, AppResult};
use crate::users::repo_types::{Role, User};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_term: Option<String>,
    #[serde(
        default,
        deserialize_with = "role_any_case",
        skip_serializing_if = "Option::is_none"
    )]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_verified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_locked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_professional: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_end: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_end: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

fn role_any_case<'de, D>(de: D) -> Result<Option<Role>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(de)?
        .map(|raw| raw.trim().parse::<Role>().map_err(serde::de::Error::custom))
        .transpose()
}

/// Page size bounds, from config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    pub default_size: usize,
    pub max_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub skip: usize,
    pub limit: usize,
}

/// Inclusive bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub from: Option<OffsetDateTime>,
    pub to: Option<OffsetDateTime>,
}

impl DateRange {
    fn parse(field: &str, from: Option<&str>, to: Option<&str>) -> AppResult<Self> {
        let range = Self {
            from: from.map(|s| parse_timestamp(field, s)).transpose()?,
            to: to.map(|s| parse_timestamp(field, s)).transpose()?,
        };
        if let (Some(from), Some(to)) = (range.from, range.to) {
            if from > to {
                return Err(AppError::validation(format!(
                    "{} range start is after its end",
                    field
                )));
            }
        }
        Ok(range)
    }

    pub fn contains(&self, t: OffsetDateTime) -> bool {
        self.from.map_or(true, |from| t >= from) && self.to.map_or(true, |to| t <= to)
    }
}

fn parse_timestamp(field: &str, raw: &str) -> AppResult<OffsetDateTime> {
    OffsetDateTime::parse(raw.trim(), &Rfc3339).map_err(|_| {
        AppError::validation(format!("{} must be an RFC 3339 timestamp", field))
    })
}

/// All supplied criteria, ANDed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserFilter {
    /// Lowercased.
    pub term: Option<String>,
    pub role: Option<Role>,
    pub verified: Option<bool>,
    pub locked: Option<bool>,
    pub professional: Option<bool>,
    pub created: DateRange,
    pub updated: DateRange,
}

impl UserFilter {
    pub fn matches(&self, user: &User, now: OffsetDateTime) -> bool {
        if let Some(term) = &self.term {
            let hit = [
                Some(user.nickname.as_str()),
                Some(user.email.as_str()),
                user.first_name.as_deref(),
                user.last_name.as_deref(),
            ]
            .into_iter()
            .flatten()
            .any(|field| field.to_lowercase().contains(term.as_str()));
            if !hit {
                return false;
            }
        }
        self.role.map_or(true, |role| user.role == role)
            && self.verified.map_or(true, |v| user.is_verified() == v)
            && self.locked.map_or(true, |l| user.is_locked_at(now) == l)
            && self.professional.map_or(true, |p| user.is_professional == p)
            && self.created.contains(user.created_at)
            && self.updated.contains(user.updated_at)
    }
}

impl SearchParams {
    pub fn parse(&self, paging: Paging) -> AppResult<(UserFilter, PageRequest)> {
        let filter = UserFilter {
            term: self
                .search_term
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_lowercase),
            role: self.role,
            verified: self.is_verified,
            locked: self.is_locked,
            professional: self.is_professional,
            created: DateRange::parse(
                "registration",
                self.registration_start.as_deref(),
                self.registration_end.as_deref(),
            )?,
            updated: DateRange::parse(
                "updated",
                self.updated_start.as_deref(),
                self.updated_end.as_deref(),
            )?,
        };
        let skip = self.skip.unwrap_or(0);
        if i64::try_from(skip).is_err() {
            return Err(AppError::validation(format!(
                "skip must be at most {}",
                i64::MAX
            )));
        }
        let page = PageRequest {
            skip,
            limit: self
                .limit
                .unwrap_or(paging.default_size)
                .clamp(1, paging.max_size.max(1)),
        };
        Ok((filter, page))
    }
}

/// Matching records ordered by `(created_at, id)`, sliced to `page`, plus
/// the total match count.
pub fn search<'a, I>(
    records: I,
    filter: &UserFilter,
    page: PageRequest,
    now: OffsetDateTime,
) -> (Vec<User>, usize)
where
    I: IntoIterator<Item = &'a User>,
{
    let mut matching: Vec<&User> = records
        .into_iter()
        .filter(|u| filter.matches(u, now))
        .collect();
    matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    let total = matching.len();
    let items = matching
        .into_iter()
        .skip(page.skip)
        .take(page.limit)
        .cloned()
        .collect();
    (items, total)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageLinks {
    #[serde(rename = "self")]
    pub self_: String,
    pub first: String,
    pub last: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub skip: usize,
    pub limit: usize,
    pub links: PageLinks,
}

impl<T> Page<T> {
    /// `endpoint` is the absolute URL of the list endpoint; `params` are
    /// repeated in every link so filters survive navigation.
    pub fn new(
        items: Vec<T>,
        total: usize,
        page: PageRequest,
        endpoint: &str,
        params: &SearchParams,
    ) -> AppResult<Self> {
        let link = |skip: usize| -> AppResult<String> {
            let mut p = params.clone();
            p.skip = Some(skip);
            p.limit = Some(page.limit);
            let query = serde_urlencoded::to_string(&p)
                .map_err(|e| AppError::Internal(format!("encode page link: {}", e)))?;
            Ok(format!("{}?{}", endpoint, query))
        };
        let last_skip = if total == 0 {
            0
        } else {
            (total - 1) / page.limit * page.limit
        };
        let links = PageLinks {
            self_: link(page.skip)?,
            first: link(0)?,
            last: link(last_skip)?,
            next: match page.skip.checked_add(page.limit) {
                Some(next) if next < total => Some(link(next)?),
                _ => None,
            },
            prev: if page.skip > 0 {
                Some(link(page.skip.saturating_sub(page.limit))?)
            } else {
                None
            },
        };
        Ok(Self {
            items,
            total,
            skip: page.skip,
            limit: page.limit,
            links,
        })
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            skip: self.skip,
            limit: self.limit,
            links: self.links,
        }
    }
}
