use axum::extract::FromRef;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::extractors::AuthUser;
use crate::auth::jwt::JwtKeys;
use crate::auth::password::{hash_password, verify_password};
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::users::account::{FailureOutcome, VerifyOutcome};
use crate::users::dto::{RegisterRequest, UpdateProfileRequest};
use crate::users::nickname;
use crate::users::repo_types::{Lockout, Role, User, Verification, VerificationToken};
use crate::users::search::{Page, SearchParams};
use crate::users::validation::{
    normalize_email, normalize_optional, FieldErrors, BIO_MAX, NAME_MAX,
};

/// Who is asking for an account.
#[derive(Debug, Clone, Copy)]
pub enum Registration {
    /// Public sign-up. The very first account on an empty store becomes admin.
    SelfService,
    /// Staff-created, optionally with an explicit role.
    ByStaff { actor: Role, role: Option<Role> },
}

fn verification_link(state: &AppState, user_id: Uuid, token: &str) -> String {
    format!(
        "{}/verify-email/{}/{}",
        state.config.base_url, user_id, token
    )
}

/// Sends the verification mail. Failure is logged, never propagated.
async fn send_verification(state: &AppState, user: &User) {
    let Some(token) = user.pending_token() else {
        return;
    };
    let link = verification_link(state, user.id, &token.value);
    if let Err(e) = state
        .mailer
        .send_verification(&user.email, &user.nickname, &link)
        .await
    {
        warn!(error = %e, user_id = %user.id, "verification email delivery failed");
    }
}

async fn resolve_role(state: &AppState, registration: Registration) -> AppResult<Role> {
    match registration {
        Registration::SelfService => {
            if state.store.is_empty().await? {
                info!("empty user store; first account is seeded as admin");
                Ok(Role::Admin)
            } else {
                Ok(Role::Authenticated)
            }
        }
        Registration::ByStaff { actor, role } => {
            if !actor.is_staff() {
                return Err(AppError::PermissionDenied);
            }
            let role = role.unwrap_or(Role::Authenticated);
            if role == Role::Admin && actor != Role::Admin {
                return Err(AppError::PermissionDenied);
            }
            Ok(role)
        }
    }
}

pub async fn create_account(
    state: &AppState,
    input: RegisterRequest,
    registration: Registration,
) -> AppResult<User> {
    let email = normalize_email(&input.email);
    let requested_nickname = normalize_optional(input.nickname);
    let nickname_generated = requested_nickname.is_none();
    let nickname = requested_nickname.unwrap_or_else(nickname::generate);
    let first_name = normalize_optional(input.first_name);
    let last_name = normalize_optional(input.last_name);
    let bio = normalize_optional(input.bio);
    let profile_picture_url = normalize_optional(input.profile_picture_url);
    let linkedin_profile_url = normalize_optional(input.linkedin_profile_url);
    let github_profile_url = normalize_optional(input.github_profile_url);

    let mut errors = FieldErrors::new();
    errors
        .email(&email)
        .nickname(&nickname)
        .max_len("first_name", first_name.as_deref(), NAME_MAX)
        .max_len("last_name", last_name.as_deref(), NAME_MAX)
        .max_len("bio", bio.as_deref(), BIO_MAX)
        .url("profile_picture_url", profile_picture_url.as_deref())
        .url("linkedin_profile_url", linkedin_profile_url.as_deref())
        .url("github_profile_url", github_profile_url.as_deref());
    if let Err(violations) = state.password_policy.check(&input.password) {
        errors.push(violations.to_string());
    }
    errors.finish()?;

    let role = resolve_role(state, registration).await?;
    let accepted = state.password_policy.check(&input.password)?;
    let password_hash = hash_password(accepted)?;

    let now = OffsetDateTime::now_utc();
    let verification = if role == Role::Admin {
        Verification::Verified
    } else {
        Verification::Pending(Some(VerificationToken::generate(
            now,
            state.verification_ttl(),
        )))
    };

    let user = User {
        id: Uuid::new_v4(),
        nickname,
        email,
        password_hash,
        role,
        first_name,
        last_name,
        bio,
        profile_picture_url,
        linkedin_profile_url,
        github_profile_url,
        is_professional: false,
        professional_status_updated_at: None,
        verification,
        lockout: Lockout::default(),
        last_login_at: None,
        created_at: now,
        updated_at: now,
    };

    let user = if nickname_generated {
        insert_with_generated_nickname(state, user, nickname::generate).await?
    } else {
        state.store.insert(user).await?
    };
    info!(user_id = %user.id, nickname = %user.nickname, role = %user.role, "account created");
    send_verification(state, &user).await;
    Ok(user)
}

const NICKNAME_ATTEMPTS: usize = 5;

/// Inserts `user`, drawing a new nickname from `generate` whenever the
/// current one is taken. The caller never chose it, so a clash is not theirs.
async fn insert_with_generated_nickname(
    state: &AppState,
    mut user: User,
    mut generate: impl FnMut() -> String + Send,
) -> AppResult<User> {
    let mut attempt = 1;
    loop {
        match state.store.insert(user.clone()).await {
            Err(e) if e.is_nickname_conflict() && attempt < NICKNAME_ATTEMPTS => {
                debug!(nickname = %user.nickname, attempt, "generated nickname taken; retrying");
                user.nickname = generate();
                attempt += 1;
            }
            other => return other,
        }
    }
}

pub async fn get_user(state: &AppState, id: Uuid) -> AppResult<User> {
    state.store.get(id).await?.ok_or(AppError::NotFound(id))
}

pub async fn verify_email(state: &AppState, id: Uuid, token: &str) -> AppResult<User> {
    let now = OffsetDateTime::now_utc();
    let mut outcome = None;
    let user = state
        .store
        .update(
            id,
            Box::new(|u: &mut User| {
                outcome = Some(u.verify(token, now)?);
                Ok(())
            }),
        )
        .await
        .map_err(|e| {
            if matches!(e, AppError::InvalidOrExpiredToken) {
                warn!(user_id = %id, "verification token rejected");
            }
            e
        })?;
    match outcome {
        Some(VerifyOutcome::AlreadyVerified) => {
            info!(user_id = %id, "verify called on admin; nothing to do")
        }
        _ => info!(user_id = %id, role = %user.role, "email verified"),
    }
    Ok(user)
}

/// Returns the account and a signed access token.
pub async fn login(state: &AppState, email: &str, password: &str) -> AppResult<(User, String)> {
    let email = normalize_email(email);
    let Some(user) = state.store.find_by_email(&email).await? else {
        warn!(%email, "login unknown email");
        return Err(AppError::InvalidCredentials);
    };

    let now = OffsetDateTime::now_utc();
    user.ensure_not_locked(now)?;
    let password_ok = verify_password(password, &user.password_hash)?;

    let policy = state.lockout_policy();
    let mut verdict: AppResult<()> = Ok(());
    let user = state
        .store
        .update(
            user.id,
            Box::new(|u: &mut User| {
                // re-checked under the store's hold; another request may have locked it
                u.ensure_not_locked(now)?;
                if !password_ok {
                    verdict = Err(match u.record_login_failure(&policy, now) {
                        FailureOutcome::Locked { until } => AppError::AccountLocked(until),
                        FailureOutcome::Counted { .. } => AppError::InvalidCredentials,
                    });
                    return Ok(());
                }
                if !u.is_verified() {
                    return Err(AppError::EmailNotVerified);
                }
                u.record_login_success(now)
            }),
        )
        .await?;

    if let Err(e) = verdict {
        match &e {
            AppError::AccountLocked(until) => {
                warn!(user_id = %user.id, %until, "account locked after failed logins")
            }
            _ => warn!(
                user_id = %user.id,
                failed_attempts = user.lockout.failed_attempts(),
                "login invalid password"
            ),
        }
        return Err(e);
    }

    let token = JwtKeys::from_ref(state).sign_access(user.id, user.role)?;
    info!(user_id = %user.id, "user logged in");
    Ok((user, token))
}

/// Profile edit on behalf of `actor`. Staff may edit other accounts, but only
/// an admin edits an admin, and a password is only ever set by its owner.
/// Role and lockout are never changed here.
pub async fn update_profile(
    state: &AppState,
    actor: &AuthUser,
    id: Uuid,
    input: UpdateProfileRequest,
) -> AppResult<User> {
    if input.password.is_some() && actor.id != id {
        warn!(actor_id = %actor.id, user_id = %id, "password change for another account refused");
        return Err(AppError::PermissionDenied);
    }

    let email = input.email.as_deref().map(normalize_email);
    let nickname = input.nickname.as_deref().map(|n| n.trim().to_string());
    let clean = |field: Option<Option<String>>| field.map(normalize_optional);
    let first_name = clean(input.first_name);
    let last_name = clean(input.last_name);
    let bio = clean(input.bio);
    let profile_picture_url = clean(input.profile_picture_url);
    let linkedin_profile_url = clean(input.linkedin_profile_url);
    let github_profile_url = clean(input.github_profile_url);

    let mut errors = FieldErrors::new();
    if let Some(email) = &email {
        errors.email(email);
    }
    if let Some(nickname) = &nickname {
        errors.nickname(nickname);
    }
    errors
        .max_len("first_name", first_name.clone().flatten().as_deref(), NAME_MAX)
        .max_len("last_name", last_name.clone().flatten().as_deref(), NAME_MAX)
        .max_len("bio", bio.clone().flatten().as_deref(), BIO_MAX)
        .url("profile_picture_url", profile_picture_url.clone().flatten().as_deref())
        .url("linkedin_profile_url", linkedin_profile_url.clone().flatten().as_deref())
        .url("github_profile_url", github_profile_url.clone().flatten().as_deref());
    if let Some(password) = &input.password {
        if let Err(violations) = state.password_policy.check(password) {
            errors.push(violations.to_string());
        }
    }
    errors.finish()?;

    let password_hash = match &input.password {
        Some(password) => Some(hash_password(state.password_policy.check(password)?)?),
        None => None,
    };

    let now = OffsetDateTime::now_utc();
    let token = VerificationToken::generate(now, state.verification_ttl());
    let mut email_changed = false;
    let user = state
        .store
        .update(
            id,
            Box::new(|u: &mut User| {
                u.ensure_editable_by(actor.id, actor.role)?;
                if let Some(nickname) = nickname {
                    u.nickname = nickname;
                }
                if let Some(email) = email {
                    if email != u.email {
                        u.change_email(email, token);
                        email_changed = true;
                    }
                }
                if let Some(hash) = password_hash {
                    u.password_hash = hash;
                }
                if let Some(v) = first_name {
                    u.first_name = v;
                }
                if let Some(v) = last_name {
                    u.last_name = v;
                }
                if let Some(v) = bio {
                    u.bio = v;
                }
                if let Some(v) = profile_picture_url {
                    u.profile_picture_url = v;
                }
                if let Some(v) = linkedin_profile_url {
                    u.linkedin_profile_url = v;
                }
                if let Some(v) = github_profile_url {
                    u.github_profile_url = v;
                }
                Ok(())
            }),
        )
        .await
        .map_err(|e| {
            if matches!(e, AppError::PermissionDenied) {
                warn!(actor_id = %actor.id, user_id = %id, "profile edit refused");
            }
            e
        })?;

    info!(actor_id = %actor.id, user_id = %user.id, email_changed, "profile updated");
    if email_changed {
        send_verification(state, &user).await;
    }
    Ok(user)
}

pub async fn change_role(
    state: &AppState,
    actor: &AuthUser,
    id: Uuid,
    role: Role,
) -> AppResult<User> {
    let mut changed = false;
    let user = state
        .store
        .update(
            id,
            Box::new(|u: &mut User| {
                changed = u.change_role(actor.role, role)?;
                Ok(())
            }),
        )
        .await
        .map_err(|e| {
            if matches!(e, AppError::PermissionDenied) {
                warn!(actor_id = %actor.id, user_id = %id, %role, "role change refused");
            }
            e
        })?;
    if changed {
        info!(actor_id = %actor.id, user_id = %id, %role, "role changed");
    }
    Ok(user)
}

pub async fn set_professional_status(
    state: &AppState,
    id: Uuid,
    is_professional: bool,
) -> AppResult<User> {
    let now = OffsetDateTime::now_utc();
    let mut changed = false;
    let user = state
        .store
        .update(
            id,
            Box::new(|u: &mut User| {
                changed = u.update_professional_status(is_professional, now);
                Ok(())
            }),
        )
        .await?;
    if changed {
        info!(user_id = %id, is_professional, "professional status updated");
    }
    Ok(user)
}

pub async fn unlock(state: &AppState, id: Uuid) -> AppResult<User> {
    let user = state
        .store
        .update(
            id,
            Box::new(|u: &mut User| {
                u.unlock();
                Ok(())
            }),
        )
        .await?;
    info!(user_id = %id, "account unlocked");
    Ok(user)
}

/// `endpoint` is the path the links should point back at.
pub async fn search_users(
    state: &AppState,
    params: &SearchParams,
    endpoint: &str,
) -> AppResult<Page<User>> {
    let (filter, page) = params.parse(state.paging())?;
    let now = OffsetDateTime::now_utc();
    let (items, total) = state.store.search(&filter, page, now).await?;
    let endpoint = format!("{}{}", state.config.base_url, endpoint);
    Page::new(items, total, page, &endpoint, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::account::AccountState;
    use crate::users::repo_types::Lockout;

    const PASSWORD: &str = "Secur3P@ssw0rd!";

    fn registration(email: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.into(),
            password: PASSWORD.into(),
            ..Default::default()
        }
    }

    fn owner(u: &User) -> AuthUser {
        AuthUser {
            id: u.id,
            role: u.role,
        }
    }

    fn token_from(link: &str) -> String {
        link.rsplit('/').next().unwrap().to_string()
    }

    /// Registers an admin first so later sign-ups get the regular path.
    async fn seeded() -> (AppState, std::sync::Arc<crate::mail::testing::RecordingMailer>) {
        let (state, mailer) = AppState::fake();
        create_account(&state, registration("root@x.com"), Registration::SelfService)
            .await
            .unwrap();
        (state, mailer)
    }

    #[tokio::test]
    async fn first_account_is_a_verified_admin_without_mail() {
        let (state, mailer) = AppState::fake();
        let admin = create_account(&state, registration("Root@X.com"), Registration::SelfService)
            .await
            .unwrap();
        assert_eq!(admin.role, Role::Admin);
        assert_eq!(admin.email, "root@x.com");
        assert_eq!(admin.state_at(OffsetDateTime::now_utc()), AccountState::Verified);
        assert!(mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn later_accounts_are_unverified_and_mailed() {
        let (state, mailer) = seeded().await;
        let user = create_account(&state, registration("ana@x.com"), Registration::SelfService)
            .await
            .unwrap();
        assert_eq!(user.role, Role::Authenticated);
        assert_eq!(user.state_at(OffsetDateTime::now_utc()), AccountState::Unverified);
        let link = mailer.last_link_for("ana@x.com").unwrap();
        assert!(link.starts_with(&format!("http://test.local/verify-email/{}/", user.id)));
        assert!(user.nickname.len() >= 3);
    }

    #[tokio::test]
    async fn weak_password_is_rejected_with_every_reason() {
        let (state, _) = AppState::fake();
        let mut req = registration("ana@x.com");
        req.password = "short".into();
        let err = create_account(&state, req, Registration::SelfService)
            .await
            .unwrap_err();
        let AppError::Validation(msg) = err else {
            panic!("expected validation error, got {err:?}");
        };
        assert!(msg.contains("8 characters"));
        assert!(msg.contains("uppercase"));
        assert!(msg.contains("digit"));
        assert!(msg.contains("special"));
        assert!(state.store.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn disabled_policy_lets_weak_passwords_through_in_tests() {
        let (mut state, _) = AppState::fake();
        state.password_policy = crate::auth::password::PasswordPolicy::disabled();
        let mut req = registration("ana@x.com");
        req.password = "x".into();
        assert!(create_account(&state, req, Registration::SelfService).await.is_ok());
    }

    #[tokio::test]
    async fn duplicate_email_or_nickname_conflicts() {
        let (state, _) = seeded().await;
        let mut first = registration("ana@x.com");
        first.nickname = Some("ana".into());
        create_account(&state, first, Registration::SelfService)
            .await
            .unwrap();

        let err = create_account(&state, registration("ANA@x.com"), Registration::SelfService)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let mut clash = registration("other@x.com");
        clash.nickname = Some("Ana".into());
        let err = create_account(&state, clash, Registration::SelfService)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn concurrent_registrations_admit_exactly_one() {
        let (state, _) = seeded().await;
        let mut handles = Vec::new();
        for _ in 0..4 {
            let state = state.clone();
            handles.push(tokio::spawn(async move {
                create_account(&state, registration("same@x.com"), Registration::SelfService)
                    .await
            }));
        }
        let mut ok = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => ok += 1,
                Err(e) => assert!(matches!(e, AppError::Conflict(_)), "{e:?}"),
            }
        }
        assert_eq!(ok, 1);
    }

    #[tokio::test]
    async fn verify_with_mailed_token() {
        let (state, mailer) = seeded().await;
        let user = create_account(&state, registration("ana@x.com"), Registration::SelfService)
            .await
            .unwrap();
        let token = token_from(&mailer.last_link_for("ana@x.com").unwrap());

        let err = verify_email(&state, user.id, "wrong").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidOrExpiredToken));
        assert!(!get_user(&state, user.id).await.unwrap().is_verified());

        let verified = verify_email(&state, user.id, &token).await.unwrap();
        assert!(verified.is_verified());
    }

    #[tokio::test]
    async fn staff_creation_respects_privileges() {
        let (state, _) = seeded().await;
        let by_manager = |role| Registration::ByStaff {
            actor: Role::Manager,
            role,
        };
        let err = create_account(&state, registration("a@x.com"), by_manager(Some(Role::Admin)))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied));

        let manager = create_account(
            &state,
            registration("m@x.com"),
            by_manager(Some(Role::Manager)),
        )
        .await
        .unwrap();
        assert_eq!(manager.role, Role::Manager);

        let err = create_account(
            &state,
            registration("u@x.com"),
            Registration::ByStaff {
                actor: Role::Authenticated,
                role: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied));
    }

    #[tokio::test]
    async fn login_requires_verification_except_for_admins() {
        let (state, mailer) = seeded().await;
        let (admin, token) = login(&state, "root@x.com", PASSWORD).await.unwrap();
        assert_eq!(admin.role, Role::Admin);
        assert!(!token.is_empty());

        let user = create_account(&state, registration("ana@x.com"), Registration::SelfService)
            .await
            .unwrap();
        let err = login(&state, "ana@x.com", PASSWORD).await.unwrap_err();
        assert!(matches!(err, AppError::EmailNotVerified));

        let token = token_from(&mailer.last_link_for("ana@x.com").unwrap());
        verify_email(&state, user.id, &token).await.unwrap();
        let (logged_in, _) = login(&state, "ANA@x.com", PASSWORD).await.unwrap();
        assert!(logged_in.last_login_at.is_some());
    }

    #[tokio::test]
    async fn unknown_email_and_wrong_password_look_the_same() {
        let (state, _) = seeded().await;
        assert!(matches!(
            login(&state, "ghost@x.com", PASSWORD).await.unwrap_err(),
            AppError::InvalidCredentials
        ));
        assert!(matches!(
            login(&state, "root@x.com", "Wr0ng!pass").await.unwrap_err(),
            AppError::InvalidCredentials
        ));
    }

    #[tokio::test]
    async fn repeated_failures_lock_then_unlock_recovers() {
        let (state, _) = seeded().await;
        // threshold is 3 in the test config
        for _ in 0..2 {
            assert!(matches!(
                login(&state, "root@x.com", "Wr0ng!pass").await.unwrap_err(),
                AppError::InvalidCredentials
            ));
        }
        assert!(matches!(
            login(&state, "root@x.com", "Wr0ng!pass").await.unwrap_err(),
            AppError::AccountLocked(_)
        ));
        // even the right password is refused while locked, and nothing is counted
        assert!(matches!(
            login(&state, "root@x.com", PASSWORD).await.unwrap_err(),
            AppError::AccountLocked(_)
        ));
        let admin = state.store.find_by_email("root@x.com").await.unwrap().unwrap();
        assert_eq!(admin.lockout.failed_attempts(), 3);

        unlock(&state, admin.id).await.unwrap();
        let (after, _) = login(&state, "root@x.com", PASSWORD).await.unwrap();
        assert_eq!(after.lockout, Lockout::Clear { failed_attempts: 0 });
    }

    #[tokio::test]
    async fn success_after_lock_expiry_resets_counter() {
        let (state, _) = seeded().await;
        let admin = state.store.find_by_email("root@x.com").await.unwrap().unwrap();
        state
            .store
            .update(
                admin.id,
                Box::new(|u: &mut User| {
                    u.lockout = Lockout::Locked {
                        failed_attempts: 3,
                        until: OffsetDateTime::now_utc() - time::Duration::seconds(1),
                    };
                    Ok(())
                }),
            )
            .await
            .unwrap();
        let (after, _) = login(&state, "root@x.com", PASSWORD).await.unwrap();
        assert_eq!(after.lockout, Lockout::Clear { failed_attempts: 0 });
        assert_eq!(after.state_at(OffsetDateTime::now_utc()), AccountState::Verified);
    }

    #[tokio::test]
    async fn promotion_to_admin_sticks_through_verify() {
        let (state, mailer) = seeded().await;
        let user = create_account(&state, registration("ana@x.com"), Registration::SelfService)
            .await
            .unwrap();
        let admin = AuthUser {
            id: Uuid::new_v4(),
            role: Role::Admin,
        };
        let promoted = change_role(&state, &admin, user.id, Role::Admin).await.unwrap();
        assert_eq!(promoted.verification, Verification::Verified);

        let token = token_from(&mailer.last_link_for("ana@x.com").unwrap());
        let after = verify_email(&state, user.id, &token).await.unwrap();
        assert_eq!(after.role, Role::Admin);
        assert!(after.is_verified());
    }

    #[tokio::test]
    async fn managers_cannot_grant_admin() {
        let (state, _) = seeded().await;
        let user = create_account(&state, registration("ana@x.com"), Registration::SelfService)
            .await
            .unwrap();
        let manager = AuthUser {
            id: Uuid::new_v4(),
            role: Role::Manager,
        };
        let err = change_role(&state, &manager, user.id, Role::Admin)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied));
        assert_eq!(get_user(&state, user.id).await.unwrap().role, Role::Authenticated);
    }

    #[tokio::test]
    async fn professional_status_timestamp() {
        let (state, _) = seeded().await;
        let admin = state.store.find_by_email("root@x.com").await.unwrap().unwrap();
        let same = set_professional_status(&state, admin.id, false).await.unwrap();
        assert_eq!(same.professional_status_updated_at, None);
        let changed = set_professional_status(&state, admin.id, true).await.unwrap();
        let stamp = changed.professional_status_updated_at.unwrap();
        let again = set_professional_status(&state, admin.id, true).await.unwrap();
        assert_eq!(again.professional_status_updated_at, Some(stamp));
    }

    #[tokio::test]
    async fn email_change_requires_fresh_verification() {
        let (state, mailer) = seeded().await;
        let user = create_account(&state, registration("ana@x.com"), Registration::SelfService)
            .await
            .unwrap();
        let token = token_from(&mailer.last_link_for("ana@x.com").unwrap());
        verify_email(&state, user.id, &token).await.unwrap();

        let updated = update_profile(
            &state,
            &owner(&user),
            user.id,
            UpdateProfileRequest {
                email: Some("Ana.New@x.com".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.email, "ana.new@x.com");
        assert!(!updated.is_verified());
        assert!(mailer.last_link_for("ana.new@x.com").is_some());
    }

    #[tokio::test]
    async fn profile_update_validates_before_writing() {
        let (state, _) = seeded().await;
        let admin = state.store.find_by_email("root@x.com").await.unwrap().unwrap();
        let err = update_profile(
            &state,
            &owner(&admin),
            admin.id,
            UpdateProfileRequest {
                bio: Some(Some("fine".into())),
                github_profile_url: Some(Some("not a url".into())),
                password: Some("weak".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        let AppError::Validation(msg) = err else {
            panic!("expected validation error");
        };
        assert!(msg.contains("github_profile_url"));
        assert!(msg.contains("8 characters"));
        assert_eq!(get_user(&state, admin.id).await.unwrap().bio, None);
    }

    #[tokio::test]
    async fn profile_update_clears_optional_fields() {
        let (state, _) = seeded().await;
        let admin = state.store.find_by_email("root@x.com").await.unwrap().unwrap();
        update_profile(
            &state,
            &owner(&admin),
            admin.id,
            UpdateProfileRequest {
                first_name: Some(Some("Ana".into())),
                bio: Some(Some("b".repeat(500))),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let cleared = update_profile(
            &state,
            &owner(&admin),
            admin.id,
            UpdateProfileRequest {
                first_name: Some(None),
                bio: Some(Some(String::new())),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(cleared.first_name, None);
        assert_eq!(cleared.bio, None);
    }

    #[tokio::test]
    async fn mail_failure_does_not_block_registration() {
        let mailer = std::sync::Arc::new(crate::mail::testing::RecordingMailer::failing());
        let (fake, _) = AppState::fake();
        let state = AppState::from_parts(fake.store.clone(), mailer, fake.config.clone());
        create_account(&state, registration("root@x.com"), Registration::SelfService)
            .await
            .unwrap();
        let user = create_account(&state, registration("ana@x.com"), Registration::SelfService)
            .await
            .unwrap();
        assert!(state.store.get(user.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn search_returns_navigable_pages() {
        let (state, _) = seeded().await;
        for i in 0..4 {
            create_account(
                &state,
                registration(&format!("user{i}@x.com")),
                Registration::SelfService,
            )
            .await
            .unwrap();
        }
        let params = SearchParams {
            limit: Some(2),
            ..Default::default()
        };
        let page = search_users(&state, &params, "/users").await.unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].email, "root@x.com");
        assert!(page
            .links
            .next
            .as_deref()
            .unwrap()
            .starts_with("http://test.local/users?"));
        assert!(page.links.prev.is_none());
    }

    #[tokio::test]
    async fn managers_cannot_edit_admin_accounts() {
        let (state, _) = seeded().await;
        let admin = state.store.find_by_email("root@x.com").await.unwrap().unwrap();
        let manager = create_account(
            &state,
            registration("boss@x.com"),
            Registration::ByStaff {
                actor: Role::Admin,
                role: Some(Role::Manager),
            },
        )
        .await
        .unwrap();

        let err = update_profile(
            &state,
            &owner(&manager),
            admin.id,
            UpdateProfileRequest {
                email: Some("boss.owned@x.com".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied));
        assert_eq!(get_user(&state, admin.id).await.unwrap().email, "root@x.com");

        let err = update_profile(
            &state,
            &owner(&manager),
            admin.id,
            UpdateProfileRequest {
                password: Some("Hijack3d!pw".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied));
        assert!(login(&state, "root@x.com", "Hijack3d!pw").await.is_err());
        assert!(login(&state, "root@x.com", PASSWORD).await.is_ok());
    }

    #[tokio::test]
    async fn staff_edit_regular_profiles_but_not_passwords() {
        let (state, _) = seeded().await;
        let admin = state.store.find_by_email("root@x.com").await.unwrap().unwrap();
        let user = create_account(&state, registration("ana@x.com"), Registration::SelfService)
            .await
            .unwrap();

        let edited = update_profile(
            &state,
            &owner(&admin),
            user.id,
            UpdateProfileRequest {
                bio: Some(Some("edited by staff".into())),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(edited.bio.as_deref(), Some("edited by staff"));

        let err = update_profile(
            &state,
            &owner(&admin),
            user.id,
            UpdateProfileRequest {
                password: Some("N3w!password".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied));

        let own = update_profile(
            &state,
            &owner(&user),
            user.id,
            UpdateProfileRequest {
                password: Some("N3w!password".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_ne!(own.password_hash, user.password_hash);
    }

    #[tokio::test]
    async fn generated_nickname_clash_draws_a_new_one() {
        let (state, _) = seeded().await;
        let mut taken = registration("first@x.com");
        taken.nickname = Some("quiet_otter_001".into());
        create_account(&state, taken, Registration::SelfService)
            .await
            .unwrap();

        let candidate = create_account(&state, registration("second@x.com"), Registration::SelfService)
            .await
            .unwrap();
        let mut clashing = candidate.clone();
        clashing.id = Uuid::new_v4();
        clashing.email = "third@x.com".into();
        clashing.nickname = "quiet_otter_001".into();

        let mut names = vec!["Quiet_Otter_001".to_string(), "calm_fox_777".to_string()].into_iter();
        let stored = insert_with_generated_nickname(&state, clashing, move || {
            names.next().unwrap_or_else(nickname::generate)
        })
        .await
        .unwrap();
        assert_eq!(stored.nickname, "calm_fox_777");
        assert_eq!(stored.email, "third@x.com");
    }

    #[tokio::test]
    async fn generated_nickname_gives_up_after_a_few_tries() {
        let (state, _) = seeded().await;
        let mut taken = registration("first@x.com");
        taken.nickname = Some("quiet_otter_001".into());
        let first = create_account(&state, taken, Registration::SelfService)
            .await
            .unwrap();

        let mut clashing = first.clone();
        clashing.id = Uuid::new_v4();
        clashing.email = "other@x.com".into();
        let err = insert_with_generated_nickname(&state, clashing, || "quiet_otter_001".into())
            .await
            .unwrap_err();
        assert!(err.is_nickname_conflict());
    }

    #[tokio::test]
    async fn email_clash_is_not_retried() {
        let (state, _) = seeded().await;
        let admin = state.store.find_by_email("root@x.com").await.unwrap().unwrap();
        let mut clashing = admin.clone();
        clashing.id = Uuid::new_v4();
        clashing.nickname = "fresh_name".into();
        let mut calls = 0;
        let err = insert_with_generated_nickname(&state, clashing, || {
            calls += 1;
            "another_name".into()
        })
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Conflict(ref m) if m == crate::error::EMAIL_TAKEN));
        assert_eq!(calls, 0);
    }
}
