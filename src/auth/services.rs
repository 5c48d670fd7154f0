use lazy_static::lazy_static;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::dto::{AuthResponse, RegisterRequest, TokenPair};
use super::otp::{otp_matches, Otp};
use super::password::{hash_password, verify_password};
use super::repo_types::{NewUser, PublicUser, User};
use crate::{error::AppError, state::AppState};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn is_valid_username(username: &str) -> bool {
    lazy_static! {
        static ref USERNAME_RE: Regex = Regex::new(r"^[a-z0-9_.]{3,30}$").unwrap();
    }
    USERNAME_RE.is_match(username)
}

pub(crate) fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

fn normalized_email(raw: &str) -> Result<String, AppError> {
    let email = normalize(raw);
    if email.is_empty() {
        return Err(AppError::Validation("email is required".into()));
    }
    if !is_valid_email(&email) {
        return Err(AppError::Validation("Invalid email".into()));
    }
    Ok(email)
}

// ---- token lifecycle ----

/// Signs a new pair and stores the refresh token on the user row, replacing
/// whatever was there. Either both tokens exist and the refresh token is
/// persisted, or the call fails with `TokenIssuance`.
#[instrument(skip(st, username, email))]
pub async fn issue_token_pair(
    st: &AppState,
    user_id: Uuid,
    username: &str,
    email: &str,
) -> Result<TokenPair, AppError> {
    let access_token = st
        .keys
        .issue_access(user_id, username, email)
        .map_err(AppError::TokenIssuance)?;
    let refresh_token = st
        .keys
        .issue_refresh(user_id)
        .map_err(AppError::TokenIssuance)?;

    let stored = st
        .users
        .set_refresh_token(user_id, Some(&refresh_token))
        .await
        .map_err(|e| AppError::TokenIssuance(anyhow::anyhow!("persist refresh token: {e:?}")))?;
    if !stored {
        return Err(AppError::TokenIssuance(anyhow::anyhow!("user {user_id} not found")));
    }

    Ok(TokenPair {
        access_token,
        refresh_token,
    })
}

/// Exchanges the current refresh token for a new pair. A token that verifies
/// but is no longer the one on record has been rotated out or logged out.
#[instrument(skip(st, old_refresh_token))]
pub async fn rotate(st: &AppState, old_refresh_token: &str) -> Result<TokenPair, AppError> {
    let claims = st.keys.verify_refresh(old_refresh_token)?;

    let user = st
        .users
        .find_by_id(claims.sub)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    if user.refresh_token.as_deref() != Some(old_refresh_token) {
        warn!(user_id = %user.id, "stale refresh token presented");
        return Err(AppError::RevokedToken);
    }

    let pair = issue_token_pair(st, user.id, &user.username, &user.email).await?;
    info!(user_id = %user.id, "token rotated");
    Ok(pair)
}

// ---- session flow ----

#[instrument(skip(st, req), fields(username = %req.username, email = %req.email))]
pub async fn register(st: &AppState, req: RegisterRequest) -> Result<PublicUser, AppError> {
    let username = normalize(&req.username);
    if username.is_empty() || req.email.trim().is_empty() || req.password.is_empty() {
        return Err(AppError::Validation("Missing required fields".into()));
    }
    let email = normalized_email(&req.email)?;
    if !is_valid_username(&username) {
        return Err(AppError::Validation(
            "Username must be 3-30 characters of a-z, 0-9, '_' or '.'".into(),
        ));
    }

    if st
        .users
        .find_by_email_or_username(&email, &username)
        .await?
        .is_some()
    {
        warn!(email = %email, username = %username, "registration conflict");
        return Err(AppError::Conflict(
            "User with given email or username already exists".into(),
        ));
    }

    let otp = Otp::generate(st.config.otp_ttl_minutes);
    let user = st
        .users
        .create(NewUser {
            username,
            email,
            password_hash: hash_password(&req.password)?,
            otp_code: otp.code.clone(),
            otp_expiry: otp.expires_at,
        })
        .await?;

    // The row is already committed; a mail failure is reported, not rolled back.
    st.mailer
        .send_otp_email(&user.email, &otp.code)
        .await
        .map_err(|e| {
            error!(error = %e, user_id = %user.id, "sending verification email failed");
            AppError::Dependency(e)
        })?;

    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok(PublicUser::from(user))
}

async fn pending_user(st: &AppState, email: &str) -> Result<User, AppError> {
    let user = st
        .users
        .find_by_email(email)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;
    if user.is_verified {
        return Err(AppError::AlreadyVerified);
    }
    Ok(user)
}

#[instrument(skip(st, code))]
pub async fn verify_otp(st: &AppState, email: &str, code: &str) -> Result<AuthResponse, AppError> {
    if email.trim().is_empty() || code.trim().is_empty() {
        return Err(AppError::Validation("email and OTP are required".into()));
    }
    let email = normalized_email(email)?;
    let code = code.trim();
    let mut user = pending_user(st, &email).await?;

    let now = OffsetDateTime::now_utc();
    if !otp_matches(user.otp_code.as_deref(), user.otp_expiry, code, now) {
        warn!(user_id = %user.id, "otp rejected");
        return Err(AppError::InvalidOtp);
    }
    // Conditional update: a concurrent verify or resend makes this a no-op.
    if !st.users.mark_verified(user.id, code, now).await? {
        return match st.users.find_by_id(user.id).await? {
            Some(u) if u.is_verified => Err(AppError::AlreadyVerified),
            _ => Err(AppError::InvalidOtp),
        };
    }
    user.is_verified = true;
    user.otp_code = None;
    user.otp_expiry = None;
    info!(user_id = %user.id, "otp verified");

    let tokens = issue_token_pair(st, user.id, &user.username, &user.email).await?;
    Ok(AuthResponse {
        user: PublicUser::from(user),
        tokens,
    })
}

#[instrument(skip(st))]
pub async fn resend_otp(st: &AppState, email: &str) -> Result<(), AppError> {
    if email.trim().is_empty() {
        return Err(AppError::Validation("email is required".into()));
    }
    let email = normalized_email(email)?;
    let user = pending_user(st, &email).await?;

    let otp = Otp::generate(st.config.otp_ttl_minutes);
    if !st.users.replace_otp(user.id, &otp.code, otp.expires_at).await? {
        return Err(AppError::AlreadyVerified);
    }

    st.mailer
        .send_otp_email(&user.email, &otp.code)
        .await
        .map_err(|e| {
            error!(error = %e, user_id = %user.id, "resending verification email failed");
            AppError::Dependency(e)
        })?;

    info!(user_id = %user.id, "otp resent");
    Ok(())
}

#[instrument(skip(st, password))]
pub async fn login(st: &AppState, email: &str, password: &str) -> Result<AuthResponse, AppError> {
    if email.trim().is_empty() || password.is_empty() {
        return Err(AppError::Validation("Email and password are required".into()));
    }
    let email = normalize(email);

    let Some(user) = st.users.find_by_email(&email).await? else {
        warn!(email = %email, "login unknown email");
        return Err(AppError::InvalidCredentials);
    };

    if !verify_password(password, &user.password_hash)? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(AppError::InvalidCredentials);
    }

    let tokens = issue_token_pair(st, user.id, &user.username, &user.email).await?;
    info!(user_id = %user.id, email = %user.email, "user logged in");
    Ok(AuthResponse {
        user: PublicUser::from(user),
        tokens,
    })
}

/// Drops the stored refresh token. Repeating it is harmless.
#[instrument(skip(st))]
pub async fn logout(st: &AppState, user_id: Uuid) -> Result<(), AppError> {
    st.users.set_refresh_token(user_id, None).await?;
    info!(user_id = %user_id, "user logged out");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::{test_app, TestApp};

    fn alice() -> RegisterRequest {
        RegisterRequest {
            username: "alice".into(),
            email: "a@x.com".into(),
            password: "pw1".into(),
        }
    }

    async fn registered() -> (TestApp, String) {
        let app = test_app();
        register(&app.state, alice()).await.expect("register");
        let code = app.mailer.last_code_for("a@x.com").expect("otp mailed");
        (app, code)
    }

    async fn verified() -> (TestApp, TokenPair) {
        let (app, code) = registered().await;
        let resp = verify_otp(&app.state, "a@x.com", &code).await.expect("verify");
        (app, resp.tokens)
    }

    fn wrong(code: &str) -> String {
        if code == "111111" { "222222".into() } else { "111111".into() }
    }

    #[test]
    fn email_and_username_rules() {
        assert!(is_valid_email("a@x.com"));
        assert!(!is_valid_email("a@x"));
        assert!(!is_valid_email("a b@x.com"));
        assert!(is_valid_username("alice_01"));
        assert!(!is_valid_username("al"));
        assert!(!is_valid_username("Alice"));
        assert_eq!(normalize("  Alice@X.com "), "alice@x.com");
    }

    #[tokio::test]
    async fn register_leaves_one_pending_otp_and_unverified() {
        let (app, code) = registered().await;
        let user = app.users.get_by_email("a@x.com").unwrap();
        assert!(!user.is_verified);
        assert_eq!(user.otp_code.as_deref(), Some(code.as_str()));
        assert!(user.otp_expiry.is_some());
        assert!(user.refresh_token.is_none());
        assert_ne!(user.password_hash, "pw1");
        assert_eq!(app.mailer.sent_count(), 1);
    }

    #[tokio::test]
    async fn register_normalizes_identity() {
        let app = test_app();
        let user = register(
            &app.state,
            RegisterRequest {
                username: "  Alice ".into(),
                email: " A@X.COM".into(),
                password: "pw1".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(user.email, "a@x.com");
    }

    #[tokio::test]
    async fn register_requires_all_fields() {
        let app = test_app();
        let mut req = alice();
        req.password = String::new();
        assert!(matches!(register(&app.state, req).await, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let (app, _) = registered().await;
        let mut again = alice();
        again.username = "alice2".into();
        assert!(matches!(register(&app.state, again).await, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn duplicate_username_conflicts() {
        let (app, _) = registered().await;
        let mut again = alice();
        again.email = "other@x.com".into();
        assert!(matches!(register(&app.state, again).await, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn mail_failure_surfaces_but_row_is_kept() {
        let app = test_app();
        app.mailer.set_failing(true);
        let err = register(&app.state, alice()).await.unwrap_err();
        assert!(matches!(err, AppError::Dependency(_)));
        assert!(app.users.get_by_email("a@x.com").is_some());
    }

    #[tokio::test]
    async fn resend_mail_failure_surfaces_but_new_code_is_stored() {
        let (app, _) = registered().await;
        let before = app.users.get_by_email("a@x.com").unwrap();
        app.mailer.set_failing(true);
        let err = resend_otp(&app.state, "a@x.com").await.unwrap_err();
        assert!(matches!(err, AppError::Dependency(_)));
        let after = app.users.get_by_email("a@x.com").unwrap();
        assert!(!after.is_verified);
        assert!(after.otp_code.is_some());
        assert!(after.otp_expiry > before.otp_expiry);
    }

    #[tokio::test]
    async fn wrong_code_is_rejected_and_state_unchanged() {
        let (app, code) = registered().await;
        let before = app.users.get_by_email("a@x.com").unwrap();
        let err = verify_otp(&app.state, "a@x.com", &wrong(&code)).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidOtp));
        let after = app.users.get_by_email("a@x.com").unwrap();
        assert!(!after.is_verified);
        assert_eq!(after.otp_code, before.otp_code);
        assert_eq!(after.otp_expiry, before.otp_expiry);
    }

    #[tokio::test]
    async fn expired_code_is_rejected() {
        let (app, code) = registered().await;
        app.users.expire_otp("a@x.com");
        let err = verify_otp(&app.state, "a@x.com", &code).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidOtp));
        assert!(!app.users.get_by_email("a@x.com").unwrap().is_verified);
    }

    #[tokio::test]
    async fn verify_unknown_email_is_not_found() {
        let app = test_app();
        let err = verify_otp(&app.state, "nobody@x.com", "123456").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn verify_succeeds_once_and_logs_in() {
        let (app, code) = registered().await;
        let resp = verify_otp(&app.state, "a@x.com", &code).await.unwrap();
        assert!(resp.user.is_verified);

        let user = app.users.get_by_email("a@x.com").unwrap();
        assert!(user.is_verified);
        assert!(user.otp_code.is_none());
        assert!(user.otp_expiry.is_none());
        assert_eq!(user.refresh_token.as_deref(), Some(resp.tokens.refresh_token.as_str()));

        let again = verify_otp(&app.state, "a@x.com", &code).await.unwrap_err();
        assert!(matches!(again, AppError::AlreadyVerified));
    }

    #[tokio::test]
    async fn resend_replaces_pending_code() {
        let (app, first) = registered().await;
        resend_otp(&app.state, "a@x.com").await.unwrap();
        let second = app.mailer.last_code_for("a@x.com").unwrap();
        assert_eq!(app.mailer.sent_count(), 2);

        let user = app.users.get_by_email("a@x.com").unwrap();
        assert_eq!(user.otp_code.as_deref(), Some(second.as_str()));
        if first != second {
            let err = verify_otp(&app.state, "a@x.com", &first).await.unwrap_err();
            assert!(matches!(err, AppError::InvalidOtp));
        }
        verify_otp(&app.state, "a@x.com", &second).await.unwrap();
    }

    #[tokio::test]
    async fn resend_after_verification_fails() {
        let (app, _) = verified().await;
        let err = resend_otp(&app.state, "a@x.com").await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyVerified));
    }

    #[tokio::test]
    async fn resend_unknown_email_is_not_found() {
        let app = test_app();
        let err = resend_otp(&app.state, "nobody@x.com").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn login_failures_are_indistinguishable() {
        let (app, _) = verified().await;
        let unknown = login(&app.state, "nobody@x.com", "pw1").await.unwrap_err();
        let bad_pw = login(&app.state, "a@x.com", "nope").await.unwrap_err();
        assert!(matches!(unknown, AppError::InvalidCredentials));
        assert!(matches!(bad_pw, AppError::InvalidCredentials));
        assert_eq!(unknown.public_message(), bad_pw.public_message());
    }

    #[tokio::test]
    async fn full_scenario_login_revokes_verify_token() {
        let (app, code) = registered().await;
        let err = verify_otp(&app.state, "a@x.com", &wrong(&code)).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidOtp));

        let verified = verify_otp(&app.state, "a@x.com", &code).await.unwrap();
        let logged_in = login(&app.state, "a@x.com", "pw1").await.unwrap();

        let stored = app.users.get_by_email("a@x.com").unwrap().refresh_token;
        assert_eq!(stored.as_deref(), Some(logged_in.tokens.refresh_token.as_str()));

        let err = rotate(&app.state, &verified.tokens.refresh_token).await.unwrap_err();
        assert!(matches!(err, AppError::RevokedToken));
    }

    #[tokio::test]
    async fn rotate_invalidates_previous_token() {
        let (app, tokens) = verified().await;
        let next = rotate(&app.state, &tokens.refresh_token).await.unwrap();
        assert_ne!(next.refresh_token, tokens.refresh_token);

        let err = rotate(&app.state, &tokens.refresh_token).await.unwrap_err();
        assert!(matches!(err, AppError::RevokedToken));
        rotate(&app.state, &next.refresh_token).await.unwrap();
    }

    #[tokio::test]
    async fn logout_revokes_and_is_idempotent() {
        let (app, tokens) = verified().await;
        let user_id = app.users.get_by_email("a@x.com").unwrap().id;
        logout(&app.state, user_id).await.unwrap();
        logout(&app.state, user_id).await.unwrap();
        assert!(app.users.get_by_email("a@x.com").unwrap().refresh_token.is_none());

        let err = rotate(&app.state, &tokens.refresh_token).await.unwrap_err();
        assert!(matches!(err, AppError::RevokedToken));
    }

    #[tokio::test]
    async fn rotate_rejects_access_token() {
        let (app, tokens) = verified().await;
        let err = rotate(&app.state, &tokens.access_token).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidToken));
    }

    #[tokio::test]
    async fn rotate_for_missing_user_is_not_found() {
        let (app, tokens) = verified().await;
        let user_id = app.users.get_by_email("a@x.com").unwrap().id;
        app.users.remove(user_id);
        let err = rotate(&app.state, &tokens.refresh_token).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn issuing_for_missing_user_fails() {
        let app = test_app();
        let err = issue_token_pair(&app.state, Uuid::new_v4(), "ghost", "g@x.com")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::TokenIssuance(_)));
    }
}
