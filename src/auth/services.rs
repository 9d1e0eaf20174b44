//! Session operations behind the `/auth` endpoints.

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, instrument, warn};

use crate::auth::dto::{
    EditMeRequest, LoginRequest, OAuthCallbackQuery, RegisterRequest, ResetPasswordRequest,
};
use crate::auth::guard::RefreshSession;
use crate::auth::jwt::TokenError;
use crate::auth::oauth::{self, CanonicalIdentity, Handshake, Provider};
use crate::auth::repo_types::{NewUser, User, UserPatch};
use crate::auth::resolver::{self, Session};
use crate::config::OAuthProviderConfig;
use crate::error::AuthError;
use crate::mail;
use crate::state::AppState;

pub const FORGOT_PASSWORD_MESSAGE: &str =
    "If an account exists for this email, a password reset link has been sent.";
pub const RESET_PASSWORD_MESSAGE: &str = "Password has been reset. Please sign in again.";
const MIN_PASSWORD_LEN: usize = 8;

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

fn check_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

fn required(value: &str, field: &str) -> Result<String, AuthError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AuthError::Validation(format!("{field} must not be empty")));
    }
    Ok(value.to_string())
}

async fn load_user(state: &AppState, user_id: i64) -> Result<User, AuthError> {
    state
        .users
        .find_by_id(user_id)
        .await?
        .ok_or(AuthError::Unauthorized)
}

#[instrument(skip(state, payload))]
pub async fn register(state: &AppState, payload: RegisterRequest) -> Result<Session, AuthError> {
    let email = payload.email.trim().to_lowercase();
    if !is_valid_email(&email) {
        warn!(%email, "invalid email");
        return Err(AuthError::Validation("invalid email".into()));
    }
    let first_name = required(&payload.first_name, "first_name")?;
    let last_name = required(&payload.last_name, "last_name")?;
    check_password(&payload.password)?;

    if state.users.find_by_email(&email).await?.is_some() {
        warn!(%email, "email already registered");
        return Err(AuthError::EmailTaken);
    }

    let user = state
        .users
        .create(NewUser {
            email,
            password_hash: state.hasher.hash(&payload.password)?,
            first_name,
            last_name,
            photo: None,
            is_verified: false,
        })
        .await?;

    if let Err(e) = resolver::send_verification_code(state, &user).await {
        warn!(user_id = user.id, error = %e, "could not issue verification code");
    }
    let session = resolver::issue_session(state, &user).await?;
    info!(user_id = user.id, email = %user.email, "user registered");
    Ok(session)
}

#[instrument(skip(state, payload))]
pub async fn login(state: &AppState, payload: LoginRequest) -> Result<Session, AuthError> {
    let session =
        resolver::resolve_password(state, &payload.email_or_username, &payload.password).await?;
    info!(user_id = session.user.id, role = session.user.role.as_str(), "user logged in");
    Ok(session)
}

/// Clears the stored refresh digest. Calling it again is a no-op.
#[instrument(skip(state))]
pub async fn logout(state: &AppState, user_id: i64) -> Result<(), AuthError> {
    let Some(user) = state.users.find_by_id(user_id).await? else {
        return Ok(());
    };
    if user.refresh_token_hash.is_some() {
        state
            .users
            .update(user.id, UserPatch::refresh_token_hash(None))
            .await?;
    }
    info!(user_id, "user logged out");
    Ok(())
}

/// Rotates the pair for a session the refresh guard already validated.
#[instrument(skip(state, session), fields(user_id = session.user.id))]
pub async fn refresh(state: &AppState, session: RefreshSession) -> Result<Session, AuthError> {
    let session = resolver::issue_session(state, &session.user).await?;
    info!(user_id = session.user.id, "tokens refreshed");
    Ok(session)
}

/// Always answers with the same message so callers cannot probe for accounts.
#[instrument(skip(state))]
pub async fn forgot_password(state: &AppState, email: &str) -> Result<&'static str, AuthError> {
    let email = email.trim().to_lowercase();
    let user = match state.users.find_by_email(&email).await? {
        Some(u) if u.is_active => u,
        _ => {
            warn!("password reset requested for unknown or inactive account");
            return Ok(FORGOT_PASSWORD_MESSAGE);
        }
    };

    let token = state.tokens.generate_password_reset_token(user.id)?;
    state
        .users
        .update(
            user.id,
            UserPatch {
                reset_password_secret: Some(Some(token.clone())),
                ..UserPatch::default()
            },
        )
        .await?;

    let link = format!(
        "{}/password/reset/?token={}",
        state.config.frontend_base_url, token
    );
    mail::deliver(
        state.mailer.as_ref(),
        mail::password_reset_message(&user.email, &user.first_name, &link),
    )
    .await;
    info!(user_id = user.id, "password reset link issued");
    Ok(FORGOT_PASSWORD_MESSAGE)
}

/// Only the most recently issued link works, once. Every existing session is revoked.
#[instrument(skip(state, payload))]
pub async fn reset_password(
    state: &AppState,
    payload: ResetPasswordRequest,
) -> Result<&'static str, AuthError> {
    let claims = state
        .tokens
        .verify_password_reset_token(&payload.token)
        .map_err(|e| match e {
            TokenError::Expired => AuthError::TokenExpired,
            TokenError::Invalid => AuthError::Unauthorized,
        })?;
    let user = load_user(state, claims.id).await?;
    if user.reset_password_secret.as_deref() != Some(payload.token.as_str()) {
        warn!(user_id = user.id, "reset token is not the outstanding one");
        return Err(AuthError::Unauthorized);
    }
    check_password(&payload.password)?;

    state
        .users
        .update(
            user.id,
            UserPatch {
                password_hash: Some(state.hasher.hash(&payload.password)?),
                reset_password_secret: Some(None),
                refresh_token_hash: Some(None),
                ..UserPatch::default()
            },
        )
        .await?;
    info!(user_id = user.id, "password reset");
    Ok(RESET_PASSWORD_MESSAGE)
}

#[instrument(skip(state, code))]
pub async fn verify_email_code(
    state: &AppState,
    user_id: i64,
    code: &str,
) -> Result<User, AuthError> {
    let user = load_user(state, user_id).await?;
    if user.is_verified {
        return Err(AuthError::AlreadyVerified);
    }
    // the attempt is counted before the code is checked
    let Some(attempts) = state
        .users
        .claim_verification_attempt(user.id, state.config.verification_max_attempts)
        .await?
    else {
        warn!(user_id, "verification attempts exhausted");
        return Err(AuthError::TooManyAttempts);
    };

    let matches = user
        .verification_token
        .as_deref()
        .is_some_and(|digest| state.hasher.verify(code.trim(), digest));
    if !matches {
        warn!(user_id, attempts, "verification code mismatch");
        return Err(AuthError::CodeMismatch);
    }

    let user = state
        .users
        .update(
            user.id,
            UserPatch {
                is_verified: Some(true),
                verification_token: Some(None),
                verification_attempts: Some(0),
                ..UserPatch::default()
            },
        )
        .await?
        .ok_or(AuthError::Unauthorized)?;
    info!(user_id, "email verified");
    Ok(user)
}

#[instrument(skip(state))]
pub async fn resend_verification_code(state: &AppState, user_id: i64) -> Result<(), AuthError> {
    let user = load_user(state, user_id).await?;
    if user.is_verified {
        return Err(AuthError::AlreadyVerified);
    }
    resolver::send_verification_code(state, &user).await
}

pub async fn get_me(state: &AppState, user_id: i64) -> Result<User, AuthError> {
    load_user(state, user_id).await
}

/// Empty string means "clear".
fn optional_field(value: Option<String>) -> Option<Option<String>> {
    value.map(|v| {
        let v = v.trim().to_string();
        (!v.is_empty()).then_some(v)
    })
}

#[instrument(skip(state, payload))]
pub async fn edit_me(
    state: &AppState,
    user_id: i64,
    payload: EditMeRequest,
) -> Result<User, AuthError> {
    let mut patch = UserPatch {
        bio: optional_field(payload.bio),
        phone: optional_field(payload.phone),
        photo: optional_field(payload.photo),
        ..UserPatch::default()
    };
    if let Some(first) = payload.first_name {
        patch.first_name = Some(required(&first, "first_name")?);
    }
    if let Some(last) = payload.last_name {
        patch.last_name = Some(required(&last, "last_name")?);
    }
    if let Some(username) = optional_field(payload.username) {
        let username = username.map(|u| u.to_lowercase());
        if let Some(name) = &username {
            if !is_valid_username(name) {
                return Err(AuthError::Validation(
                    "username must be 3-30 characters of a-z, 0-9, '_' or '.'".into(),
                ));
            }
            if let Some(other) = state.users.find_by_username(name).await? {
                if other.id != user_id {
                    return Err(AuthError::UsernameTaken);
                }
            }
        }
        patch.username = Some(username);
    }

    if patch.is_empty() {
        return load_user(state, user_id).await;
    }
    let user = state
        .users
        .update(user_id, patch)
        .await?
        .ok_or(AuthError::Unauthorized)?;
    info!(user_id, "profile updated");
    Ok(user)
}

/// Validates the callback against the stored handshake and fetches the provider identity.
#[instrument(skip(state, provider, cfg, query, handshake), fields(provider = provider.as_str()))]
pub async fn oauth_identity(
    state: &AppState,
    provider: Provider,
    cfg: &OAuthProviderConfig,
    query: OAuthCallbackQuery,
    handshake: Option<Handshake>,
) -> Result<CanonicalIdentity, AuthError> {
    if let Some(error) = query.error {
        warn!(%error, "provider returned an error");
        return Err(AuthError::Unauthorized);
    }
    let (Some(code), Some(returned_state)) = (query.code, query.state) else {
        return Err(AuthError::Validation("missing code or state".into()));
    };
    let handshake = handshake
        .filter(|h| h.provider == provider && h.state == returned_state)
        .ok_or_else(|| {
            warn!("oauth state mismatch");
            AuthError::Unauthorized
        })?;
    oauth::fetch_identity(&state.http, provider, cfg, code, handshake).await
}

#[instrument(skip(state, identity), fields(provider = identity.provider.as_str()))]
pub async fn oauth_callback(
    state: &AppState,
    identity: &CanonicalIdentity,
) -> Result<Session, AuthError> {
    let session = resolver::resolve_oauth(state, identity).await?;
    info!(user_id = session.user.id, "user logged in via oauth");
    Ok(session)
}
