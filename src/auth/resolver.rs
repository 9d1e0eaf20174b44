//! Account resolution: turns credentials or a provider identity into a signed-in user.

use rand::Rng;
use tracing::{info, instrument, warn};

use crate::auth::jwt::TokenPair;
use crate::auth::oauth::CanonicalIdentity;
use crate::auth::repo_types::{NewUser, User, UserPatch};
use crate::error::AuthError;
use crate::mail;
use crate::state::AppState;

/// A user together with a freshly minted token pair whose refresh hash is stored.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: User,
    pub tokens: TokenPair,
}

/// Mint a token pair and persist the refresh digest, replacing any previous one.
pub async fn issue_session(state: &AppState, user: &User) -> Result<Session, AuthError> {
    let tokens = state.tokens.generate_token_pair(user.id)?;
    let digest = state.tokens.hash_refresh_token(&tokens.refresh_token)?;
    let user = state
        .users
        .update(user.id, UserPatch::refresh_token_hash(Some(digest)))
        .await?
        .ok_or(AuthError::Unauthorized)?;
    Ok(Session { user, tokens })
}

fn six_digit_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
}

/// Store a fresh hashed verification code, reset the attempt counter and mail the code.
pub async fn send_verification_code(state: &AppState, user: &User) -> Result<(), AuthError> {
    let code = six_digit_code();
    let digest = state.hasher.hash(&code)?;
    state
        .users
        .update(
            user.id,
            UserPatch {
                verification_token: Some(Some(digest)),
                verification_attempts: Some(0),
                ..UserPatch::default()
            },
        )
        .await?;
    mail::deliver(
        state.mailer.as_ref(),
        mail::verification_code_message(&user.email, &user.first_name, &code),
    )
    .await;
    info!(user_id = user.id, "verification code sent");
    Ok(())
}

/// Unverified users get a new code on every sign-in; a failure here never blocks the sign-in.
async fn nudge_unverified(state: &AppState, user: &User) {
    if user.is_verified {
        return;
    }
    if let Err(e) = send_verification_code(state, user).await {
        warn!(user_id = user.id, error = %e, "could not issue verification code");
    }
}

async fn find_by_email_or_username(
    state: &AppState,
    key: &str,
) -> Result<Option<User>, AuthError> {
    if let Some(user) = state.users.find_by_email(key).await? {
        return Ok(Some(user));
    }
    state.users.find_by_username(key).await
}

#[instrument(skip(state, password))]
pub async fn resolve_password(
    state: &AppState,
    email_or_username: &str,
    password: &str,
) -> Result<Session, AuthError> {
    let key = email_or_username.trim().to_lowercase();
    let Some(user) = find_by_email_or_username(state, &key).await? else {
        warn!("login unknown account");
        return Err(AuthError::InvalidCredentials);
    };

    if !user.is_active {
        warn!(user_id = user.id, "login on deactivated account");
        return Err(AuthError::AccountDeactivated);
    }
    if !user.has_password() {
        warn!(user_id = user.id, "password login on oauth-only account");
        return Err(AuthError::WrongAuthMethod);
    }
    if !state.hasher.verify(password, &user.password_hash) {
        warn!(user_id = user.id, "login invalid password");
        return Err(AuthError::InvalidCredentials);
    }

    nudge_unverified(state, &user).await;
    issue_session(state, &user).await
}

#[instrument(skip(state, identity), fields(provider = identity.provider.as_str()))]
pub async fn resolve_oauth(
    state: &AppState,
    identity: &CanonicalIdentity,
) -> Result<Session, AuthError> {
    let user = match state.users.find_by_email(&identity.email).await? {
        Some(existing) => {
            if !existing.is_active {
                warn!(user_id = existing.id, "oauth login on deactivated account");
                return Err(AuthError::AccountDeactivated);
            }
            // only a password account needs the provider to vouch for the address
            if existing.has_password() && !identity.email_verified {
                warn!(user_id = existing.id, "refusing merge on unverified provider email");
                return Err(AuthError::UnverifiedProviderEmail);
            }
            existing
        }
        None => {
            let user = state
                .users
                .create(NewUser {
                    email: identity.email.clone(),
                    password_hash: String::new(),
                    first_name: identity.first_name.clone(),
                    last_name: identity.last_name.clone(),
                    photo: identity.avatar_url.clone(),
                    is_verified: state.config.oauth.trust_verified_email
                        && identity.email_verified,
                })
                .await?;
            info!(user_id = user.id, "user created from oauth identity");
            user
        }
    };

    nudge_unverified(state, &user).await;
    issue_session(state, &user).await
}
