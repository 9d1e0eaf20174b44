//! Per-route access control.
//!
//! Every route group declares a [`RouteAccess`]; [`enforce`] runs the matching [`Guard`]
//! strategy and attaches what it proved to the request extensions, where handlers pick it
//! up through the [`AuthenticatedIdentity`] and [`RefreshSession`] extractors.

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::{debug, warn};

use crate::auth::jwt::TokenError;
use crate::auth::repo_types::User;
use crate::error::AuthError;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAccess {
    /// No credentials required; also used for the OAuth redirect/callback pair.
    Public,
    AccessToken,
    RefreshToken,
}

impl RouteAccess {
    pub fn guard(self) -> &'static dyn Guard {
        match self {
            RouteAccess::Public => &PublicGuard,
            RouteAccess::AccessToken => &AccessGuard,
            RouteAccess::RefreshToken => &RefreshGuard,
        }
    }
}

/// Identity proven by a valid access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedIdentity {
    pub user_id: i64,
}

/// A refresh token that matched the stored digest, with the user it belongs to.
#[derive(Debug, Clone)]
pub struct RefreshSession {
    pub user: User,
}

#[derive(Debug)]
pub enum Grant {
    Anonymous,
    Identity(AuthenticatedIdentity),
    Refresh(RefreshSession),
}

#[async_trait]
pub trait Guard: Send + Sync {
    async fn authorize(&self, state: &AppState, headers: &HeaderMap) -> Result<Grant, AuthError>;
}

/// Bearer header first, then the named cookie.
fn presented_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }
    CookieJar::from_headers(headers)
        .get(cookie_name)
        .map(|c| c.value().to_string())
        .filter(|t| !t.is_empty())
}

fn token_rejection(e: TokenError) -> AuthError {
    match e {
        TokenError::Expired => AuthError::TokenExpired,
        TokenError::Invalid => AuthError::Unauthorized,
    }
}

pub struct PublicGuard;

#[async_trait]
impl Guard for PublicGuard {
    async fn authorize(&self, _: &AppState, _: &HeaderMap) -> Result<Grant, AuthError> {
        Ok(Grant::Anonymous)
    }
}

/// Stateless: verifies the access token without touching the store.
pub struct AccessGuard;

#[async_trait]
impl Guard for AccessGuard {
    async fn authorize(&self, state: &AppState, headers: &HeaderMap) -> Result<Grant, AuthError> {
        let token = presented_token(headers, &state.config.cookies.access_name)
            .ok_or(AuthError::MissingToken)?;
        let claims = state
            .tokens
            .verify_access_token(&token)
            .map_err(|e| {
                debug!(error = %e, "access token rejected");
                token_rejection(e)
            })?;
        Ok(Grant::Identity(AuthenticatedIdentity { user_id: claims.id }))
    }
}

pub struct RefreshGuard;

#[async_trait]
impl Guard for RefreshGuard {
    async fn authorize(&self, state: &AppState, headers: &HeaderMap) -> Result<Grant, AuthError> {
        let token = presented_token(headers, &state.config.cookies.refresh_name)
            .ok_or(AuthError::MissingToken)?;
        let claims = state
            .tokens
            .verify_refresh_token(&token)
            .map_err(token_rejection)?;

        let user = state
            .users
            .find_by_id(claims.id)
            .await?
            .ok_or(AuthError::Unauthorized)?;
        if !user.is_active {
            warn!(user_id = user.id, "refresh on deactivated account");
            return Err(AuthError::AccountDeactivated);
        }
        if !state
            .tokens
            .compare_refresh_token(&token, user.refresh_token_hash.as_deref())
        {
            warn!(user_id = user.id, "refresh token does not match stored digest");
            return Err(AuthError::AccessDenied);
        }
        Ok(Grant::Refresh(RefreshSession { user }))
    }
}

/// Middleware running the guard selected for the route group.
pub async fn enforce(
    State((state, access)): State<(AppState, RouteAccess)>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    match access.guard().authorize(&state, req.headers()).await? {
        Grant::Anonymous => {}
        Grant::Identity(identity) => {
            req.extensions_mut().insert(identity);
        }
        Grant::Refresh(session) => {
            req.extensions_mut().insert(AuthenticatedIdentity {
                user_id: session.user.id,
            });
            req.extensions_mut().insert(session);
        }
    }
    Ok(next.run(req).await)
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AuthenticatedIdentity {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedIdentity>()
            .copied()
            .ok_or(AuthError::MissingToken)
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for RefreshSession {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RefreshSession>()
            .cloned()
            .ok_or(AuthError::MissingToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::tamper_signature;
    use crate::auth::memory::seed_user;
    use crate::auth::resolver::issue_session;
    use crate::state::FakeState;
    use axum::{body::Body, http::StatusCode, middleware, routing::get, Router};
    use tower::ServiceExt;

    fn app(state: AppState, access: RouteAccess) -> Router {
        Router::new()
            .route(
                "/probe",
                get(|identity: Option<AuthenticatedIdentity>| async move {
                    identity.map(|i| i.user_id.to_string()).unwrap_or_else(|| "anonymous".into())
                }),
            )
            .route_layer(middleware::from_fn_with_state((state, access), enforce))
    }

    async fn call(router: Router, req: axum::http::Request<Body>) -> (StatusCode, String) {
        let resp = router.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    fn get_probe() -> axum::http::request::Builder {
        axum::http::Request::builder().uri("/probe")
    }

    fn kind_of(body: &str) -> String {
        let json: serde_json::Value = serde_json::from_str(body).unwrap();
        json["kind"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn public_routes_need_no_token() {
        let FakeState { state, .. } = AppState::fake();
        let (status, body) = call(
            app(state, RouteAccess::Public),
            get_probe().body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "anonymous");
    }

    #[tokio::test]
    async fn missing_token_is_rejected() {
        let FakeState { state, .. } = AppState::fake();
        let (status, body) = call(
            app(state, RouteAccess::AccessToken),
            get_probe().body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(kind_of(&body), "MISSING_TOKEN");
    }

    #[tokio::test]
    async fn bearer_access_token_attaches_identity() {
        let FakeState { state, .. } = AppState::fake();
        let pair = state.tokens.generate_token_pair(42).unwrap();
        let (status, body) = call(
            app(state, RouteAccess::AccessToken),
            get_probe()
                .header(AUTHORIZATION, format!("Bearer {}", pair.access_token))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "42");
    }

    #[tokio::test]
    async fn access_cookie_is_accepted_when_header_is_absent() {
        let FakeState { state, .. } = AppState::fake();
        let pair = state.tokens.generate_token_pair(7).unwrap();
        let (status, body) = call(
            app(state, RouteAccess::AccessToken),
            get_probe()
                .header("cookie", format!("access_token={}", pair.access_token))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "7");
    }

    #[tokio::test]
    async fn expired_access_token_is_reported() {
        let mut config = AppState::test_config();
        config.jwt.access_ttl_minutes = -10;
        let FakeState { state, .. } = AppState::fake_with(config);
        let pair = state.tokens.generate_token_pair(1).unwrap();
        let (status, body) = call(
            app(state, RouteAccess::AccessToken),
            get_probe()
                .header(AUTHORIZATION, format!("Bearer {}", pair.access_token))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(kind_of(&body), "TOKEN_EXPIRED");
    }

    #[tokio::test]
    async fn tampered_access_token_is_unauthorized() {
        let FakeState { state, .. } = AppState::fake();
        let pair = state.tokens.generate_token_pair(1).unwrap();
        let (status, body) = call(
            app(state, RouteAccess::AccessToken),
            get_probe()
                .header(AUTHORIZATION, format!("Bearer {}", tamper_signature(&pair.access_token)))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(kind_of(&body), "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn refresh_token_is_not_an_access_token() {
        let FakeState { state, .. } = AppState::fake();
        let pair = state.tokens.generate_token_pair(1).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, format!("Bearer {}", pair.refresh_token).parse().unwrap());
        let err = AccessGuard.authorize(&state, &headers).await.unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized));
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, format!("Bearer {token}").parse().unwrap());
        headers
    }

    #[tokio::test]
    async fn refresh_guard_accepts_the_current_token() {
        let FakeState { state, .. } = AppState::fake();
        let user = seed_user(&state, "a@x.com", "secret123").await;
        let session = issue_session(&state, &user).await.unwrap();
        match RefreshGuard
            .authorize(&state, &bearer(&session.tokens.refresh_token))
            .await
            .unwrap()
        {
            Grant::Refresh(s) => assert_eq!(s.user.id, user.id),
            other => panic!("unexpected grant {other:?}"),
        }
    }

    #[tokio::test]
    async fn refresh_guard_denies_superseded_token() {
        let FakeState { state, .. } = AppState::fake();
        let user = seed_user(&state, "a@x.com", "secret123").await;
        let first = issue_session(&state, &user).await.unwrap();
        issue_session(&state, &user).await.unwrap();
        let err = RefreshGuard
            .authorize(&state, &bearer(&first.tokens.refresh_token))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::AccessDenied));
    }

    #[tokio::test]
    async fn refresh_guard_rejections() {
        let FakeState { state, users, .. } = AppState::fake();
        assert!(matches!(
            RefreshGuard.authorize(&state, &HeaderMap::new()).await.unwrap_err(),
            AuthError::MissingToken
        ));

        // valid signature, no such user
        let ghost = state.tokens.generate_token_pair(999).unwrap();
        assert!(matches!(
            RefreshGuard.authorize(&state, &bearer(&ghost.refresh_token)).await.unwrap_err(),
            AuthError::Unauthorized
        ));

        // valid signature, user never signed in
        let user = seed_user(&state, "a@x.com", "secret123").await;
        let forged = state.tokens.generate_token_pair(user.id).unwrap();
        assert!(matches!(
            RefreshGuard.authorize(&state, &bearer(&forged.refresh_token)).await.unwrap_err(),
            AuthError::AccessDenied
        ));

        let session = issue_session(&state, &user).await.unwrap();
        users.set_active(user.id, false);
        assert!(matches!(
            RefreshGuard
                .authorize(&state, &bearer(&session.tokens.refresh_token))
                .await
                .unwrap_err(),
            AuthError::AccountDeactivated
        ));
    }

    #[tokio::test]
    async fn refresh_cookie_is_read_by_the_refresh_guard() {
        let FakeState { state, .. } = AppState::fake();
        let user = seed_user(&state, "a@x.com", "secret123").await;
        let session = issue_session(&state, &user).await.unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            "cookie",
            format!("refresh_token={}", session.tokens.refresh_token).parse().unwrap(),
        );
        assert!(matches!(
            RefreshGuard.authorize(&state, &headers).await.unwrap(),
            Grant::Refresh(_)
        ));
    }

    #[test]
    fn header_wins_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer from-header".parse().unwrap());
        headers.insert("cookie", "access_token=from-cookie".parse().unwrap());
        assert_eq!(presented_token(&headers, "access_token").as_deref(), Some("from-header"));

        headers.insert(AUTHORIZATION, "Basic dXNlcjpwYXNz".parse().unwrap());
        assert_eq!(presented_token(&headers, "access_token").as_deref(), Some("from-cookie"));
    }
}
