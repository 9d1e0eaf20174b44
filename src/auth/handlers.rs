use axum::{
    extract::{Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use oauth2::url::form_urlencoded::byte_serialize;
use tracing::{instrument, warn};

use crate::{
    auth::{
        cookies,
        dto::{
            AuthResponse, EditMeRequest, EmailVerificationRequest, ForgotPasswordRequest,
            LoginRequest, MessageResponse, OAuthCallbackQuery, RegisterRequest,
            ResetPasswordRequest, SuccessResponse,
        },
        guard::{enforce, AuthenticatedIdentity, RefreshSession, RouteAccess},
        oauth::{self, Handshake, Provider},
        repo_types::User,
        resolver::Session,
        services,
    },
    error::AuthError,
    state::AppState,
};

pub fn auth_routes(state: &AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/password/forgot", post(forgot_password))
        .route("/auth/password/reset", post(reset_password))
        .route("/auth/google", get(google_begin))
        .route("/auth/google/callback", get(google_callback))
        .route("/auth/github", get(github_begin))
        .route("/auth/github/callback", get(github_callback))
        .route_layer(middleware::from_fn_with_state(
            (state.clone(), RouteAccess::Public),
            enforce,
        ));

    let authenticated = Router::new()
        .route("/auth/logout", post(logout))
        .route("/auth/email-verification", post(verify_email))
        .route("/auth/email-verification/resend", post(resend_verification))
        .route("/auth/me", get(get_me).patch(edit_me))
        .route_layer(middleware::from_fn_with_state(
            (state.clone(), RouteAccess::AccessToken),
            enforce,
        ));

    let refresh_only = Router::new()
        .route("/auth/refresh", post(refresh))
        .route_layer(middleware::from_fn_with_state(
            (state.clone(), RouteAccess::RefreshToken),
            enforce,
        ));

    public.merge(authenticated).merge(refresh_only)
}

fn with_tokens(state: &AppState, jar: CookieJar, session: Session) -> (CookieJar, Json<AuthResponse>) {
    let jar = cookies::set_tokens(jar, &state.config.cookies, &session.tokens);
    (
        jar,
        Json(AuthResponse {
            user: session.user,
            access_token: session.tokens.access_token,
            refresh_token: session.tokens.refresh_token,
        }),
    )
}

#[instrument(skip(state, jar, payload))]
pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, CookieJar, Json<AuthResponse>), AuthError> {
    let session = services::register(&state, payload).await?;
    let (jar, body) = with_tokens(&state, jar, session);
    Ok((StatusCode::CREATED, jar, body))
}

#[instrument(skip(state, jar, payload))]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> Result<(CookieJar, Json<AuthResponse>), AuthError> {
    let session = services::login(&state, payload).await?;
    Ok(with_tokens(&state, jar, session))
}

#[instrument(skip(state, jar))]
pub async fn logout(
    State(state): State<AppState>,
    identity: AuthenticatedIdentity,
    jar: CookieJar,
) -> Result<(CookieJar, Json<SuccessResponse>), AuthError> {
    services::logout(&state, identity.user_id).await?;
    let jar = cookies::clear_tokens(jar, &state.config.cookies);
    Ok((jar, Json(SuccessResponse { success: true })))
}

#[instrument(skip(state, session, jar))]
pub async fn refresh(
    State(state): State<AppState>,
    session: RefreshSession,
    jar: CookieJar,
) -> Result<(CookieJar, Json<AuthResponse>), AuthError> {
    let session = services::refresh(&state, session).await?;
    Ok(with_tokens(&state, jar, session))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    let message = services::forgot_password(&state, &payload.email).await?;
    Ok(Json(MessageResponse {
        message: message.to_string(),
    }))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    let message = services::reset_password(&state, payload).await?;
    Ok(Json(MessageResponse {
        message: message.to_string(),
    }))
}

#[instrument(skip(state, payload))]
pub async fn verify_email(
    State(state): State<AppState>,
    identity: AuthenticatedIdentity,
    Json(payload): Json<EmailVerificationRequest>,
) -> Result<Json<SuccessResponse>, AuthError> {
    services::verify_email_code(&state, identity.user_id, &payload.code).await?;
    Ok(Json(SuccessResponse { success: true }))
}

#[instrument(skip(state))]
pub async fn resend_verification(
    State(state): State<AppState>,
    identity: AuthenticatedIdentity,
) -> Result<Json<SuccessResponse>, AuthError> {
    services::resend_verification_code(&state, identity.user_id).await?;
    Ok(Json(SuccessResponse { success: true }))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    identity: AuthenticatedIdentity,
) -> Result<Json<User>, AuthError> {
    Ok(Json(services::get_me(&state, identity.user_id).await?))
}

#[instrument(skip(state, payload))]
pub async fn edit_me(
    State(state): State<AppState>,
    identity: AuthenticatedIdentity,
    Json(payload): Json<EditMeRequest>,
) -> Result<Json<User>, AuthError> {
    Ok(Json(services::edit_me(&state, identity.user_id, payload).await?))
}

async fn google_begin(State(state): State<AppState>, jar: CookieJar) -> Response {
    begin(&state, jar, Provider::Google)
}

async fn github_begin(State(state): State<AppState>, jar: CookieJar) -> Response {
    begin(&state, jar, Provider::GitHub)
}

async fn google_callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<OAuthCallbackQuery>,
) -> Response {
    callback(&state, jar, Provider::Google, query).await
}

async fn github_callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<OAuthCallbackQuery>,
) -> Response {
    callback(&state, jar, Provider::GitHub, query).await
}

fn begin(state: &AppState, jar: CookieJar, provider: Provider) -> Response {
    let Some(cfg) = provider.config(&state.config.oauth) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let (url, handshake) = oauth::authorize_url(provider, cfg);
    let jar = cookies::set_handshake(jar, &state.config.cookies, handshake.encode());
    (jar, Redirect::to(&url)).into_response()
}

fn encode_query(value: &str) -> String {
    byte_serialize(value.as_bytes()).collect()
}

#[instrument(skip(state, jar, query, provider), fields(provider = provider.as_str()))]
async fn callback(
    state: &AppState,
    jar: CookieJar,
    provider: Provider,
    query: OAuthCallbackQuery,
) -> Response {
    let Some(cfg) = provider.config(&state.config.oauth) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let handshake = jar
        .get(cookies::HANDSHAKE_COOKIE)
        .and_then(|c| Handshake::decode(c.value()));
    let jar = cookies::clear_handshake(jar);
    let frontend = &state.config.frontend_base_url;

    let outcome = match services::oauth_identity(state, provider, cfg, query, handshake).await {
        Ok(identity) => {
            let email = identity.email.clone();
            services::oauth_callback(state, &identity)
                .await
                .map_err(|e| (e, Some(email)))
        }
        Err(e) => Err((e, None)),
    };

    match outcome {
        Ok(session) => {
            let jar = cookies::set_tokens(jar, &state.config.cookies, &session.tokens);
            (jar, Redirect::to(frontend)).into_response()
        }
        Err((AuthError::AccountDeactivated, Some(email))) => {
            let url = format!("{frontend}/deactivated?user={}", encode_query(&email));
            (jar, Redirect::to(&url)).into_response()
        }
        Err((err, _)) => {
            if let AuthError::Internal(ref e) = err {
                tracing::error!(error = ?e, "oauth callback failed");
            } else {
                warn!(kind = err.kind(), "oauth callback rejected");
            }
            let url = format!("{frontend}/auth/error?reason={}", err.kind());
            (jar, Redirect::to(&url)).into_response()
        }
    }
}
