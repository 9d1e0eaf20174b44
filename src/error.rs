use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Failure kinds surfaced by the authentication core.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("account has been deactivated")]
    AccountDeactivated,
    #[error("account uses a social login; sign in with your provider")]
    WrongAuthMethod,
    #[error("access token is missing")]
    MissingToken,
    #[error("token has expired")]
    TokenExpired,
    #[error("unauthorized")]
    Unauthorized,
    #[error("access denied")]
    AccessDenied,
    #[error("user has already been verified")]
    AlreadyVerified,
    #[error("code doesn't match")]
    CodeMismatch,
    #[error("too many verification attempts; request a new code")]
    TooManyAttempts,
    #[error("username already taken")]
    UsernameTaken,
    #[error("email already registered")]
    EmailTaken,
    #[error("identity provider returned an incomplete profile")]
    IdentityIncomplete,
    #[error("identity provider has not verified this email")]
    UnverifiedProviderEmail,
    #[error("{0}")]
    Validation(String),
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::AccountDeactivated => "ACCOUNT_DEACTIVATED",
            Self::WrongAuthMethod => "WRONG_AUTH_METHOD",
            Self::MissingToken => "MISSING_TOKEN",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::AccessDenied => "ACCESS_DENIED",
            Self::AlreadyVerified => "ALREADY_VERIFIED",
            Self::CodeMismatch => "CODE_MISMATCH",
            Self::TooManyAttempts => "TOO_MANY_ATTEMPTS",
            Self::UsernameTaken => "USERNAME_TAKEN",
            Self::EmailTaken => "EMAIL_TAKEN",
            Self::IdentityIncomplete => "IDENTITY_INCOMPLETE",
            Self::UnverifiedProviderEmail => "UNVERIFIED_PROVIDER_EMAIL",
            Self::Validation(_) => "VALIDATION",
            Self::Internal(_) => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidCredentials
            | Self::WrongAuthMethod
            | Self::MissingToken
            | Self::TokenExpired
            | Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::AccountDeactivated | Self::AccessDenied | Self::UnverifiedProviderEmail => {
                StatusCode::FORBIDDEN
            }
            Self::AlreadyVerified | Self::IdentityIncomplete | Self::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::CodeMismatch | Self::UsernameTaken | Self::EmailTaken => StatusCode::CONFLICT,
            Self::TooManyAttempts => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        // 4xx are already recorded by the trace layer; only the internal chain needs logging.
        if let Self::Internal(ref e) = self {
            tracing::error!(error = ?e, kind = "INTERNAL", "internal error");
        }
        let body = serde_json::json!({
            "kind": self.kind(),
            "message": self.to_string(),
        });
        (status, axum::Json(body)).into_response()
    }
}
