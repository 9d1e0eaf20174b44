//! OAuth 2.0 sign-in for Google and GitHub.
//!
//! The handshake is the Authorization Code flow with PKCE. The CSRF state and the PKCE
//! verifier travel in a short-lived cookie between [`authorize_url`] and the callback.
//! Provider payloads are reduced to a [`CanonicalIdentity`] by the pure `normalize_*`
//! functions before account resolution sees them.

use anyhow::Context;
use oauth2::basic::BasicClient;
use oauth2::{
    AuthorizationCode, CsrfToken, EndpointNotSet, EndpointSet, PkceCodeChallenge,
    PkceCodeVerifier, Scope, TokenResponse,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{OAuthConfig, OAuthProviderConfig};
use crate::error::AuthError;

const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";
const GITHUB_USER_URL: &str = "https://api.github.com/user";
const GITHUB_EMAILS_URL: &str = "https://api.github.com/user/emails";
const USER_AGENT: &str = "jarvis";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    GitHub,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::GitHub => "github",
        }
    }

    fn scopes(&self) -> &'static [&'static str] {
        match self {
            Provider::Google => &["openid", "email", "profile"],
            Provider::GitHub => &["read:user", "user:email"],
        }
    }

    /// `None` when the provider has no client credentials configured.
    pub fn config<'a>(&self, cfg: &'a OAuthConfig) -> Option<&'a OAuthProviderConfig> {
        match self {
            Provider::Google => cfg.google.as_ref(),
            Provider::GitHub => cfg.github.as_ref(),
        }
    }
}

/// Provider-agnostic identity handed to the account resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalIdentity {
    pub provider: Provider,
    pub provider_id: String,
    pub email: String, // lower-cased
    pub email_verified: bool,
    pub first_name: String,
    pub last_name: String,
    pub avatar_url: Option<String>,
}

/// Google `userinfo` v2 response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GoogleProfile {
    pub id: String,
    pub email: Option<String>,
    #[serde(default)]
    pub verified_email: bool,
    pub name: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub picture: Option<String>,
}

/// GitHub `/user` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitHubProfile {
    pub id: i64,
    pub login: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

/// One entry of GitHub `/user/emails`.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubEmail {
    pub email: String,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub verified: bool,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Split a display name on its first space into (first, last).
fn split_name(display: &str) -> (String, String) {
    match display.split_once(' ') {
        Some((first, last)) => (first.to_string(), last.trim().to_string()),
        None => (display.to_string(), String::new()),
    }
}

pub fn normalize_google(profile: GoogleProfile) -> Result<CanonicalIdentity, AuthError> {
    let email = non_blank(profile.email)
        .map(|e| e.to_lowercase())
        .ok_or(AuthError::IdentityIncomplete)?;
    if profile.id.trim().is_empty() {
        return Err(AuthError::IdentityIncomplete);
    }

    let given = non_blank(profile.given_name);
    let family = non_blank(profile.family_name);
    let (first_name, last_name) = match (given, family, non_blank(profile.name)) {
        (Some(g), f, _) => (g, f.unwrap_or_default()),
        (None, _, Some(display)) => split_name(&display),
        (None, f, None) => {
            let local = email.split('@').next().unwrap_or_default().to_string();
            (local, f.unwrap_or_default())
        }
    };

    Ok(CanonicalIdentity {
        provider: Provider::Google,
        provider_id: profile.id,
        email,
        email_verified: profile.verified_email,
        first_name,
        last_name,
        avatar_url: non_blank(profile.picture),
    })
}

/// Picks the primary address (or the first one when none is flagged) from `/user/emails`.
pub fn normalize_github(
    profile: GitHubProfile,
    emails: Vec<GitHubEmail>,
) -> Result<CanonicalIdentity, AuthError> {
    let chosen = match emails.iter().position(|e| e.primary) {
        Some(idx) => emails.into_iter().nth(idx),
        None => emails.into_iter().next(),
    }
    .filter(|e| !e.email.trim().is_empty())
    .ok_or(AuthError::IdentityIncomplete)?;

    if profile.login.trim().is_empty() {
        return Err(AuthError::IdentityIncomplete);
    }

    let (first_name, last_name) = match non_blank(profile.name) {
        Some(display) => split_name(&display),
        None => (profile.login.clone(), profile.login.clone()),
    };

    Ok(CanonicalIdentity {
        provider: Provider::GitHub,
        provider_id: profile.id.to_string(),
        email: chosen.email.trim().to_lowercase(),
        email_verified: chosen.verified,
        first_name,
        last_name,
        avatar_url: non_blank(profile.avatar_url),
    })
}

type ConfiguredClient = oauth2::Client<
    oauth2::basic::BasicErrorResponse,
    oauth2::basic::BasicTokenResponse,
    oauth2::basic::BasicTokenIntrospectionResponse,
    oauth2::StandardRevocableToken,
    oauth2::basic::BasicRevocationErrorResponse,
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointSet,
>;

fn client(cfg: &OAuthProviderConfig) -> ConfiguredClient {
    BasicClient::new(cfg.client_id.clone())
        .set_client_secret(cfg.client_secret.clone())
        .set_auth_uri(cfg.auth_url.clone())
        .set_token_uri(cfg.token_url.clone())
        .set_redirect_uri(cfg.redirect_url.clone())
}

/// CSRF state and PKCE verifier kept between redirect and callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub provider: Provider,
    pub state: String,
    pub verifier: String,
}

impl Handshake {
    /// Both secrets are base64url, so `.` is a safe separator.
    pub fn encode(&self) -> String {
        format!("{}.{}.{}", self.provider.as_str(), self.state, self.verifier)
    }

    pub fn decode(raw: &str) -> Option<Self> {
        let mut parts = raw.splitn(3, '.');
        let provider = match parts.next()? {
            "google" => Provider::Google,
            "github" => Provider::GitHub,
            _ => return None,
        };
        let state = parts.next()?.to_string();
        let verifier = parts.next()?.to_string();
        if state.is_empty() || verifier.is_empty() {
            return None;
        }
        Some(Self {
            provider,
            state,
            verifier,
        })
    }
}

pub fn authorize_url(provider: Provider, cfg: &OAuthProviderConfig) -> (String, Handshake) {
    let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
    let client = client(cfg);
    let mut request = client.authorize_url(CsrfToken::new_random);
    for scope in provider.scopes() {
        request = request.add_scope(Scope::new(scope.to_string()));
    }
    let (url, csrf) = request.set_pkce_challenge(challenge).url();
    let handshake = Handshake {
        provider,
        state: csrf.secret().clone(),
        verifier: verifier.secret().clone(),
    };
    (url.to_string(), handshake)
}

/// Trades the authorization code for the provider profile, normalized.
pub async fn fetch_identity(
    http: &reqwest::Client,
    provider: Provider,
    cfg: &OAuthProviderConfig,
    code: String,
    handshake: Handshake,
) -> Result<CanonicalIdentity, AuthError> {
    let client = client(cfg);
    let token = client
        .exchange_code(AuthorizationCode::new(code))
        .set_pkce_verifier(PkceCodeVerifier::new(handshake.verifier))
        .request_async(http)
        .await
        .map_err(|e| {
            warn!(provider = provider.as_str(), error = %e, "oauth code exchange failed");
            AuthError::Unauthorized
        })?;
    let access_token = token.access_token().secret();
    debug!(provider = provider.as_str(), "oauth code exchanged");

    match provider {
        Provider::Google => {
            let profile: GoogleProfile = get_json(http, GOOGLE_USERINFO_URL, access_token).await?;
            normalize_google(profile)
        }
        Provider::GitHub => {
            let profile: GitHubProfile = get_json(http, GITHUB_USER_URL, access_token).await?;
            let emails: Vec<GitHubEmail> =
                get_json(http, GITHUB_EMAILS_URL, access_token).await?;
            normalize_github(profile, emails)
        }
    }
}

async fn get_json<T: serde::de::DeserializeOwned>(
    http: &reqwest::Client,
    url: &str,
    access_token: &str,
) -> Result<T, AuthError> {
    let body = http
        .get(url)
        .bearer_auth(access_token)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .with_context(|| format!("GET {url}"))?
        .json::<T>()
        .await
        .with_context(|| format!("decode {url}"))?;
    Ok(body)
}

#[cfg(test)]
pub(crate) fn test_provider_config() -> OAuthProviderConfig {
    OAuthProviderConfig {
        client_id: oauth2::ClientId::new("cid".into()),
        client_secret: oauth2::ClientSecret::new("secret".into()),
        auth_url: oauth2::AuthUrl::new("https://github.com/login/oauth/authorize".into())
            .expect("static url"),
        token_url: oauth2::TokenUrl::new("https://github.com/login/oauth/access_token".into())
            .expect("static url"),
        redirect_url: oauth2::RedirectUrl::new(
            "http://localhost:8080/api/v1/auth/github/callback".into(),
        )
        .expect("static url"),
    }
}
