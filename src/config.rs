use anyhow::Context;
use axum_extra::extract::cookie::SameSite;
use oauth2::{AuthUrl, ClientId, ClientSecret, RedirectUrl, TokenUrl};

/// Signing material and lifetimes for the three token purposes.
#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub reset_secret: String,
    pub issuer: String,
    pub audience: String,
    pub access_ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
    pub reset_ttl_minutes: i64,
    pub leeway_secs: u64,
}

/// Argon2 cost parameters.
#[derive(Debug, Clone)]
pub struct PasswordConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

/// Attributes applied to the token cookies.
#[derive(Debug, Clone)]
pub struct CookieConfig {
    pub access_name: String,
    pub refresh_name: String,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
    pub domain: Option<String>,
    pub access_max_age_secs: i64,
    pub refresh_max_age_secs: i64,
}

impl CookieConfig {
    /// Production cookies are locked down and live as long as the tokens they carry.
    pub fn production(jwt: &JwtConfig) -> Self {
        Self {
            access_name: "access_token".into(),
            refresh_name: "refresh_token".into(),
            secure: true,
            http_only: true,
            same_site: SameSite::None,
            domain: None,
            access_max_age_secs: jwt.access_ttl_minutes * 60,
            refresh_max_age_secs: jwt.refresh_ttl_minutes * 60,
        }
    }

    /// Relaxed cookies for local testing against a dev frontend.
    pub fn development() -> Self {
        const WEEK: i64 = 60 * 60 * 24 * 7;
        Self {
            access_name: "access_token".into(),
            refresh_name: "refresh_token".into(),
            secure: false,
            http_only: false,
            same_site: SameSite::Lax,
            domain: None,
            access_max_age_secs: WEEK,
            refresh_max_age_secs: WEEK,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OAuthProviderConfig {
    pub client_id: ClientId,
    pub client_secret: ClientSecret,
    pub auth_url: AuthUrl,
    pub token_url: TokenUrl,
    pub redirect_url: RedirectUrl,
}

#[derive(Debug, Clone, Default)]
pub struct OAuthConfig {
    pub google: Option<OAuthProviderConfig>,
    pub github: Option<OAuthProviderConfig>,
    pub trust_verified_email: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailProvider {
    Console,
    Sendgrid { api_key: String },
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub provider: MailProvider,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub production: bool,
    pub frontend_base_url: String,
    pub jwt: JwtConfig,
    pub password: PasswordConfig,
    pub cookies: CookieConfig,
    pub oauth: OAuthConfig,
    pub mail: MailConfig,
    pub verification_max_attempts: i32,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
        let production = std::env::var("APP_MODE")
            .map(|v| v.eq_ignore_ascii_case("production"))
            .unwrap_or(false);
        let frontend_base_url = std::env::var("FRONTEND_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:3000".into())
            .trim_end_matches('/')
            .to_string();
        let public_base_url = std::env::var("PUBLIC_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8080".into())
            .trim_end_matches('/')
            .to_string();

        let jwt = JwtConfig {
            access_secret: std::env::var("JWT_ACCESS_SECRET").context("JWT_ACCESS_SECRET not set")?,
            refresh_secret: std::env::var("JWT_REFRESH_SECRET")
                .context("JWT_REFRESH_SECRET not set")?,
            reset_secret: std::env::var("JWT_RESET_SECRET").context("JWT_RESET_SECRET not set")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "jarvis".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "jarvis-users".into()),
            access_ttl_minutes: env_parse("JWT_ACCESS_TTL_MINUTES", 30),
            refresh_ttl_minutes: env_parse("JWT_REFRESH_TTL_MINUTES", 60 * 24 * 7),
            reset_ttl_minutes: env_parse("JWT_RESET_TTL_MINUTES", 60),
            leeway_secs: env_parse("JWT_LEEWAY_SECS", 30),
        };
        anyhow::ensure!(
            jwt.access_secret != jwt.refresh_secret
                && jwt.access_secret != jwt.reset_secret
                && jwt.refresh_secret != jwt.reset_secret,
            "access, refresh and reset secrets must differ"
        );

        let password = PasswordConfig {
            memory_kib: env_parse("PASSWORD_MEMORY_KIB", argon2::Params::DEFAULT_M_COST),
            iterations: env_parse("PASSWORD_ITERATIONS", argon2::Params::DEFAULT_T_COST),
            parallelism: env_parse("PASSWORD_PARALLELISM", argon2::Params::DEFAULT_P_COST),
        };

        let mut cookies = if production {
            CookieConfig::production(&jwt)
        } else {
            CookieConfig::development()
        };
        if let Ok(name) = std::env::var("ACCESS_COOKIE_NAME") {
            cookies.access_name = name;
        }
        if let Ok(name) = std::env::var("REFRESH_COOKIE_NAME") {
            cookies.refresh_name = name;
        }
        cookies.secure = env_parse("COOKIE_SECURE", cookies.secure);
        cookies.http_only = env_parse("COOKIE_HTTP_ONLY", cookies.http_only);
        if let Ok(v) = std::env::var("COOKIE_SAME_SITE") {
            cookies.same_site = parse_same_site(&v)?;
        }
        cookies.domain = std::env::var("COOKIE_DOMAIN").ok().filter(|d| !d.is_empty());

        let oauth = OAuthConfig {
            google: provider_from_env(
                "GOOGLE",
                "https://accounts.google.com/o/oauth2/v2/auth",
                "https://oauth2.googleapis.com/token",
                &format!("{public_base_url}/api/v1/auth/google/callback"),
            )?,
            github: provider_from_env(
                "GITHUB",
                "https://github.com/login/oauth/authorize",
                "https://github.com/login/oauth/access_token",
                &format!("{public_base_url}/api/v1/auth/github/callback"),
            )?,
            trust_verified_email: env_parse("OAUTH_TRUST_VERIFIED_EMAIL", false),
        };

        let provider = match std::env::var("MAIL_PROVIDER").as_deref() {
            Ok("sendgrid") => MailProvider::Sendgrid {
                api_key: std::env::var("SENDGRID_API_KEY").context("SENDGRID_API_KEY not set")?,
            },
            _ => MailProvider::Console,
        };
        let mail = MailConfig {
            provider,
            from: std::env::var("MAIL_FROM").unwrap_or_else(|_| "no-reply@jarvis.local".into()),
        };

        Ok(Self {
            database_url,
            production,
            frontend_base_url,
            jwt,
            password,
            cookies,
            oauth,
            mail,
            verification_max_attempts: env_parse("VERIFICATION_MAX_ATTEMPTS", 5),
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn parse_same_site(value: &str) -> anyhow::Result<SameSite> {
    match value.to_ascii_lowercase().as_str() {
        "strict" => Ok(SameSite::Strict),
        "lax" => Ok(SameSite::Lax),
        "none" => Ok(SameSite::None),
        other => anyhow::bail!("unknown COOKIE_SAME_SITE value: {other}"),
    }
}

/// A provider is enabled only when both its client id and secret are present.
fn provider_from_env(
    prefix: &str,
    auth_url: &str,
    token_url: &str,
    redirect_url: &str,
) -> anyhow::Result<Option<OAuthProviderConfig>> {
    let (Ok(client_id), Ok(client_secret)) = (
        std::env::var(format!("{prefix}_CLIENT_ID")),
        std::env::var(format!("{prefix}_CLIENT_SECRET")),
    ) else {
        return Ok(None);
    };
    let redirect = std::env::var(format!("{prefix}_CALLBACK_URL"))
        .unwrap_or_else(|_| redirect_url.to_string());

    Ok(Some(OAuthProviderConfig {
        client_id: ClientId::new(client_id),
        client_secret: ClientSecret::new(client_secret),
        auth_url: AuthUrl::new(auth_url.to_string())?,
        token_url: TokenUrl::new(token_url.to_string())?,
        redirect_url: RedirectUrl::new(redirect)?,
    }))
}
