use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use time::Duration;

use crate::auth::jwt::TokenPair;
use crate::config::CookieConfig;

pub const HANDSHAKE_COOKIE: &str = "oauth_handshake";
const HANDSHAKE_MAX_AGE_SECS: i64 = 10 * 60;

fn token_cookie(cfg: &CookieConfig, name: &str, value: String, max_age_secs: i64) -> Cookie<'static> {
    let mut builder = Cookie::build((name.to_string(), value))
        .path("/")
        .http_only(cfg.http_only)
        .secure(cfg.secure)
        .same_site(cfg.same_site)
        .max_age(Duration::seconds(max_age_secs));
    if let Some(domain) = &cfg.domain {
        builder = builder.domain(domain.clone());
    }
    builder.build()
}

/// Expired cookie, emitted whether or not the client sent the original.
fn removal(cfg: &CookieConfig, name: &str) -> Cookie<'static> {
    let mut builder = Cookie::build((name.to_string(), "")).path("/");
    if let Some(domain) = &cfg.domain {
        builder = builder.domain(domain.clone());
    }
    let mut cookie = builder.build();
    cookie.make_removal();
    cookie
}

pub fn set_tokens(jar: CookieJar, cfg: &CookieConfig, tokens: &TokenPair) -> CookieJar {
    jar.add(token_cookie(
        cfg,
        &cfg.access_name,
        tokens.access_token.clone(),
        cfg.access_max_age_secs,
    ))
    .add(token_cookie(
        cfg,
        &cfg.refresh_name,
        tokens.refresh_token.clone(),
        cfg.refresh_max_age_secs,
    ))
}

pub fn clear_tokens(jar: CookieJar, cfg: &CookieConfig) -> CookieJar {
    jar.add(removal(cfg, &cfg.access_name))
        .add(removal(cfg, &cfg.refresh_name))
}

/// Always http-only and Lax, so it survives the top-level redirect back from the provider.
pub fn set_handshake(jar: CookieJar, cfg: &CookieConfig, value: String) -> CookieJar {
    jar.add(
        Cookie::build((HANDSHAKE_COOKIE, value))
            .path("/")
            .http_only(true)
            .secure(cfg.secure)
            .same_site(SameSite::Lax)
            .max_age(Duration::seconds(HANDSHAKE_MAX_AGE_SECS)),
    )
}

pub fn clear_handshake(jar: CookieJar) -> CookieJar {
    let mut cookie = Cookie::build((HANDSHAKE_COOKIE, "")).path("/").build();
    cookie.make_removal();
    jar.add(cookie)
}
