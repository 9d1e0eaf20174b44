use jsonwebtoken::{
    decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation,
};
use rand::{distributions::Alphanumeric, Rng};
use time::{Duration, OffsetDateTime};
use tracing::debug;

use super::claims::{Claims, TokenKind};
use super::password::CredentialHasher;
use crate::config::JwtConfig;

/// Why a presented token was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("invalid token")]
    Invalid,
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Invalid,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Clone)]
struct PurposeKey {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl PurposeKey {
    fn new(secret: &str, ttl_minutes: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::minutes(ttl_minutes),
        }
    }
}

/// Mints and verifies access, refresh and password-reset tokens.
///
/// Every purpose is signed with its own secret, so a token minted for one purpose fails
/// signature verification when presented for another.
#[derive(Clone)]
pub struct TokenService {
    access: PurposeKey,
    refresh: PurposeKey,
    reset: PurposeKey,
    issuer: String,
    audience: String,
    leeway_secs: u64,
    hasher: CredentialHasher,
}

impl TokenService {
    pub fn new(cfg: &JwtConfig, hasher: CredentialHasher) -> Self {
        Self {
            access: PurposeKey::new(&cfg.access_secret, cfg.access_ttl_minutes),
            refresh: PurposeKey::new(&cfg.refresh_secret, cfg.refresh_ttl_minutes),
            reset: PurposeKey::new(&cfg.reset_secret, cfg.reset_ttl_minutes),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            leeway_secs: cfg.leeway_secs,
            hasher,
        }
    }

    fn key(&self, kind: TokenKind) -> &PurposeKey {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
            TokenKind::Reset => &self.reset,
        }
    }

    fn sign_at(
        &self,
        user_id: i64,
        kind: TokenKind,
        issued_at: OffsetDateTime,
    ) -> anyhow::Result<String> {
        let key = self.key(kind);
        let exp = issued_at + key.ttl;
        let claims = Claims {
            id: user_id,
            iat: issued_at.unix_timestamp(),
            exp: exp.unix_timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti: rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(16)
                .map(char::from)
                .collect(),
            kind,
        };
        let token = encode(&Header::default(), &claims, &key.encoding)?;
        debug!(user_id, kind = ?kind, "jwt signed");
        Ok(token)
    }

    fn verify_kind(&self, token: &str, kind: TokenKind) -> Result<Claims, TokenError> {
        let mut validation = Validation::default();
        validation.leeway = self.leeway_secs;
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<Claims>(token, &self.key(kind).decoding, &validation)?;
        if data.claims.kind != kind {
            return Err(TokenError::Invalid);
        }
        debug!(user_id = data.claims.id, kind = ?kind, "jwt verified");
        Ok(data.claims)
    }

    pub fn generate_token_pair(&self, user_id: i64) -> anyhow::Result<TokenPair> {
        let now = OffsetDateTime::now_utc();
        Ok(TokenPair {
            access_token: self.sign_at(user_id, TokenKind::Access, now)?,
            refresh_token: self.sign_at(user_id, TokenKind::Refresh, now)?,
        })
    }

    pub fn verify_access_token(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_kind(token, TokenKind::Access)
    }

    pub fn verify_refresh_token(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_kind(token, TokenKind::Refresh)
    }

    pub fn generate_password_reset_token(&self, user_id: i64) -> anyhow::Result<String> {
        self.sign_at(user_id, TokenKind::Reset, OffsetDateTime::now_utc())
    }

    pub fn verify_password_reset_token(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_kind(token, TokenKind::Reset)
    }

    /// Digest stored against the user; the raw refresh token is never persisted.
    pub fn hash_refresh_token(&self, token: &str) -> anyhow::Result<String> {
        self.hasher.hash(token)
    }

    pub fn compare_refresh_token(&self, token: &str, stored: Option<&str>) -> bool {
        stored.is_some_and(|digest| self.hasher.verify(token, digest))
    }
}

#[cfg(test)]
pub(crate) fn test_jwt_config() -> JwtConfig {
    JwtConfig {
        access_secret: "test-access-secret".into(),
        refresh_secret: "test-refresh-secret".into(),
        reset_secret: "test-reset-secret".into(),
        issuer: "test-issuer".into(),
        audience: "test-aud".into(),
        access_ttl_minutes: 5,
        refresh_ttl_minutes: 60,
        reset_ttl_minutes: 15,
        leeway_secs: 0,
    }
}

/// Flip one character in the middle of the signature segment.
#[cfg(test)]
pub(crate) fn tamper_signature(token: &str) -> String {
    let mut bytes = token.as_bytes().to_vec();
    let idx = bytes.len() - 10;
    bytes[idx] = if bytes[idx] == b'A' { b'B' } else { b'A' };
    String::from_utf8(bytes).expect("jwt is ascii")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::test_hasher;

    fn make_service() -> TokenService {
        TokenService::new(&test_jwt_config(), test_hasher())
    }

    #[test]
    fn sign_and_verify_access_token() {
        let tokens = make_service();
        let pair = tokens.generate_token_pair(42).expect("sign pair");
        let claims = tokens.verify_access_token(&pair.access_token).expect("verify");
        assert_eq!(claims.id, 42);
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-aud");
        assert_eq!(claims.kind, TokenKind::Access);
        assert_eq!(claims.exp - claims.iat, 5 * 60);
    }

    #[test]
    fn sign_and_verify_refresh_token() {
        let tokens = make_service();
        let pair = tokens.generate_token_pair(7).unwrap();
        let claims = tokens.verify_refresh_token(&pair.refresh_token).unwrap();
        assert_eq!(claims.id, 7);
        assert_eq!(claims.kind, TokenKind::Refresh);
        assert_ne!(pair.access_token, pair.refresh_token);
    }

    #[test]
    fn same_second_tokens_differ() {
        let tokens = make_service();
        let a = tokens.generate_token_pair(7).unwrap();
        let b = tokens.generate_token_pair(7).unwrap();
        assert_ne!(a.refresh_token, b.refresh_token);
    }

    #[test]
    fn tokens_are_rejected_for_other_purposes() {
        let tokens = make_service();
        let pair = tokens.generate_token_pair(1).unwrap();
        let reset = tokens.generate_password_reset_token(1).unwrap();

        assert_eq!(
            tokens.verify_refresh_token(&pair.access_token).unwrap_err(),
            TokenError::Invalid
        );
        assert_eq!(
            tokens.verify_access_token(&pair.refresh_token).unwrap_err(),
            TokenError::Invalid
        );
        assert_eq!(tokens.verify_access_token(&reset).unwrap_err(), TokenError::Invalid);
        assert_eq!(
            tokens.verify_password_reset_token(&pair.access_token).unwrap_err(),
            TokenError::Invalid
        );
        assert_eq!(tokens.verify_password_reset_token(&reset).unwrap().id, 1);
    }

    #[test]
    fn expired_access_token_is_reported_as_expired() {
        let tokens = make_service();
        let long_ago = OffsetDateTime::now_utc() - Duration::minutes(10);
        let token = tokens.sign_at(3, TokenKind::Access, long_ago).unwrap();
        assert_eq!(tokens.verify_access_token(&token).unwrap_err(), TokenError::Expired);
    }

    #[test]
    fn tampered_signature_is_invalid() {
        let tokens = make_service();
        let pair = tokens.generate_token_pair(3).unwrap();
        let tampered = tamper_signature(&pair.access_token);
        assert_eq!(tokens.verify_access_token(&tampered).unwrap_err(), TokenError::Invalid);
    }

    #[test]
    fn verify_rejects_wrong_issuer_or_audience() {
        let good = make_service();
        let mut cfg = test_jwt_config();
        cfg.issuer = "bad-iss".into();
        cfg.audience = "bad-aud".into();
        let bad = TokenService::new(&cfg, test_hasher());
        let pair = good.generate_token_pair(9).unwrap();
        assert_eq!(bad.verify_access_token(&pair.access_token).unwrap_err(), TokenError::Invalid);
    }

    #[test]
    fn malformed_token_is_invalid() {
        let tokens = make_service();
        assert_eq!(tokens.verify_access_token("not-a-jwt").unwrap_err(), TokenError::Invalid);
    }

    #[test]
    fn refresh_hash_matches_only_its_token() {
        let tokens = make_service();
        let first = tokens.generate_token_pair(5).unwrap();
        let digest = tokens.hash_refresh_token(&first.refresh_token).unwrap();
        assert_ne!(digest, first.refresh_token);
        assert!(tokens.compare_refresh_token(&first.refresh_token, Some(&digest)));
        assert!(!tokens.compare_refresh_token(&first.refresh_token, None));
        assert!(!tokens.compare_refresh_token("some-other-token", Some(&digest)));
    }
}
