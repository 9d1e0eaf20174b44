use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    User,
    Admin,
    Superadmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Admin => "ADMIN",
            Role::Superadmin => "SUPERADMIN",
        }
    }
}

impl TryFrom<String> for Role {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "USER" => Ok(Role::User),
            "ADMIN" => Ok(Role::Admin),
            "SUPERADMIN" => Ok(Role::Superadmin),
            other => anyhow::bail!("unknown role {other}"),
        }
    }
}

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub email: String, // always lower-case
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String, // Argon2 PHC string, empty for OAuth-only accounts
    pub first_name: String,
    pub last_name: String,
    #[sqlx(try_from = "String")]
    pub role: Role,
    pub is_active: bool,
    pub is_verified: bool,
    #[serde(skip_serializing)]
    pub verification_token: Option<String>, // hash of the pending 6-digit code
    #[serde(skip_serializing)]
    pub verification_attempts: i32,
    #[serde(skip_serializing)]
    pub reset_password_secret: Option<String>,
    #[serde(skip_serializing)]
    pub refresh_token_hash: Option<String>,
    pub photo: Option<String>,
    pub bio: Option<String>,
    pub phone: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl User {
    pub fn has_password(&self) -> bool {
        !self.password_hash.is_empty()
    }
}

/// Fields required to insert a user. Everything else takes its column default.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub photo: Option<String>,
    pub is_verified: bool,
}

/// Partial update applied by id. `None` leaves a column untouched;
/// `Some(None)` clears a nullable column.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub password_hash: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<Option<String>>,
    pub is_verified: Option<bool>,
    pub verification_token: Option<Option<String>>,
    pub verification_attempts: Option<i32>,
    pub reset_password_secret: Option<Option<String>>,
    pub refresh_token_hash: Option<Option<String>>,
    pub photo: Option<Option<String>>,
    pub bio: Option<Option<String>>,
    pub phone: Option<Option<String>>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self.password_hash.is_none()
            && self.first_name.is_none()
            && self.last_name.is_none()
            && self.username.is_none()
            && self.is_verified.is_none()
            && self.verification_token.is_none()
            && self.verification_attempts.is_none()
            && self.reset_password_secret.is_none()
            && self.refresh_token_hash.is_none()
            && self.photo.is_none()
            && self.bio.is_none()
            && self.phone.is_none()
    }

    pub fn refresh_token_hash(hash: Option<String>) -> Self {
        Self {
            refresh_token_hash: Some(hash),
            ..Self::default()
        }
    }

    /// Apply the patch to an in-memory copy of the record.
    pub fn apply(self, user: &mut User) {
        if let Some(v) = self.password_hash {
            user.password_hash = v;
        }
        if let Some(v) = self.first_name {
            user.first_name = v;
        }
        if let Some(v) = self.last_name {
            user.last_name = v;
        }
        if let Some(v) = self.username {
            user.username = v;
        }
        if let Some(v) = self.is_verified {
            user.is_verified = v;
        }
        if let Some(v) = self.verification_token {
            user.verification_token = v;
        }
        if let Some(v) = self.verification_attempts {
            user.verification_attempts = v;
        }
        if let Some(v) = self.reset_password_secret {
            user.reset_password_secret = v;
        }
        if let Some(v) = self.refresh_token_hash {
            user.refresh_token_hash = v;
        }
        if let Some(v) = self.photo {
            user.photo = v;
        }
        if let Some(v) = self.bio {
            user.bio = v;
        }
        if let Some(v) = self.phone {
            user.phone = v;
        }
        user.updated_at = OffsetDateTime::now_utc();
    }
}
