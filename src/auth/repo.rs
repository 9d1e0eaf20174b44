use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::warn;

use crate::auth::repo_types::{NewUser, User, UserPatch};
use crate::error::AuthError;

const USER_COLUMNS: &str = "id, email, username, password_hash, first_name, last_name, role, \
     is_active, is_verified, verification_token, verification_attempts, reset_password_secret, \
     refresh_token_hash, photo, bio, phone, created_at, updated_at";

/// Read/write contract for user records.
///
/// Emails and usernames are expected lower-cased by the caller; implementations enforce
/// uniqueness and report conflicts as `EmailTaken` / `UsernameTaken`.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: i64) -> Result<Option<User>, AuthError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError>;
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AuthError>;
    async fn create(&self, user: NewUser) -> Result<User, AuthError>;
    /// Returns `None` when no row has this id.
    async fn update(&self, id: i64, patch: UserPatch) -> Result<Option<User>, AuthError>;
    /// Atomically bump the verification attempt counter while it is below `max`.
    /// Returns the new count, or `None` once the cap is reached (or no row has this id).
    async fn claim_verification_attempt(&self, id: i64, max: i32)
        -> Result<Option<i32>, AuthError>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn find_one(&self, column: &str, value: &str) -> Result<Option<User>, AuthError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(value)
            .fetch_optional(&self.db)
            .await
            .map_err(db_error)?;
        Ok(user)
    }
}

fn db_error(e: sqlx::Error) -> AuthError {
    if let sqlx::Error::Database(ref db) = e {
        if db.is_unique_violation() {
            match db.constraint() {
                Some("users_email_key") => return AuthError::EmailTaken,
                Some("users_username_key") => return AuthError::UsernameTaken,
                other => warn!(constraint = ?other, "unexpected unique violation"),
            }
        }
    }
    AuthError::Internal(anyhow::Error::new(e).context("users query failed"))
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<User>, AuthError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .map_err(db_error)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        self.find_one("email", email).await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AuthError> {
        self.find_one("username", username).await
    }

    async fn create(&self, user: NewUser) -> Result<User, AuthError> {
        let sql = format!(
            r#"
            INSERT INTO users (email, password_hash, first_name, last_name, photo, is_verified)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {USER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(&user.photo)
            .bind(user.is_verified)
            .fetch_one(&self.db)
            .await
            .map_err(db_error)
    }

    async fn update(&self, id: i64, patch: UserPatch) -> Result<Option<User>, AuthError> {
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE users SET updated_at = NOW()");
        if let Some(v) = patch.password_hash {
            qb.push(", password_hash = ").push_bind(v);
        }
        if let Some(v) = patch.first_name {
            qb.push(", first_name = ").push_bind(v);
        }
        if let Some(v) = patch.last_name {
            qb.push(", last_name = ").push_bind(v);
        }
        if let Some(v) = patch.username {
            qb.push(", username = ").push_bind(v);
        }
        if let Some(v) = patch.is_verified {
            qb.push(", is_verified = ").push_bind(v);
        }
        if let Some(v) = patch.verification_token {
            qb.push(", verification_token = ").push_bind(v);
        }
        if let Some(v) = patch.verification_attempts {
            qb.push(", verification_attempts = ").push_bind(v);
        }
        if let Some(v) = patch.reset_password_secret {
            qb.push(", reset_password_secret = ").push_bind(v);
        }
        if let Some(v) = patch.refresh_token_hash {
            qb.push(", refresh_token_hash = ").push_bind(v);
        }
        if let Some(v) = patch.photo {
            qb.push(", photo = ").push_bind(v);
        }
        if let Some(v) = patch.bio {
            qb.push(", bio = ").push_bind(v);
        }
        if let Some(v) = patch.phone {
            qb.push(", phone = ").push_bind(v);
        }
        qb.push(" WHERE id = ").push_bind(id);
        qb.push(" RETURNING ").push(USER_COLUMNS);

        qb.build_query_as::<User>()
            .fetch_optional(&self.db)
            .await
            .map_err(db_error)
    }

    async fn claim_verification_attempt(
        &self,
        id: i64,
        max: i32,
    ) -> Result<Option<i32>, AuthError> {
        sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE users
            SET verification_attempts = verification_attempts + 1, updated_at = NOW()
            WHERE id = $1 AND verification_attempts < $2
            RETURNING verification_attempts
            "#,
        )
        .bind(id)
        .bind(max)
        .fetch_optional(&self.db)
        .await
        .map_err(db_error)
    }
}
