//! In-memory collaborators used by tests.

use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::auth::repo::UserStore;
use crate::auth::repo_types::{NewUser, Role, User, UserPatch};
use crate::error::AuthError;
use crate::mail::{MailMessage, Mailer};

#[derive(Default)]
pub struct InMemoryUserStore {
    users: Mutex<Vec<User>>,
}

impl InMemoryUserStore {
    /// Flip a stored flag directly, as an admin action would.
    pub fn set_active(&self, id: i64, active: bool) {
        let mut users = self.users.lock().unwrap();
        if let Some(u) = users.iter_mut().find(|u| u.id == id) {
            u.is_active = active;
        }
    }

    pub fn count(&self) -> usize {
        self.users.lock().unwrap().len()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<User>, AuthError> {
        Ok(self.users.lock().unwrap().iter().find(|u| u.id == id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AuthError> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.username.as_deref() == Some(username))
            .cloned())
    }

    async fn create(&self, new: NewUser) -> Result<User, AuthError> {
        let mut users = self.users.lock().unwrap();
        if users.iter().any(|u| u.email == new.email) {
            return Err(AuthError::EmailTaken);
        }
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: users.len() as i64 + 1,
            email: new.email,
            username: None,
            password_hash: new.password_hash,
            first_name: new.first_name,
            last_name: new.last_name,
            role: Role::User,
            is_active: true,
            is_verified: new.is_verified,
            verification_token: None,
            verification_attempts: 0,
            reset_password_secret: None,
            refresh_token_hash: None,
            photo: new.photo,
            bio: None,
            phone: None,
            created_at: now,
            updated_at: now,
        };
        users.push(user.clone());
        Ok(user)
    }

    async fn update(&self, id: i64, patch: UserPatch) -> Result<Option<User>, AuthError> {
        let mut users = self.users.lock().unwrap();
        if let Some(Some(name)) = &patch.username {
            if users
                .iter()
                .any(|u| u.id != id && u.username.as_deref() == Some(name.as_str()))
            {
                return Err(AuthError::UsernameTaken);
            }
        }
        let Some(user) = users.iter_mut().find(|u| u.id == id) else {
            return Ok(None);
        };
        patch.apply(user);
        Ok(Some(user.clone()))
    }

    async fn claim_verification_attempt(
        &self,
        id: i64,
        max: i32,
    ) -> Result<Option<i32>, AuthError> {
        let mut users = self.users.lock().unwrap();
        let Some(user) = users.iter_mut().find(|u| u.id == id) else {
            return Ok(None);
        };
        if user.verification_attempts >= max {
            return Ok(None);
        }
        user.verification_attempts += 1;
        Ok(Some(user.verification_attempts))
    }
}

/// Keeps every message instead of delivering it. Can be told to fail.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<MailMessage>>,
    failing: Mutex<bool>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<MailMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn last_to(&self, to: &str) -> Option<MailMessage> {
        self.sent()
            .into_iter()
            .rev()
            .find(|m| m.to == to)
    }

    pub fn fail_deliveries(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_mail(&self, message: MailMessage) -> anyhow::Result<()> {
        if *self.failing.lock().unwrap() {
            anyhow::bail!("smtp relay unavailable");
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

/// Insert an unverified password account directly through the store.
pub async fn seed_user(state: &crate::state::AppState, email: &str, password: &str) -> User {
    state
        .users
        .create(NewUser {
            email: email.to_string(),
            password_hash: state.hasher.hash(password).unwrap(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            photo: None,
            is_verified: false,
        })
        .await
        .unwrap()
}
