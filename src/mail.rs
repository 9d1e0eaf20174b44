//! Outbound transactional mail.
//!
//! Providers:
//! - `console`: logs the message (development)
//! - `sendgrid`: SendGrid v3 HTTP API

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::{MailConfig, MailProvider};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_mail(&self, message: MailMessage) -> anyhow::Result<()>;
}

/// Build the configured mailer on top of the shared HTTP client.
pub fn from_config(cfg: &MailConfig, http: reqwest::Client) -> std::sync::Arc<dyn Mailer> {
    match &cfg.provider {
        MailProvider::Console => std::sync::Arc::new(ConsoleMailer {
            from: cfg.from.clone(),
        }),
        MailProvider::Sendgrid { api_key } => std::sync::Arc::new(SendgridMailer::new(
            http,
            api_key.clone(),
            cfg.from.clone(),
        )),
    }
}

pub struct ConsoleMailer {
    pub from: String,
}

#[async_trait]
impl Mailer for ConsoleMailer {
    async fn send_mail(&self, message: MailMessage) -> anyhow::Result<()> {
        info!(
            to = %message.to,
            from = %self.from,
            subject = %message.subject,
            "email (console provider)"
        );
        debug!(body_html = %message.html, "email body");
        Ok(())
    }
}

pub struct SendgridMailer {
    client: reqwest::Client,
    api_key: String,
    from: String,
}

impl SendgridMailer {
    pub fn new(client: reqwest::Client, api_key: String, from: String) -> Self {
        Self {
            client,
            api_key,
            from,
        }
    }
}

#[async_trait]
impl Mailer for SendgridMailer {
    async fn send_mail(&self, message: MailMessage) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "personalizations": [{ "to": [{ "email": message.to }] }],
            "from": { "email": self.from },
            "subject": message.subject,
            "content": [{ "type": "text/html", "value": message.html }],
        });

        let response = self
            .client
            .post("https://api.sendgrid.com/v3/mail/send")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("sendgrid responded {status}: {text}");
        }
        info!(to = %message.to, subject = %message.subject, "email sent via sendgrid");
        Ok(())
    }
}

/// Best-effort delivery: failures are logged and swallowed.
pub async fn deliver(mailer: &dyn Mailer, message: MailMessage) {
    let to = message.to.clone();
    let subject = message.subject.clone();
    if let Err(e) = mailer.send_mail(message).await {
        warn!(error = %e, %to, %subject, "email delivery failed");
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

pub fn verification_code_message(to: &str, first_name: &str, code: &str) -> MailMessage {
    let first_name = html_escape(first_name);
    let code = html_escape(code);
    MailMessage {
        to: to.to_string(),
        subject: "Verify your email".into(),
        html: format!(
            "<p>Hi {first_name},</p>\
             <p>Your verification code is <b>{code}</b>.</p>\
             <p>If you didn't create an account, you can ignore this email.</p>"
        ),
    }
}

pub fn password_reset_message(to: &str, first_name: &str, link: &str) -> MailMessage {
    let first_name = html_escape(first_name);
    let link = html_escape(link);
    MailMessage {
        to: to.to_string(),
        subject: "Reset your password".into(),
        html: format!(
            "<p>Hi {first_name},</p>\
             <p>We received a request to reset your password.</p>\
             <p><a href=\"{link}\">Choose a new password</a></p>\
             <p>If you didn't request this, your password will remain unchanged.</p>"
        ),
    }
}
