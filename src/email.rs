use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::EmailConfig;

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_verification_email(
        &self,
        to: &str,
        token: &str,
        full_name: &str,
    ) -> anyhow::Result<()>;

    async fn send_password_reset_email(
        &self,
        to: &str,
        token: &str,
        full_name: &str,
    ) -> anyhow::Result<()>;
}

/// Picks the HTTP client when an API key is configured, otherwise logs.
pub fn from_config(cfg: &EmailConfig) -> Arc<dyn EmailSender> {
    match &cfg.api_key {
        Some(key) => Arc::new(ResendEmailClient::new(key, cfg)),
        None => {
            info!("EMAIL_API_KEY not set; emails will only be logged");
            Arc::new(LogEmailSender::new(&cfg.app_base_url))
        }
    }
}

fn verification_link(base: &str, token: &str) -> String {
    format!("{}/verify-email?token={}", base.trim_end_matches('/'), token)
}

fn reset_link(base: &str, token: &str) -> String {
    format!("{}/reset-password?token={}", base.trim_end_matches('/'), token)
}

#[derive(Clone)]
pub struct ResendEmailClient {
    client: Client,
    api_key: String,
    from: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: String,
}

impl ResendEmailClient {
    pub fn new(api_key: &str, cfg: &EmailConfig) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            from: format!("{} <{}>", cfg.from_name, cfg.from_email),
            base_url: cfg.app_base_url.clone(),
        }
    }

    async fn send(&self, to: &str, subject: &str, html: String) -> anyhow::Result<()> {
        let request = SendRequest {
            from: &self.from,
            to: [to],
            subject,
            html,
        };
        let response = self
            .client
            .post("https://api.resend.com/emails")
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("email API returned {status}: {body}");
        }
        debug!(%to, %subject, "email sent");
        Ok(())
    }
}

#[async_trait]
impl EmailSender for ResendEmailClient {
    async fn send_verification_email(
        &self,
        to: &str,
        token: &str,
        full_name: &str,
    ) -> anyhow::Result<()> {
        let link = verification_link(&self.base_url, token);
        let html = format!(
            r#"<p>Hi {full_name},</p>
            <p>Please confirm your email address to finish setting up your account:</p>
            <p><a href="{link}">Verify email</a></p>
            <p>This link expires in 24 hours.</p>"#
        );
        self.send(to, "Verify your email", html).await
    }

    async fn send_password_reset_email(
        &self,
        to: &str,
        token: &str,
        full_name: &str,
    ) -> anyhow::Result<()> {
        let link = reset_link(&self.base_url, token);
        let html = format!(
            r#"<p>Hi {full_name},</p>
            <p>We received a request to reset your password:</p>
            <p><a href="{link}">Reset password</a></p>
            <p>This link expires in 1 hour. If you did not ask for it, ignore this email.</p>"#
        );
        self.send(to, "Reset your password", html).await
    }
}

/// Development sender: writes the links to the log instead of mailing them.
#[derive(Clone)]
pub struct LogEmailSender {
    base_url: String,
}

impl LogEmailSender {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
        }
    }
}

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send_verification_email(
        &self,
        to: &str,
        token: &str,
        _full_name: &str,
    ) -> anyhow::Result<()> {
        info!(%to, link = %verification_link(&self.base_url, token), "verification email");
        Ok(())
    }

    async fn send_password_reset_email(
        &self,
        to: &str,
        token: &str,
        _full_name: &str,
    ) -> anyhow::Result<()> {
        info!(%to, link = %reset_link(&self.base_url, token), "password reset email");
        Ok(())
    }
}
