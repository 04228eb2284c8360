use std::{future::Future, sync::Arc, time::Duration};

use time::Duration as TimeDuration;
use tracing::{info, instrument, warn};

use super::{
    claims::TokenKind,
    dto::{normalize_email, PublicUser},
    error::AuthError,
    jwt::JwtKeys,
    password::{hash_password, verify_against_dummy, verify_password},
    repo::{PasswordResetStore, RefreshTokenStore, UserRepository},
    repo_types::{NewUser, ProfileUpdate, User},
    tokens::generate_token,
};
use crate::{clock::Clock, email::EmailSender};

const VERIFICATION_TTL: TimeDuration = TimeDuration::hours(24);
const RESET_TTL: TimeDuration = TimeDuration::hours(1);

pub const FORGOT_PASSWORD_MESSAGE: &str =
    "If an account with that email exists, a password reset link has been sent";

/// Result of register and login: the refresh token goes to the cookie only.
#[derive(Debug)]
pub struct SessionGrant {
    pub user: PublicUser,
    pub access_token: String,
    pub refresh_token: String,
    pub refresh_max_age: Duration,
}

#[derive(Debug)]
pub struct AccessGrant {
    pub user: PublicUser,
    pub access_token: String,
}

/// Runs a side effect whose failure must not fail the request. `true` if it succeeded.
async fn best_effort<F>(label: &'static str, fut: F) -> bool
where
    F: Future<Output = anyhow::Result<()>>,
{
    match fut.await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, what = label, "best-effort side effect failed");
            false
        }
    }
}

/// Runs an email side effect the caller depends on.
async fn must_succeed<F>(label: &'static str, fut: F) -> Result<(), AuthError>
where
    F: Future<Output = anyhow::Result<()>>,
{
    fut.await.map_err(|e| {
        warn!(error = %e, what = label, "email delivery failed");
        AuthError::EmailDeliveryFailed
    })
}

/// Authentication and session lifecycle over injected stores.
#[derive(Clone)]
pub struct SessionService {
    users: Arc<dyn UserRepository>,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    resets: Arc<dyn PasswordResetStore>,
    mailer: Arc<dyn EmailSender>,
    keys: JwtKeys,
    clock: Arc<dyn Clock>,
}

impl SessionService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        resets: Arc<dyn PasswordResetStore>,
        mailer: Arc<dyn EmailSender>,
        keys: JwtKeys,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            users,
            refresh_tokens,
            resets,
            mailer,
            keys,
            clock,
        }
    }

    pub fn refresh_tokens(&self) -> Arc<dyn RefreshTokenStore> {
        self.refresh_tokens.clone()
    }

    async fn start_session(&self, user: &User) -> Result<SessionGrant, AuthError> {
        let access_token = self.keys.sign_access(user.id)?;
        let refresh_token = self.keys.sign_refresh(user.id)?;
        best_effort(
            "store refresh token",
            self.refresh_tokens
                .store(user.id, &refresh_token, self.keys.refresh_expires_at()),
        )
        .await;
        Ok(SessionGrant {
            user: PublicUser::from(user),
            access_token,
            refresh_token,
            refresh_max_age: self.keys.refresh_ttl,
        })
    }

    #[instrument(skip(self, password, full_name, phone))]
    pub async fn register(
        &self,
        full_name: &str,
        email: &str,
        password: &str,
        phone: Option<&str>,
    ) -> Result<SessionGrant, AuthError> {
        let email = normalize_email(email);
        if self.users.find_by_email(&email).await?.is_some() {
            warn!(%email, "email already registered");
            return Err(AuthError::DuplicateEmail);
        }

        let new_user = NewUser {
            full_name: full_name.trim().to_string(),
            email,
            password_hash: hash_password(password)?,
            phone: phone
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string),
            verification_token: generate_token(),
            verification_expires: self.clock.now() + VERIFICATION_TTL,
        };
        // lost race against a concurrent register with the same email
        let user = self
            .users
            .insert(&new_user)
            .await?
            .ok_or(AuthError::DuplicateEmail)?;

        best_effort(
            "send verification email",
            self.mailer.send_verification_email(
                &user.email,
                &new_user.verification_token,
                &user.full_name,
            ),
        )
        .await;

        info!(user_id = user.id, email = %user.email, "user registered");
        self.start_session(&user).await
    }

    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<SessionGrant, AuthError> {
        let email = normalize_email(email);
        let Some(user) = self.users.find_by_email(&email).await? else {
            // same argon2 cost as a real account
            verify_against_dummy(password);
            warn!(%email, "login unknown email");
            return Err(AuthError::InvalidCredentials);
        };
        if !verify_password(password, &user.password_hash)? {
            warn!(user_id = user.id, "login invalid password");
            return Err(AuthError::InvalidCredentials);
        }
        info!(user_id = user.id, "user logged in");
        self.start_session(&user).await
    }

    /// New access token for a stored, unrevoked refresh token. The refresh
    /// token itself is reused until it expires or is revoked.
    #[instrument(skip_all)]
    pub async fn refresh(&self, cookie: Option<&str>) -> Result<AccessGrant, AuthError> {
        let raw = cookie
            .filter(|c| !c.is_empty())
            .ok_or(AuthError::MissingToken)?;

        let Some(record) = self.refresh_tokens.find_valid(raw).await? else {
            warn!("refresh token revoked or unknown");
            return Err(AuthError::TokenRevokedOrUnknown);
        };

        if let Err(e) = self.keys.verify(raw, TokenKind::Refresh) {
            warn!(error = %e, user_id = record.user_id, "stored refresh token failed verification");
            best_effort("revoke refresh token", self.refresh_tokens.revoke(raw)).await;
            return Err(AuthError::TokenExpired);
        }

        let user = self
            .users
            .find_by_id(record.user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        let access_token = self.keys.sign_access(user.id)?;
        info!(user_id = user.id, "access token refreshed");
        Ok(AccessGrant {
            user: PublicUser::from(&user),
            access_token,
        })
    }

    #[instrument(skip_all)]
    pub async fn logout(&self, cookie: Option<&str>) {
        if let Some(raw) = cookie.filter(|c| !c.is_empty()) {
            if best_effort("revoke refresh token", self.refresh_tokens.revoke(raw)).await {
                info!("refresh token revoked");
            }
        }
    }

    /// Always answers the same way, whether or not the account exists.
    #[instrument(skip(self))]
    pub async fn forgot_password(&self, email: &str) -> Result<&'static str, AuthError> {
        let email = normalize_email(email);
        let Some(user) = self.users.find_by_email(&email).await? else {
            info!("password reset requested for unknown email");
            return Ok(FORGOT_PASSWORD_MESSAGE);
        };

        let token = generate_token();
        self.resets.delete_all_for_user(user.id).await?;
        self.resets
            .insert(user.id, &token, self.clock.now() + RESET_TTL)
            .await?;

        must_succeed(
            "send password reset email",
            self.mailer
                .send_password_reset_email(&user.email, &token, &user.full_name),
        )
        .await?;

        info!(user_id = user.id, "password reset email sent");
        Ok(FORGOT_PASSWORD_MESSAGE)
    }

    #[instrument(skip_all)]
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), AuthError> {
        let reset = self
            .resets
            .find_usable_by_token(token.trim())
            .await?
            .filter(|r| !r.used && r.expires_at > self.clock.now())
            .ok_or(AuthError::InvalidOrExpiredToken)?;

        let hash = hash_password(new_password)?;
        if !self.resets.redeem(&reset, &hash).await? {
            warn!(user_id = reset.user_id, "reset token consumed by a concurrent request");
            return Err(AuthError::InvalidOrExpiredToken);
        }
        info!(user_id = reset.user_id, "password reset");
        Ok(())
    }

    #[instrument(skip_all)]
    pub async fn verify_email(&self, token: Option<&str>) -> Result<(), AuthError> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;

        let user = self
            .users
            .find_by_verification_token(token)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        let expired = user
            .email_verification_token_expires
            .map_or(true, |exp| exp <= self.clock.now());
        if expired {
            warn!(user_id = user.id, "verification token expired");
            return Err(AuthError::TokenExpired);
        }
        if user.email_verified {
            return Err(AuthError::AlreadyVerified);
        }

        self.users
            .update_verification(user.id, true, None, None)
            .await?;
        info!(user_id = user.id, "email verified");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn resend_verification(&self, user_id: i64) -> Result<(), AuthError> {
        let user = self.load_user(user_id).await?;
        if user.email_verified {
            return Err(AuthError::AlreadyVerified);
        }

        let token = generate_token();
        self.users
            .update_verification(
                user.id,
                false,
                Some(&token),
                Some(self.clock.now() + VERIFICATION_TTL),
            )
            .await?;

        must_succeed(
            "send verification email",
            self.mailer
                .send_verification_email(&user.email, &token, &user.full_name),
        )
        .await?;
        info!(user_id, "verification email resent");
        Ok(())
    }

    #[instrument(skip(self, current_password, new_password))]
    pub async fn change_password(
        &self,
        user_id: i64,
        current_password: Option<&str>,
        new_password: Option<&str>,
    ) -> Result<(), AuthError> {
        let (Some(current), Some(new)) = (
            current_password.filter(|p| !p.is_empty()),
            new_password.filter(|p| !p.is_empty()),
        ) else {
            return Err(AuthError::MissingFields);
        };

        let user = self.load_user(user_id).await?;
        if !verify_password(current, &user.password_hash)? {
            warn!(user_id, "change password with wrong current password");
            return Err(AuthError::IncorrectPassword);
        }

        let hash = hash_password(new)?;
        self.users.update_password_hash(user.id, &hash).await?;
        info!(user_id, "password changed");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn current_user(&self, user_id: i64) -> Result<PublicUser, AuthError> {
        let user = self.load_user(user_id).await?;
        Ok(PublicUser::from(&user))
    }

    #[instrument(skip(self, update))]
    pub async fn update_profile(
        &self,
        user_id: i64,
        update: &ProfileUpdate,
    ) -> Result<PublicUser, AuthError> {
        if update.is_empty() {
            return Err(AuthError::MissingFields);
        }
        let user = self
            .users
            .update_profile(user_id, update)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        info!(user_id, "profile updated");
        Ok(PublicUser::from(&user))
    }

    async fn load_user(&self, user_id: i64) -> Result<User, AuthError> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)
    }
}
