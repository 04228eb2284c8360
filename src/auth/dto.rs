use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::{
    error::AuthError,
    repo_types::{ProfileUpdate, Role, User},
};

pub const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn check_password(errors: &mut BTreeMap<&'static str, String>, field: &'static str, pw: &str) {
    if pw.chars().count() < MIN_PASSWORD_LEN {
        errors.insert(
            field,
            format!("Password must be at least {MIN_PASSWORD_LEN} characters"),
        );
    }
}

fn finish(errors: BTreeMap<&'static str, String>) -> Result<(), AuthError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AuthError::Validation(errors))
    }
}

/// Request body for user registration. Missing fields deserialize empty so
/// that `validate` reports them.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub phone: Option<String>,
}

impl RegisterRequest {
    pub fn validate(&self) -> Result<(), AuthError> {
        let mut errors = BTreeMap::new();
        if self.full_name.trim().is_empty() {
            errors.insert("full_name", "Full name is required".to_string());
        }
        if !is_valid_email(&normalize_email(&self.email)) {
            errors.insert("email", "Invalid email".to_string());
        }
        check_password(&mut errors, "password", &self.password);
        finish(errors)
    }
}

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

impl LoginRequest {
    pub fn validate(&self) -> Result<(), AuthError> {
        let mut errors = BTreeMap::new();
        if self.email.trim().is_empty() {
            errors.insert("email", "Email is required".to_string());
        }
        if self.password.is_empty() {
            errors.insert("password", "Password is required".to_string());
        }
        finish(errors)
    }
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    #[serde(default)]
    pub email: String,
}

impl ForgotPasswordRequest {
    pub fn validate(&self) -> Result<(), AuthError> {
        if !is_valid_email(&normalize_email(&self.email)) {
            return Err(AuthError::validation("email", "Invalid email"));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub password: String,
}

impl ResetPasswordRequest {
    pub fn validate(&self) -> Result<(), AuthError> {
        let mut errors = BTreeMap::new();
        if self.token.trim().is_empty() {
            errors.insert("token", "Reset token is required".to_string());
        }
        check_password(&mut errors, "password", &self.password);
        finish(errors)
    }
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailQuery {
    pub token: Option<String>,
}

/// Both fields optional so that absence maps to `MissingFields`, not a 422.
#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: Option<String>,
    pub new_password: Option<String>,
}

impl ChangePasswordRequest {
    pub fn validate(&self) -> Result<(), AuthError> {
        let mut errors = BTreeMap::new();
        if let Some(pw) = self.new_password.as_deref().filter(|p| !p.is_empty()) {
            check_password(&mut errors, "new_password", pw);
        }
        finish(errors)
    }
}

impl ProfileUpdate {
    /// A supplied name must not be blank. A blank phone clears the number.
    pub fn validate(&self) -> Result<(), AuthError> {
        match &self.full_name {
            Some(name) if name.trim().is_empty() => {
                Err(AuthError::validation("full_name", "Full name cannot be empty"))
            }
            _ => Ok(()),
        }
    }
}

/// Public part of the user returned to the client.
#[derive(Debug, Clone, Serialize)]
pub struct PublicUser {
    pub id: i64,
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: Role,
    pub email_verified: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<&User> for PublicUser {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            full_name: u.full_name.clone(),
            email: u.email.clone(),
            phone: u.phone.clone(),
            role: u.role,
            email_verified: u.email_verified,
            created_at: u.created_at,
        }
    }
}

/// Body of register, login and refresh. The refresh token travels only in the cookie.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: PublicUser,
    pub access_token: String,
}
