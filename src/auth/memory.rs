//! In-memory collaborators for exercising the session service without Postgres.

use std::sync::{
    atomic::{AtomicBool, AtomicI64, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use time::OffsetDateTime;

use super::{
    repo::{PasswordResetStore, RefreshTokenStore, UserRepository},
    repo_types::{NewUser, PasswordResetToken, ProfileUpdate, RefreshTokenRecord, Role, User},
    tokens::hash_token,
};
use crate::{clock::Clock, email::EmailSender};

static NEXT_ID: AtomicI64 = AtomicI64::new(1);

fn next_id() -> i64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

pub struct MemoryUsers {
    rows: Mutex<Vec<User>>,
    clock: Arc<dyn Clock>,
}

impl MemoryUsers {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            clock,
        }
    }

    pub fn get(&self, id: i64) -> Option<User> {
        self.rows.lock().unwrap().iter().find(|u| u.id == id).cloned()
    }

    pub fn remove(&self, id: i64) {
        self.rows.lock().unwrap().retain(|u| u.id != id);
    }

    pub fn set_verification_expiry(&self, id: i64, expires: OffsetDateTime) {
        let mut rows = self.rows.lock().unwrap();
        if let Some(u) = rows.iter_mut().find(|u| u.id == id) {
            u.email_verification_token_expires = Some(expires);
        }
    }

    fn set_password_hash(&self, id: i64, password_hash: &str) -> Option<String> {
        let mut rows = self.rows.lock().unwrap();
        let u = rows.iter_mut().find(|u| u.id == id)?;
        Some(std::mem::replace(&mut u.password_hash, password_hash.to_string()))
    }

    pub fn set_verified(&self, id: i64, verified: bool) {
        let mut rows = self.rows.lock().unwrap();
        if let Some(u) = rows.iter_mut().find(|u| u.id == id) {
            u.email_verified = verified;
        }
    }
}

#[async_trait]
impl UserRepository for MemoryUsers {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<User>> {
        Ok(self.get(id))
    }

    async fn find_by_verification_token(&self, token: &str) -> anyhow::Result<Option<User>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .iter()
            .find(|u| u.email_verification_token.as_deref() == Some(token))
            .cloned())
    }

    async fn insert(&self, new: &NewUser) -> anyhow::Result<Option<User>> {
        let mut rows = self.rows.lock().unwrap();
        if rows.iter().any(|u| u.email.eq_ignore_ascii_case(&new.email)) {
            return Ok(None);
        }
        let now = self.clock.now();
        let user = User {
            id: next_id(),
            full_name: new.full_name.clone(),
            email: new.email.clone(),
            password_hash: new.password_hash.clone(),
            phone: new.phone.clone(),
            role: Role::Student,
            email_verified: false,
            email_verification_token: Some(new.verification_token.clone()),
            email_verification_token_expires: Some(new.verification_expires),
            created_at: now,
            updated_at: now,
        };
        rows.push(user.clone());
        Ok(Some(user))
    }

    async fn update_password_hash(&self, id: i64, password_hash: &str) -> anyhow::Result<()> {
        self.set_password_hash(id, password_hash);
        Ok(())
    }

    async fn update_verification(
        &self,
        id: i64,
        verified: bool,
        token: Option<&str>,
        expires: Option<OffsetDateTime>,
    ) -> anyhow::Result<()> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(u) = rows.iter_mut().find(|u| u.id == id) {
            u.email_verified = verified;
            u.email_verification_token = token.map(str::to_string);
            u.email_verification_token_expires = expires;
        }
        Ok(())
    }

    async fn update_profile(
        &self,
        id: i64,
        update: &ProfileUpdate,
    ) -> anyhow::Result<Option<User>> {
        let mut rows = self.rows.lock().unwrap();
        let Some(u) = rows.iter_mut().find(|u| u.id == id) else {
            return Ok(None);
        };
        if let Some(name) = &update.full_name {
            u.full_name = name.trim().to_string();
        }
        if let Some(phone) = &update.phone {
            u.phone = Some(phone.trim())
                .filter(|p| !p.is_empty())
                .map(str::to_string);
        }
        Ok(Some(u.clone()))
    }
}

pub struct MemoryRefreshTokens {
    rows: Mutex<Vec<RefreshTokenRecord>>,
    clock: Arc<dyn Clock>,
    pub fail_writes: AtomicBool,
}

impl MemoryRefreshTokens {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            clock,
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn is_revoked(&self, raw: &str) -> bool {
        let hash = hash_token(raw);
        self.rows
            .lock()
            .unwrap()
            .iter()
            .any(|r| r.token_hash == hash && r.revoked)
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryRefreshTokens {
    async fn store(
        &self,
        user_id: i64,
        raw: &str,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("refresh token store unavailable");
        }
        let mut rows = self.rows.lock().unwrap();
        let token_hash = hash_token(raw);
        if rows.iter().any(|r| r.token_hash == token_hash) {
            anyhow::bail!("duplicate token hash");
        }
        rows.push(RefreshTokenRecord {
            id: next_id(),
            user_id,
            token_hash,
            expires_at,
            revoked: false,
            revoked_at: None,
            created_at: self.clock.now(),
        });
        Ok(())
    }

    async fn find_valid(&self, raw: &str) -> anyhow::Result<Option<RefreshTokenRecord>> {
        let hash = hash_token(raw);
        let now = self.clock.now();
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.token_hash == hash && !r.revoked && r.expires_at > now)
            .cloned())
    }

    async fn revoke(&self, raw: &str) -> anyhow::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("refresh token store unavailable");
        }
        let hash = hash_token(raw);
        let now = self.clock.now();
        for r in self.rows.lock().unwrap().iter_mut() {
            if r.token_hash == hash && !r.revoked {
                r.revoked = true;
                r.revoked_at = Some(now);
            }
        }
        Ok(())
    }

    async fn purge_expired(&self) -> anyhow::Result<u64> {
        let now = self.clock.now();
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|r| r.expires_at > now && !r.revoked);
        Ok((before - rows.len()) as u64)
    }
}

pub struct MemoryResets {
    rows: Mutex<Vec<PasswordResetToken>>,
    users: Arc<MemoryUsers>,
    clock: Arc<dyn Clock>,
    pub fail_redeem: AtomicBool,
}

impl MemoryResets {
    pub fn new(users: Arc<MemoryUsers>, clock: Arc<dyn Clock>) -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            users,
            clock,
            fail_redeem: AtomicBool::new(false),
        }
    }

    pub fn for_user(&self, user_id: i64) -> Vec<PasswordResetToken> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Adds a row directly, bypassing the delete-prior step of forgot-password.
    pub fn seed(&self, user_id: i64, token: &str, expires_at: OffsetDateTime) {
        self.rows.lock().unwrap().push(PasswordResetToken {
            id: next_id(),
            user_id,
            token: token.to_string(),
            expires_at,
            used: false,
            created_at: self.clock.now(),
        });
    }
}

#[async_trait]
impl PasswordResetStore for MemoryResets {
    async fn delete_all_for_user(&self, user_id: i64) -> anyhow::Result<()> {
        self.rows.lock().unwrap().retain(|r| r.user_id != user_id);
        Ok(())
    }

    async fn insert(
        &self,
        user_id: i64,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        self.seed(user_id, token, expires_at);
        Ok(())
    }

    async fn find_usable_by_token(
        &self,
        token: &str,
    ) -> anyhow::Result<Option<PasswordResetToken>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.token == token && !r.used)
            .cloned())
    }

    async fn redeem(&self, reset: &PasswordResetToken, password_hash: &str) -> anyhow::Result<bool> {
        // the lock stands in for the transaction: claim, write, clean up or undo
        let mut rows = self.rows.lock().unwrap();
        let now = self.clock.now();
        let Some(row) = rows
            .iter_mut()
            .find(|r| r.id == reset.id && !r.used && r.expires_at > now)
        else {
            return Ok(false);
        };
        row.used = true;
        let previous = self.users.set_password_hash(reset.user_id, password_hash);

        if self.fail_redeem.load(Ordering::SeqCst) {
            if let Some(row) = rows.iter_mut().find(|r| r.id == reset.id) {
                row.used = false;
            }
            if let Some(hash) = previous {
                self.users.set_password_hash(reset.user_id, &hash);
            }
            anyhow::bail!("transaction aborted");
        }

        rows.retain(|r| r.user_id != reset.user_id || r.used);
        Ok(true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentEmail {
    Verification { to: String, token: String },
    PasswordReset { to: String, token: String },
}

#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<SentEmail>>,
    pub fail: AtomicBool,
}

impl RecordingMailer {
    pub fn last(&self) -> Option<SentEmail> {
        self.sent.lock().unwrap().last().cloned()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    fn deliver(&self, mail: SentEmail) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("smtp unreachable");
        }
        self.sent.lock().unwrap().push(mail);
        Ok(())
    }
}

#[async_trait]
impl EmailSender for RecordingMailer {
    async fn send_verification_email(
        &self,
        to: &str,
        token: &str,
        _full_name: &str,
    ) -> anyhow::Result<()> {
        self.deliver(SentEmail::Verification {
            to: to.to_string(),
            token: token.to_string(),
        })
    }

    async fn send_password_reset_email(
        &self,
        to: &str,
        token: &str,
        _full_name: &str,
    ) -> anyhow::Result<()> {
        self.deliver(SentEmail::PasswordReset {
            to: to.to_string(),
            token: token.to_string(),
        })
    }
}
