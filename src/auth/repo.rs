use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;

use super::{
    repo_types::{NewUser, PasswordResetToken, ProfileUpdate, RefreshTokenRecord, User},
    tokens::hash_token,
};

const USER_COLUMNS: &str = "id, full_name, email, password_hash, phone, role, email_verified, \
     email_verification_token, email_verification_token_expires, created_at, updated_at";

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<User>>;
    async fn find_by_verification_token(&self, token: &str) -> anyhow::Result<Option<User>>;
    /// `None` when the email is already taken.
    async fn insert(&self, user: &NewUser) -> anyhow::Result<Option<User>>;
    async fn update_password_hash(&self, id: i64, password_hash: &str) -> anyhow::Result<()>;
    async fn update_verification(
        &self,
        id: i64,
        verified: bool,
        token: Option<&str>,
        expires: Option<OffsetDateTime>,
    ) -> anyhow::Result<()>;
    /// `None` when no user has this id.
    async fn update_profile(&self, id: i64, update: &ProfileUpdate)
        -> anyhow::Result<Option<User>>;
}

/// Server-side record of issued refresh tokens, keyed by SHA-256 of the raw token.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn store(&self, user_id: i64, raw: &str, expires_at: OffsetDateTime)
        -> anyhow::Result<()>;
    /// Not revoked and not past `expires_at`.
    async fn find_valid(&self, raw: &str) -> anyhow::Result<Option<RefreshTokenRecord>>;
    /// Idempotent.
    async fn revoke(&self, raw: &str) -> anyhow::Result<()>;
    async fn purge_expired(&self) -> anyhow::Result<u64>;
}

#[async_trait]
pub trait PasswordResetStore: Send + Sync {
    async fn delete_all_for_user(&self, user_id: i64) -> anyhow::Result<()>;
    async fn insert(&self, user_id: i64, token: &str, expires_at: OffsetDateTime)
        -> anyhow::Result<()>;
    /// Unused row with this token; expiry is left to the caller.
    async fn find_usable_by_token(&self, token: &str)
        -> anyhow::Result<Option<PasswordResetToken>>;
    /// Claims the token, sets the new hash and deletes the user's other unused
    /// tokens. All or nothing. `false` when the token was already used or has
    /// expired by the time it is claimed; nothing is written then.
    async fn redeem(&self, reset: &PasswordResetToken, password_hash: &str)
        -> anyhow::Result<bool>;
}

// --- postgres ---

#[derive(Clone)]
pub struct PgUserRepository {
    db: PgPool,
}

impl PgUserRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE LOWER(email) = LOWER($1)"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_verification_token(&self, token: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email_verification_token = $1"
        ))
        .bind(token)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn insert(&self, user: &NewUser) -> anyhow::Result<Option<User>> {
        let created = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (full_name, email, password_hash, phone, role, email_verified,
                               email_verification_token, email_verification_token_expires)
            VALUES ($1, $2, $3, $4, 'student', FALSE, $5, $6)
            ON CONFLICT DO NOTHING
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.full_name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.phone)
        .bind(&user.verification_token)
        .bind(user.verification_expires)
        .fetch_optional(&self.db)
        .await?;
        Ok(created)
    }

    async fn update_password_hash(&self, id: i64, password_hash: &str) -> anyhow::Result<()> {
        let mut conn = self.db.acquire().await?;
        set_password_hash(&mut conn, id, password_hash).await?;
        Ok(())
    }

    async fn update_verification(
        &self,
        id: i64,
        verified: bool,
        token: Option<&str>,
        expires: Option<OffsetDateTime>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET email_verified = $2,
                email_verification_token = $3,
                email_verification_token_expires = $4,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(verified)
        .bind(token)
        .bind(expires)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn update_profile(
        &self,
        id: i64,
        update: &ProfileUpdate,
    ) -> anyhow::Result<Option<User>> {
        let Some(mut query) = profile_update_query(id, update) else {
            return self.find_by_id(id).await;
        };
        let user = query
            .build_query_as::<User>()
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }
}

/// `UPDATE users SET ...` over the recognised optional fields only. Column
/// names are fixed here; request values are always bound. `None` if the
/// update touches nothing.
pub(crate) fn profile_update_query(
    id: i64,
    update: &ProfileUpdate,
) -> Option<QueryBuilder<'static, Postgres>> {
    if update.is_empty() {
        return None;
    }
    let mut qb = QueryBuilder::<Postgres>::new("UPDATE users SET ");
    {
        let mut set = qb.separated(", ");
        if let Some(full_name) = &update.full_name {
            set.push("full_name = ");
            set.push_bind_unseparated(full_name.trim().to_string());
        }
        if let Some(phone) = &update.phone {
            set.push("phone = ");
            set.push_bind_unseparated(
                Some(phone.trim())
                    .filter(|p| !p.is_empty())
                    .map(str::to_string),
            );
        }
        set.push("updated_at = NOW()");
    }
    qb.push(" WHERE id = ");
    qb.push_bind(id);
    qb.push(format!(" RETURNING {USER_COLUMNS}"));
    Some(qb)
}

async fn set_password_hash(
    conn: &mut PgConnection,
    user_id: i64,
    password_hash: &str,
) -> sqlx::Result<()> {
    sqlx::query("UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1")
        .bind(user_id)
        .bind(password_hash)
        .execute(conn)
        .await?;
    Ok(())
}

#[derive(Clone)]
pub struct PgRefreshTokenStore {
    db: PgPool,
}

impl PgRefreshTokenStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RefreshTokenStore for PgRefreshTokenStore {
    async fn store(
        &self,
        user_id: i64,
        raw: &str,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (user_id, token_hash, expires_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(user_id)
        .bind(hash_token(raw))
        .bind(expires_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn find_valid(&self, raw: &str) -> anyhow::Result<Option<RefreshTokenRecord>> {
        let record = sqlx::query_as::<_, RefreshTokenRecord>(
            r#"
            SELECT id, user_id, token_hash, expires_at, revoked, revoked_at, created_at
            FROM refresh_tokens
            WHERE token_hash = $1 AND revoked = FALSE AND expires_at > NOW()
            "#,
        )
        .bind(hash_token(raw))
        .fetch_optional(&self.db)
        .await?;
        Ok(record)
    }

    async fn revoke(&self, raw: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = TRUE, revoked_at = NOW()
            WHERE token_hash = $1 AND revoked = FALSE
            "#,
        )
        .bind(hash_token(raw))
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn purge_expired(&self) -> anyhow::Result<u64> {
        let done = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= NOW() OR revoked")
            .execute(&self.db)
            .await?;
        Ok(done.rows_affected())
    }
}

#[derive(Clone)]
pub struct PgPasswordResetStore {
    db: PgPool,
}

impl PgPasswordResetStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PasswordResetStore for PgPasswordResetStore {
    async fn delete_all_for_user(&self, user_id: i64) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM password_reset_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn insert(
        &self,
        user_id: i64,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO password_reset_tokens (user_id, token, expires_at) VALUES ($1, $2, $3)",
        )
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn find_usable_by_token(
        &self,
        token: &str,
    ) -> anyhow::Result<Option<PasswordResetToken>> {
        let reset = sqlx::query_as::<_, PasswordResetToken>(
            r#"
            SELECT id, user_id, token, expires_at, used, created_at
            FROM password_reset_tokens
            WHERE token = $1 AND used = FALSE
            "#,
        )
        .bind(token)
        .fetch_optional(&self.db)
        .await?;
        Ok(reset)
    }

    async fn redeem(&self, reset: &PasswordResetToken, password_hash: &str) -> anyhow::Result<bool> {
        // rolled back on drop unless committed
        let mut tx = self.db.begin().await?;
        if !claim_unused(&mut tx, reset.id).await? {
            return Ok(false);
        }
        set_password_hash(&mut tx, reset.user_id, password_hash).await?;
        delete_other_unused(&mut tx, reset.user_id, reset.id).await?;
        tx.commit().await?;
        Ok(true)
    }
}

/// Marks the token used only if it is still unused and live. The row lock taken
/// here makes a concurrent redeem of the same token wait and then claim nothing.
async fn claim_unused(conn: &mut PgConnection, reset_id: i64) -> sqlx::Result<bool> {
    let done = sqlx::query(
        r#"
        UPDATE password_reset_tokens
        SET used = TRUE
        WHERE id = $1 AND used = FALSE AND expires_at > NOW()
        "#,
    )
    .bind(reset_id)
    .execute(conn)
    .await?;
    Ok(done.rows_affected() == 1)
}

async fn delete_other_unused(
    conn: &mut PgConnection,
    user_id: i64,
    keep_id: i64,
) -> sqlx::Result<()> {
    sqlx::query(
        "DELETE FROM password_reset_tokens WHERE user_id = $1 AND used = FALSE AND id <> $2",
    )
    .bind(user_id)
    .bind(keep_id)
    .execute(conn)
    .await?;
    Ok(())
}
