use std::sync::Arc;

use campus_auth::{
    auth::{
        password::hash_password,
        repo::{PgUserRepository, UserRepository},
        repo_types::{NewUser, User},
    },
    config::{AppConfig, EmailConfig, JwtConfig},
    state::AppState,
};
use sqlx::{postgres::PgPoolOptions, PgPool};
use time::{Duration, OffsetDateTime};

pub const PASSWORD: &str = "Password123";

/// Pool on `TEST_DATABASE_URL` with migrations applied. `None` skips the
/// calling test when no database is configured.
pub async fn test_pool() -> Option<PgPool> {
    dotenvy::dotenv().ok();
    let Ok(database_url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set; skipping postgres test");
        return None;
    };

    let db = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to test database");

    sqlx::migrate!("./migrations")
        .run(&db)
        .await
        .expect("Failed to run migrations");

    Some(db)
}

#[allow(dead_code)]
pub fn test_email() -> String {
    format!("test_{}@example.com", uuid::Uuid::new_v4())
}

#[allow(dead_code)]
pub fn new_user(email: &str) -> NewUser {
    NewUser {
        full_name: "Test User".into(),
        email: email.into(),
        password_hash: hash_password(PASSWORD).expect("hash"),
        phone: None,
        verification_token: uuid::Uuid::new_v4().simple().to_string(),
        verification_expires: OffsetDateTime::now_utc() + Duration::hours(24),
    }
}

#[allow(dead_code)]
pub async fn create_user(db: &PgPool) -> User {
    PgUserRepository::new(db.clone())
        .insert(&new_user(&test_email()))
        .await
        .expect("insert user")
        .expect("fresh email")
}

#[allow(dead_code)]
pub fn test_state(db: PgPool) -> AppState {
    let config = AppConfig {
        database_url: String::new(),
        jwt: JwtConfig {
            secret: "test-secret".into(),
            refresh_secret: Some("test-refresh-secret".into()),
            issuer: "test-issuer".into(),
            audience: "test-aud".into(),
            access_ttl_minutes: 15,
            refresh_ttl_minutes: 60,
        },
        email: EmailConfig {
            api_key: None,
            from_email: "no-reply@test.local".into(),
            from_name: "Test".into(),
            app_base_url: "http://localhost:5173".into(),
        },
        cookie_secure: true,
        refresh_sweep_minutes: 0,
    };
    AppState::postgres(Arc::new(config), db)
}
