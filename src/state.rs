use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    auth::{
        jwt::JwtKeys,
        repo::{PgPasswordResetStore, PgRefreshTokenStore, PgUserRepository},
        SessionService,
    },
    clock::{Clock, SystemClock},
    config::AppConfig,
    email,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub keys: JwtKeys,
    pub sessions: Arc<SessionService>,
}

impl AppState {
    /// Wires the Postgres-backed stores, the configured mailer and the wall clock.
    pub fn postgres(config: Arc<AppConfig>, db: PgPool) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let keys = JwtKeys::new(&config.jwt, clock.clone());
        let sessions = SessionService::new(
            Arc::new(PgUserRepository::new(db.clone())),
            Arc::new(PgRefreshTokenStore::new(db.clone())),
            Arc::new(PgPasswordResetStore::new(db)),
            email::from_config(&config.email),
            keys.clone(),
            clock,
        );
        Self::from_parts(config, keys, Arc::new(sessions))
    }

    pub fn from_parts(config: Arc<AppConfig>, keys: JwtKeys, sessions: Arc<SessionService>) -> Self {
        Self {
            config,
            keys,
            sessions,
        }
    }
}
