use std::{sync::Arc, time::Duration};

use campus_auth::{
    app::{build_app, serve},
    auth::sweep::spawn_refresh_token_sweep,
    config::AppConfig,
    db,
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "campus_auth=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = Arc::new(AppConfig::from_env()?);
    let pool = db::connect(&config.database_url).await?;
    db::migrate(&pool).await;

    let state = AppState::postgres(config.clone(), pool);

    if config.refresh_sweep_minutes > 0 {
        let _sweep = spawn_refresh_token_sweep(
            state.sessions.refresh_tokens(),
            Duration::from_secs(config.refresh_sweep_minutes * 60),
        );
    }

    serve(build_app(state)).await
}
