use std::sync::Arc;

use pathfinder::{app, config::AppConfig, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "pathfinder=debug,axum=info,tower_http=info".to_string());
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

    tracing::info!("Pathfinder is launching...");

    let config = Arc::new(AppConfig::load()?);

    tracing::info!(
        memory_kib = config.hasher.memory_kib,
        iterations = config.hasher.iterations,
        parallelism = config.hasher.parallelism,
        "password hashing cost"
    );

    let addr = config.listen_addr();
    let state = AppState::connect(config).await?;
    app::serve(app::build_app(state), &addr).await
}
