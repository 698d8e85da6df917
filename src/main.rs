mod api;
mod app;
mod auth;
mod config;
mod resume;
mod state;
mod store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "resumed=debug,axum=info,tower_http=info".to_string());
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

    let app_state = state::AppState::init().await?;

    if let Some(every) = app_state.config.session.sweep_every {
        app_state.sessions.spawn_sweeper();
        tracing::info!(every_secs = every.as_secs(), "session sweep scheduled");
    }

    let app = app::build_app(app_state);
    app::serve(app).await
}
