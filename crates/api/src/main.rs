use anyhow::Context;

use jobward_api::{AppState, ServerConfig, build_app};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    jobward_observability::init();

    let config = ServerConfig::from_env().context("invalid server configuration")?;
    std::fs::create_dir_all(&config.root)
        .with_context(|| format!("failed to create state root {}", config.root.display()))?;
    if config.auth_token.is_none() {
        tracing::warn!("JOBWARD_AUTH_TOKEN not set; job routes are unauthenticated");
    }

    let listen = config.listen;
    let root = config.root.clone();
    let app = build_app(AppState::new(config));

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;

    tracing::info!(addr = %listener.local_addr()?, root = %root.display(), "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await
        .context("server error")?;
    Ok(())
}
