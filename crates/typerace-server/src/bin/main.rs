use tracing::info;
use tracing_subscriber::EnvFilter;

use typerace_server::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env()?;
    let addr = format!("0.0.0.0:{}", config.port);
    info!(
        min_players = config.room.rules.min_players_to_start,
        max_players = config.room.rules.max_players,
        prompts = config.prompts.len(),
        webhook = config.webhook_url.is_some(),
        "starting typerace server"
    );

    let (app, _state) = typerace_server::build_app(config).await?;

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "listening");

    axum::serve(listener, app).await?;
    Ok(())
}
