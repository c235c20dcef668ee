use anyhow::Context;
use cardgame::{
    AppState, app,
    config::{Cli, Command},
    db,
    deck::Deck,
};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = &cli.config;

    let db_pool = db::connect(&config.database_url, config.max_connections)
        .await
        .with_context(|| format!("opening {}", config.database_url))?;

    let deck = match &config.deck {
        Some(path) => Deck::from_path(path).await?,
        None => Deck::bundled()?,
    };
    let added = deck.seed(&db_pool).await.context("seeding the deck")?;
    info!(added, total = deck.cards().len(), "deck seeded");

    let state = AppState::new(db_pool);

    match cli.command_or_default() {
        Command::ClearGames => {
            let removed = state.engine.clear_all_games().await?;
            println!("Removed {removed} games.");
        }
        Command::Serve => {
            let listener = tokio::net::TcpListener::bind(config.bind_address)
                .await
                .with_context(|| format!("binding {}", config.bind_address))?;
            info!("listening on {}", listener.local_addr()?);
            axum::serve(listener, app(state))
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutting down"),
        Err(err) => {
            warn!("cannot listen for ctrl-c: {err}");
            std::future::pending::<()>().await
        }
    }
}
