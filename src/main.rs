#![cfg_attr(not(test), deny(clippy::panic))]

use clap::Parser;
use quiz_arena_server::config;
use quiz_arena_server::identity::InMemoryIdentityResolver;
use quiz_arena_server::logging;
use quiz_arena_server::server::QuizServer;
use quiz_arena_server::storage::{DurableStore, HotCache, InMemoryDurableStore, InMemoryHotCache};
use quiz_arena_server::websocket;
use std::{net::SocketAddr, sync::Arc};

/// Quiz Arena -- realtime room orchestrator for live multiplayer quiz games
#[derive(Parser, Debug)]
#[command(name = "quiz-arena-server")]
#[command(about = "Realtime WebSocket room orchestrator for live multiplayer quiz games")]
#[command(version)]
struct Cli {
    /// Print the loaded configuration to stdout (as JSON) and exit.
    #[arg(long)]
    print_config: bool,

    /// Override the listen port from the configuration.
    #[arg(long, env = "QUIZ_ARENA_PORT")]
    port: Option<u16>,

    /// Allowed CORS origins (comma-separated), or "*" for permissive.
    #[arg(long, env = "QUIZ_ARENA_CORS_ORIGINS", default_value = "*")]
    cors_origins: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut cfg = config::load();
    if let Some(port) = cli.port {
        cfg.port = port;
    }

    if cli.print_config {
        let json = serde_json::to_string_pretty(&cfg)
            .map_err(|e| anyhow::anyhow!("Failed to serialize config: {e}"))?;
        println!("{json}");
        return Ok(());
    }

    logging::init_with_config(&cfg.logging);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    tracing::info!(%addr, "Starting Quiz Arena server");

    // The binary runs self-contained with in-memory providers; deployments
    // embedding the library wire real store and identity implementations.
    let durable: Arc<dyn DurableStore> = Arc::new(InMemoryDurableStore::new());
    let hot: Arc<dyn HotCache> = Arc::new(InMemoryHotCache::new());
    let identity = Arc::new(InMemoryIdentityResolver::new());

    let server = QuizServer::new(cfg.clone(), durable, Some(hot), identity);

    let router = websocket::create_router(&cli.cors_origins).with_state(Arc::clone(&server));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        %addr,
        cors_origins = %cli.cors_origins,
        "Server started - WebSocket protocol on /ws and /api/ws"
    );

    let shutdown_server = Arc::clone(&server);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
            shutdown_server.shutdown().await;
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod cli_tests {
    use super::Cli;
    use clap::Parser;

    #[test]
    fn cli_defaults() {
        let cli = Cli::try_parse_from(["quiz-arena-server"]).unwrap();
        assert!(!cli.print_config);
        assert_eq!(cli.port, None);
        assert_eq!(cli.cors_origins, "*");
    }

    #[test]
    fn cli_port_override() {
        let cli = Cli::try_parse_from(["quiz-arena-server", "--port", "9100"]).unwrap();
        assert_eq!(cli.port, Some(9100));
    }

    #[test]
    fn cli_version_exits_early() {
        let result = Cli::try_parse_from(["quiz-arena-server", "--version"]);
        assert!(result.is_err());
    }
}
