//! MCP OAuth Gateway - Entry Point

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use mcp_oauth_gateway::{config::Config, server::AuthServer};

#[derive(Parser, Debug)]
#[command(name = "mcp-oauth-gateway")]
#[command(about = "OAuth 2.1 authorization server gating MCP services behind GitHub login")]
#[command(version)]
struct Cli {
    /// HTTP server port
    #[arg(long, default_value = "8000", env = "PORT")]
    port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        subscriber.with(tracing_subscriber::fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is normal in production
    let dotenv_loaded = dotenv::dotenv().is_ok();

    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        dotenv = dotenv_loaded,
        "Starting MCP OAuth gateway"
    );

    let config = Config::from_env()?;
    tracing::info!(config = ?config, "Loaded configuration");

    let server = AuthServer::new(config).await?;
    server.run_http(cli.port).await
}
