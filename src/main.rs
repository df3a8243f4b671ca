use anthropic_relay::{build_router, AppState, RelayConfig, SharedLogger};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "anthropic-relay",
    about = "OpenAI-compatible chat completions relay for the Anthropic Messages API",
    version
)]
struct Cli {
    /// Port to listen on (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Upstream base URL (overrides ANTHROPIC_BASE_URL)
    #[arg(long)]
    base_url: Option<String>,

    /// Log file path
    #[arg(long, default_value = "anthropic-relay.log")]
    log_file: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "anthropic_relay=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = RelayConfig::from_env()?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }

    let logger = SharedLogger::new(&cli.log_file)?;

    info!("anthropic-relay v{}", env!("CARGO_PKG_VERSION"));
    info!("  Upstream:   {}", config.base_url);
    info!("  Port:       {}", config.port);
    info!("  Cache:      enabled (1h TTL)");
    info!("  Credential: from request Authorization header");
    if config.models.is_empty() {
        info!("  Models:     passthrough (no mapping)");
    } else {
        info!("  Models:     {} mapped", config.models.len());
    }
    if config.max_tokens.is_empty() {
        info!("  Max tokens: defaults");
    } else {
        info!("  Max tokens: {} overrides", config.max_tokens.len());
    }
    info!("  Log file:   {}", cli.log_file.display());

    logger.info(
        "startup",
        format!(
            "starting anthropic-relay base_url={} port={}",
            config.base_url, config.port
        ),
    );

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()?;

    let state = Arc::new(AppState {
        config: config.clone(),
        client,
        logger: logger.clone(),
    });

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("");
    info!("  Point an OpenAI-compatible client at:");
    info!("    OPENAI_BASE_URL=http://localhost:{}/v1", config.port);
    info!("");

    axum::serve(listener, app).await?;

    Ok(())
}
