use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use translate_proxy::config::config_search_paths;
use translate_proxy::{build_router, proxy, AppState, ProxyConfig, SharedLogger};

#[derive(Parser)]
#[command(
    name = "translate-proxy",
    about = "OpenAI-compatible chat completions adapter for a translation model",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Upstream base URL (overrides config)
    #[arg(long)]
    base_url: Option<String>,

    /// Request journal path
    #[arg(long, default_value = "translate-proxy.log")]
    log_file: PathBuf,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "translate_proxy=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = ProxyConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(base_url) = cli.base_url {
        config.upstream.base_url = base_url;
        config.validate()?;
    }

    // Fail at startup rather than on the first request.
    config.resolve_api_key()?;

    let logger = SharedLogger::new(&cli.log_file)?;

    info!("translate-proxy v{}", env!("CARGO_PKG_VERSION"));
    info!("  Upstream:  {}", config.completions_url());
    info!(
        "  Model:     {}",
        config.upstream.model.as_deref().unwrap_or("(caller's choice)")
    );
    info!("  Aliases:   {} mapped", config.models.len());
    info!("  Timeout:   {}s", config.upstream.timeout_secs);
    info!("  Stream:    {:?}", config.upstream.stream_mode);
    info!("  Port:      {}", config.port);
    info!("  Journal:   {}", cli.log_file.display());

    logger.info(
        "startup",
        format!(
            "Starting translate-proxy upstream={} port={}",
            config.completions_url(),
            config.port
        ),
    );

    let state = Arc::new(AppState {
        config: config.clone(),
        client: proxy::build_client()?,
        logger,
    });

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}/v1/chat/completions", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
