use bedrock_proxy::config::config_search_paths;
use bedrock_proxy::{build_router, AppState, BedrockClient, HttpImageFetcher, ProxyConfig};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "bedrock-proxy",
    about = "OpenAI-compatible chat completion and embedding API on top of Amazon Bedrock",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// AWS region of the Bedrock runtime (overrides config)
    #[arg(long)]
    region: Option<String>,

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
                .unwrap_or_else(|_| "bedrock_proxy=info,tower_http=info".into()),
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
    if let Some(region) = cli.region {
        config.bedrock.region = Some(region);
    }

    info!("bedrock-proxy v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "  Region:    {}",
        config.bedrock.region.as_deref().unwrap_or("(AWS default)")
    );
    if let Some(endpoint_url) = &config.bedrock.endpoint_url {
        info!("  Endpoint:  {}", endpoint_url);
    }
    info!("  Port:      {}", config.port);
    info!(
        "  No tool_choice for: {}",
        config.translate.tool_choice_unsupported_prefixes.join(", ")
    );

    let client = BedrockClient::from_config(&config.bedrock).await;
    let images = HttpImageFetcher::new(reqwest::Client::builder().build()?);

    let port = config.port;
    let state = Arc::new(AppState::new(config, Arc::new(client), Arc::new(images)));

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  OPENAI_BASE_URL=http://localhost:{}/v1", port);

    axum::serve(listener, app).await?;

    Ok(())
}
