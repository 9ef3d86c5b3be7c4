use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use callscribe_gateway::{
    ServerConfig,
    core::upstream::{DeepgramClientConfig, verify_api_key},
    routes,
    state::AppState,
};

/// Callscribe Gateway - telephony media streams to live transcription
#[derive(Parser, Debug)]
#[command(name = "callscribe-gateway")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check the configured Deepgram API key and exit
    VerifyKey,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // A panicking session task is contained by tokio; record it and keep serving.
    std::panic::set_hook(Box::new(|panic| {
        let location = panic
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();
        error!(location = %location, "Uncaught panic: {}", panic);
    }));

    // Initialize crypto provider for outbound wss:// connections
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let config = if let Some(config_path) = cli.config {
        info!("Loading configuration from {}", config_path.display());
        ServerConfig::from_file(&config_path)?
    } else {
        ServerConfig::from_env()?
    };

    if let Some(Commands::VerifyKey) = cli.command {
        let check = verify_api_key(&config.deepgram_client_config()).await?;
        println!(
            "Deepgram API key accepted (HTTP {}): {}",
            check.status, check.body_preview
        );
        return Ok(());
    }

    info!(
        key_length = config.deepgram_api_key.len(),
        model = %config.deepgram_model,
        "Configuration loaded"
    );

    if config.deepgram_verify_on_startup {
        tokio::spawn(probe_api_key(config.deepgram_client_config()));
    }

    let address = config.address();
    let stream_path = config.stream_path.clone();
    let app_state = AppState::new(config).map_err(|e| anyhow!(e))?;
    let app = routes::create_app(app_state);

    let socket_addr: SocketAddr = address
        .parse()
        .map_err(|e| anyhow!("Invalid server address '{}': {}", address, e))?;

    info!("Server listening on http://{}", socket_addr);
    info!("Media streams accepted on ws://{}{}", socket_addr, stream_path);

    let listener = TcpListener::bind(&socket_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Log the outcome of a key check without affecting startup.
async fn probe_api_key(config: DeepgramClientConfig) {
    match verify_api_key(&config).await {
        Ok(check) => info!(
            status = check.status,
            body_preview = %check.body_preview,
            "Deepgram auth test passed"
        ),
        Err(e) => error!(
            error = %e,
            "Deepgram auth test failed. Fix the API key before testing calls."
        ),
    }
}
