use anyhow::Result;
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use exoml::config::Config;
use exoml::deployment::{ClientConfig, Environment};
use exoml::logging::init_logging;
use exoml::ml::{artifacts, MLEngine};
use exoml::web::{ApiKeyStore, ApiServer, AppState};

#[derive(Parser)]
#[command(name = "exoml")]
#[command(about = "BiLSTM exoplanet transit detection service")]
struct Cli {
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[arg(long)]
    host: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API (default)
    Serve,
    /// Mint a new API key and append it to the key file
    GenerateKey,
    /// Load the model artifacts and print what was found
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(&cli.config)?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    init_logging(&config.logging)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::GenerateKey => generate_key(&config),
        Command::Check => check(&config),
    }
}

fn open_key_store(config: &Config) -> Result<ApiKeyStore> {
    let store = match &config.auth.api_keys_file {
        Some(path) => ApiKeyStore::open(Path::new(path))?,
        None => ApiKeyStore::in_memory(),
    };
    Ok(store)
}

async fn serve(config: Config) -> Result<()> {
    let environment = Environment::detect(config.deployment.mode);
    let client_config = ClientConfig::new(environment, &config.server, &config.deployment);
    info!("Starting exoplanet detection service ({:?} environment)", environment);

    let engine = Arc::new(MLEngine::new(&config.model));
    if let Err(e) = engine.initialize().await {
        if config.model.require_on_startup {
            error!("Model artifacts failed to load: {}", e);
            return Err(e.into());
        }
        warn!("Starting without a model, health will report unhealthy: {}", e);
    }

    let keys = open_key_store(&config)?;
    if config.auth.enabled {
        keys.bootstrap()?;
        info!("API key authentication enabled ({} keys)", keys.len());
    } else {
        warn!("API key authentication is disabled");
    }

    let metrics = if config.server.enable_metrics {
        Some(PrometheusBuilder::new().install_recorder()?)
    } else {
        None
    };

    let state = AppState {
        engine,
        keys: Arc::new(keys),
        auth_enabled: config.auth.enabled,
        client_config: Arc::new(client_config),
        metrics,
    };

    ApiServer::new(state, config.server.clone()).start().await?;
    info!("Server stopped");
    Ok(())
}

fn generate_key(config: &Config) -> Result<()> {
    if config.auth.api_keys_file.is_none() {
        anyhow::bail!("auth.api_keys_file is not set, a generated key would not be kept");
    }
    let store = open_key_store(config)?;
    let key = store.generate()?;
    println!("{}", key);
    Ok(())
}

fn check(config: &Config) -> Result<()> {
    let loaded = artifacts::load(&config.model)?;
    let summary = loaded.model.summary();

    println!("model file:      {}", loaded.paths.model.display());
    println!("scaler file:     {}", loaded.paths.scaler.display());
    match &loaded.paths.metadata {
        Some(path) => println!("metadata file:   {}", path.display()),
        None => println!("metadata file:   (none)"),
    }
    println!("model type:      {}", loaded.model_type());
    println!("version:         {}", summary.version);
    println!("scaler:          {}", loaded.scaler.kind());
    println!("columns:         {}", loaded.expected_columns());
    println!("timesteps:       {}", loaded.timesteps());
    println!("parameters:      {}", summary.parameters);
    for layer in &summary.layers {
        println!("  {}", layer);
    }
    if let Some(accuracy) = loaded.metadata.test_accuracy {
        println!("test accuracy:   {:.2}%", accuracy * 100.0);
    }
    Ok(())
}
