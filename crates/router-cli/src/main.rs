use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use model_router::{AiRequest, Router, RouterConfig};
use tracing::info;

#[derive(Parser)]
#[command(author, version, about = "Route AI task requests to model backends", long_about = None)]
struct Args {
    /// Router config file (TOML)
    #[arg(long, short, env = "ROUTER_CONFIG", default_value = "router.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Probe every configured backend and print its availability
    Status,

    /// Dispatch one request read from a JSON file ("-" for stdin)
    Dispatch {
        #[arg(long, short)]
        input: PathBuf,

        /// Also print the metrics snapshot
        #[arg(long)]
        metrics: bool,
    },
}

fn read_request(path: &Path) -> Result<AiRequest> {
    let raw = if path.as_os_str() == "-" {
        std::io::read_to_string(std::io::stdin()).context("Failed to read request from stdin")?
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read request from {}", path.display()))?
    };
    serde_json::from_str(&raw).context("Request is not a valid AiRequest")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = RouterConfig::from_file(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    let registry = config
        .build_registry()
        .context("Failed to build backend clients")?;
    info!(
        config = %args.config.display(),
        backends = registry.len(),
        "Model router starting"
    );
    let router = Router::from_config(&config, registry);

    match args.command {
        Command::Status => {
            router.refresh_all().await;
            println!("{}", serde_json::to_string_pretty(&router.statuses())?);
        }
        Command::Dispatch { input, metrics } => {
            let request = read_request(&input)?;
            let result = router.dispatch(&request).await.context("Dispatch failed")?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if metrics {
                println!("{}", serde_json::to_string_pretty(&router.snapshot())?);
            }
        }
    }

    Ok(())
}
