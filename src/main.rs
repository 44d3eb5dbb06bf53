use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use s1_fetch::credentials::ACCESS_TOKEN_ENV;
use s1_fetch::{
    CatalogClient, Credentials, HttpTransport, LogMonitor, Orchestrator, RunConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Query and download Sentinel-1 products and orbit files")]
struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download orbit files and products described by a run configuration
    Run {
        #[arg(short, long)]
        config: PathBuf,
        #[command(flatten)]
        overrides: Overrides,
    },
    /// List the features a run would download
    Query {
        #[arg(short, long)]
        config: PathBuf,
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Write a sample run configuration
    Template {
        #[arg(short, long, default_value = "run.toml")]
        output: PathBuf,
    },
}

#[derive(Args, Debug)]
struct Overrides {
    #[arg(long)]
    output_dir: Option<PathBuf>,
    #[arg(long)]
    concurrency: Option<usize>,
    /// Start of the acquisition window (YYYY-MM-DD)
    #[arg(long)]
    from: Option<String>,
    /// End of the acquisition window (YYYY-MM-DD)
    #[arg(long)]
    to: Option<String>,
    /// Abort on the first group that fails
    #[arg(long)]
    fail_fast: bool,
}

impl Overrides {
    fn apply(self, config: &mut RunConfig) {
        if let Some(output_dir) = self.output_dir {
            config.output_dir = output_dir;
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(from) = self.from {
            config.start_date = from;
        }
        if let Some(to) = self.to {
            config.completion_date = to;
        }
        if self.fail_fast {
            config.fail_fast = true;
        }
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
    Ok(())
}

fn load_config(path: PathBuf, overrides: Overrides) -> Result<RunConfig> {
    let mut config = RunConfig::read(path)?;
    overrides.apply(&mut config);
    Ok(config)
}

fn build(config: RunConfig) -> Result<Orchestrator<HttpTransport>> {
    let client = CatalogClient::new(&config.catalog_url)?;
    let transport = HttpTransport::new()?;
    let orchestrator = Orchestrator::new(config, client, transport, Arc::new(LogMonitor::new()))?;
    Ok(orchestrator)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    match cli.command {
        Command::Template { output } => {
            RunConfig::template().write(&output)?;
            info!(path = %output.display(), "Template written");
        }
        Command::Query { config, overrides } => {
            let orchestrator = build(load_config(config, overrides)?)?;
            let mut failed = false;
            for (label, result) in orchestrator.preview().await {
                match result {
                    Ok(features) => {
                        println!("{label}: {} features", features.len());
                        for feature in features {
                            println!("  {}", feature.summary());
                        }
                    }
                    Err(e) => {
                        warn!(group = %label, error = %e, "Query failed");
                        failed = true;
                    }
                }
            }
            if failed {
                bail!("one or more catalog queries failed");
            }
        }
        Command::Run { config, overrides } => {
            let credentials = Credentials::from_env();
            if credentials.is_none() {
                warn!("{ACCESS_TOKEN_ENV} is not set, downloading without credentials");
            }

            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, finishing up");
                    trigger.cancel();
                }
            });

            let orchestrator = build(load_config(config, overrides)?)?
                .credentials(credentials)
                .cancel_token(cancel);

            let report = orchestrator.run().await?;
            report.log();
            if !report.is_clean() {
                bail!("run finished with failures");
            }
            info!("All downloads complete");
        }
    }
    Ok(())
}
