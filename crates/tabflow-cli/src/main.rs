mod commands;
mod logging;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tabflow_engine::config::parser;
use tabflow_engine::ConfigProvider;

#[derive(Parser)]
#[command(
    name = "tabflow",
    version,
    about = "Configuration-driven tabular pipeline runner"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline once
    Run {
        /// Path to configuration YAML file
        config: PathBuf,
        /// JSON object merged over the configuration for this run
        #[arg(long)]
        payload: Option<String>,
    },
    /// Validate configuration, module references, inputs and state backend
    Check {
        /// Path to configuration YAML file
        config: PathBuf,
        /// JSON object merged over the configuration before checking
        #[arg(long)]
        payload: Option<String>,
    },
    /// List registered modules and execution strategies
    Modules,
}

/// Parse the configuration file and start logging with its `log_file`.
fn load(path: &Path, settings: logging::LogSettings) -> Result<ConfigProvider> {
    let provider = parser::parse_config(path)
        .with_context(|| format!("Failed to load configuration: {}", path.display()))?;
    let log_file = provider
        .get_attr("log_file")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(PathBuf::from);
    logging::init(&settings.with_log_file(log_file))?;
    Ok(provider)
}

fn parse_payload(raw: Option<&str>) -> Result<Option<serde_json::Value>> {
    raw.map(|s| serde_json::from_str(s).context("--payload must be a JSON object"))
        .transpose()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = logging::LogSettings::new(&cli.log_level);

    match cli.command {
        Commands::Run { config, payload } => {
            let payload = parse_payload(payload.as_deref())?;
            let provider = load(&config, settings)?;
            commands::run::execute(provider, payload).await
        }
        Commands::Check { config, payload } => {
            let payload = parse_payload(payload.as_deref())?;
            let provider = load(&config, settings)?;
            commands::check::execute(provider, payload).await
        }
        Commands::Modules => {
            logging::init(&settings)?;
            commands::modules::execute();
            Ok(())
        }
    }
}
