use clap::{Parser, Subcommand};
use std::path::PathBuf;

use webswarm_config::{ConfigLoader, SwarmConfig, WarningSeverity};

mod candidates;
mod start;

/// Webswarm: channel-based peer discovery and overlay maintenance
#[derive(Parser)]
#[command(name = "webswarm", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to webswarm.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the signaling service
    Start {
        /// Port to listen on (overrides PORT and server.listen)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Show current configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate the configuration and report every issue
    Doctor,
    /// Ask a signaling service who is in a channel
    Candidates {
        /// Channel name, or a 64-character hex channel id
        channel: String,
        /// Signaling URL (defaults to the first bootstrap entry)
        #[arg(short, long)]
        url: Option<String>,
    },
}

impl Cli {
    pub async fn run(self) -> webswarm_core::Result<()> {
        // Load config first so we can use it for log format
        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();

        // Resolve log level: --verbose > --quiet > --log-level > config
        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            self.log_level
                .as_deref()
                .unwrap_or(config.logging.level.as_str())
        };
        init_tracing(&config.logging.format, log_level);

        match self.command {
            Commands::Start { port } => start::cmd_start(config, port).await,
            Commands::Config { json } => Self::cmd_config(config, json),
            Commands::Doctor => Self::cmd_doctor(&config, &config_loader),
            Commands::Candidates { channel, url } => {
                candidates::cmd_candidates(config, channel, url).await
            }
        }
    }

    fn cmd_config(config: SwarmConfig, json: bool) -> webswarm_core::Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(&config)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(&config)
                    .map_err(|e| webswarm_core::WebswarmError::Config(e.to_string()))?
            );
        }
        Ok(())
    }

    fn cmd_doctor(config: &SwarmConfig, loader: &ConfigLoader) -> webswarm_core::Result<()> {
        println!("Config: {}", loader.path().display());
        // `load` already rejected hard errors; what is left are warnings.
        let warnings = config.validate().map_err(webswarm_core::WebswarmError::Config)?;
        if warnings.is_empty() {
            println!("No issues found.");
            return Ok(());
        }
        for w in &warnings {
            let tag = match w.severity {
                WarningSeverity::Error => "error",
                WarningSeverity::Warning => "warn ",
            };
            println!("  [{tag}] {}: {}", w.field, w.message);
            if let Some(ref hint) = w.hint {
                println!("          hint: {hint}");
            }
        }
        println!("{} issue(s).", warnings.len());
        Ok(())
    }
}

/// Install the global tracing subscriber.
fn init_tracing(format: &str, level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    match format {
        "json" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_target(true)
            .init(),
        "compact" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .with_target(false)
            .init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
    }
}
