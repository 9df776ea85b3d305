//! Command-line entry point for the health event backfill

mod commands;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use health_event_backfill::pipeline::{BackfillConfig, FetchErrorPolicy, PipelineError};

#[derive(Parser)]
#[command(
    name = "health-backfill",
    version,
    about = "Backfill organization health events onto the data collection event bus"
)]
struct Cli {
    /// Log level when RUST_LOG is not set
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run (or resume) the backfill
    Run(RunArgs),
    /// Show the checkpoint for the configured account
    Status(TargetArgs),
}

/// Settings shared by every command
#[derive(Args)]
pub(crate) struct TargetArgs {
    /// TOML configuration file
    #[arg(long, env = "BACKFILL_CONFIG")]
    config: Option<PathBuf>,

    /// Data collection account ID
    #[arg(long, env = "DATA_COLLECTION_ACCOUNT_ID")]
    account_id: Option<String>,

    /// Data collection region
    #[arg(long, env = "DATA_COLLECTION_REGION")]
    region: Option<String>,

    /// Resource prefix of the event bus name
    #[arg(long, env = "RESOURCE_PREFIX")]
    resource_prefix: Option<String>,

    /// Directory holding the checkpoint file
    #[arg(long, env = "CHECKPOINT_DIR")]
    checkpoint_dir: Option<PathBuf>,
}

impl TargetArgs {
    /// Load the config file (if any) and apply overrides
    pub(crate) fn resolve(&self) -> Result<BackfillConfig> {
        let mut config = match &self.config {
            Some(path) => BackfillConfig::from_toml_file(path)?,
            None => BackfillConfig::default(),
        };

        if let Some(account_id) = &self.account_id {
            config.account_id = account_id.clone();
        }
        if let Some(region) = &self.region {
            config.region = region.clone();
        }
        if let Some(prefix) = &self.resource_prefix {
            config.resource_prefix = prefix.clone();
        }
        if let Some(dir) = &self.checkpoint_dir {
            config.checkpoint_dir = dir.clone();
        }
        Ok(config)
    }
}

#[derive(Args)]
pub(crate) struct RunArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Region of the health API
    #[arg(long, env = "HEALTH_REGION")]
    health_region: Option<String>,

    /// Explicit event bus ARN
    #[arg(long, env = "EVENT_BUS_ARN")]
    event_bus_arn: Option<String>,

    /// Page-size hint for the event listing
    #[arg(long, env = "EVENT_PAGE_SIZE")]
    event_page_size: Option<u32>,

    /// Page size for account and entity listings
    #[arg(long, env = "FANOUT_PAGE_SIZE")]
    fanout_page_size: Option<u32>,

    /// Stop after this many event pages
    #[arg(long, env = "MAX_PAGES")]
    max_pages: Option<u64>,

    /// What to do when an event page fails: finish, abort, retry[:N]
    #[arg(long, env = "FETCH_ERROR_POLICY")]
    fetch_error_policy: Option<FetchErrorPolicy>,

    /// Base delay in milliseconds between retries, doubled per attempt
    #[arg(long, env = "RETRY_BACKOFF_MS")]
    retry_backoff_ms: Option<u64>,

    /// Show a progress spinner
    #[arg(long)]
    progress: bool,

    /// Print entries to stdout instead of publishing
    #[arg(long, env = "DRY_RUN")]
    dry_run: bool,
}

impl RunArgs {
    pub(crate) fn resolve(&self) -> Result<BackfillConfig> {
        let mut config = self.target.resolve()?;

        if let Some(region) = &self.health_region {
            config = config.with_health_region(region);
        }
        if let Some(arn) = &self.event_bus_arn {
            config = config.with_event_bus_arn(arn);
        }
        if let Some(size) = self.event_page_size {
            config = config.with_event_page_size(size);
        }
        if let Some(size) = self.fanout_page_size {
            config = config.with_fanout_page_size(size);
        }
        if let Some(pages) = self.max_pages {
            config = config.with_max_pages(pages);
        }
        if let Some(policy) = self.fetch_error_policy {
            config = config.with_fetch_error_policy(policy);
        }
        if let Some(millis) = self.retry_backoff_ms {
            config = config.with_retry_backoff_ms(millis);
        }
        if self.progress {
            config = config.with_progress(true);
        }
        if self.dry_run {
            config = config.with_dry_run(true);
        }

        config.validate().map_err(PipelineError::ConfigError)?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    let result = match &cli.command {
        Command::Run(args) => commands::run(args),
        Command::Status(args) => commands::status(args),
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            match err.downcast_ref::<PipelineError>() {
                Some(pipeline_err) => eprintln!("Error: {}", pipeline_err.user_message()),
                None => eprintln!("Error: {err:#}"),
            }
            ExitCode::FAILURE
        }
    }
}
