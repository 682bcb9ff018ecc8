use crate::adapter::ValueAdapter;
use crate::backend::LocalProject;
use crate::config::{ConfigOverrides, SyncConfig};
use crate::export::{RunExporter, SyncReport};
use crate::logging::{self, LogLevel};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Message printed when the import root is missing.
pub const MISSING_PATH_MESSAGE: &str = "ERROR: Provided path doesn't exist";

#[derive(Debug, Parser)]
#[command(name = "tbsync", version)]
#[command(about = "Export TensorBoard event files into tracked runs")]
pub struct Cli {
    /// Log verbosity when RUST_LOG is unset
    #[arg(long, value_enum, default_value_t = LogLevel::Info, global = true)]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Import every event file under a directory
    Sync(SyncArgs),
}

#[derive(Debug, Clone, Args)]
pub struct SyncArgs {
    /// Target project (falls back to TBSYNC_PROJECT)
    #[arg(long)]
    pub project: Option<String>,

    /// API token (falls back to TBSYNC_API_TOKEN)
    #[arg(long = "api_token", alias = "api-token")]
    pub api_token: Option<String>,

    /// JSON config file with limits, namespace and storage
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory holding the local project store
    #[arg(long)]
    pub storage: Option<PathBuf>,

    /// Write one JSON line per visited file here
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Directory to scan for event files
    pub log_dir: PathBuf,
}

impl SyncArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            project: self.project.clone(),
            api_token: self.api_token.clone(),
            storage: self.storage.clone(),
            config: self.config.clone(),
        }
    }
}

/// Binary entrypoint: parse flags, install logging, run the command.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_level)?;
    execute(&cli).map(|_| ())
}

/// Runs a parsed command. Returns `None` when nothing was imported because
/// the root is missing.
pub fn execute(cli: &Cli) -> Result<Option<SyncReport>> {
    match &cli.command {
        Command::Sync(args) => sync(args),
    }
}

fn sync(args: &SyncArgs) -> Result<Option<SyncReport>> {
    if !args.log_dir.exists() {
        eprintln!("{MISSING_PATH_MESSAGE}");
        return Ok(None);
    }
    let config = SyncConfig::from_env(&args.overrides())?;
    let project = LocalProject::open(&config.storage, &config.project, config.api_token.as_deref())
        .with_context(|| format!("unable to open project {}", config.project))?;
    let mut exporter = RunExporter::new(project, config.limits)?
        .with_adapter(ValueAdapter::new(&config.namespace));
    if let Some(seed) = config.seed {
        exporter = exporter.with_seed(seed);
    }

    let report = exporter.run(&args.log_dir);
    if let Some(path) = &args.report {
        report
            .write_json_lines(path)
            .with_context(|| format!("unable to write report {}", path.display()))?;
    }
    println!("{report}");
    Ok(Some(report))
}
