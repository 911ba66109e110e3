//! CLI command definitions for the preview service.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use crate::assets::{AssetStatus, GeneratedAsset};
use crate::config::{PreviewConfig, StorageEngine, UploaderEngine};
use crate::error::ErrorCode;
use crate::metrics::{export_metrics, init_metrics};
use crate::render::{
    builtin_registry, complete_delegated, DefaultDownloader, DelegatedResult, LocalUploader,
    Uploader,
};
use crate::scheduler::{
    CapacityLedger, FileTypePolicy, RenderScheduler, SchedulerDeps, WorkAdmission,
};
use crate::storage::{open_store, AssetStore, PgAssetStore};
use crate::template::{StaticTemplateCatalog, TemplateCatalog};

/// File preview render scheduler.
#[derive(Parser)]
#[command(name = "preview")]
#[command(about = "Schedule and render file previews")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the scheduler and its worker pools until ctrl-c.
    Serve(ServeArgs),

    /// Submit a file for preview rendering.
    Submit(SubmitArgs),

    /// Print the generated assets of a source as JSON.
    Status(StatusArgs),

    /// Record the outcome of a delegated render.
    Complete(CompleteArgs),

    /// List the template catalog.
    Templates(ConfigArgs),

    /// Apply the PostgreSQL schema.
    Migrate(ConfigArgs),
}

/// Configuration source shared by every command.
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// YAML configuration file. Environment overrides apply on top.
    #[arg(short, long, env = "PREVIEW_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Arguments for `preview serve`.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Print Prometheus metrics to stdout after shutdown.
    #[arg(long)]
    pub dump_metrics: bool,
}

/// Arguments for `preview submit`.
#[derive(Parser, Debug)]
pub struct SubmitArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Source asset id.
    #[arg(long)]
    pub source_id: String,

    /// Download URL of the file.
    #[arg(long)]
    pub url: String,

    /// Declared file type, e.g. docx or jpg.
    #[arg(long)]
    pub file_type: String,

    /// File size in bytes.
    #[arg(long, default_value = "0")]
    pub size: u64,
}

/// Arguments for `preview status`.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Source asset id.
    #[arg(long)]
    pub source_id: String,
}

/// Arguments for `preview complete`.
#[derive(Parser, Debug)]
pub struct CompleteArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Generated asset id.
    #[arg(long)]
    pub id: String,

    /// Playlist URL reported by the transcoding service.
    #[arg(long, conflicts_with = "failed")]
    pub streaming_url: Option<String>,

    /// Failure code reported by the transcoding service.
    #[arg(long)]
    pub failed: Option<String>,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve(args) => run_serve_command(args).await,
        Commands::Submit(args) => run_submit_command(args).await,
        Commands::Status(args) => run_status_command(args).await,
        Commands::Complete(args) => run_complete_command(args).await,
        Commands::Templates(args) => run_templates_command(args).await,
        Commands::Migrate(args) => run_migrate_command(args).await,
    }
}

// ============================================================================
// Wiring
// ============================================================================

fn load_config(args: &ConfigArgs) -> anyhow::Result<PreviewConfig> {
    PreviewConfig::load(args.config.as_deref()).with_context(|| match &args.config {
        Some(path) => format!("Failed to load configuration from {}", path.display()),
        None => "Failed to load configuration from environment".to_string(),
    })
}

fn build_catalog(config: &PreviewConfig) -> anyhow::Result<Arc<StaticTemplateCatalog>> {
    let catalog = StaticTemplateCatalog::with_defaults(config.templates.clone())
        .context("Invalid template configuration")?;
    Ok(Arc::new(catalog))
}

fn build_uploader(config: &PreviewConfig) -> Arc<dyn Uploader> {
    let mut uploader = LocalUploader::new(config.uploader.base_path.clone());
    if config.uploader.engine == UploaderEngine::S3 {
        if let Some(bucket) = &config.uploader.bucket {
            uploader = uploader.with_s3_bucket(bucket.clone());
        }
    }
    Arc::new(uploader)
}

async fn build_store(
    config: &PreviewConfig,
    catalog: Arc<dyn TemplateCatalog>,
) -> anyhow::Result<Arc<dyn AssetStore>> {
    open_store(&config.storage, catalog)
        .await
        .with_context(|| format!("Failed to open {:?} asset store", config.storage.engine))
}

/// Admission without local workers: everything it creates is left waiting
/// for a serving node to sweep.
async fn offline_admission(config: &PreviewConfig) -> anyhow::Result<WorkAdmission> {
    let catalog = build_catalog(config)?;
    let store = build_store(config, catalog.clone()).await?;
    Ok(WorkAdmission::new(
        store,
        catalog,
        build_uploader(config),
        CapacityLedger::new(config.scheduler.burst_multiplier),
        HashMap::new(),
        FileTypePolicy::new(&config.render_agents, &config.scheduler),
    ))
}

// ============================================================================
// Commands
// ============================================================================

async fn run_serve_command(args: ServeArgs) -> anyhow::Result<()> {
    let config = load_config(&args.config)?;
    init_metrics().context("Failed to register metrics")?;

    let catalog = build_catalog(&config)?;
    let store = build_store(&config, catalog.clone()).await?;
    let deps = SchedulerDeps {
        store,
        catalog,
        downloader: Arc::new(DefaultDownloader::new(
            config.downloader.base_path.clone(),
            config.downloader.http_timeout(),
        )),
        uploader: build_uploader(&config),
    };

    let scheduler = RenderScheduler::start(
        deps,
        &builtin_registry(),
        &config.render_agents,
        &config.scheduler,
    )
    .await
    .context("Failed to start render scheduler")?;

    info!(node_id = %config.node_id, "Preview node serving, press ctrl-c to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    scheduler.stop().await;
    for stats in scheduler.pool_stats().await {
        info!(
            kind = %stats.kind,
            completed = stats.renders_completed,
            failed = stats.renders_failed,
            avg_ms = stats.average_render_duration.as_millis() as u64,
            "Worker pool summary"
        );
    }

    if args.dump_metrics {
        println!("{}", export_metrics());
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct SubmitOutput {
    source_id: String,
    assets: Vec<AssetSummary>,
}

#[derive(Debug, Serialize)]
struct AssetSummary {
    id: String,
    template_id: String,
    status: AssetStatus,
    location: String,
}

impl From<&GeneratedAsset> for AssetSummary {
    fn from(asset: &GeneratedAsset) -> Self {
        Self {
            id: asset.id.clone(),
            template_id: asset.template_id.clone(),
            status: asset.status.clone(),
            location: asset.location.clone(),
        }
    }
}

async fn run_submit_command(args: SubmitArgs) -> anyhow::Result<()> {
    let config = load_config(&args.config)?;
    if config.storage.engine == StorageEngine::Memory {
        warn!("Memory storage does not outlive this command; submitted work will not render");
    }

    let admission = offline_admission(&config).await?;
    let created = admission
        .create_work(&args.source_id, &args.url, &args.file_type, args.size)
        .await
        .with_context(|| format!("Failed to create work for source {}", args.source_id))?;

    let output = SubmitOutput {
        source_id: args.source_id,
        assets: created.iter().map(AssetSummary::from).collect(),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run_status_command(args: StatusArgs) -> anyhow::Result<()> {
    let config = load_config(&args.config)?;
    let catalog = build_catalog(&config)?;
    let store = build_store(&config, catalog).await?;

    let assets = store
        .find_generated_by_source(&args.source_id)
        .await
        .with_context(|| format!("Failed to load assets for source {}", args.source_id))?;
    println!("{}", serde_json::to_string_pretty(&assets)?);
    Ok(())
}

async fn run_complete_command(args: CompleteArgs) -> anyhow::Result<()> {
    let config = load_config(&args.config)?;
    let admission = offline_admission(&config).await?;

    let result = match args.failed {
        Some(code) => DelegatedResult::Failed(ErrorCode::from(code.as_str())),
        None => DelegatedResult::Succeeded {
            streaming_url: args.streaming_url,
        },
    };
    let asset = complete_delegated(&admission, &args.id, result)
        .await
        .with_context(|| format!("Failed to complete delegated asset {}", args.id))?;
    println!("{}", serde_json::to_string_pretty(&asset)?);
    Ok(())
}

async fn run_templates_command(args: ConfigArgs) -> anyhow::Result<()> {
    let config = load_config(&args)?;
    let catalog = build_catalog(&config)?;
    println!("{}", serde_json::to_string_pretty(&catalog.all())?);
    Ok(())
}

async fn run_migrate_command(args: ConfigArgs) -> anyhow::Result<()> {
    let config = load_config(&args)?;
    if config.storage.engine != StorageEngine::Postgres {
        anyhow::bail!(
            "migrate requires the postgres storage engine, configured engine is {:?}",
            config.storage.engine
        );
    }

    let catalog = build_catalog(&config)?;
    let store = PgAssetStore::connect(
        &config.storage.database_url,
        config.storage.max_connections,
        catalog,
    )
    .await
    .context("Failed to connect to PostgreSQL")?;
    let applied = store
        .run_migrations()
        .await
        .context("Failed to apply migrations")?;
    info!(applied = applied, "Migrations applied");
    Ok(())
}
