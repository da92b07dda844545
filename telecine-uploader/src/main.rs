//! # telecine-uploader
//!
//! Watches an ingest directory for rendered video variants, uploads them to
//! the Telegram storage chat and records the resulting file references so
//! the catalog can serve them.
//!
//! Subcommands:
//! - `run` (default): scanner plus worker pool until Ctrl-C
//! - `scan`: a single ingest pass that only queues jobs
//! - `migrate`: apply database migrations
//! - `rescan`: ask a running uploader for an immediate pass
//! - `resolve`: print the variant a user would be served, as JSON

mod app;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use telecine_config::{Config, ConfigLoad, ConfigLoader, ConfigLoaderOptions};
use telecine_core::control::{ControlChannel, ControlCommand, RedisControlChannel};
use telecine_core::resolver::{ResolveRequest, Resolver};
use telecine_core::store::PostgresCatalog;
use telecine_core::uploader::{IngestScanner, UploaderRuntime};
use telecine_model::{AudioId, EpisodeId, QualityId, TitleId, UserId};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::Services;

#[derive(Parser, Debug)]
#[command(name = "telecine-uploader")]
#[command(about = "Uploads rendered video variants to Telegram storage")]
struct Cli {
    /// Path to telecine.toml
    #[arg(long, global = true, env = "TELECINE_CONFIG")]
    config: Option<PathBuf>,

    /// Path to a .env file (defaults to ./.env when present)
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the scanner and upload workers until interrupted
    Run(RunArgs),
    /// Run one ingest pass and exit without uploading
    Scan,
    /// Apply database migrations and exit
    Migrate,
    /// Request an immediate rescan from a running uploader
    Rescan,
    /// Resolve the variant a user would be served
    Resolve(ResolveArgs),
}

#[derive(ClapArgs, Debug, Clone, Default)]
struct RunArgs {
    /// Apply database migrations before starting
    #[arg(long, default_value_t = false)]
    migrate: bool,
}

#[derive(ClapArgs, Debug, Clone)]
struct ResolveArgs {
    #[arg(long)]
    user: i32,
    #[arg(long)]
    title: i32,
    #[arg(long)]
    episode: Option<i32>,
    #[arg(long)]
    audio: Option<i32>,
    #[arg(long)]
    quality: Option<i32>,
}

impl From<ResolveArgs> for ResolveRequest {
    fn from(args: ResolveArgs) -> Self {
        ResolveRequest {
            user_id: UserId(args.user),
            title_id: TitleId(args.title),
            episode_id: args.episode.map(EpisodeId),
            audio_id: args.audio.map(AudioId),
            quality_id: args.quality.map(QualityId),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command.unwrap_or(Command::Run(RunArgs::default())) {
        Command::Run(args) => run(config, args).await,
        Command::Scan => scan(config).await,
        Command::Migrate => {
            let pool = app::connect_postgres(&config).await?;
            app::migrate(&pool).await
        }
        Command::Rescan => rescan(&config).await,
        Command::Resolve(args) => resolve(&config, args.into()).await,
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Arc<Config>> {
    let ConfigLoad { config, warnings } = ConfigLoader::with_options(ConfigLoaderOptions {
        config_path: cli.config.clone(),
        env_file: cli.env_file.clone(),
    })
    .load()
    .context("failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // Override via RUST_LOG.
                "info,sqlx=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "configuration file loaded");
    }
    for warning in warnings.iter() {
        match &warning.hint {
            Some(hint) => warn!(message = %warning.message, hint = %hint, "configuration warning"),
            None => warn!(message = %warning.message, "configuration warning"),
        }
    }

    Ok(Arc::new(config))
}

async fn run(config: Arc<Config>, args: RunArgs) -> anyhow::Result<()> {
    let services = Services::connect(config).await?;
    if args.migrate {
        app::migrate(&services.pool).await?;
    }

    let ctx = services.uploader_context()?;
    tokio::fs::create_dir_all(&ctx.settings.ingest_dir)
        .await
        .with_context(|| {
            format!(
                "failed to create ingest directory {}",
                ctx.settings.ingest_dir.display()
            )
        })?;

    let runtime = UploaderRuntime::start(ctx, CancellationToken::new());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested; finishing in-flight uploads");
    runtime.stop().await;

    services.pool.close().await;
    Ok(())
}

async fn scan(config: Arc<Config>) -> anyhow::Result<()> {
    let services = Services::connect(config).await?;
    let scanner = IngestScanner::new(services.uploader_context()?);
    let report = scanner.run_cycle().await.context("scan pass failed")?;
    info!(
        queued = report.queued,
        unready = report.unready,
        in_flight = report.in_flight,
        settled = report.settled,
        quarantined = report.quarantined,
        left_in_place = report.left_in_place,
        "scan finished"
    );
    services.pool.close().await;
    Ok(())
}

async fn rescan(config: &Config) -> anyhow::Result<()> {
    let redis = app::connect_redis(config).await?;
    RedisControlChannel::new(redis, config.queues.control_key.clone())
        .send(ControlCommand::Rescan)
        .await
        .context("failed to queue rescan request")?;
    info!(key = %config.queues.control_key, "rescan requested");
    Ok(())
}

async fn resolve(config: &Config, request: ResolveRequest) -> anyhow::Result<()> {
    let pool = app::connect_postgres(config).await?;
    let catalog = Arc::new(PostgresCatalog::new(pool.clone()));
    let resolution = Resolver::new(catalog.clone(), catalog)
        .resolve(&request)
        .await
        .context("resolution failed")?;

    println!("{}", serde_json::to_string_pretty(&resolution)?);
    pool.close().await;
    Ok(())
}
