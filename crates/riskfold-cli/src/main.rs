//! riskfold command line driver

mod settings;
mod store;

use crate::settings::Settings;
use crate::store::StoreHandle;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use riskfold_core::PipelineConfig;
use riskfold_pipeline::labels::SplitLabelWindow;
use riskfold_pipeline::{ArtifactCache, Pipeline, RunOptions, UnitOutcome};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "riskfold", about = "Temporal cohort, label and matrix pipeline")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble fold matrices and run every configured model
    Run(RunArgs),
    /// Print the fold plan of a configuration
    Folds {
        config: PathBuf,
    },
    /// Build per-definition split labels for offline analysis
    SplitLabels(SplitLabelsArgs),
    /// Remove every cached matrix artifact
    ClearCache {
        #[arg(long, default_value = "matrices")]
        cache_dir: PathBuf,
    },
}

#[derive(Args)]
struct StoreArgs {
    /// JSON snapshot used as an in-memory store instead of Postgres
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

#[derive(Args)]
struct RunArgs {
    config: PathBuf,

    /// Rebuild cohort, labels and features first
    #[arg(long)]
    recreate_sources: bool,

    /// Overrides `matrix.cache_dir`
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    #[command(flatten)]
    store: StoreArgs,
}

#[derive(Args)]
struct SplitLabelsArgs {
    config: PathBuf,

    /// Label every event before this date instead of the validation window
    #[arg(long, value_name = "YYYY-MM-DD")]
    any_future_until: Option<NaiveDate>,

    #[command(flatten)]
    store: StoreArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load()?;
    init_tracing(&settings)?;

    match cli.command {
        Commands::Run(args) => run(args, &settings).await,
        Commands::Folds { config } => folds(config),
        Commands::SplitLabels(args) => split_labels(args, &settings).await,
        Commands::ClearCache { cache_dir } => {
            let removed = ArtifactCache::new(cache_dir).clear_all()?;
            println!("Removed {} cached artifacts", removed);
            Ok(())
        }
    }
}

fn init_tracing(settings: &Settings) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "riskfold=info,riskfold_pipeline=info,riskfold_store=info".into()
    });
    let registry = tracing_subscriber::registry().with(filter);
    let result = if settings.json_logs() {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    result.map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))
}

fn load_config(path: &Path) -> Result<PipelineConfig> {
    PipelineConfig::load(path).with_context(|| format!("Invalid configuration {}", path.display()))
}

async fn run(args: RunArgs, settings: &Settings) -> Result<()> {
    let mut config = load_config(&args.config)?;
    if let Some(cache_dir) = args.cache_dir {
        config.matrix.cache_dir = cache_dir;
    }

    let handle = StoreHandle::open(settings, args.store.snapshot.as_deref(), &config).await?;
    let pipeline = Pipeline::new(handle.store(), config)?;
    let summary = pipeline
        .run(RunOptions {
            recreate_sources: args.recreate_sources,
        })
        .await?;
    handle.persist().await?;

    println!("Experiment {}", summary.experiment_id);
    for (index, err) in summary.matrices.failures() {
        println!("  fold {:>2}  FAILED  {}", index, err);
    }
    for unit in &summary.units {
        match &unit.outcome {
            UnitOutcome::Completed { evaluations, .. } => {
                let metrics: Vec<String> = evaluations
                    .iter()
                    .map(|e| {
                        let scope = e.county.map_or("both", |c| c.as_str());
                        format!("{}@{}[{}]={:.3}", e.metric, e.k, scope, e.value)
                    })
                    .collect();
                println!(
                    "  fold {:>2}  {}  {:<14} {}",
                    unit.fold_index,
                    unit.validation_date,
                    unit.model_name,
                    metrics.join(" ")
                );
            }
            UnitOutcome::Failed(err) => println!(
                "  fold {:>2}  {}  {:<14} FAILED  {}",
                unit.fold_index, unit.validation_date, unit.model_name, err
            ),
        }
    }

    if !summary.is_success() {
        anyhow::bail!("Run {} finished with failures", summary.experiment_id);
    }
    Ok(())
}

fn folds(path: PathBuf) -> Result<()> {
    let config = load_config(&path)?;
    let folds = riskfold_core::compute_folds(&config.temporal, config.months_future())?;
    for (index, fold) in folds.iter().enumerate() {
        let train: Vec<String> = fold.train_dates.iter().map(|d| d.to_string()).collect();
        println!(
            "fold {:>2}  validation {}  train [{}]",
            index,
            fold.validation_date,
            train.join(", ")
        );
    }
    Ok(())
}

async fn split_labels(args: SplitLabelsArgs, settings: &Settings) -> Result<()> {
    let config = load_config(&args.config)?;
    let window = match args.any_future_until {
        Some(observed_until) => SplitLabelWindow::AnyFuture { observed_until },
        None => SplitLabelWindow::ValidationPeriod,
    };

    let handle = StoreHandle::open(settings, args.store.snapshot.as_deref(), &config).await?;
    let pipeline = Pipeline::new(handle.store(), config)?;
    let labels = pipeline.build_split_labels(window).await?;
    handle.persist().await?;

    let positives = labels.labels().iter().filter(|l| l.label).count();
    println!(
        "Wrote {} split labels ({} positive) to {}",
        labels.len(),
        positives,
        window.table_name()
    );
    Ok(())
}
