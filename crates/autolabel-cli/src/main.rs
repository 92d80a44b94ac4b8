//! autolabel: run the auto-labeling pipeline from the command line.
//!
//! Every command prints a JSON document on stdout; logs go to stderr (or to
//! `LOG_FILE`).

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use autolabel_core::{
    defaults, BBox, DetectionBackend, DetectionConfig, ListRecordsRequest, PipelineConfig,
    RecordKey, RecordRepository, StorageConfig, StorageKey,
};
use autolabel_db::{open_object_store, Database, InMemoryRecordRepository, PoolConfig};
use autolabel_inference::HttpDetectionBackend;
use autolabel_pipeline::{CropRequest, Pipeline};

#[derive(Parser)]
#[command(name = "autolabel")]
#[command(author, version, about = "Auto-label image datasets with an object-detection model")]
struct Cli {
    /// Keep records in memory instead of PostgreSQL (nothing is persisted)
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Label every image of one dataset
    Label {
        /// Dataset folder name under the dataset root
        dataset: String,

        /// Labeling version tag
        #[arg(short, long, default_value = defaults::VERSION)]
        version: String,
    },

    /// Label every dataset whose folder carries the configured prefix
    LabelAll {
        #[arg(short, long, default_value = defaults::VERSION)]
        version: String,
    },

    /// Crop a region out of a stored image and label the crop
    Crop {
        /// Object key of the source image
        source: String,

        /// Region as x1,y1,x2,y2 (fractions or pixels)
        #[arg(short, long, value_parser = parse_bbox)]
        bbox: BBox,

        #[arg(short, long)]
        dataset: String,

        #[arg(short, long, default_value = defaults::VERSION)]
        version: String,

        /// Do not store a record for the crop
        #[arg(long)]
        no_persist: bool,
    },

    /// Rebuild the export and descriptor from stored records
    Export {
        dataset: String,

        #[arg(short, long, default_value = defaults::VERSION)]
        version: String,
    },

    /// Run detection again for one image
    Reinfer {
        file_name: String,

        #[arg(short, long)]
        dataset: String,

        #[arg(short, long, default_value = defaults::VERSION)]
        version: String,
    },

    /// List records, most recently updated first
    List {
        #[arg(short, long)]
        dataset: Option<String>,

        #[arg(short, long)]
        version: Option<String>,

        #[arg(long, default_value_t = defaults::PAGE_LIMIT)]
        limit: i64,

        #[arg(long, default_value_t = defaults::PAGE_OFFSET)]
        offset: i64,
    },

    /// Show one record with its annotations
    Show {
        file_name: String,

        #[arg(short, long)]
        dataset: String,

        #[arg(short, long, default_value = defaults::VERSION)]
        version: String,
    },

    /// List datasets that have stored records
    Datasets,

    /// Check that the detection service answers
    Health,

    /// Apply pending database migrations
    Migrate,
}

/// Parse `x1,y1,x2,y2`.
fn parse_bbox(value: &str) -> Result<BBox, String> {
    let parts = value
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid number in bbox: {}", e))?;
    BBox::from_slice(&parts).ok_or_else(|| "bbox needs four finite numbers: x1,y1,x2,y2".to_string())
}

/// Install the global subscriber.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, enables file logging)
///   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
///   RUST_LOG    - standard env filter
fn init_tracing() -> Option<WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "autolabel_cli=info,autolabel_core=info,autolabel_pipeline=info,autolabel_db=info,autolabel_inference=info".into()
    });

    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("autolabel.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false)); // no ANSI in files
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        // stdout carries command output
        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        subsystem = "cli",
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stderr)"),
        "Logging initialized"
    );
    guard
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    let _log_guard = init_tracing();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(subsystem = "cli", error = %format!("{:#}", e), "Command failed");
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Commands::Health => return cmd_health().await,
        Commands::Migrate => {
            let db = connect_database(PipelineConfig::from_env().concurrency).await?;
            db.migrate().await?;
            info!(subsystem = "cli", "Database migrations complete");
            print_json(&serde_json::json!({ "migrated": true }))?;
            return Ok(ExitCode::SUCCESS);
        }
        _ => {}
    }

    let (pipeline, db) = build_pipeline(cli.dry_run).await?;
    match cli.command {
        Commands::Label { dataset, version } => {
            let report = pipeline.label_dataset(&dataset, &version).await?;
            if let Some(db) = &db {
                db.log_pool_metrics();
            }
            print_json(&report)?;
        }
        Commands::LabelAll { version } => {
            let report = pipeline.label_all(&version).await?;
            if let Some(db) = &db {
                db.log_pool_metrics();
            }
            print_json(&report)?;
        }
        Commands::Crop {
            source,
            bbox,
            dataset,
            version,
            no_persist,
        } => {
            let outcome = pipeline
                .crop_and_relabel(CropRequest {
                    source: StorageKey::new(source),
                    bbox,
                    dataset,
                    version,
                    persist: !no_persist,
                })
                .await?;
            print_json(&outcome)?;
        }
        Commands::Export { dataset, version } => {
            let export = pipeline.exporter().rebuild(&dataset, &version).await?;
            let classes = pipeline.exporter().class_list(&dataset, &version).await;
            let descriptor = pipeline
                .descriptors()
                .generate(&dataset, &version, &classes)
                .await?;
            print_json(&serde_json::json!({
                "export": export,
                "descriptor": descriptor,
            }))?;
        }
        Commands::Reinfer {
            file_name,
            dataset,
            version,
        } => {
            let record = pipeline
                .reinfer(&RecordKey::new(file_name, dataset, version))
                .await?;
            print_json(&record)?;
        }
        Commands::List {
            dataset,
            version,
            limit,
            offset,
        } => {
            let records = pipeline
                .list_records(ListRecordsRequest {
                    dataset,
                    version,
                    limit,
                    offset,
                })
                .await?;
            print_json(&records)?;
        }
        Commands::Show {
            file_name,
            dataset,
            version,
        } => {
            let record = pipeline
                .get_record(&RecordKey::new(file_name, dataset, version))
                .await?;
            print_json(&record)?;
        }
        Commands::Datasets => {
            print_json(&pipeline.list_datasets().await?)?;
        }
        Commands::Health | Commands::Migrate => {
            anyhow::bail!("command does not run through the pipeline")
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_health() -> anyhow::Result<ExitCode> {
    let backend = HttpDetectionBackend::from_env()?;
    let healthy = backend.health_check().await?;
    print_json(&serde_json::json!({
        "endpoint": backend.endpoint(),
        "healthy": healthy,
    }))?;
    Ok(if healthy {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn connect_database(concurrency: usize) -> anyhow::Result<Database> {
    let url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set (or pass --dry-run)")?;
    let db = Database::connect(&url, &PoolConfig::from_env(), concurrency).await?;
    Ok(db)
}

/// The database handle is `None` on a dry run.
async fn build_pipeline(dry_run: bool) -> anyhow::Result<(Pipeline, Option<Database>)> {
    let config = PipelineConfig::from_env();
    let storage = StorageConfig::from_env().context("invalid storage configuration")?;
    let detection = DetectionConfig::from_env().context("invalid detection configuration")?;

    let (records, db): (Arc<dyn RecordRepository>, Option<Database>) = if dry_run {
        warn!(
            subsystem = "cli",
            "Dry run: records are kept in memory and discarded on exit"
        );
        let records: Arc<dyn RecordRepository> = Arc::new(InMemoryRecordRepository::new());
        (records, None)
    } else {
        let db = connect_database(config.concurrency).await?;
        db.migrate().await?;
        let records: Arc<dyn RecordRepository> = db.records.clone();
        (records, Some(db))
    };
    let store = open_object_store(&storage).await?;
    let detector: Arc<dyn DetectionBackend> = Arc::new(HttpDetectionBackend::new(&detection)?);

    info!(
        subsystem = "cli",
        dataset_root = %config.dataset_root,
        metadata_root = %config.metadata_root,
        concurrency = config.concurrency,
        dry_run,
        "Pipeline ready"
    );
    Ok((Pipeline::new(config, records, store, detector), db))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_bbox() {
        assert_eq!(
            parse_bbox("0.1, 0.2,0.5,0.6").unwrap(),
            BBox::new(0.1, 0.2, 0.5, 0.6)
        );
        assert!(parse_bbox("1,2,3").is_err());
        assert!(parse_bbox("a,b,c,d").is_err());
    }

    #[test]
    fn test_crop_arguments() {
        let cli = Cli::try_parse_from([
            "autolabel",
            "crop",
            "object_detection/classes-pets/cat/a.jpg",
            "--bbox",
            "100,50,300,200",
            "--dataset",
            "classes-pets",
            "--no-persist",
        ])
        .unwrap();
        match cli.command {
            Commands::Crop {
                bbox,
                version,
                no_persist,
                ..
            } => {
                assert_eq!(bbox, BBox::new(100.0, 50.0, 300.0, 200.0));
                assert_eq!(version, "v1");
                assert!(no_persist);
            }
            _ => panic!("expected crop"),
        }
    }

    #[test]
    fn test_global_dry_run_flag() {
        let cli = Cli::try_parse_from(["autolabel", "label", "classes-pets", "--dry-run"]).unwrap();
        assert!(cli.dry_run);
        assert!(matches!(cli.command, Commands::Label { .. }));
    }
}
