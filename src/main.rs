use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use barcode_harvester::cache_store::CacheStore;
use barcode_harvester::config::LoggingConfig;
use barcode_harvester::maintenance::{duplicate_images, empty_images, CacheMaintenance};
use barcode_harvester::translation::TranslationPass;
use barcode_harvester::{AppConfig, Pipeline};

#[derive(Parser)]
#[command(name = "barcode-harvester", version)]
#[command(about = "Looks up product names and images for the barcodes in a workbook")]
struct Cli {
    /// Directory holding default.toml, {RUN_MODE}.toml and local.toml
    #[arg(long, global = true, default_value = "config")]
    config_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl the configured rows, write names and images back, then translate
    Run {
        #[arg(long)]
        workbook: Option<PathBuf>,
        /// Barcode column letters
        #[arg(long)]
        column: Option<String>,
        #[arg(long)]
        start_row: Option<u32>,
        #[arg(long)]
        end_row: Option<u32>,
        #[arg(long)]
        no_translate: bool,
    },

    /// Run only the translation pass
    Translate {
        #[arg(long)]
        workbook: Option<PathBuf>,
        /// Save here instead of overwriting the workbook
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Inspect and edit the lookup cache
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },

    /// Inspect the image directory
    Images {
        #[command(subcommand)]
        command: ImageCommand,
    },
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Print one entry
    Show { barcode: String },
    /// List not-found, malformed and excluded entries
    Failures,
    /// Delete entries so they are fetched again
    Reset {
        barcodes: Vec<String>,
        /// Read barcodes from the first column of a workbook
        #[arg(long)]
        from: Option<PathBuf>,
    },
    /// Turn excluded marks back into plain failure marks
    RestoreMarks { barcodes: Vec<String> },
    /// Never fetch these barcodes again
    Exclude {
        #[arg(required = true)]
        barcodes: Vec<String>,
        #[arg(long, default_value = "Not Found")]
        reason: String,
    },
    /// Delete entries whose name is a six-digit internal id
    PurgeCorrupt,
    /// List barcodes with non-digit characters
    Invalid {
        /// Rewrite them to their digits
        #[arg(long)]
        apply: bool,
    },
    /// Dump every entry into a new workbook
    Export { path: PathBuf },
}

#[derive(Subcommand)]
enum ImageCommand {
    /// List zero-byte image files
    Empty,
    /// Group image files with identical content
    Duplicates,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = AppConfig::load(&cli.config_dir)
        .with_context(|| format!("failed to load configuration from {}", cli.config_dir.display()))?;
    let _guard = init_tracing(&config.logging)?;

    match cli.command {
        Commands::Run {
            workbook,
            column,
            start_row,
            end_row,
            no_translate,
        } => {
            apply_run_overrides(
                &mut config,
                RunOverrides {
                    workbook,
                    column,
                    start_row,
                    end_row,
                    no_translate,
                },
            )?;

            info!("Starting barcode harvester");
            let pipeline = Pipeline::from_config(config).await?;
            let summary = pipeline.run().await?;
            print_json(&summary)?;
        }
        Commands::Translate { workbook, output } => {
            apply_translate_overrides(&mut config, workbook, output)?;

            let pass = Arc::new(TranslationPass::from_config(&config.translation)?);
            let summary = pass.run_on_file(&config.spreadsheet.path, &config.spreadsheet).await?;
            print_json(&summary)?;
        }
        Commands::Cache { command } => {
            let store = CacheStore::connect(&config.cache).await?;
            run_cache_command(CacheMaintenance::new(store.clone()), command).await?;
            store.close().await;
        }
        Commands::Images { command } => {
            let directory = &config.images.directory;
            match command {
                ImageCommand::Empty => print_paths(&empty_images(directory)?),
                ImageCommand::Duplicates => {
                    for (i, group) in duplicate_images(directory)?.iter().enumerate() {
                        println!("group {} ({} files)", i + 1, group.len());
                        print_paths(group);
                    }
                }
            }
        }
    }

    Ok(())
}

#[derive(Default)]
struct RunOverrides {
    workbook: Option<PathBuf>,
    column: Option<String>,
    start_row: Option<u32>,
    end_row: Option<u32>,
    no_translate: bool,
}

/// Command-line flags win over the loaded files; the merged config must still validate.
fn apply_run_overrides(config: &mut AppConfig, overrides: RunOverrides) -> Result<()> {
    let sheet = &mut config.spreadsheet;
    if let Some(path) = overrides.workbook {
        sheet.path = path;
    }
    if let Some(column) = overrides.column {
        sheet.barcode_column = column;
    }
    if let Some(row) = overrides.start_row {
        sheet.start_row = row;
    }
    if let Some(row) = overrides.end_row {
        sheet.end_row = row;
    }
    if overrides.no_translate {
        config.translation.enabled = false;
    }
    config.validate()?;
    Ok(())
}

fn apply_translate_overrides(config: &mut AppConfig, workbook: Option<PathBuf>, output: Option<PathBuf>) -> Result<()> {
    if let Some(path) = workbook {
        config.spreadsheet.path = path;
    }
    if output.is_some() {
        config.translation.output_path = output;
    }
    config.validate()?;
    Ok(())
}

async fn run_cache_command(tools: CacheMaintenance, command: CacheCommand) -> Result<()> {
    match command {
        CacheCommand::Show { barcode } => match tools.show(&barcode).await? {
            Some(entry) => print_json(&entry)?,
            None => println!("{} is not cached", barcode),
        },
        CacheCommand::Failures => print_json(&tools.failures().await?)?,
        CacheCommand::Reset { barcodes, from } => {
            let mut deleted = tools.reset(&barcodes).await?;
            if let Some(path) = from {
                deleted += tools.reset_from_workbook(&path).await?;
            }
            println!("{} entries reset", deleted);
        }
        CacheCommand::RestoreMarks { barcodes } => {
            println!("{} entries restored", tools.restore_marks(&barcodes).await?);
        }
        CacheCommand::Exclude { barcodes, reason } => {
            println!("{} entries excluded", tools.exclude(&barcodes, &reason).await?);
        }
        CacheCommand::PurgeCorrupt => {
            let purged = tools.purge_corrupt().await?;
            println!("{} entries purged", purged.len());
        }
        CacheCommand::Invalid { apply } => print_json(&tools.invalid_barcodes(apply).await?)?,
        CacheCommand::Export { path } => {
            let rows = tools.export(&path).await?;
            println!("{} entries written to {}", rows, path.display());
        }
    }
    Ok(())
}

/// Stderr always; a daily-rolling file too when `logging.directory` is set.
/// `RUST_LOG` overrides the configured filter.
fn init_tracing(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&logging.filter))?;
    let stderr = fmt::layer().with_writer(std::io::stderr);

    match &logging.directory {
        Some(directory) => {
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(directory, "barcode-harvester.log"));
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            Ok(None)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_paths(paths: &[PathBuf]) {
    for path in paths {
        println!("{}", path.display());
    }
}
