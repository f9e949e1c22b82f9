/// # turbine_service
///
/// Command-line entry point for the turbine ingestion pipeline.
///
/// ```bash
/// # One group file, checking anomalies for a single day
/// turbine_service file --csv-file data/data_group_1.csv --target-date 2022-03-30
///
/// # A folder of daily files named YYYY-MM-DD.csv, oldest first
/// turbine_service folder --csv-folder data/data_group_1 --window-days 7
///
/// # Same, without touching the database
/// turbine_service folder --csv-folder data/data_group_1 --dry-run --report-json
/// ```
///
/// `DATABASE_URL` (or `[database] url` in the config file) selects the
/// database. `RUST_LOG` overrides `--log-level`.

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use postgres::Client;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use turbine_service::config::PipelineConfig;
use turbine_service::logging::{
    FailureType, LogLevel, Stage, init_logger, log_batch_failure, log_run_summary,
};
use turbine_service::persistence::{MemoryStore, db};
use turbine_service::pipeline::{
    PipelineOptions, PipelineReport, dated_batches, run_pipeline, run_pipeline_in_memory,
};
use turbine_service::{IngestError, Result};

/// Wind turbine telemetry ingestion
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML config file (defaults to $TURBINE_CONFIG, then ./turbine_config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Minimum log level: debug, info, warn, error
    #[arg(long, global = true, default_value = "info")]
    log_level: LogLevel,

    /// Also append logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Omit timestamps from log lines
    #[arg(long, global = true)]
    no_log_timestamps: bool,

    /// Print each batch report as JSON on stdout
    #[arg(long, global = true)]
    report_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process a single CSV file
    File {
        /// CSV file to ingest
        #[arg(long)]
        csv_file: PathBuf,

        /// Only ingest rows from this day and check it for anomalies
        #[arg(long)]
        target_date: Option<NaiveDate>,

        /// Turbine group (defaults to the file name, e.g. data_group_1)
        #[arg(long)]
        group_name: Option<String>,

        #[command(flatten)]
        run: RunArgs,
    },
    /// Process every YYYY-MM-DD.csv file in a group folder, oldest first
    Folder {
        /// Folder named after its turbine group
        #[arg(long)]
        csv_folder: PathBuf,

        #[command(flatten)]
        run: RunArgs,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Days of history for the anomaly baseline
    #[arg(long, conflicts_with = "all_history")]
    window_days: Option<u32>,

    /// Use every prior day as history
    #[arg(long)]
    all_history: bool,

    /// Anomaly threshold in standard deviations
    #[arg(long)]
    sigma: Option<f64>,

    /// Overwrite readings that already exist
    #[arg(long)]
    update_existing: bool,

    /// Run against an in-memory store instead of the database
    #[arg(long)]
    dry_run: bool,
}

impl RunArgs {
    fn apply(&self, config: &mut PipelineConfig) -> Result<()> {
        if let Some(days) = self.window_days {
            config.anomaly.window_days = Some(days);
            config.anomaly.all_history = false;
        }
        if self.all_history {
            config.anomaly.all_history = true;
        }
        if let Some(sigma) = self.sigma {
            config.anomaly.sigma_threshold = sigma;
        }
        config.validate()
    }
}

/// Where batches are written for the whole invocation.
enum Store {
    Database(Client),
    DryRun(MemoryStore),
}

impl Store {
    fn open(dry_run: bool, config: &PipelineConfig) -> Result<Self> {
        if dry_run {
            tracing::info!(stage = %Stage::System, "dry run: using in-memory store");
            return Ok(Store::DryRun(MemoryStore::new()));
        }
        Ok(Store::Database(db::connect_from_config(config)?))
    }

    fn run(
        &mut self,
        path: &Path,
        options: &PipelineOptions,
        config: &PipelineConfig,
    ) -> Result<PipelineReport> {
        match self {
            Store::Database(client) => run_pipeline(client, path, options, config),
            Store::DryRun(store) => run_pipeline_in_memory(store, path, options, config),
        }
    }
}

fn print_report(report: &PipelineReport, as_json: bool) {
    if as_json {
        match serde_json::to_string_pretty(report) {
            Ok(json) => println!("{json}"),
            Err(e) => tracing::error!(stage = %Stage::System, "could not encode report: {e}"),
        }
        return;
    }
    tracing::info!(
        stage = %Stage::System,
        status = ?report.status,
        readings = report.readings_written,
        summaries = report.summaries_written,
        anomalies = report.anomalies_written,
        "batch finished"
    );
}

fn run_file(
    cli: &Cli,
    csv_file: &Path,
    target_date: Option<NaiveDate>,
    group_name: Option<String>,
    run: &RunArgs,
) -> Result<()> {
    let mut config = PipelineConfig::load(cli.config.as_deref())?;
    run.apply(&mut config)?;

    let options = PipelineOptions {
        target_date,
        group_name,
        update_existing: run.update_existing,
    };
    let mut store = Store::open(run.dry_run, &config)?;
    let report = store.run(csv_file, &options, &config)?;
    print_report(&report, cli.report_json);
    Ok(())
}

/// Runs every dated file. Rejected batches are skipped; the first
/// infrastructure failure stops the run.
fn run_folder(cli: &Cli, csv_folder: &Path, run: &RunArgs) -> Result<()> {
    let mut config = PipelineConfig::load(cli.config.as_deref())?;
    run.apply(&mut config)?;

    let group_name = csv_folder
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| IngestError::InvalidGroupName(csv_folder.display().to_string()))?;
    let batches = dated_batches(csv_folder)?;
    let mut store = Store::open(run.dry_run, &config)?;

    let mut successful = 0;
    let mut skipped = 0;
    for (date, path) in &batches {
        let options = PipelineOptions {
            target_date: Some(*date),
            group_name: Some(group_name.clone()),
            update_existing: run.update_existing,
        };
        match store.run(path, &options, &config) {
            Ok(report) => {
                successful += 1;
                print_report(&report, cli.report_json);
            }
            Err(e) => {
                if log_batch_failure(&path.display().to_string(), &e) == FailureType::Unexpected {
                    log_run_summary(batches.len(), successful, skipped + 1);
                    return Err(e);
                }
                skipped += 1;
            }
        }
    }

    log_run_summary(batches.len(), successful, skipped);
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logger(cli.log_level, cli.log_file.as_deref(), !cli.no_log_timestamps) {
        eprintln!("could not open log file: {e}");
        return ExitCode::FAILURE;
    }

    let result = match &cli.command {
        Command::File {
            csv_file,
            target_date,
            group_name,
            run,
        } => run_file(&cli, csv_file, *target_date, group_name.clone(), run),
        Command::Folder { csv_folder, run } => run_folder(&cli, csv_folder, run),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(stage = %Stage::System, "{e}");
            ExitCode::FAILURE
        }
    }
}
