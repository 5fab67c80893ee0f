use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use domain_db::{
    cve_sources::nist,
    db, export,
    ingest::{self, stream::ProgressEvent, IngestStats},
    platform::Platform,
};
use dotenvy::dotenv;
use env_logger::Env;
use lazy_static::lazy_static;
use std::borrow::Cow;
use std::{
    fs,
    io::{self, Write},
    path::PathBuf,
};

mod configuration;
mod telemetry;

use crate::configuration::{DatabaseSettings, IngestSettings, NvdSettings};

fn main() -> Result<()> {
    let opts = Opts::parse();

    dotenv().ok();

    // Setup logger
    {
        #[cfg(debug_assertions)]
        let default_env_filter = "debug";
        #[cfg(not(debug_assertions))]
        let default_env_filter = "info";

        if matches!(opts.cmd, Commands::Ingest { .. }) {
            // Ingestion runs are long, trace them
            telemetry::init_tracer(default_env_filter)
        } else {
            let env = Env::default().default_filter_or(default_env_filter);
            env_logger::Builder::from_env(env)
                .try_init()
                .map_err(anyhow::Error::from)
        }
        .context("Failed to setup logger")?;
    }

    // Repository
    let repository = {
        let db_settings = DatabaseSettings::try_from_env()?;

        db::SqliteRepository::new(&db_settings.path, db_settings.pool_size)
            .with_context(|| format!("Cannot open database {}", db_settings.path))?
    };

    repository
        .ensure_schema()
        .context("Cannot create the cve table")?;

    match opts.cmd {
        Commands::Ingest {
            cpe,
            keyword,
            refresh,
            limit,
            stream,
        } => {
            let nvd_settings = NvdSettings::try_from_env()?;
            let ingest_settings = IngestSettings::try_from_env()?;

            let platform = cpe
                .as_deref()
                .map(str::parse::<Platform>)
                .transpose()
                .map_err(|e| anyhow!("invalid platform identifier: {e}"))?;

            let span = tracing::info_span!(
                "ingest",
                cpe = cpe.as_deref().unwrap_or("*"),
                refresh
            );
            let _enter = span.enter();

            let query = nist::NvdQuery {
                platform,
                keyword,
                results_per_page: nvd_settings.results_per_page,
                max_records: limit,
            };
            let client = nist::NvdClient::new(nvd_settings.client_options())?;
            let options = ingest::IngestOptions {
                batch_size: ingest_settings.batch_size,
                refresh,
            };

            let source = client.records(query);
            let stats = if stream {
                stream_ingest(repository, source, options, &ingest_settings)?
            } else {
                run_ingest(&repository, source, options)?
            };

            log::info!("{}", report_message(&stats));
        }
        Commands::Dump { limit } => {
            let total = repository.count()?;
            for row in repository.scan_limited(limit)? {
                println!("{:#?}", row);
                println!("-----------------------");
            }
            log::info!("{} records stored", total);
        }
        Commands::Export { output } => {
            let rows = repository.scan_all()?;
            let json = export::to_json(&rows)?;

            match output {
                Some(path) => {
                    fs::write(&path, json)
                        .with_context(|| format!("could not write {}", path.display()))?;
                    log::info!("exported {} records to {}", rows.len(), path.display());
                }
                None => println!("{json}"),
            }
        }
        Commands::Clear => {
            let removed = repository.clear_all()?;
            log::info!("removed {} records", removed);
        }
    }

    Ok(())
}

#[derive(Parser)]
#[command(author, version, about)]
#[command(disable_help_subcommand = true)]
struct Opts {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetches advisories from the NVD and stores them
    Ingest {
        /// Only advisories affecting this CPE 2.3 platform
        #[arg(short = 'c', long = "cpe")]
        cpe: Option<String>,

        /// Only advisories matching this keyword
        #[arg(short = 'k', long = "keyword")]
        keyword: Option<String>,

        /// Clear stored advisories first
        #[arg(short = 'f', long = "refresh")]
        refresh: bool,

        /// Stop after this many advisories
        #[arg(short = 'l', long = "limit")]
        limit: Option<usize>,

        /// Print every committed batch as an event-stream frame on stdout
        #[arg(short = 's', long = "stream")]
        stream: bool,
    },
    /// Prints the first stored advisories
    Dump {
        #[arg(short = 'l', long = "limit", default_value_t = 5)]
        limit: i64,
    },
    /// Writes stored advisories as display-ready JSON
    Export {
        /// Output file, stdout when missing
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
    },
    /// Removes every stored advisory
    Clear,
}

fn run_ingest(
    repository: &db::SqliteRepository,
    source: nist::NvdRecords,
    options: ingest::IngestOptions,
) -> Result<IngestStats> {
    let mut run = ingest::ingest(repository, source, options);

    for batch in run.by_ref() {
        let batch = batch.context("Ingestion failed")?;
        tracing::debug!(rows = batch.len(), "batch committed");
    }

    Ok(run.stats())
}

fn stream_ingest(
    repository: db::SqliteRepository,
    source: nist::NvdRecords,
    options: ingest::IngestOptions,
    settings: &IngestSettings,
) -> Result<IngestStats> {
    let (events, worker) =
        ingest::stream::spawn(repository, source, options, settings.stream_options());

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut failure = None;

    for event in events.iter() {
        out.write_all(event.to_frame()?.as_bytes())?;
        out.flush()?;

        if let ProgressEvent::Error { error } = event {
            failure = Some(error);
        }
    }

    let stats = worker
        .join()
        .map_err(|_| anyhow!("ingestion worker panicked"))?;

    if let Some(error) = failure {
        bail!("Ingestion failed: {error}");
    }

    Ok(stats)
}

fn report_message(stats: &IngestStats) -> Cow<'static, str> {
    match (stats.stored, stats.skipped) {
        (0, 0) => Cow::Borrowed("No records ingested"),
        (stored, 0) => Cow::Owned(format!(
            "{stored} records ingested in {} batches",
            stats.batches
        )),
        (stored, skipped) => Cow::Owned(format!(
            "{stored} records ingested in {} batches, {skipped} malformed records skipped",
            stats.batches
        )),
    }
}

fn version() -> &'static str {
    #[cfg(debug_assertions)]
    lazy_static! {
        static ref VERSION: String = format!("{}+dev", env!("CARGO_PKG_VERSION"));
    }

    #[cfg(not(debug_assertions))]
    lazy_static! {
        static ref VERSION: String = env!("CARGO_PKG_VERSION").to_string();
    }
    &VERSION
}
