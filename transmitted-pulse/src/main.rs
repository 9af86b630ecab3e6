//! # Transmitted Pulse
//!
//! The Transmitted Pulse component performs the following functions:
//! * Loads the oscilloscope waveforms of a run from the pickup, laser and photomultiplier channels.
//! * Extracts the transmitted pulse of each shot by folding the reflected pulse onto the incident pulse.
//! * Locates the discharge onset in each shot's transmitted pulse.
//! * Writes per-shot files and a configuration file for the second harmonic solver.
//! * Filters the second harmonic solver's output into the input of the statistics solver.
//!
mod alignment;
mod averaging;
mod cache;
mod discharge;
mod error;
mod outliers;
mod parameters;
mod processing;
mod pulse_detection;
mod solver;
mod statistics;
mod synthesis;
mod timing;

use cache::{Cache, CacheOptions};
use clap::Parser;
use efish_common::{
    CancellationToken, init_tracer,
    metrics::{
        component_info_metric,
        names::{
            CACHE_LOOKUPS, DISCHARGES_FOUND, FAILURES, FILES_READ, FILES_WRITTEN, SHOTS_DROPPED,
        },
    },
};
use metrics::describe_counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use miette::IntoDiagnostic;
use parameters::{Mode, RunParameters};
use std::{net::SocketAddr, path::PathBuf};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, level_filters::LevelFilter, warn};

/// [clap] derived struct to handle command line parameters.
#[derive(Debug, Parser)]
#[clap(author, version = efish_common::version!(), about)]
struct Cli {
    /// If set, loaded channels and synthesized pulses are cached in this directory.
    #[clap(long, env = "EFISH_CACHE_DIRECTORY")]
    cache_directory: Option<PathBuf>,

    /// Total size in bytes to which the cache is trimmed on exit.
    #[clap(long, default_value = "1073741824")]
    cache_size_limit: u64,

    /// If set, the cache is emptied before processing.
    #[clap(long)]
    clear_cache: bool,

    /// If set, OpenMetrics flavour metrics are served on this endpoint.
    #[clap(long, env)]
    observability_address: Option<SocketAddr>,

    #[command(subcommand)]
    pub(crate) mode: Mode,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let args = Cli::parse();

    init_tracer(LevelFilter::INFO).into_diagnostic()?;

    if let Some(address) = args.observability_address {
        // Install exporter and register metrics
        PrometheusBuilder::new()
            .with_http_listener(address)
            .install()
            .into_diagnostic()?;
    }

    describe_counter!(
        FILES_READ,
        metrics::Unit::Count,
        "Number of waveform files read"
    );
    describe_counter!(
        FILES_WRITTEN,
        metrics::Unit::Count,
        "Number of solver files written"
    );
    describe_counter!(
        FAILURES,
        metrics::Unit::Count,
        "Number of failures encountered"
    );
    describe_counter!(
        SHOTS_DROPPED,
        metrics::Unit::Count,
        "Number of shots excluded from the batch, per stage"
    );
    describe_counter!(
        DISCHARGES_FOUND,
        metrics::Unit::Count,
        "Number of discharge onsets found"
    );
    describe_counter!(
        CACHE_LOOKUPS,
        metrics::Unit::Count,
        "Number of cache lookups, per result"
    );

    component_info_metric("transmitted-pulse");

    match args.mode {
        Mode::Run(parameters) => {
            let cache = args
                .cache_directory
                .map(|directory| {
                    Cache::open(&CacheOptions {
                        directory,
                        size_limit: args.cache_size_limit,
                    })
                })
                .transpose()
                .into_diagnostic()?;
            if let Some(cache) = cache.as_ref().filter(|_| args.clear_cache) {
                cache.clear().into_diagnostic()?;
            }
            run(parameters, cache).await
        }
        Mode::StatisticsInput(parameters) => {
            let rows = solver::prepare_statistics_input(
                &parameters.solver_output,
                &parameters.data_file,
                &parameters.config_file,
                &parameters.options(),
            )
            .into_diagnostic()?;
            info!("Statistics input of {rows} rows written");
            Ok(())
        }
    }
}

/// Runs the pipeline on a blocking thread, cancelling it on an interrupt signal.
///
/// The cache, if any, is closed whether or not the run succeeds.
async fn run(parameters: RunParameters, cache: Option<Cache>) -> miette::Result<()> {
    let cancellation = CancellationToken::new();
    let mut task = tokio::task::spawn_blocking({
        let cancellation = cancellation.clone();
        move || {
            let result = processing::run(&parameters, cache.as_ref(), &cancellation);
            (result, cache)
        }
    });

    // Is used to await any sigint signals
    let mut sigint = signal(SignalKind::interrupt()).into_diagnostic()?;

    let (result, cache) = tokio::select! {
        joined = &mut task => joined.into_diagnostic()?,
        _ = sigint.recv() => {
            warn!("Interrupt received, cancelling run");
            cancellation.cancel();
            task.await.into_diagnostic()?
        }
    };

    if let Some(cache) = cache {
        cache.close().into_diagnostic()?;
    }
    result.into_diagnostic()?;
    Ok(())
}
