//! Drives a run through every stage of the pipeline, from waveform files to solver input.
use crate::{
    alignment::align_reflected,
    averaging::{average_amplitude, mean_amplitude, subtract_baseline},
    cache::{Cache, ContentDigest, FileSet, Fnv1a},
    discharge::{DischargeEvents, find_discharges, shift_to_discharge},
    error::{PipelineError, ProcessingError},
    parameters::RunParameters,
    pulse_detection::{
        Real,
        datatype::{AveragedSample, TransmittedSample},
    },
    solver::{SolverInput, shot_range, write_shot_files},
    statistics::{find_peak_maxima, full_width_half_maximum, inter_channel_offset, invert},
    synthesis::{PaddingReport, complete_signal, compute_pulse},
    timing::{TimingReferences, extract_timing},
};
use efish_common::{
    CancellationToken, ChannelSeries, Sample, ShotId, ShotSeries,
    metrics::shots_dropped::DropStage,
};
use efish_waveform_reader::{
    ChannelLoad, LoadReport, LoaderOptions, channel_files, load_background, load_channel,
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, hash::Hasher, path::Path};
use tracing::{debug, info, instrument, warn};

/// The timing references and transmitted pulses derived from a pickup channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Synthesis {
    timing: TimingReferences,
    transmitted: ShotSeries<TransmittedSample>,
}

/// Summary of a completed run.
#[derive(Default, Debug, Clone)]
pub(crate) struct PipelineReport {
    /// The load report of each channel, keyed by channel name.
    pub(crate) loads: BTreeMap<String, LoadReport>,
    pub(crate) shots_loaded: usize,
    pub(crate) dropped: BTreeMap<DropStage, usize>,
    pub(crate) padding: PaddingReport,
    /// The discharge onset of each shot, found before padding.
    pub(crate) discharges: DischargeEvents,
    pub(crate) first_osc: ShotId,
    pub(crate) last_osc: ShotId,
    pub(crate) fwhm: Real,
    pub(crate) t_diff: Real,
    pub(crate) files_written: usize,
}

impl PipelineReport {
    /// Logs the per-stage summary of the run.
    pub(crate) fn log(&self) {
        for (channel, report) in &self.loads {
            info!(
                loaded = report.loaded,
                skipped = report.skipped.len(),
                "Channel {channel}"
            );
            for skipped in &report.skipped {
                warn!(path = %skipped.path.display(), "Skipped: {}", skipped.reason);
            }
        }
        for (stage, count) in &self.dropped {
            info!("{count} shots dropped at the {stage} stage");
        }
        if !self.padding.oversized.is_empty() {
            warn!(shots = ?self.padding.oversized, "Oversized shots were not padded");
        }
        info!(
            shots = self.shots_loaded,
            padded = self.padding.padded,
            discharges = self.discharges.len(),
            first_osc = self.first_osc,
            last_osc = self.last_osc,
            fwhm = self.fwhm,
            t_diff = self.t_diff,
            files_written = self.files_written,
            "Run complete"
        );
    }
}

fn check_cancelled(cancellation: &CancellationToken) -> Result<(), PipelineError> {
    if cancellation.is_cancelled() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}

/// Loads a channel, through the cache if there is one.
///
/// The cache key covers the names, sizes and modification times of the channel's files.
fn cached_load(
    cache: Option<&Cache>,
    channel: &str,
    directory: &Path,
    options: &LoaderOptions,
) -> Result<ChannelLoad, PipelineError> {
    let load = || load_channel(channel, directory, options);
    let Some(cache) = cache else {
        return Ok(load()?);
    };

    let mut files = channel_files(channel, directory)?;
    if let Some(max_files) = options.max_files {
        files.truncate(max_files);
    }
    let mut hasher = Fnv1a::default();
    FileSet::new(files).state_digest(&mut hasher)?;
    let key = Cache::key(
        "load_channel",
        &(channel, options.max_files),
        hasher.finish(),
    )?;
    Ok(cache.get_or_compute(&key, load)?)
}

/// Derives the timing references and transmitted pulses from the averaged pickup channel.
fn synthesize(
    averaged: &ShotSeries<AveragedSample>,
    parameters: &RunParameters,
) -> Synthesis {
    let timing = extract_timing(averaged, &parameters.pulse.timing());
    let aligned = align_reflected(averaged, &timing);
    let transmitted = compute_pulse(averaged, &aligned, &timing, &parameters.pulse.synthesis());
    Synthesis {
        timing,
        transmitted,
    }
}

/// Runs the pipeline, writing the per-shot files and the solver configuration.
/// # Parameters
/// - parameters: the run's command line parameters.
/// - cache: if present, channel loading and pulse synthesis are memoized.
/// - cancellation: checked between stages.
#[instrument(skip_all, fields(directory = %parameters.data_directory.display()), err(level = "error"))]
pub(crate) fn run(
    parameters: &RunParameters,
    cache: Option<&Cache>,
    cancellation: &CancellationToken,
) -> Result<PipelineReport, PipelineError> {
    let mut report = PipelineReport::default();
    let directory = parameters.data_directory.as_path();
    let channels = &parameters.channels;
    let loader_options = LoaderOptions {
        max_files: parameters.max_files,
        cancellation: Some(cancellation.clone()),
    };

    let pickup = cached_load(cache, &channels.pickup_channel, directory, &loader_options)?;
    report
        .loads
        .insert(channels.pickup_channel.clone(), pickup.report);
    report.shots_loaded = pickup.series.num_shots();
    check_cancelled(cancellation)?;

    let pickup_series = if parameters.pulse.subtract_background {
        let background = load_background(&channels.pickup_channel, directory)?;
        let baseline =
            mean_amplitude(&background).ok_or(ProcessingError::EmptySeries {
                operation: "subtract_background",
            })?;
        debug!(baseline, "Subtracting background");
        subtract_baseline(&pickup.series, baseline)
    } else {
        pickup.series
    };

    let averaged = average_amplitude(&pickup_series, parameters.pulse.window_size)?;
    check_cancelled(cancellation)?;

    let synthesis = match cache {
        Some(cache) => {
            let mut hasher = Fnv1a::default();
            pickup_series.digest(&mut hasher);
            let key = Cache::key(
                "synthesize",
                &(
                    parameters.pulse.window_size,
                    parameters.pulse.timing(),
                    parameters.pulse.synthesis(),
                ),
                hasher.finish(),
            )?;
            cache.get_or_compute(&key, || {
                Ok::<_, PipelineError>(synthesize(&averaged, parameters))
            })?
        }
        None => synthesize(&averaged, parameters),
    };
    report.dropped.insert(
        DropStage::Timing,
        averaged.num_shots() - synthesis.timing.len(),
    );
    report.dropped.insert(
        DropStage::Synthesis,
        synthesis.timing.len() - synthesis.transmitted.num_shots(),
    );
    check_cancelled(cancellation)?;

    let events = find_discharges(&synthesis.transmitted, &parameters.discharge.parameters());
    report.dropped.insert(
        DropStage::Discharge,
        synthesis.transmitted.num_shots() - events.len(),
    );
    let (first_osc, last_osc) = shot_range(&events)?;
    report.first_osc = first_osc;
    report.last_osc = last_osc;
    report.discharges = events;

    let (padded, padding) = complete_signal(
        &synthesis.transmitted,
        parameters.pulse.n_elements,
        parameters.pulse.padding_interval,
    )?;
    report.padding = padding;
    check_cancelled(cancellation)?;

    let laser = cached_load(cache, &channels.laser_channel, directory, &loader_options)?;
    report
        .loads
        .insert(channels.laser_channel.clone(), laser.report);
    let pmt = cached_load(cache, &channels.pmt_channel, directory, &loader_options)?;
    report.loads.insert(channels.pmt_channel.clone(), pmt.report);
    check_cancelled(cancellation)?;

    let solver = &parameters.solver;
    let laser_series = if solver.shift_laser_by_discharge {
        shift_to_discharge(&laser.series, &report.discharges)
    } else {
        laser.series
    };
    let pmt_series = invert(&pmt.series);
    report.fwhm = full_width_half_maximum(&laser_series, solver.top_shots).ok_or(
        ProcessingError::EmptySeries {
            operation: "full_width_half_maximum",
        },
    )?;
    let pmt_peaks = find_peak_maxima(&pmt_series, solver.top_shots);
    report.t_diff = inter_channel_offset(&pmt_peaks, &laser_series).ok_or(
        ProcessingError::EmptySeries {
            operation: "inter_channel_offset",
        },
    )?;

    let output = solver.output_directory.as_path();
    let transmitted = padded.map_shots(|_, rows| {
        Some(
            rows.iter()
                .map(|row| Sample::new(row.time, row.transmitted))
                .collect(),
        )
    });
    let smoothed_pickup: ChannelSeries = averaged.map_shots(|_, rows| {
        Some(
            rows.iter()
                .map(|row| Sample::new(row.time, -row.avg_amplitude))
                .collect(),
        )
    });
    for (series, base_name) in [
        (&smoothed_pickup, &solver.bcs1_gen_name),
        (&transmitted, &solver.bcs2_gen_name),
        (&laser_series, &solver.pd_gen_name),
        (&pmt_series, &solver.pmt_gen_name),
    ] {
        check_cancelled(cancellation)?;
        report.files_written += write_shot_files(series, output, base_name, &solver.extension)?;
    }

    SolverInput {
        directory: output.to_owned(),
        bcs1_gen_name: solver.bcs1_gen_name.clone(),
        bcs2_gen_name: solver.bcs2_gen_name.clone(),
        pd_gen_name: solver.pd_gen_name.clone(),
        pmt_gen_name: solver.pmt_gen_name.clone(),
        extension: solver.extension.clone(),
        first_osc,
        last_osc,
        skip: solver.skip,
        n_elements: parameters.pulse.n_elements,
        t_bgd: solver.t_bgd,
        fwhm: report.fwhm,
        t_diff: report.t_diff,
        trigger: solver.solver_trigger,
    }
    .write(&solver.config_file)?;

    report.log();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::CacheOptions,
        parameters::{ChannelNames, DischargeSettings, PulseParameters, SolverSettings},
        solver::shot_file_path,
    };
    use std::fs;
    use tempfile::TempDir;

    const NS: Real = 1e-9;
    const PREAMBLE: &str = "LECROYWR625Zi;61392;Waveform\nSegments;1;SegmentSize;200\nSegment;TrigTime;TimeSinceSegment1\n#1;01-Jan-2024 00:00:00;0\nTime;Ampl\n";

    fn write_waveform(
        directory: &Path,
        channel: &str,
        shot: ShotId,
        amplitude: impl Fn(usize) -> Real,
    ) {
        let body = (0..200)
            .map(|i| format!("{:e};{}\n", i as Real * NS, amplitude(i)))
            .collect::<String>();
        fs::write(
            directory.join(format!("{channel}--run--{shot:05}.txt")),
            format!("{PREAMBLE}{body}"),
        )
        .expect("waveform written");
    }

    /// Pickup dips over [10, 20) ns and peaks over [50, 60) ns, so `delta_t` is 20 ns.
    fn pickup(i: usize) -> Real {
        match i {
            10..20 => -0.2,
            50..60 => 0.2,
            _ => 0.0,
        }
    }

    /// As [pickup], with a sub-trigger dip over [100, 140) ns lifting the transmitted mean to
    /// 0.0375 over the 160 synthesized rows.
    fn pickup_with_plateau(i: usize) -> Real {
        match i {
            100..140 => -0.1,
            _ => pickup(i),
        }
    }

    fn write_run(directory: &Path) {
        write_run_with(directory, pickup);
    }

    fn write_run_with(directory: &Path, pickup: fn(usize) -> Real) {
        for shot in 1..=3 {
            write_waveform(directory, "C1", shot, pickup);
            write_waveform(directory, "C2", shot, |i| {
                if (30..33).contains(&i) { 1.0 } else { 0.0 }
            });
            write_waveform(directory, "C3", shot, |i| if i == 35 { -0.5 } else { 0.0 });
        }
        // A shot without an incident crossing.
        write_waveform(directory, "C1", 4, |_| 0.0);
    }

    fn parameters(data: &TempDir, output: &TempDir) -> RunParameters {
        RunParameters {
            data_directory: data.path().to_owned(),
            max_files: None,
            channels: ChannelNames {
                pickup_channel: "C1".to_owned(),
                laser_channel: "C2".to_owned(),
                pmt_channel: "C3".to_owned(),
            },
            pulse: PulseParameters {
                window_size: 3,
                subtract_background: false,
                trigger_up: 0.15,
                trigger_down: None,
                bcs_window_end: 1e-7,
                timing_candidates: 5,
                subtract_bcs_time: false,
                n_elements: 250,
                padding_interval: 1e-10,
            },
            discharge: DischargeSettings {
                discharge_trigger: -0.1,
                discharge_mean_threshold: Some(-1.0),
                discharge_window_end: 9e-8,
                unbounded_discharge_window: false,
            },
            solver: SolverSettings {
                output_directory: output.path().join("shots"),
                config_file: output.path().join("input.txt"),
                bcs1_gen_name: "C11".to_owned(),
                bcs2_gen_name: "C44--run--".to_owned(),
                pd_gen_name: "C22".to_owned(),
                pmt_gen_name: "C33".to_owned(),
                extension: ".txt".to_owned(),
                skip: 5,
                t_bgd: 0.0,
                solver_trigger: 0.15,
                top_shots: 20,
                shift_laser_by_discharge: false,
            },
        }
    }

    #[test]
    fn run_produces_solver_input() {
        let data = TempDir::new().expect("tempdir");
        let output = TempDir::new().expect("tempdir");
        write_run(data.path());
        let parameters = parameters(&data, &output);

        let report = run(&parameters, None, &CancellationToken::new()).expect("run succeeds");
        assert_eq!(report.shots_loaded, 4);
        assert_eq!(report.dropped.get(&DropStage::Timing), Some(&1));
        assert_eq!(report.discharges.len(), 3);
        assert_eq!((report.first_osc, report.last_osc), (1, 3));
        assert!((report.fwhm / NS - 2.0).abs() < 1e-6);
        assert!((report.t_diff / NS - 5.0).abs() < 1e-6);

        let transmitted = efish_waveform_reader::read_waveform_file(&shot_file_path(
            &parameters.solver.output_directory,
            "C44--run--",
            2,
            ".txt",
        ))
        .expect("transmitted file readable");
        assert_eq!(transmitted.1.len(), 250);

        let config = fs::read_to_string(&parameters.solver.config_file).expect("config written");
        let lines = config.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 14);
        assert_eq!(lines[6..10], ["1", "3", "5", "250"]);
    }

    #[test]
    fn discharges_are_found_before_padding() {
        let data = TempDir::new().expect("tempdir");
        let output = TempDir::new().expect("tempdir");
        write_run_with(data.path(), pickup_with_plateau);
        let mut parameters = parameters(&data, &output);
        // Zero filler rows would pull the mean of each padded shot down to 0.024.
        parameters.discharge.discharge_trigger = 0.03;
        parameters.discharge.discharge_mean_threshold = None;

        let report = run(&parameters, None, &CancellationToken::new()).expect("run succeeds");
        assert_eq!(report.discharges.len(), 3);
        assert_eq!(report.dropped.get(&DropStage::Discharge), Some(&0));
        for event in report.discharges.values() {
            // The earliest synthesized row, not a filler row before it.
            assert!((event.time / NS - 20.0).abs() < 1e-6);
            assert_eq!(event.transmitted, 0.0);
        }
        assert_eq!((report.first_osc, report.last_osc), (1, 3));
        assert_eq!(report.padding.padded, 3);
    }

    #[test]
    fn laser_shift_feeds_offset() {
        let data = TempDir::new().expect("tempdir");
        let output = TempDir::new().expect("tempdir");
        write_run_with(data.path(), pickup_with_plateau);
        let mut parameters = parameters(&data, &output);
        parameters.discharge.discharge_trigger = 0.03;
        parameters.discharge.discharge_mean_threshold = None;
        parameters.solver.shift_laser_by_discharge = true;

        let report = run(&parameters, None, &CancellationToken::new()).expect("run succeeds");
        // The laser peak at 30 ns moves to 10 ns, behind the photomultiplier peak at 35 ns.
        assert!((report.t_diff / NS - 25.0).abs() < 1e-6);
        assert!((report.fwhm / NS - 2.0).abs() < 1e-6);
    }

    #[test]
    fn second_run_is_served_from_cache() {
        let data = TempDir::new().expect("tempdir");
        let output = TempDir::new().expect("tempdir");
        let cache_directory = TempDir::new().expect("tempdir");
        write_run(data.path());
        let parameters = parameters(&data, &output);
        let options = CacheOptions {
            directory: cache_directory.path().to_owned(),
            size_limit: u64::MAX,
        };

        let cache = Cache::open(&options).expect("cache opens");
        let first = run(&parameters, Some(&cache), &CancellationToken::new()).expect("first run");
        let stats = cache.close().expect("cache closes");
        assert_eq!((stats.hits, stats.misses), (0, 4));

        let cache = Cache::open(&options).expect("cache opens");
        let second = run(&parameters, Some(&cache), &CancellationToken::new()).expect("second run");
        let stats = cache.close().expect("cache closes");
        assert_eq!((stats.hits, stats.misses), (4, 0));
        assert_eq!(first.dropped, second.dropped);
        assert_eq!(first.discharges, second.discharges);
    }

    #[test]
    fn cancelled_run_stops() {
        let data = TempDir::new().expect("tempdir");
        let output = TempDir::new().expect("tempdir");
        write_run(data.path());
        let cancellation = CancellationToken::new();
        cancellation.cancel();
        assert!(matches!(
            run(&parameters(&data, &output), None, &cancellation),
            Err(PipelineError::Load(_) | PipelineError::Cancelled)
        ));
    }
}
