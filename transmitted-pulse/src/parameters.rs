//! Defines the command line parameters of each mode of the pipeline.
use crate::{
    discharge::DischargeParameters,
    outliers::LocalOutlierFactor,
    pulse_detection::Real,
    solver::StatisticsInputOptions,
    statistics::DEFAULT_TOP_SHOTS,
    synthesis::SynthesisOptions,
    timing::TimingParameters,
};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// The oscilloscope channels on which each signal is recorded.
#[derive(Debug, Clone, Args)]
pub(crate) struct ChannelNames {
    /// Channel of the back current shunt, recording the incident and reflected pulses.
    #[clap(long, default_value = "C1")]
    pub(crate) pickup_channel: String,

    /// Channel of the laser photodiode.
    #[clap(long, default_value = "C2")]
    pub(crate) laser_channel: String,

    /// Channel of the photomultiplier, recorded with negative polarity.
    #[clap(long, default_value = "C3")]
    pub(crate) pmt_channel: String,
}

/// Settings of the transmitted pulse extraction.
#[derive(Debug, Clone, Args)]
pub(crate) struct PulseParameters {
    /// Width, in samples, of the rolling mean applied to the pickup channel.
    #[clap(long, default_value = "10")]
    pub(crate) window_size: usize,

    /// If set, the mean of the pickup channel's BG1 background file is subtracted before smoothing.
    #[clap(long)]
    pub(crate) subtract_background: bool,

    /// Upper trigger level, crossed by the reflected pulse.
    #[clap(long, default_value = "0.15")]
    pub(crate) trigger_up: Real,

    /// Lower trigger level, crossed by the incident pulse. Defaults to the negated upper level.
    #[clap(long, allow_hyphen_values = true)]
    pub(crate) trigger_down: Option<Real>,

    /// Incident pulse crossings are only accepted before this time, in seconds.
    #[clap(long, default_value = "1e-7")]
    pub(crate) bcs_window_end: Real,

    /// Number of closest crossings from which the earliest is taken as the timing reference.
    #[clap(long, default_value = "5")]
    pub(crate) timing_candidates: usize,

    /// If set, times are rebased onto the incident pulse crossing.
    #[clap(long)]
    pub(crate) subtract_bcs_time: bool,

    /// Number of samples to which every shot of the transmitted pulse is padded.
    #[clap(long, default_value = "2002")]
    pub(crate) n_elements: usize,

    /// Spacing, in seconds, of the samples prepended when padding.
    #[clap(long, default_value = "1e-10")]
    pub(crate) padding_interval: Real,
}

impl PulseParameters {
    pub(crate) fn timing(&self) -> TimingParameters {
        TimingParameters {
            trigger_up: self.trigger_up,
            trigger_down: self.trigger_down.unwrap_or(-self.trigger_up),
            bcs_window_end: self.bcs_window_end,
            candidates: self.timing_candidates,
        }
    }

    pub(crate) fn synthesis(&self) -> SynthesisOptions {
        SynthesisOptions {
            subtract_bcs_time: self.subtract_bcs_time,
        }
    }
}

/// Settings of the discharge onset search.
#[derive(Debug, Clone, Args)]
pub(crate) struct DischargeSettings {
    /// The transmitted level marking the discharge onset.
    #[clap(long, default_value = "0.15")]
    pub(crate) discharge_trigger: Real,

    /// Shots whose mean transmitted level is below this are skipped. Defaults to the discharge trigger.
    #[clap(long, allow_hyphen_values = true)]
    pub(crate) discharge_mean_threshold: Option<Real>,

    /// Latest time, in seconds, at which an onset is accepted.
    #[clap(long, default_value = "9e-8")]
    pub(crate) discharge_window_end: Real,

    /// If set, onsets are accepted at any time.
    #[clap(long)]
    pub(crate) unbounded_discharge_window: bool,
}

impl DischargeSettings {
    pub(crate) fn parameters(&self) -> DischargeParameters {
        DischargeParameters {
            trigger: self.discharge_trigger,
            mean_threshold: self
                .discharge_mean_threshold
                .unwrap_or(self.discharge_trigger),
            window_end: (!self.unbounded_discharge_window).then_some(self.discharge_window_end),
        }
    }
}

/// Names and fixed values written to the solver configuration.
#[derive(Debug, Clone, Args)]
pub(crate) struct SolverSettings {
    /// Directory to which the per-shot files are written.
    #[clap(long, env = "EFISH_OUTPUT_DIRECTORY")]
    pub(crate) output_directory: PathBuf,

    /// Path of the solver configuration file.
    #[clap(long)]
    pub(crate) config_file: PathBuf,

    /// Base name of the per-shot smoothed pickup files.
    #[clap(long, default_value = "C11")]
    pub(crate) bcs1_gen_name: String,

    /// Base name of the per-shot transmitted pulse files.
    #[clap(long, default_value = "C44")]
    pub(crate) bcs2_gen_name: String,

    /// Base name of the per-shot photodiode files.
    #[clap(long, default_value = "C22")]
    pub(crate) pd_gen_name: String,

    /// Base name of the per-shot photomultiplier files.
    #[clap(long, default_value = "C33")]
    pub(crate) pmt_gen_name: String,

    /// Extension of the per-shot files, including the leading dot.
    #[clap(long, default_value = ".txt")]
    pub(crate) extension: String,

    /// Lines the solver skips at the head of each per-shot file.
    #[clap(long, default_value = "5")]
    pub(crate) skip: usize,

    /// Background time passed to the solver.
    #[clap(long, default_value = "0.0", allow_hyphen_values = true)]
    pub(crate) t_bgd: Real,

    /// Trigger level passed to the solver.
    #[clap(long, default_value = "0.15")]
    pub(crate) solver_trigger: Real,

    /// Number of shots of largest maximum used for the peak statistics.
    #[clap(long, default_value_t = DEFAULT_TOP_SHOTS)]
    pub(crate) top_shots: usize,

    /// If set, laser times are rebased onto each shot's discharge onset, and shots without an
    /// onset are excluded from the laser channel.
    #[clap(long)]
    pub(crate) shift_laser_by_discharge: bool,
}

/// Extracts the transmitted pulses and discharge onsets of a run, and prepares the solver input.
#[derive(Debug, Clone, Parser)]
pub(crate) struct RunParameters {
    /// Directory of the oscilloscope waveform files.
    #[clap(long, env = "EFISH_DATA_DIRECTORY")]
    pub(crate) data_directory: PathBuf,

    /// If set, at most this many files, ordered by name, are read per channel.
    #[clap(long)]
    pub(crate) max_files: Option<usize>,

    #[clap(flatten)]
    pub(crate) channels: ChannelNames,

    #[clap(flatten)]
    pub(crate) pulse: PulseParameters,

    #[clap(flatten)]
    pub(crate) discharge: DischargeSettings,

    #[clap(flatten)]
    pub(crate) solver: SolverSettings,
}

/// Filters the second harmonic solver's output and writes the statistics solver's input.
#[derive(Debug, Clone, Parser)]
pub(crate) struct StatisticsInputParameters {
    /// The `;` delimited output of the second harmonic solver.
    #[clap(long)]
    pub(crate) solver_output: PathBuf,

    /// Path to which the filtered signal is written.
    #[clap(long)]
    pub(crate) data_file: PathBuf,

    /// Path of the statistics solver configuration file.
    #[clap(long)]
    pub(crate) config_file: PathBuf,

    /// Number of neighbours considered by the outlier filter.
    #[clap(long, default_value = "100")]
    pub(crate) n_neighbors: usize,

    /// Points whose local outlier factor exceeds this are removed.
    #[clap(long, default_value = "1.5")]
    pub(crate) outlier_threshold: Real,

    /// Histogram bin width, in nanoseconds.
    #[clap(long, default_value = "0.2")]
    pub(crate) bin_width: Real,
}

impl StatisticsInputParameters {
    pub(crate) fn options(&self) -> StatisticsInputOptions {
        StatisticsInputOptions {
            outliers: LocalOutlierFactor::new(self.n_neighbors, self.outlier_threshold),
            bin_width: self.bin_width,
            ..Default::default()
        }
    }
}

/// Specifies the task to perform, and wraps its options in each variant.
#[derive(Subcommand, Debug)]
pub(crate) enum Mode {
    /// Processes a run of waveform files into solver input.
    Run(RunParameters),
    /// Processes the second harmonic solver's output into statistics solver input.
    StatisticsInput(StatisticsInputParameters),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Parser)]
    struct TestCli {
        #[command(subcommand)]
        mode: Mode,
    }

    fn run(args: &[&str]) -> RunParameters {
        let args = ["test", "run", "--data-directory", "data", "--output-directory", "out"]
            .into_iter()
            .chain(["--config-file", "input.txt"])
            .chain(args.iter().copied());
        match TestCli::parse_from(args).mode {
            Mode::Run(parameters) => parameters,
            Mode::StatisticsInput(_) => unreachable!("parsed the run mode"),
        }
    }

    #[test]
    fn defaults() {
        let parameters = run(&[]);
        let timing = parameters.pulse.timing();
        assert_eq!(timing.trigger_up, 0.15);
        assert_eq!(timing.trigger_down, -0.15);
        assert_eq!(timing.candidates, 5);

        let discharge = parameters.discharge.parameters();
        assert_eq!(discharge.trigger, 0.15);
        assert_eq!(discharge.mean_threshold, 0.15);
        assert_eq!(discharge.window_end, Some(9e-8));
        assert_eq!(parameters.solver.top_shots, 20);
        assert!(!parameters.solver.shift_laser_by_discharge);
        assert_eq!(parameters.channels.pickup_channel, "C1");
    }

    #[test]
    fn overrides() {
        let parameters = run(&[
            "--trigger-up",
            "0.14",
            "--trigger-down",
            "-0.2",
            "--unbounded-discharge-window",
            "--discharge-mean-threshold",
            "0.1",
        ]);
        assert_eq!(parameters.pulse.timing().trigger_down, -0.2);
        let discharge = parameters.discharge.parameters();
        assert_eq!(discharge.window_end, None);
        assert_eq!(discharge.mean_threshold, 0.1);
    }
}
