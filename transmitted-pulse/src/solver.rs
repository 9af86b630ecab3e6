//! Files exchanged with the external solvers.
//!
//! The solvers read a fixed-layout configuration file naming a directory of per-shot waveform
//! files, which mimic the oscilloscope's own exports. The output of the second harmonic solver
//! is filtered and passed on, with its own configuration file, to the statistics solver.
use crate::{
    discharge::DischargeEvents,
    outliers::LocalOutlierFactor,
    pulse_detection::Real,
};
use csv::{ReaderBuilder, WriterBuilder};
use efish_common::{
    ChannelSeries, Sample, ShotId,
    metrics::{
        failures::{self, FailureKind},
        names::{FAILURES, FILES_WRITTEN},
    },
};
use itertools::Itertools;
use metrics::counter;
use rayon::prelude::*;
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{info, instrument, warn};

const DELIMITER: u8 = b';';

/// Oscilloscope preamble written at the head of every per-shot file.
const PREAMBLE: [&str; 4] = [
    "LECROYWR625Zi;61392;Waveform",
    "Segments;1;SegmentSize;2002",
    "Segment;TrigTime;TimeSinceSegment1",
    "#1date;0",
];

/// Digits to which shot ids are zero-padded in per-shot file names.
const SHOT_ID_WIDTH: usize = 5;

const TIME_COLUMN: &str = "timens";
const SIGNAL_COLUMN: &str = "shg_single";

#[derive(Debug, Error)]
pub(crate) enum SolverError {
    #[error("Cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Delimited text error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("{path} has no column named {column}")]
    MissingColumn { path: PathBuf, column: &'static str },
    #[error("Invalid value '{value}' in column {column} at line {line} of {path}")]
    InvalidValue {
        path: PathBuf,
        line: u64,
        column: &'static str,
        value: String,
    },
    #[error("{0} contains no data rows")]
    EmptyTable(PathBuf),
    #[error("No discharge events, the range of shots is undefined")]
    NoDischargeEvents,
}

impl SolverError {
    fn io(path: &Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_owned(),
            source,
        }
    }

    fn csv(path: &Path) -> impl FnOnce(csv::Error) -> Self + '_ {
        move |source| Self::Csv {
            path: path.to_owned(),
            source,
        }
    }
}

/// Formats a float as its shortest round-trip decimal representation.
///
/// Values of magnitude in `[1e-4, 1e16)` use positional notation, and all others scientific
/// notation with a signed exponent of at least two digits, e.g. `1e-09`. Integral values
/// always carry a fractional part, e.g. `0.0`.
pub(crate) fn format_float(value: Real) -> String {
    if value.is_nan() {
        return "nan".to_owned();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_owned();
    }
    let scientific = format!("{value:e}");
    let (mantissa, exponent) = scientific
        .split_once('e')
        .and_then(|(mantissa, exponent)| Some((mantissa, exponent.parse::<i32>().ok()?)))
        .unwrap_or((scientific.as_str(), 0));

    if (-4..16).contains(&exponent) {
        let positional = value.to_string();
        if positional.contains('.') {
            positional
        } else {
            positional + ".0"
        }
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exponent.unsigned_abs())
    }
}

/// Parameters of the second harmonic solver's configuration file.
#[derive(Debug, Clone)]
pub(crate) struct SolverInput {
    /// Directory holding the per-shot files.
    pub(crate) directory: PathBuf,
    pub(crate) bcs1_gen_name: String,
    /// Base name of the per-shot transmitted pulse files.
    pub(crate) bcs2_gen_name: String,
    pub(crate) pd_gen_name: String,
    pub(crate) pmt_gen_name: String,
    pub(crate) extension: String,
    pub(crate) first_osc: ShotId,
    pub(crate) last_osc: ShotId,
    /// Lines the solver skips at the head of each per-shot file.
    pub(crate) skip: usize,
    pub(crate) n_elements: usize,
    pub(crate) t_bgd: Real,
    /// Full width at half maximum of the laser pulse.
    pub(crate) fwhm: Real,
    /// Delay of the photomultiplier peak after the laser peak.
    pub(crate) t_diff: Real,
    pub(crate) trigger: Real,
}

/// The first and last shots with a discharge event.
pub(crate) fn shot_range(events: &DischargeEvents) -> Result<(ShotId, ShotId), SolverError> {
    let first = events.keys().next().ok_or(SolverError::NoDischargeEvents)?;
    let last = events.keys().next_back().ok_or(SolverError::NoDischargeEvents)?;
    Ok((*first, *last))
}

impl SolverInput {
    /// The configuration file's content, one value per line.
    pub(crate) fn render(&self) -> String {
        [
            format!("{}\\", self.directory.display()),
            self.bcs1_gen_name.clone(),
            self.bcs2_gen_name.clone(),
            self.pd_gen_name.clone(),
            self.pmt_gen_name.clone(),
            self.extension.clone(),
            self.first_osc.to_string(),
            self.last_osc.to_string(),
            self.skip.to_string(),
            self.n_elements.to_string(),
            format_float(self.t_bgd),
            format_float(self.fwhm),
            format_float(self.t_diff),
            format_float(self.trigger),
        ]
        .into_iter()
        .map(|line| line + "\n")
        .collect()
    }

    #[instrument(skip_all, fields(path = %path.display()), err(level = "error"))]
    pub(crate) fn write(&self, path: &Path) -> Result<(), SolverError> {
        fs::write(path, self.render()).map_err(SolverError::io(path))?;
        counter!(FILES_WRITTEN).increment(1);
        info!("Solver configuration written");
        Ok(())
    }
}

/// The path of the file holding one shot's waveform.
pub(crate) fn shot_file_path(
    directory: &Path,
    base_name: &str,
    shot: ShotId,
    extension: &str,
) -> PathBuf {
    directory.join(format!(
        "{base_name}{shot:0width$}{extension}",
        width = SHOT_ID_WIDTH
    ))
}

fn write_shot_file(path: &Path, rows: &[Sample]) -> Result<(), SolverError> {
    let mut file = BufWriter::new(File::create(path).map_err(SolverError::io(path))?);
    for line in PREAMBLE {
        writeln!(file, "{line}").map_err(SolverError::io(path))?;
    }
    if rows.is_empty() {
        warn!(path = %path.display(), "Shot has no rows");
    }

    let mut writer = WriterBuilder::new().delimiter(DELIMITER).from_writer(file);
    writer
        .write_record(["time", "amplitude"])
        .map_err(SolverError::csv(path))?;
    for row in rows {
        writer
            .write_record([format_float(row.time), format_float(row.amplitude)])
            .map_err(SolverError::csv(path))?;
    }
    writer.flush().map_err(SolverError::io(path))
}

/// Writes every shot of `series` to its own file, in parallel.
///
/// Returns the number of files written.
/// # Parameters
/// - series: the rows to write, one file per shot.
/// - directory: created if it does not exist.
/// - base_name: prefixed to the zero-padded shot id to name each file.
/// - extension: appended to each file name, including its leading `.`.
#[instrument(skip_all, fields(num_shots = series.num_shots(), base_name = base_name), err(level = "error"))]
pub(crate) fn write_shot_files(
    series: &ChannelSeries,
    directory: &Path,
    base_name: &str,
    extension: &str,
) -> Result<usize, SolverError> {
    fs::create_dir_all(directory).map_err(SolverError::io(directory))?;

    let results = series
        .iter()
        .collect_vec()
        .into_par_iter()
        .map(|(shot, rows)| {
            let path = shot_file_path(directory, base_name, shot, extension);
            write_shot_file(&path, rows).inspect_err(|e| {
                warn!("Failed to write shot {shot}: {e}");
                counter!(FAILURES, &[failures::get_label(FailureKind::FileWriteFailed)])
                    .increment(1);
            })
        })
        .collect::<Vec<_>>();
    let written = results.into_iter().collect::<Result<Vec<_>, _>>()?.len();

    counter!(FILES_WRITTEN).increment(written as u64);
    info!("Wrote {written} shot files to {}", directory.display());
    Ok(written)
}

/// Settings of [prepare_statistics_input].
#[derive(Debug, Clone)]
pub(crate) struct StatisticsInputOptions {
    pub(crate) outliers: LocalOutlierFactor,
    /// Histogram bin width used by the statistics solver, in nanoseconds.
    pub(crate) bin_width: Real,
    /// Lines of header in the filtered data file.
    pub(crate) header_lines: usize,
}

impl Default for StatisticsInputOptions {
    fn default() -> Self {
        Self {
            outliers: LocalOutlierFactor::default(),
            bin_width: 0.2,
            header_lines: 1,
        }
    }
}

fn column_index(
    path: &Path,
    headers: &csv::StringRecord,
    column: &'static str,
) -> Result<usize, SolverError> {
    headers
        .iter()
        .position(|header| header == column)
        .ok_or_else(|| SolverError::MissingColumn {
            path: path.to_owned(),
            column,
        })
}

/// Reads the `(timens, shg_single)` pairs of the second harmonic solver's output.
fn read_solver_output(path: &Path) -> Result<Vec<(Real, Real)>, SolverError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(DELIMITER)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(SolverError::csv(path))?;
    let headers = reader.headers().map_err(SolverError::csv(path))?.clone();
    let time_index = column_index(path, &headers, TIME_COLUMN)?;
    let signal_index = column_index(path, &headers, SIGNAL_COLUMN)?;

    reader
        .records()
        .map(|record| {
            let record = record.map_err(SolverError::csv(path))?;
            let line = record.position().map(|p| p.line()).unwrap_or_default();
            let parse = |index: usize, column: &'static str| {
                let field = record.get(index).unwrap_or_default();
                field
                    .parse::<Real>()
                    .map_err(|_| SolverError::InvalidValue {
                        path: path.to_owned(),
                        line,
                        column,
                        value: field.to_owned(),
                    })
            };
            Ok((parse(time_index, TIME_COLUMN)?, parse(signal_index, SIGNAL_COLUMN)?))
        })
        .collect()
}

/// Prepares the input of the statistics solver from the output of the second harmonic solver.
///
/// The output's rows are sorted by time, the last row is discarded, and outliers are removed
/// before the remainder is written to `data_path`. The statistics solver's configuration,
/// naming the data file, is written to `config_path`. Returns the number of rows written.
#[instrument(skip_all, fields(solver_output = %solver_output.display()), err(level = "error"))]
pub(crate) fn prepare_statistics_input(
    solver_output: &Path,
    data_path: &Path,
    config_path: &Path,
    options: &StatisticsInputOptions,
) -> Result<usize, SolverError> {
    let mut rows = read_solver_output(solver_output)?;
    rows.sort_by(|a, b| a.0.total_cmp(&b.0));
    if rows.pop().is_none() {
        return Err(SolverError::EmptyTable(solver_output.to_owned()));
    }
    let rows = options.outliers.filter(&rows, |row| *row);

    let mut writer = WriterBuilder::new()
        .delimiter(DELIMITER)
        .from_path(data_path)
        .map_err(SolverError::csv(data_path))?;
    writer
        .write_record([TIME_COLUMN, SIGNAL_COLUMN])
        .map_err(SolverError::csv(data_path))?;
    for (time, signal) in &rows {
        writer
            .write_record([format_float(*time), format_float(*signal)])
            .map_err(SolverError::csv(data_path))?;
    }
    writer.flush().map_err(SolverError::io(data_path))?;

    let config_directory = config_path.parent().unwrap_or(Path::new(""));
    let data_name = data_path
        .file_name()
        .map(|name| name.to_string_lossy())
        .unwrap_or_default();
    let config = format!(
        "{}\\\n{data_name}\n{}\n{}\n{}\n",
        config_directory.display(),
        options.header_lines,
        rows.len(),
        format_float(options.bin_width)
    );
    fs::write(config_path, config).map_err(SolverError::io(config_path))?;
    counter!(FILES_WRITTEN).increment(2);
    info!("Wrote {} rows for the statistics solver", rows.len());
    Ok(rows.len())
}
