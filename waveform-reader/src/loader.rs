//! Discovery and parsing of waveform files.
use crate::{
    LoadError,
    file_name::{is_background_file, matches_channel, parse_shot_id},
};
use csv::{ReaderBuilder, StringRecord, Trim};
use efish_common::{
    CancellationToken, ChannelSeries, Sample, ShotId,
    metrics::{
        failures,
        names::{FAILURES, FILES_READ},
    },
};
use glob::Pattern;
use itertools::Itertools;
use metrics::counter;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Number of instrument preamble lines which precede the column header.
const PREAMBLE_LINES: u64 = 4;
const DELIMITER: u8 = b';';
const BACKGROUND_TAG: &str = "BG1";

/// Optional settings for [load_channel].
#[derive(Default, Debug, Clone)]
pub struct LoaderOptions {
    /// If set, only the first `max_files` files (ordered by path) are read.
    pub max_files: Option<usize>,
    /// If set and cancelled, pending file reads are abandoned and loading fails.
    pub cancellation: Option<CancellationToken>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Summary of a channel load, listing every file which could not be used.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadReport {
    pub loaded: usize,
    pub skipped: Vec<SkippedFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelLoad {
    pub series: ChannelSeries,
    pub report: LoadReport,
}

fn file_name_of(path: &Path) -> Option<&str> {
    path.file_name()?.to_str()
}

/// Lists the regular files in `directory` whose name begins with `channel` and satisfies `keep`.
fn list_files<F>(channel: &str, directory: &Path, keep: F) -> Result<Vec<PathBuf>, LoadError>
where
    F: Fn(&str) -> bool,
{
    let pattern = format!(
        "{}/{}*",
        Pattern::escape(&directory.to_string_lossy()),
        Pattern::escape(channel)
    );
    let mut files = glob::glob(&pattern)?
        .filter_ok(|path| {
            path.is_file()
                && file_name_of(path).is_some_and(|name| matches_channel(name, channel) && keep(name))
        })
        .collect::<Result<Vec<_>, _>>()?;
    files.sort();
    Ok(files)
}

/// Returns the sorted paths of every non-background waveform file recorded on `channel`.
/// # Parameters
/// - channel: the channel identifier, i.e. the file name prefix such as `C1`.
/// - directory: the directory to search, non-recursively.
pub fn channel_files(channel: &str, directory: &Path) -> Result<Vec<PathBuf>, LoadError> {
    list_files(channel, directory, |name| !is_background_file(name))
}

fn parse_value(path: &Path, line: u64, field: Option<&str>) -> Result<f64, LoadError> {
    let malformed = |reason: String| LoadError::MalformedRow {
        path: path.to_owned(),
        line,
        reason,
    };
    let field = field.ok_or_else(|| malformed("missing field".to_owned()))?;
    let value = field
        .parse::<f64>()
        .map_err(|e| malformed(format!("'{field}': {e}")))?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(malformed(format!("'{field}' is not finite")))
    }
}

fn parse_record(path: &Path, record: &StringRecord) -> Result<Sample, LoadError> {
    let line = record.position().map(|p| p.line()).unwrap_or_default() + PREAMBLE_LINES;
    if record.len() != 2 {
        return Err(LoadError::MalformedRow {
            path: path.to_owned(),
            line,
            reason: format!("expected 2 fields, found {}", record.len()),
        });
    }
    Ok(Sample::new(
        parse_value(path, line, record.get(0))?,
        parse_value(path, line, record.get(1))?,
    ))
}

/// Reads the samples of one waveform file, skipping the instrument preamble.
fn read_samples(path: &Path) -> Result<Vec<Sample>, LoadError> {
    let io_error = |source| LoadError::Io {
        path: path.to_owned(),
        source,
    };
    let mut reader = BufReader::new(File::open(path).map_err(io_error)?);

    let mut discard = Vec::new();
    for _ in 0..PREAMBLE_LINES {
        discard.clear();
        if reader.read_until(b'\n', &mut discard).map_err(io_error)? == 0 {
            return Err(LoadError::Empty(path.to_owned()));
        }
    }

    let samples = ReaderBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader)
        .records()
        .map(|record| {
            let record = record.map_err(|source| LoadError::Csv {
                path: path.to_owned(),
                source,
            })?;
            parse_record(path, &record)
        })
        .collect::<Result<Vec<_>, _>>()?;

    if samples.is_empty() {
        Err(LoadError::Empty(path.to_owned()))
    } else {
        Ok(samples)
    }
}

/// Reads a single waveform file, returning the shot id encoded in its name and its samples in file order.
#[instrument(skip_all, level = "trace", fields(path = %path.display()), err(level = "debug"))]
pub fn read_waveform_file(path: &Path) -> Result<(ShotId, Vec<Sample>), LoadError> {
    let shot = file_name_of(path)
        .and_then(parse_shot_id)
        .ok_or_else(|| LoadError::InvalidFileName(path.to_owned()))?;
    Ok((shot, read_samples(path)?))
}

/// Loads every waveform file recorded on `channel` in `directory`.
///
/// Files are parsed in parallel. A file which cannot be read or parsed is skipped, logged and
/// listed in the returned [LoadReport]; it does not abort the load. If two files map to the
/// same shot their rows are merged, the file with the lower path winning any repeated time.
/// # Parameters
/// - channel: the channel identifier, i.e. the file name prefix such as `C1`.
/// - directory: the directory to search, non-recursively.
/// - options: file limit and cancellation.
#[instrument(skip_all, fields(channel = channel, num_files, num_shots), err(level = "warn"))]
pub fn load_channel(
    channel: &str,
    directory: &Path,
    options: &LoaderOptions,
) -> Result<ChannelLoad, LoadError> {
    let mut files = channel_files(channel, directory)?;
    if let Some(max_files) = options.max_files {
        files.truncate(max_files);
    }
    tracing::Span::current().record("num_files", files.len());

    let is_cancelled = || {
        options
            .cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    };

    let outcomes = files
        .par_iter()
        .map(|path| {
            if is_cancelled() {
                (path, Err(LoadError::Cancelled))
            } else {
                (path, read_waveform_file(path))
            }
        })
        .collect::<Vec<_>>();

    if is_cancelled() {
        return Err(LoadError::Cancelled);
    }

    let mut report = LoadReport::default();
    let mut rows = Vec::new();
    for (path, outcome) in outcomes {
        match outcome {
            Ok((shot, samples)) => {
                counter!(FILES_READ).increment(1);
                report.loaded += 1;
                rows.extend(samples.into_iter().map(|sample| (shot, sample)));
            }
            Err(e) => {
                warn!(path = %path.display(), "Skipping file: {e}");
                counter!(FAILURES, &[failures::get_label(e.failure_kind())]).increment(1);
                report.skipped.push(SkippedFile {
                    path: path.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    let series = ChannelSeries::from_rows(rows);
    if series.is_empty() {
        return Err(LoadError::NoShots {
            channel: channel.to_owned(),
            directory: directory.to_owned(),
        });
    }
    tracing::Span::current().record("num_shots", series.num_shots());
    info!(
        loaded = report.loaded,
        skipped = report.skipped.len(),
        shots = series.num_shots(),
        "Loaded channel {channel}"
    );
    Ok(ChannelLoad { series, report })
}

/// Loads the background reference recorded on `channel`, i.e. the file tagged `BG1`.
///
/// The result holds a single shot, numbered from the file name if it has a numeric suffix and 0 otherwise.
#[instrument(skip_all, fields(channel = channel), err(level = "warn"))]
pub fn load_background(channel: &str, directory: &Path) -> Result<ChannelSeries, LoadError> {
    let files = list_files(channel, directory, |name| name.contains(BACKGROUND_TAG))?;
    let path = match files.as_slice() {
        [] => {
            return Err(LoadError::BackgroundNotFound {
                channel: channel.to_owned(),
                directory: directory.to_owned(),
            });
        }
        [path] => path,
        _ => {
            return Err(LoadError::AmbiguousBackground {
                channel: channel.to_owned(),
                count: files.len(),
            });
        }
    };
    debug!(path = %path.display(), "Reading background");

    let shot = file_name_of(path).and_then(parse_shot_id).unwrap_or_default();
    let samples = read_samples(path)?;
    Ok(ChannelSeries::from_rows(
        samples.into_iter().map(|sample| (shot, sample)),
    ))
}
