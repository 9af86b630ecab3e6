//! Per-shot smoothing of a channel's amplitude.
use crate::{
    error::ProcessingError,
    pulse_detection::{Real, WindowFilter, datatype::AveragedSample, window::CenteredMean},
};
use efish_common::{ChannelSeries, Sample, ShotSeries};
use tracing::instrument;

/// Minimum number of samples a window must contain for its mean to be defined.
pub(crate) const MIN_PERIODS: usize = 3;

const OPERATION: &str = "average_amplitude";

/// Fills undefined positions from the nearest defined value.
///
/// Leading gaps take the first defined value and all later gaps the last one before them.
/// Returns `None` if no value is defined.
fn fill_gaps(values: Vec<Option<Real>>) -> Option<Vec<Real>> {
    let mut last = values.iter().flatten().next().copied()?;
    Some(
        values
            .into_iter()
            .map(|value| {
                if let Some(value) = value {
                    last = value;
                }
                last
            })
            .collect(),
    )
}

/// Augments every sample with the centred rolling mean of its shot's amplitude.
///
/// Output rows correspond one-to-one, in order, with input rows.
/// # Parameters
/// - series: the channel to smooth.
/// - window_size: the width of the rolling window, in samples.
#[instrument(skip_all, fields(window_size = window_size, num_shots = series.num_shots()), err(level = "error"))]
pub(crate) fn average_amplitude(
    series: &ChannelSeries,
    window_size: usize,
) -> Result<ShotSeries<AveragedSample>, ProcessingError> {
    if series.is_empty() {
        return Err(ProcessingError::EmptySeries {
            operation: OPERATION,
        });
    }
    if window_size < MIN_PERIODS {
        return Err(ProcessingError::InvalidParameter {
            operation: OPERATION,
            reason: format!("window size {window_size} is below the minimum of {MIN_PERIODS}"),
        });
    }

    series.try_map_shots(|shot, rows| {
        let too_short = || ProcessingError::ShotTooShort {
            shot,
            operation: OPERATION,
            observed: rows.len(),
            expected: window_size,
        };
        if rows.len() < window_size {
            return Err(too_short());
        }

        let means = rows
            .iter()
            .map(|sample| sample.amplitude)
            .window(CenteredMean::new(window_size, MIN_PERIODS))
            .collect::<Vec<_>>();
        let means = fill_gaps(means).ok_or_else(too_short)?;

        Ok(Some(
            rows.iter()
                .zip(means)
                .map(|(sample, avg_amplitude)| AveragedSample {
                    time: sample.time,
                    amplitude: sample.amplitude,
                    avg_amplitude,
                })
                .collect(),
        ))
    })
}

/// Mean amplitude over every sample of the series, if it has any.
pub(crate) fn mean_amplitude(series: &ChannelSeries) -> Option<Real> {
    let count = series.num_rows();
    (count > 0).then(|| series.rows().map(|(_, s)| s.amplitude).sum::<Real>() / count as Real)
}

/// Subtracts a constant baseline from every amplitude.
pub(crate) fn subtract_baseline(series: &ChannelSeries, baseline: Real) -> ChannelSeries {
    series.map_shots(|_, rows| {
        Some(
            rows.iter()
                .map(|s| Sample::new(s.time, s.amplitude - baseline))
                .collect(),
        )
    })
}
