//! Summary statistics of the diagnostic channels, consumed by the solver configuration.
use crate::pulse_detection::Real;
use efish_common::{ChannelSeries, Sample, ShotId};
use itertools::Itertools;
use std::{cmp::Ordering, collections::BTreeMap};
use tracing::{debug, instrument};

/// Number of shots with the largest maxima considered by the peak statistics.
pub(crate) const DEFAULT_TOP_SHOTS: usize = 20;

/// The median of `values`, averaging the two middle values when their count is even.
pub(crate) fn median(values: impl IntoIterator<Item = Real>) -> Option<Real> {
    let values = values.into_iter().sorted_by(Real::total_cmp).collect_vec();
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values.get(mid).copied()
    } else {
        Some((values.get(mid.checked_sub(1)?)? + values.get(mid)?) / 2.0)
    }
}

/// Flips the polarity of every sample.
pub(crate) fn invert(series: &ChannelSeries) -> ChannelSeries {
    series.map_shots(|_, rows| {
        Some(
            rows.iter()
                .map(|sample| Sample::new(sample.time, -sample.amplitude))
                .collect(),
        )
    })
}

/// The sample of largest amplitude, the earliest on ties.
fn shot_maximum(rows: &[Sample]) -> Option<&Sample> {
    rows.iter()
        .reduce(|best, sample| if sample.amplitude > best.amplitude { sample } else { best })
}

/// The `n` shots of largest maximum amplitude, in descending order of maximum.
///
/// Shots with equal maxima are ranked by ascending shot id.
fn top_shots_by_max(series: &ChannelSeries, n: usize) -> Vec<(ShotId, &Sample)> {
    series
        .iter()
        .filter_map(|(shot, rows)| Some((shot, shot_maximum(rows)?)))
        .sorted_by(|(shot_a, max_a), (shot_b, max_b)| {
            max_b
                .amplitude
                .partial_cmp(&max_a.amplitude)
                .unwrap_or(Ordering::Equal)
                .then(shot_a.cmp(shot_b))
        })
        .take(n)
        .collect()
}

/// Locates the peak of each of the `n` shots of largest maximum amplitude.
///
/// The peak is the sample of maximum amplitude, the earliest such sample on ties.
#[instrument(skip_all, fields(n = n, num_shots = series.num_shots()))]
pub(crate) fn find_peak_maxima(series: &ChannelSeries, n: usize) -> BTreeMap<ShotId, Sample> {
    top_shots_by_max(series, n)
        .into_iter()
        .map(|(shot, peak)| (shot, *peak))
        .collect()
}

/// The median full width at half maximum over the `n` shots of largest maximum amplitude.
///
/// A shot's width spans the earliest to the latest sample whose amplitude is at least half
/// the shot's maximum. Returns `None` for an empty series.
#[instrument(skip_all, fields(n = n, num_shots = series.num_shots()))]
pub(crate) fn full_width_half_maximum(series: &ChannelSeries, n: usize) -> Option<Real> {
    let widths = top_shots_by_max(series, n)
        .into_iter()
        .filter_map(|(shot, peak)| {
            let half = peak.amplitude / 2.0;
            let (first, last) = series
                .get(shot)?
                .iter()
                .filter(|sample| sample.amplitude >= half)
                .map(|sample| sample.time)
                .minmax()
                .into_option()?;
            Some(last - first)
        })
        .collect_vec();
    debug!(?widths, "Half maximum widths");
    median(widths)
}

/// The median delay of the peaks on one channel after the maxima of another.
///
/// Only shots present in both inputs contribute. On the reference channel the earliest
/// sample of maximum amplitude is taken.
/// # Parameters
/// - peaks: the output of [find_peak_maxima].
/// - reference: the channel against which the delay is measured.
#[instrument(skip_all, fields(num_peaks = peaks.len()))]
pub(crate) fn inter_channel_offset(
    peaks: &BTreeMap<ShotId, Sample>,
    reference: &ChannelSeries,
) -> Option<Real> {
    median(peaks.iter().filter_map(|(shot, peak)| {
        let reference_max = shot_maximum(reference.get(*shot)?)?;
        Some(peak.time - reference_max.time)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    const NS: Real = 1e-9;

    fn series(shots: Vec<(ShotId, Vec<Real>)>) -> ChannelSeries {
        ChannelSeries::from_rows(shots.into_iter().flat_map(|(shot, amplitudes)| {
            amplitudes
                .into_iter()
                .enumerate()
                .map(move |(i, amplitude)| (shot, Sample::new(i as Real * NS, amplitude)))
        }))
    }

    #[test]
    fn median_of_odd_and_even_counts() {
        assert_eq!(median([3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median([4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median([]), None);
    }

    #[test]
    fn fwhm_counts_samples_at_half_maximum() {
        let shot = series(vec![(1, vec![0.0, 0.2, 0.5, 1.0, 0.9, 0.4, 0.1, 0.0])]);
        let fwhm = full_width_half_maximum(&shot, DEFAULT_TOP_SHOTS).expect("one shot");
        assert_approx_eq!(fwhm / NS, 2.0);
    }

    #[test]
    fn fwhm_of_three_nanoseconds() {
        let shot = series(vec![(1, vec![0.0, 0.2, 0.5, 1.0, 0.9, 0.5, 0.1, 0.0])]);
        let fwhm = full_width_half_maximum(&shot, DEFAULT_TOP_SHOTS).expect("one shot");
        assert_approx_eq!(fwhm / NS, 3.0);
    }

    #[test]
    fn fwhm_is_median_over_top_shots() {
        let shots = series(vec![
            (1, vec![0.0, 1.0, 0.0]),
            (2, vec![2.0, 2.0, 2.0]),
            (3, vec![4.0, 4.0, 0.0]),
            // Excluded by the top two selection.
            (4, vec![0.1, 0.1, 0.1]),
        ]);
        let fwhm = full_width_half_maximum(&shots, 2).expect("two shots");
        assert_approx_eq!(fwhm / NS, 1.5);
    }

    #[test]
    fn peaks_of_top_shots_take_earliest_maximum() {
        let shots = series(vec![
            (1, vec![0.0, 0.5, 0.5]),
            (2, vec![0.0, 0.0, 0.9, 0.9]),
            (3, vec![0.9, 0.0]),
        ]);
        let peaks = find_peak_maxima(&shots, 2);
        assert_eq!(peaks.keys().copied().collect_vec(), vec![2, 3]);
        assert_approx_eq!(peaks[&2].time / NS, 2.0);
        assert_approx_eq!(peaks[&3].time, 0.0);
    }

    #[test]
    fn inverted_channel_peaks() {
        let shots = invert(&series(vec![(1, vec![0.0, -0.3, -0.7, -0.2])]));
        let peaks = find_peak_maxima(&shots, DEFAULT_TOP_SHOTS);
        assert_approx_eq!(peaks[&1].amplitude, 0.7);
        assert_approx_eq!(peaks[&1].time / NS, 2.0);
    }

    #[test]
    fn offset_uses_shared_shots() {
        let peaks = find_peak_maxima(
            &series(vec![
                (1, vec![0.0, 0.0, 0.0, 1.0]),
                (2, vec![0.0, 0.0, 0.0, 0.0, 1.0]),
                (3, vec![1.0]),
            ]),
            DEFAULT_TOP_SHOTS,
        );
        let reference = series(vec![(1, vec![1.0, 0.0]), (2, vec![0.0, 1.0, 1.0])]);
        let offset = inter_channel_offset(&peaks, &reference).expect("two shared shots");
        // Delays of 3 ns and 3 ns; shot 3 has no reference.
        assert_approx_eq!(offset / NS, 3.0);
    }
}
