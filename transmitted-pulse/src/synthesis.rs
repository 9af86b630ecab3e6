//! Synthesis of the transmitted pulse from the incident and aligned reflected pulses.
use crate::{
    error::ProcessingError,
    pulse_detection::{
        Real,
        datatype::{AveragedSample, TransmittedSample},
    },
    timing::{TimingReference, TimingReferences},
};
use efish_common::{
    Sample, ShotId, ShotSeries,
    metrics::{
        names::SHOTS_DROPPED,
        shots_dropped::{self, DropStage},
    },
};
use metrics::counter;
use serde::Serialize;
use tracing::{debug, instrument, warn};

#[derive(Default, Debug, Clone, Serialize)]
pub(crate) struct SynthesisOptions {
    /// If set, times are rebased onto the incident crossing as well as shifted by `delta_t`.
    pub(crate) subtract_bcs_time: bool,
}

impl SynthesisOptions {
    fn time_shift(&self, reference: &TimingReference) -> Real {
        if self.subtract_bcs_time {
            reference.delta_t() - reference.time_bcs
        } else {
            reference.delta_t()
        }
    }
}

/// Pairs each primary row with the secondary row nearest in time.
///
/// Both slices must be sorted by time. On an exact tie the secondary row with the lower time is
/// chosen. Runs in `O(n + m)` since the nearest secondary index never decreases.
fn merge_nearest<'a>(
    primary: &'a [AveragedSample],
    secondary: &'a [Sample],
) -> impl Iterator<Item = (&'a AveragedSample, &'a Sample)> + 'a {
    let mut index = 0;
    primary.iter().filter_map(move |row| {
        let distance = |s: &Sample| (s.time - row.time).abs();
        while let (Some(current), Some(next)) = (secondary.get(index), secondary.get(index + 1)) {
            if distance(next) < distance(current) {
                index += 1;
            } else {
                break;
            }
        }
        secondary.get(index).map(|nearest| (row, nearest))
    })
}

/// Synthesizes the transmitted signal of one shot.
fn shot_pulse(
    primary: &[AveragedSample],
    aligned: &[Sample],
    time_shift: Real,
) -> Option<Vec<TransmittedSample>> {
    let aligned_end = aligned.last()?.time;
    let primary_start = primary.first()?.time;

    let primary = primary
        .get(..primary.partition_point(|row| row.time <= aligned_end))
        .unwrap_or_default();
    let aligned = aligned
        .get(aligned.partition_point(|row| row.time < primary_start)..)
        .unwrap_or_default();
    if primary.is_empty() || aligned.is_empty() {
        return None;
    }

    Some(
        merge_nearest(primary, aligned)
            .map(|(incident, reflected)| {
                TransmittedSample::new(
                    incident.time + time_shift,
                    incident.avg_amplitude,
                    reflected.amplitude,
                )
            })
            .collect(),
    )
}

/// Merges the smoothed incident pulse with the aligned reflected pulse, shot by shot.
///
/// The incident rows are restricted to times no later than the last aligned row, and the
/// aligned rows to times no earlier than the first incident row. Each remaining incident row
/// is paired with the aligned row nearest in time, and its time shifted onto the shot's
/// timing reference. Shots missing from any input, or without overlap, are absent from the
/// output. Only shots with a timing reference count as dropped.
/// # Parameters
/// - primary: the smoothed pickup channel, providing the incident amplitude.
/// - aligned: the output of [align_reflected](crate::alignment::align_reflected).
/// - timing: the timing references of each shot.
/// - options: how times are rebased.
#[instrument(skip_all, fields(num_shots = primary.num_shots(), num_dropped))]
pub(crate) fn compute_pulse(
    primary: &ShotSeries<AveragedSample>,
    aligned: &ShotSeries<Sample>,
    timing: &TimingReferences,
    options: &SynthesisOptions,
) -> ShotSeries<TransmittedSample> {
    let transmitted = primary.map_shots(|shot, rows| {
        let reference = timing.get(&shot)?;
        shot_pulse(rows, aligned.get(shot)?, options.time_shift(reference))
    });

    let dropped = primary
        .shot_ids()
        .filter(|shot| timing.contains_key(shot))
        .count()
        - transmitted.num_shots();
    tracing::Span::current().record("num_dropped", dropped);
    if dropped > 0 {
        debug!("{dropped} shots have no overlap between incident and reflected pulses");
        counter!(
            SHOTS_DROPPED,
            &[shots_dropped::get_label(DropStage::Synthesis)]
        )
        .increment(dropped as u64);
    }
    transmitted
}

/// Shots which [complete_signal] could not bring to the requested length.
#[derive(Default, Debug, Clone, PartialEq)]
pub(crate) struct PaddingReport {
    pub(crate) padded: usize,
    /// Shots which already exceeded the requested length, and are left unchanged.
    pub(crate) oversized: Vec<ShotId>,
}

/// Pads every shot to exactly `n_elements` rows.
///
/// Zero-valued rows are prepended at `interval` spacing before the shot's earliest time.
/// Shots of exactly `n_elements` rows are unchanged. Shots with more are also unchanged and
/// listed in the [PaddingReport].
#[instrument(skip_all, fields(n_elements = n_elements, num_shots = series.num_shots()), err(level = "error"))]
pub(crate) fn complete_signal(
    series: &ShotSeries<TransmittedSample>,
    n_elements: usize,
    interval: Real,
) -> Result<(ShotSeries<TransmittedSample>, PaddingReport), ProcessingError> {
    const OPERATION: &str = "complete_signal";
    if n_elements == 0 {
        return Err(ProcessingError::InvalidParameter {
            operation: OPERATION,
            reason: "the element count must be positive".to_owned(),
        });
    }
    if !(interval.is_finite() && interval > 0.0) {
        return Err(ProcessingError::InvalidParameter {
            operation: OPERATION,
            reason: format!("the padding interval {interval} must be positive"),
        });
    }

    let report = PaddingReport {
        padded: series
            .iter()
            .filter(|(_, rows)| rows.len() < n_elements)
            .count(),
        oversized: series
            .iter()
            .filter(|(_, rows)| rows.len() > n_elements)
            .map(|(shot, _)| shot)
            .collect(),
    };
    if !report.oversized.is_empty() {
        warn!(
            shots = ?report.oversized,
            "Shots exceed {n_elements} rows and are left unpadded"
        );
    }

    let padded = series.map_shots(|_, rows| {
        let missing = n_elements.saturating_sub(rows.len());
        let start = rows.first()?.time;
        Some(
            (1..=missing)
                .rev()
                .map(|k| TransmittedSample::filler(start - k as Real * interval))
                .chain(rows.iter().copied())
                .collect(),
        )
    });
    Ok((padded, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn averaged(times: &[Real], amplitude: Real) -> Vec<AveragedSample> {
        times
            .iter()
            .map(|&time| AveragedSample {
                time,
                amplitude,
                avg_amplitude: amplitude,
            })
            .collect()
    }

    fn samples(points: &[(Real, Real)]) -> Vec<Sample> {
        points.iter().map(|&(t, a)| Sample::new(t, a)).collect()
    }

    #[test]
    fn nearest_merge_prefers_lower_time_on_tie() {
        let primary = averaged(&[0.0, 1.0, 2.0, 3.0], 0.0);
        let secondary = samples(&[(0.5, 10.0), (1.5, 20.0), (3.0, 30.0)]);
        let merged = merge_nearest(&primary, &secondary)
            .map(|(p, s)| (p.time, s.amplitude))
            .collect::<Vec<_>>();
        // 0.0 is nearest 0.5; 1.0 ties 0.5 and 1.5; 2.0 ties 1.5 and 3.0 at distances 0.5 and 1.0.
        assert_eq!(
            merged,
            vec![(0.0, 10.0), (1.0, 10.0), (2.0, 20.0), (3.0, 30.0)]
        );
    }

    #[test]
    fn pulse_restricted_to_overlap() {
        let primary = ShotSeries::from_rows(
            averaged(&[0.0, 1.0, 2.0, 3.0, 4.0], 1.0)
                .into_iter()
                .map(|row| (1, row)),
        );
        let aligned = ShotSeries::from_rows(
            samples(&[(-2.0, 0.0), (-1.0, 0.25), (1.2, 0.5), (2.5, 0.75)])
                .into_iter()
                .map(|row| (1, row)),
        );
        let timing = TimingReferences::from([(
            1,
            TimingReference {
                time_bcs: 1.0,
                time_electrode: 5.0,
            },
        )]);
        let transmitted = compute_pulse(&primary, &aligned, &timing, &Default::default());
        let rows = transmitted.get(1).expect("shot 1");

        // Incident rows after the last aligned time (2.5) are discarded; aligned rows before 0.0 are never matched.
        assert_eq!(rows.len(), 3);
        let expected = [(2.0, 0.5), (3.0, 0.5), (4.0, 0.75)];
        for (row, (time, reflected)) in rows.iter().zip(expected) {
            assert_approx_eq!(row.time, time);
            assert_approx_eq!(row.incident, 1.0);
            assert_approx_eq!(row.reflected, reflected);
            assert_approx_eq!(row.transmitted, reflected - 1.0);
        }
    }

    #[test]
    fn bcs_time_rebasing() {
        let reference = TimingReference {
            time_bcs: 1.0,
            time_electrode: 5.0,
        };
        let options = SynthesisOptions {
            subtract_bcs_time: true,
        };
        assert_approx_eq!(options.time_shift(&reference), 1.0);
    }

    #[test]
    fn no_overlap_drops_shot() {
        let primary =
            ShotSeries::from_rows(averaged(&[5.0, 6.0], 1.0).into_iter().map(|r| (1, r)));
        let aligned =
            ShotSeries::from_rows(samples(&[(0.0, 1.0), (1.0, 1.0)]).into_iter().map(|r| (1, r)));
        let timing = TimingReferences::from([(
            1,
            TimingReference {
                time_bcs: 0.0,
                time_electrode: 0.0,
            },
        )]);
        assert!(compute_pulse(&primary, &aligned, &timing, &Default::default()).is_empty());
    }

    fn transmitted_shot(
        shot: ShotId,
        len: usize,
    ) -> impl Iterator<Item = (ShotId, TransmittedSample)> {
        (0..len).map(move |i| {
            (
                shot,
                TransmittedSample::new(1e-8 + i as Real * 1e-10, 1.0, 0.5),
            )
        })
    }

    #[test]
    fn padding_reaches_exact_length() {
        let series = ShotSeries::from_rows(
            transmitted_shot(1, 3)
                .chain(transmitted_shot(2, 8))
                .chain(transmitted_shot(3, 10)),
        );
        let (padded, report) = complete_signal(&series, 8, 1e-10).expect("padded");
        assert_eq!(padded.get(1).map(<[_]>::len), Some(8));
        assert_eq!(padded.get(2), series.get(2));
        assert_eq!(padded.get(3), series.get(3));
        assert_eq!(report.padded, 1);
        assert_eq!(report.oversized, vec![3]);
        assert!(padded.is_strictly_sorted());

        let rows = padded.get(1).expect("shot 1");
        assert!(rows[..5].iter().all(|row| row.transmitted == 0.0));
        assert_approx_eq!(rows[4].time, 1e-8 - 1e-10);
        assert_approx_eq!(rows[0].time, 1e-8 - 5e-10);
    }

    #[test]
    fn padding_rejects_bad_parameters() {
        let series = ShotSeries::from_rows(transmitted_shot(1, 3));
        assert!(complete_signal(&series, 0, 1e-10).is_err());
        assert!(complete_signal(&series, 5, 0.0).is_err());
    }
}
