//! Extraction of the per-shot timing reference from the smoothed pickup channel.
//!
//! The pickup signal of each shot shows the incident pulse crossing the lower trigger early in
//! the trace, and its reflection from the electrode crossing the upper trigger later on. The
//! times of these crossings fix the pulse's round trip, half of which is `delta_t`.
use crate::pulse_detection::{
    Detect, Real,
    datatype::AveragedSample,
    detectors::{CrossingCriteria, RankedCrossingDetector},
};
use efish_common::{
    ShotId, ShotSeries,
    metrics::{
        names::SHOTS_DROPPED,
        shots_dropped::{self, DropStage},
    },
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub(crate) struct TimingReference {
    /// Time of the incident pulse crossing.
    pub(crate) time_bcs: Real,
    /// Time of the reflected pulse crossing.
    pub(crate) time_electrode: Real,
}

impl TimingReference {
    /// Half the separation of the two crossings.
    pub(crate) fn delta_t(&self) -> Real {
        (self.time_electrode - self.time_bcs) / 2.0
    }
}

pub(crate) type TimingReferences = BTreeMap<ShotId, TimingReference>;

#[derive(Debug, Clone, Serialize)]
pub(crate) struct TimingParameters {
    pub(crate) trigger_up: Real,
    pub(crate) trigger_down: Real,
    /// Incident pulse crossings must occur strictly before this time.
    pub(crate) bcs_window_end: Real,
    /// Number of best-ranked crossings from which the earliest is chosen.
    pub(crate) candidates: usize,
}

impl TimingParameters {
    fn bcs_criteria(&self) -> CrossingCriteria {
        CrossingCriteria {
            trigger_up: self.trigger_up,
            trigger_down: self.trigger_down,
            time_limit: Some(self.bcs_window_end),
            reference: self.trigger_down,
            keep: self.candidates,
        }
    }

    fn electrode_criteria(&self) -> CrossingCriteria {
        CrossingCriteria {
            trigger_up: self.trigger_up,
            trigger_down: self.trigger_down,
            time_limit: None,
            reference: self.trigger_up,
            keep: self.candidates,
        }
    }
}

/// Finds the timing reference of a single shot, if both crossings are present.
fn shot_timing(
    rows: &[AveragedSample],
    bcs: &CrossingCriteria,
    electrode: &CrossingCriteria,
) -> Option<TimingReference> {
    let points = rows.iter().map(|row| (row.time, row.avg_amplitude));
    let time_bcs = points
        .clone()
        .detect(RankedCrossingDetector::new(bcs))?
        .time;
    let time_electrode = points
        .detect(RankedCrossingDetector::new(electrode))?
        .time;
    Some(TimingReference {
        time_bcs,
        time_electrode,
    })
}

/// Computes the timing reference of every shot in the smoothed series.
///
/// Shots lacking a crossing of either kind have no reference and are absent from the result.
/// # Parameters
/// - series: the smoothed pickup channel.
/// - parameters: trigger levels and candidate selection.
#[instrument(skip_all, fields(num_shots = series.num_shots(), num_dropped))]
pub(crate) fn extract_timing(
    series: &ShotSeries<AveragedSample>,
    parameters: &TimingParameters,
) -> TimingReferences {
    let bcs = parameters.bcs_criteria();
    let electrode = parameters.electrode_criteria();
    let references = series.map_values(|_, rows| shot_timing(rows, &bcs, &electrode));

    let dropped = series.num_shots() - references.len();
    tracing::Span::current().record("num_dropped", dropped);
    if dropped > 0 {
        debug!(
            shots = ?series.shot_ids().filter(|shot| !references.contains_key(shot)).collect::<Vec<_>>(),
            "Shots without timing reference"
        );
        counter!(
            SHOTS_DROPPED,
            &[shots_dropped::get_label(DropStage::Timing)]
        )
        .increment(dropped as u64);
    }
    references
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    const NS: Real = 1e-9;

    fn parameters() -> TimingParameters {
        TimingParameters {
            trigger_up: 0.15,
            trigger_down: -0.15,
            bcs_window_end: 1e-7,
            candidates: 5,
        }
    }

    /// A 200 ns trace sampled every nanosecond, dipping to -0.2 over [10, 20) ns and
    /// rising to 0.2 over [50, 60) ns.
    fn two_crossings() -> Vec<AveragedSample> {
        (0..200)
            .map(|i| {
                let avg_amplitude = match i {
                    10..20 => -0.2,
                    50..60 => 0.2,
                    _ => 0.0,
                };
                AveragedSample {
                    time: i as Real * NS,
                    amplitude: avg_amplitude,
                    avg_amplitude,
                }
            })
            .collect()
    }

    #[test]
    fn crossings_at_10_and_50_ns() {
        let series = ShotSeries::from_rows(two_crossings().into_iter().map(|row| (1, row)));
        let references = extract_timing(&series, &parameters());
        let reference = references.get(&1).expect("shot 1 has a reference");
        assert_approx_eq!(reference.time_bcs, 10.0 * NS);
        assert_approx_eq!(reference.time_electrode, 50.0 * NS);
        assert_approx_eq!(reference.delta_t(), 20.0 * NS);
    }

    #[test]
    fn late_incident_crossing_is_ignored() {
        // Both crossings after the incident window: only the electrode set has candidates.
        let rows = two_crossings()
            .into_iter()
            .map(|row| AveragedSample {
                time: row.time + 100.0 * NS,
                ..row
            })
            .map(|row| (1, row));
        let series = ShotSeries::from_rows(rows);
        assert!(extract_timing(&series, &parameters()).is_empty());
    }

    #[test]
    fn shots_without_crossings_are_absent() {
        let flat = (0..50).map(|i| AveragedSample {
            time: i as Real * NS,
            ..Default::default()
        });
        let series = ShotSeries::from_rows(
            two_crossings()
                .into_iter()
                .map(|row| (1, row))
                .chain(flat.map(|row| (2, row))),
        );
        let references = extract_timing(&series, &parameters());
        assert!(references.contains_key(&1));
        assert!(!references.contains_key(&2));
    }
}
