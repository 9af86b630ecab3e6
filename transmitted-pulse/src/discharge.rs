//! Location of the discharge onset in each shot's transmitted signal.
use crate::pulse_detection::{
    Detect, Real, TimeValue, datatype::TransmittedSample, detectors::DischargeDetector,
};
use efish_common::{
    ChannelSeries, Sample, ShotId, ShotSeries,
    metrics::{
        names::{DISCHARGES_FOUND, SHOTS_DROPPED},
        shots_dropped::{self, DropStage},
    },
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

#[derive(Debug, Clone, Serialize)]
pub(crate) struct DischargeParameters {
    /// The transmitted level that marks the discharge onset.
    pub(crate) trigger: Real,
    /// Shots whose mean transmitted amplitude is below this are not searched.
    pub(crate) mean_threshold: Real,
    /// Latest time at which an onset is accepted, or `None` for no limit.
    pub(crate) window_end: Option<Real>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub(crate) struct DischargeEvent {
    pub(crate) time: Real,
    pub(crate) transmitted: Real,
}

impl From<TimeValue> for DischargeEvent {
    fn from(point: TimeValue) -> Self {
        Self {
            time: point.time,
            transmitted: point.value,
        }
    }
}

pub(crate) type DischargeEvents = BTreeMap<ShotId, DischargeEvent>;

fn mean_transmitted(rows: &[TransmittedSample]) -> Option<Real> {
    (!rows.is_empty())
        .then(|| rows.iter().map(|row| row.transmitted).sum::<Real>() / rows.len() as Real)
}

/// Finds the discharge onset of every qualifying shot.
///
/// A shot qualifies if its mean transmitted amplitude is at least `mean_threshold`. Its onset
/// is the row within the window whose transmitted amplitude lies closest to `trigger`, the
/// earliest such row on ties.
/// # Parameters
/// - series: the transmitted series before padding; filler rows must not be searched.
/// - parameters: trigger level, qualification threshold and search window.
#[instrument(skip_all, fields(num_shots = series.num_shots(), num_found))]
pub(crate) fn find_discharges(
    series: &ShotSeries<TransmittedSample>,
    parameters: &DischargeParameters,
) -> DischargeEvents {
    let events = series.map_values(|_, rows| {
        if mean_transmitted(rows)? < parameters.mean_threshold {
            return None;
        }
        rows.iter()
            .map(|row| (row.time, row.transmitted))
            .detect(DischargeDetector::new(
                parameters.trigger,
                parameters.window_end,
            ))
            .map(DischargeEvent::from)
    });

    tracing::Span::current().record("num_found", events.len());
    counter!(DISCHARGES_FOUND).increment(events.len() as u64);
    let dropped = series.num_shots() - events.len();
    if dropped > 0 {
        debug!("{dropped} shots have no discharge onset");
        counter!(
            SHOTS_DROPPED,
            &[shots_dropped::get_label(DropStage::Discharge)]
        )
        .increment(dropped as u64);
    }
    events
}

/// Rebases each shot of a channel onto its discharge onset.
///
/// Shots without an onset are absent from the result.
pub(crate) fn shift_to_discharge(
    series: &ChannelSeries,
    events: &DischargeEvents,
) -> ChannelSeries {
    series.map_shots(|shot, rows| {
        let onset = events.get(&shot)?.time;
        Some(
            rows.iter()
                .map(|sample| Sample::new(sample.time - onset, sample.amplitude))
                .collect(),
        )
    })
}
