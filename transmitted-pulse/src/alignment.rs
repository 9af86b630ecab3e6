//! Folding the reflected pulse back onto the incident pulse.
use crate::{
    pulse_detection::datatype::AveragedSample,
    timing::TimingReferences,
};
use efish_common::{ChannelSeries, Sample, ShotSeries};
use tracing::instrument;

/// Shifts each shot back by its round trip `2 * delta_t` and inverts its smoothed amplitude.
///
/// Each output row corresponds to one input row. Shots without a timing reference are absent
/// from the output.
#[instrument(skip_all, fields(num_shots = series.num_shots()))]
pub(crate) fn align_reflected(
    series: &ShotSeries<AveragedSample>,
    timing: &TimingReferences,
) -> ChannelSeries {
    series.map_shots(|shot, rows| {
        let round_trip = 2.0 * timing.get(&shot)?.delta_t();
        Some(
            rows.iter()
                .map(|row| Sample::new(row.time - round_trip, -row.avg_amplitude))
                .collect(),
        )
    })
}
