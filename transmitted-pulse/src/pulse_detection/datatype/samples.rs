//! Row types of the derived per-shot series.
use super::super::Real;
use efish_common::{Amplitude, Time, Timed};
use serde::{Deserialize, Serialize};

/// A raw sample augmented with the rolling mean of its neighbourhood.
#[derive(Default, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub(crate) struct AveragedSample {
    pub(crate) time: Time,
    pub(crate) amplitude: Amplitude,
    pub(crate) avg_amplitude: Amplitude,
}

impl Timed for AveragedSample {
    fn time(&self) -> Time {
        self.time
    }
}

/// A row of the synthesized transmitted signal.
#[derive(Default, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub(crate) struct TransmittedSample {
    /// Time, rebased onto the shot's timing reference.
    pub(crate) time: Time,
    /// The smoothed amplitude of the incident pulse.
    pub(crate) incident: Amplitude,
    /// The aligned, inverted amplitude of the reflected pulse nearest in time.
    pub(crate) reflected: Amplitude,
    pub(crate) transmitted: Amplitude,
}

impl TransmittedSample {
    pub(crate) fn new(time: Time, incident: Amplitude, reflected: Amplitude) -> Self {
        Self {
            time,
            incident,
            reflected,
            transmitted: -(incident - reflected),
        }
    }

    /// A zero-valued row used to pad a shot to its full length.
    pub(crate) fn filler(time: Time) -> Self {
        Self {
            time,
            ..Default::default()
        }
    }
}

impl Timed for TransmittedSample {
    fn time(&self) -> Real {
        self.time
    }
}
