//! Types and utilities shared by the waveform reader and the transmitted pulse pipeline.
mod cancellation;
pub mod metrics;
mod series;
mod tracer;

pub use cancellation::CancellationToken;
pub use git_version;
pub use series::{ShotSeries, Timed};
pub use tracer::{TracerError, init_tracer};

use serde::{Deserialize, Serialize};

pub type Real = f64;
/// Time in seconds, relative to the oscilloscope trigger.
pub type Time = Real;
pub type Amplitude = Real;
/// Identifier of a single shot, taken from the numeric suffix of a waveform file name.
pub type ShotId = u32;

/// A single oscilloscope reading.
#[derive(Default, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub time: Time,
    pub amplitude: Amplitude,
}

impl Sample {
    pub fn new(time: Time, amplitude: Amplitude) -> Self {
        Self { time, amplitude }
    }
}

impl Timed for Sample {
    fn time(&self) -> Time {
        self.time
    }
}

/// A channel series is the union of every shot recorded on one oscilloscope channel.
pub type ChannelSeries = ShotSeries<Sample>;

/// Expands to the version string of the calling crate, derived from `git describe` where available.
#[macro_export]
macro_rules! version {
    () => {
        $crate::git_version::git_version!(
            args = ["--tags", "--always", "--dirty=-modified"],
            fallback = env!("CARGO_PKG_VERSION")
        )
    };
}
