//! Detectors are folded over the trace points of a shot by [Detect].
//! Each registers at most one event, dispatched once the shot is exhausted.
//!
//! [Detect]: super::iterators::Detect
mod discharge_detector;
mod ranked_crossing_detector;

pub(crate) use discharge_detector::DischargeDetector;
pub(crate) use ranked_crossing_detector::{CrossingCriteria, RankedCrossingDetector};

use super::TracePoint;
use std::fmt::Debug;

/// Implement for detectors, which take in trace values and output an event.
pub(crate) trait Detector {
    /// Trace type for input.
    type TracePointType: TracePoint;
    /// Event type for output.
    type EventPointType: Debug;

    /// Takes in a trace signal.
    fn signal(&mut self, time: super::Real, value: <Self::TracePointType as TracePoint>::Value);

    /// Call when the trace signal has completed, to obtain the registered event.
    fn finish(self) -> Option<Self::EventPointType>;
}
