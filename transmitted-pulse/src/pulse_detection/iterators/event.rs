//! Reduces the trace points of a shot to the single event registered by a detector.
use super::{Detector, TracePoint};
use tracing::trace;

/// Implemented for every trace point iterator, so that a shot's points can be fed to a detector.
pub(crate) trait Detect<D: Detector>: Iterator<Item = D::TracePointType> + Sized {
    /// Feeds every point to the detector, then finishes it.
    ///
    /// # Parameters
    /// - detector: consumed by the shot; its registered event, if any, is returned.
    fn detect(self, detector: D) -> Option<D::EventPointType>;
}

impl<I, D> Detect<D> for I
where
    I: Iterator<Item = D::TracePointType>,
    D: Detector,
{
    fn detect(self, detector: D) -> Option<D::EventPointType> {
        let event = self
            .fold(detector, |mut detector, point| {
                detector.signal(point.get_time(), point.clone_value());
                detector
            })
            .finish();
        if let Some(event) = &event {
            trace!("Event found {event:?}");
        }
        event
    }
}
