//! An abstraction of the time-dependent types that are processed by the detectors.
use super::super::Real;

/// Abstracts types that are processed by the detectors.
///
/// To implement TracePoint a type must contain time data and a value.
pub(crate) trait TracePoint: Clone {
    /// Represents the value of the data point.
    type Value: Clone;

    /// Returns the time of the data point.
    fn get_time(&self) -> Real;

    /// Returns an immutable reference to the value of the data point.
    fn get_value(&self) -> &Self::Value;

    /// Take ownership of a clone of the value without destructing the data point.
    fn clone_value(&self) -> Self::Value {
        self.get_value().clone()
    }
}

/// This is the most basic non-trivial TracePoint type.
/// The first element is the time and the second the value.
impl<Y: Clone> TracePoint for (Real, Y) {
    type Value = Y;

    fn get_time(&self) -> Real {
        self.0
    }

    fn get_value(&self) -> &Self::Value {
        &self.1
    }
}
