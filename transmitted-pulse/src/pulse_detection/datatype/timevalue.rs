use super::super::Real;
use serde::{Deserialize, Serialize};

/// A value occurring at a particular time in a shot.
#[derive(Default, Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct TimeValue {
    /// The time at which the value occurs.
    pub(crate) time: Real,
    /// The value of the trace.
    pub(crate) value: Real,
}

impl TimeValue {
    pub(crate) fn new(time: Real, value: Real) -> Self {
        Self { time, value }
    }
}
