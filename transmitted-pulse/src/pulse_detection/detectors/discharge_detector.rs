use super::{super::Real, Detector};
use crate::pulse_detection::TimeValue;

/// Registers the sample whose value lies closest to a trigger level.
///
/// Only samples at or before `window_end` are considered, if it is set.
/// Where several samples are equally close, the earliest is registered.
#[derive(Default, Clone)]
pub(crate) struct DischargeDetector {
    trigger: Real,
    window_end: Option<Real>,
    best: Option<(Real, TimeValue)>,
}

impl DischargeDetector {
    pub(crate) fn new(trigger: Real, window_end: Option<Real>) -> Self {
        Self {
            trigger,
            window_end,
            best: None,
        }
    }
}

impl Detector for DischargeDetector {
    type TracePointType = (Real, Real);
    type EventPointType = TimeValue;

    fn signal(&mut self, time: Real, value: Real) {
        if self.window_end.is_some_and(|end| time > end) {
            return;
        }
        let score = (value - self.trigger).abs();
        if self.best.is_none_or(|(best, _)| score < best) {
            self.best = Some((score, TimeValue::new(time, value)));
        }
    }

    fn finish(self) -> Option<TimeValue> {
        self.best.map(|(_, point)| point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pulse_detection::Detect;

    fn detect(data: &[(Real, Real)], window_end: Option<Real>) -> Option<TimeValue> {
        data.iter()
            .copied()
            .detect(DischargeDetector::new(0.15, window_end))
    }

    #[test]
    fn unique_minimum() {
        let data = [(0.0, 0.0), (1.0, 0.1), (2.0, 0.16), (3.0, 0.3)];
        assert_eq!(detect(&data, None), Some(TimeValue::new(2.0, 0.16)));
    }

    #[test]
    fn ties_resolve_to_earliest() {
        let data = [(0.0, 0.0), (1.0, 0.25), (2.0, 0.0), (3.0, 0.25)];
        assert_eq!(detect(&data, None), Some(TimeValue::new(1.0, 0.25)));
    }

    #[test]
    fn window_end_is_inclusive() {
        let data = [(0.0, 1.0), (1.0, 0.5), (2.0, 0.15)];
        assert_eq!(detect(&data, Some(1.0)), Some(TimeValue::new(1.0, 0.5)));
        assert_eq!(detect(&data, Some(2.0)), Some(TimeValue::new(2.0, 0.15)));
        assert_eq!(detect(&data, Some(-1.0)), None);
    }
}
