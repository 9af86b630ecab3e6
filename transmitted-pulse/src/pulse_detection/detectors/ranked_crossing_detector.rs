use super::{super::Real, Detector};
use crate::pulse_detection::TimeValue;

/// Determines which samples count as threshold crossings, and how they are ranked.
#[derive(Default, Debug, Clone)]
pub(crate) struct CrossingCriteria {
    /// A sample at or above this value is a crossing.
    pub(crate) trigger_up: Real,
    /// A sample at or below this value is a crossing.
    pub(crate) trigger_down: Real,
    /// If set, only samples strictly before this time are considered.
    pub(crate) time_limit: Option<Real>,
    /// Candidates are scored by their absolute distance from this level, lowest first.
    pub(crate) reference: Real,
    /// Number of best-scored candidates retained.
    pub(crate) keep: usize,
}

impl CrossingCriteria {
    fn is_crossing(&self, time: Real, value: Real) -> bool {
        (value <= self.trigger_down || value >= self.trigger_up)
            && self.time_limit.is_none_or(|limit| time < limit)
    }
}

#[derive(Clone, Debug)]
struct Candidate {
    score: Real,
    point: TimeValue,
}

/// Registers the earliest of the best-ranked threshold crossings in a trace.
///
/// Every sample beyond either trigger level is a candidate, scored by its distance from the
/// reference level. The `keep` lowest-scored candidates are retained, with equal scores ranked
/// by arrival order. When the trace is finished the earliest retained candidate is emitted.
#[derive(Clone)]
pub(crate) struct RankedCrossingDetector {
    criteria: CrossingCriteria,
    candidates: Vec<Candidate>,
}

impl RankedCrossingDetector {
    pub(crate) fn new(criteria: &CrossingCriteria) -> Self {
        Self {
            criteria: criteria.clone(),
            candidates: Vec::with_capacity(criteria.keep + 1),
        }
    }
}

impl Detector for RankedCrossingDetector {
    type TracePointType = (Real, Real);
    type EventPointType = TimeValue;

    fn signal(&mut self, time: Real, value: Real) {
        if self.criteria.keep == 0 || !self.criteria.is_crossing(time, value) {
            return;
        }
        let score = (self.criteria.reference - value).abs();
        let position = self.candidates.partition_point(|c| c.score <= score);
        if position < self.criteria.keep {
            self.candidates.insert(
                position,
                Candidate {
                    score,
                    point: TimeValue::new(time, value),
                },
            );
            self.candidates.truncate(self.criteria.keep);
        }
    }

    fn finish(self) -> Option<TimeValue> {
        self.candidates
            .into_iter()
            .map(|c| c.point)
            .min_by(|a, b| a.time.total_cmp(&b.time))
    }
}
