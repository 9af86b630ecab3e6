use super::{super::Real, Window};
use std::collections::VecDeque;

/// Arithmetic mean over a window centred on each input position.
///
/// For an even window size the window extends one position further into the past than the
/// future, i.e. position `i` of a size `w` window covers `[i + (w - 1)/2 + 1 - w, i + (w - 1)/2]`.
/// Near the ends of the data the window is truncated. Where it then holds fewer than
/// `min_periods` values, the output is `None`.
///
/// Outputs lag inputs by `(w - 1)/2` positions, so exactly one output is produced per input
/// once the window has been drained.
#[derive(Clone)]
pub(crate) struct CenteredMean {
    size: usize,
    min_periods: usize,
    values: VecDeque<Real>,
    /// Index of the oldest value held in the window.
    front: usize,
    /// Number of values pushed.
    pushed: usize,
    /// Number of outputs made available.
    emitted: usize,
}

impl CenteredMean {
    pub(crate) fn new(size: usize, min_periods: usize) -> Self {
        Self {
            size,
            min_periods,
            values: VecDeque::with_capacity(size),
            front: 0,
            pushed: 0,
            emitted: 0,
        }
    }

    fn offset(&self) -> usize {
        self.size.saturating_sub(1) / 2
    }

    /// Discards values preceding the window of the next position to be emitted.
    fn advance_front(&mut self) {
        let start = (self.emitted + self.offset() + 1).saturating_sub(self.size);
        while self.front < start && self.values.pop_front().is_some() {
            self.front += 1;
        }
    }
}

impl Window for CenteredMean {
    type InputType = Real;
    type OutputType = Option<Real>;

    fn push(&mut self, value: Real) -> bool {
        self.values.push_back(value);
        self.pushed += 1;
        if self.pushed > self.offset() {
            self.advance_front();
            self.emitted += 1;
            true
        } else {
            false
        }
    }

    fn drain(&mut self) -> bool {
        if self.emitted < self.pushed {
            self.advance_front();
            self.emitted += 1;
            true
        } else {
            false
        }
    }

    fn output(&self) -> Option<Real> {
        (self.values.len() >= self.min_periods.max(1))
            .then(|| self.values.iter().sum::<Real>() / self.values.len() as Real)
    }
}
