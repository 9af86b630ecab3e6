//! Per-shot partitioning of tabular channel data.
//!
//! Every stage of the pipeline operates shot by shot, so series are stored as a map from
//! shot id to that shot's rows. Each partition is sorted by time with no repeated times.
use crate::{ShotId, Time};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::trace;

/// Implemented by row types which carry a time coordinate.
pub trait Timed {
    fn time(&self) -> Time;
}

/// A collection of rows partitioned by shot.
///
/// Iteration order is by ascending shot id, and within a shot by ascending time, so flattening
/// a series always yields rows sorted by `(shot id, time)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShotSeries<T> {
    shots: BTreeMap<ShotId, Vec<T>>,
}

impl<T> Default for ShotSeries<T> {
    fn default() -> Self {
        Self {
            shots: BTreeMap::new(),
        }
    }
}

impl<T: Timed> ShotSeries<T> {
    /// Groups rows by shot, sorting each shot by time.
    ///
    /// If a shot contains more than one row with the same time, only the first such row
    /// (in input order) is kept.
    pub fn from_rows(rows: impl IntoIterator<Item = (ShotId, T)>) -> Self {
        let mut shots = BTreeMap::<ShotId, Vec<T>>::new();
        for (shot, row) in rows {
            shots.entry(shot).or_default().push(row);
        }
        Self::from_shots(shots)
    }

    /// Builds a series from already grouped rows, sorting and deduplicating each shot.
    pub fn from_shots(mut shots: BTreeMap<ShotId, Vec<T>>) -> Self {
        for (shot, rows) in shots.iter_mut() {
            sort_and_dedup(*shot, rows);
        }
        shots.retain(|_, rows| !rows.is_empty());
        Self { shots }
    }

    /// Returns true if every shot is sorted by strictly ascending time.
    pub fn is_strictly_sorted(&self) -> bool {
        self.shots.values().all(|rows| {
            rows.iter()
                .zip(rows.iter().skip(1))
                .all(|(a, b)| a.time() < b.time())
        })
    }
}

/// Stable sort by time, then drop rows whose time repeats an earlier row.
fn sort_and_dedup<T: Timed>(shot: ShotId, rows: &mut Vec<T>) {
    rows.sort_by(|a, b| a.time().total_cmp(&b.time()));
    let before = rows.len();
    rows.dedup_by(|later, earlier| later.time() == earlier.time());
    if rows.len() != before {
        trace!(shot, removed = before - rows.len(), "Removed rows with repeated times");
    }
}

impl<T> ShotSeries<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, shot: ShotId) -> Option<&[T]> {
        self.shots.get(&shot).map(Vec::as_slice)
    }

    pub fn contains(&self, shot: ShotId) -> bool {
        self.shots.contains_key(&shot)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ShotId, &[T])> {
        self.shots.iter().map(|(shot, rows)| (*shot, rows.as_slice()))
    }

    pub fn shot_ids(&self) -> impl Iterator<Item = ShotId> + '_ {
        self.shots.keys().copied()
    }

    pub fn first_shot(&self) -> Option<ShotId> {
        self.shots.keys().next().copied()
    }

    pub fn last_shot(&self) -> Option<ShotId> {
        self.shots.keys().next_back().copied()
    }

    pub fn num_shots(&self) -> usize {
        self.shots.len()
    }

    pub fn num_rows(&self) -> usize {
        self.shots.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shots.is_empty()
    }

    /// Flattened view of the series in `(shot id, time)` order.
    pub fn rows(&self) -> impl Iterator<Item = (ShotId, &T)> {
        self.shots
            .iter()
            .flat_map(|(shot, rows)| rows.iter().map(move |row| (*shot, row)))
    }

    /// Retains only the shots for which `predicate` returns true.
    pub fn filter_shots<P>(mut self, mut predicate: P) -> Self
    where
        P: FnMut(ShotId, &[T]) -> bool,
    {
        self.shots.retain(|shot, rows| predicate(*shot, rows));
        self
    }

    pub fn into_inner(self) -> BTreeMap<ShotId, Vec<T>> {
        self.shots
    }
}

impl<T: Sync> ShotSeries<T> {
    /// Applies `f` to each shot in parallel.
    ///
    /// Each invocation sees only its own shot's rows and must return rows sorted by time, or
    /// `None` to exclude the shot from the result.
    /// # Parameters
    /// - f: the per-shot transformation.
    pub fn map_shots<U, F>(&self, f: F) -> ShotSeries<U>
    where
        U: Send,
        F: Fn(ShotId, &[T]) -> Option<Vec<U>> + Sync,
    {
        let shots = self
            .shots
            .par_iter()
            .filter_map(|(shot, rows)| f(*shot, rows).map(|rows| (*shot, rows)))
            .filter(|(_, rows)| !rows.is_empty())
            .collect::<BTreeMap<_, _>>();
        ShotSeries { shots }
    }

    /// As [Self::map_shots] but `f` may fail, in which case the first error encountered is returned.
    pub fn try_map_shots<U, E, F>(&self, f: F) -> Result<ShotSeries<U>, E>
    where
        U: Send,
        E: Send,
        F: Fn(ShotId, &[T]) -> Result<Option<Vec<U>>, E> + Sync,
    {
        let results = self
            .shots
            .par_iter()
            .map(|(shot, rows)| f(*shot, rows).map(|rows| rows.map(|rows| (*shot, rows))))
            .collect::<Vec<_>>();

        let shots = results
            .into_iter()
            .collect::<Result<Vec<_>, E>>()?
            .into_iter()
            .flatten()
            .filter(|(_, rows)| !rows.is_empty())
            .collect::<BTreeMap<_, _>>();
        Ok(ShotSeries { shots })
    }

    /// Computes a per-shot value in parallel, collecting the shots for which `f` returns `Some`.
    pub fn map_values<V, F>(&self, f: F) -> BTreeMap<ShotId, V>
    where
        V: Send,
        F: Fn(ShotId, &[T]) -> Option<V> + Sync,
    {
        self.shots
            .par_iter()
            .filter_map(|(shot, rows)| f(*shot, rows).map(|value| (*shot, value)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Sample;
    use rand::seq::SliceRandom;

    fn sample(time: Time) -> Sample {
        Sample::new(time, time * 10.0)
    }

    #[test]
    fn from_rows_sorts_by_shot_then_time() {
        let mut rows = (0..5)
            .flat_map(|shot| (0..20).map(move |t| (shot, sample(t as Time))))
            .collect::<Vec<_>>();
        rows.shuffle(&mut rand::rng());

        let series = ShotSeries::from_rows(rows);
        assert_eq!(series.num_shots(), 5);
        assert_eq!(series.num_rows(), 100);
        assert!(series.is_strictly_sorted());

        let flattened = series
            .rows()
            .map(|(shot, s)| (shot, s.time))
            .collect::<Vec<_>>();
        let mut expected = flattened.clone();
        expected.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)));
        assert_eq!(flattened, expected);
    }

    #[test]
    fn repeated_times_keep_first() {
        let series = ShotSeries::from_rows([
            (1, Sample::new(2.0, 5.0)),
            (1, Sample::new(1.0, 4.0)),
            (1, Sample::new(2.0, 7.0)),
        ]);
        assert_eq!(
            series.get(1),
            Some([Sample::new(1.0, 4.0), Sample::new(2.0, 5.0)].as_slice())
        );
    }

    #[test]
    fn map_shots_drops_none_and_empty() {
        let series = ShotSeries::from_rows((0..4).map(|shot| (shot, sample(1.0))));
        let mapped = series.map_shots(|shot, rows| match shot {
            0 => None,
            1 => Some(Vec::new()),
            _ => Some(rows.to_vec()),
        });
        assert_eq!(mapped.shot_ids().collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn try_map_shots_propagates_error() {
        let series = ShotSeries::from_rows((0..4).map(|shot| (shot, sample(1.0))));
        let result = series.try_map_shots(|shot, rows| {
            if shot == 2 {
                Err(shot)
            } else {
                Ok(Some(rows.to_vec()))
            }
        });
        assert_eq!(result, Err(2));
    }

    #[test]
    fn first_and_last_shot() {
        let series = ShotSeries::from_rows([7, 3, 11].map(|shot| (shot, sample(0.0))));
        assert_eq!(series.first_shot(), Some(3));
        assert_eq!(series.last_shot(), Some(11));
    }
}
