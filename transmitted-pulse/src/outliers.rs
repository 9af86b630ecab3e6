//! Density based outlier rejection over two dimensional points.
use crate::pulse_detection::Real;
use itertools::Itertools;
use rayon::prelude::*;
use tracing::{debug, instrument};

pub(crate) type Point = (Real, Real);

/// Added to the mean reachability distance so that coincident points have finite density.
const DENSITY_EPSILON: Real = 1e-10;

fn distance(a: &Point, b: &Point) -> Real {
    (a.0 - b.0).hypot(a.1 - b.1)
}

/// The nearest neighbours of one point, in ascending order of distance.
struct Neighbourhood {
    indices: Vec<usize>,
    distances: Vec<Real>,
}

impl Neighbourhood {
    /// The distance to the furthest of the `k` neighbours.
    fn k_distance(&self) -> Real {
        self.distances.last().copied().unwrap_or_default()
    }
}

/// Local outlier factor classifier.
///
/// A point's factor compares the local reachability density of its neighbours to its own.
/// Points inside a cluster score close to one, isolated points score much higher.
#[derive(Debug, Clone)]
pub(crate) struct LocalOutlierFactor {
    n_neighbors: usize,
    threshold: Real,
}

impl Default for LocalOutlierFactor {
    fn default() -> Self {
        Self {
            n_neighbors: 100,
            threshold: 1.5,
        }
    }
}

impl LocalOutlierFactor {
    pub(crate) fn new(n_neighbors: usize, threshold: Real) -> Self {
        Self {
            n_neighbors,
            threshold,
        }
    }

    /// The neighbour count applied to `n` points.
    ///
    /// Capped at half the other points rather than all of them. A neighbourhood spanning the
    /// whole set would include a cluster's every point, and two isolated points would then share
    /// the density of the cluster and score close to one.
    fn effective_neighbors(&self, n: usize) -> usize {
        self.n_neighbors.min(n.saturating_sub(1) / 2).max(1)
    }

    fn neighbourhoods(points: &[Point], k: usize) -> Vec<Neighbourhood> {
        points
            .par_iter()
            .enumerate()
            .map(|(index, point)| {
                let (indices, distances) = points
                    .iter()
                    .enumerate()
                    .filter(|(other, _)| *other != index)
                    .map(|(other, other_point)| (other, distance(point, other_point)))
                    .sorted_by(|(ia, da), (ib, db)| da.total_cmp(db).then(ia.cmp(ib)))
                    .take(k)
                    .unzip();
                Neighbourhood {
                    indices,
                    distances,
                }
            })
            .collect()
    }

    /// Computes the local outlier factor of every point.
    ///
    /// Returns `None` if there are fewer than three points.
    pub(crate) fn scores(&self, points: &[Point]) -> Option<Vec<Real>> {
        if points.len() < 3 {
            return None;
        }
        let k = self.effective_neighbors(points.len());
        let neighbourhoods = Self::neighbourhoods(points, k);
        let k_distances = neighbourhoods
            .iter()
            .map(Neighbourhood::k_distance)
            .collect_vec();

        let densities = neighbourhoods
            .par_iter()
            .map(|neighbourhood| {
                let reach = neighbourhood
                    .indices
                    .iter()
                    .zip(&neighbourhood.distances)
                    .map(|(&other, &d)| {
                        k_distances.get(other).copied().unwrap_or_default().max(d)
                    })
                    .sum::<Real>();
                1.0 / (reach / neighbourhood.indices.len() as Real + DENSITY_EPSILON)
            })
            .collect::<Vec<_>>();

        Some(
            neighbourhoods
                .par_iter()
                .zip(&densities)
                .map(|(neighbourhood, own)| {
                    let mean = neighbourhood
                        .indices
                        .iter()
                        .filter_map(|&other| densities.get(other))
                        .sum::<Real>()
                        / neighbourhood.indices.len() as Real;
                    mean / own
                })
                .collect(),
        )
    }

    /// Retains the points whose factor does not exceed the threshold.
    ///
    /// Fewer than three points are returned unchanged.
    #[instrument(skip_all, fields(num_points = points.len(), num_removed))]
    pub(crate) fn filter<T: Clone>(
        &self,
        points: &[T],
        coordinates: impl Fn(&T) -> Point,
    ) -> Vec<T> {
        let coords = points.iter().map(&coordinates).collect_vec();
        let Some(scores) = self.scores(&coords) else {
            return points.to_vec();
        };
        let kept = points
            .iter()
            .zip(scores)
            .filter(|(_, score)| *score <= self.threshold)
            .map(|(point, _)| point.clone())
            .collect_vec();
        let removed = points.len() - kept.len();
        tracing::Span::current().record("num_removed", removed);
        debug!("Removed {removed} outliers");
        kept
    }
}
