//! Partitioning of feature vectors into clusters.
//!
//! Two algorithms sit behind the [`Clustering`] seam: seeded k-means for a
//! fixed cluster count and DBSCAN for density-based grouping with a noise
//! label. Both are deterministic: the same input order (and seed) yields the
//! same labels.

use std::collections::VecDeque;
use std::fmt;

use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{ClusterError, Result};
use crate::vectorize::FeatureVector;

/// Id printed for points outside every dense region.
pub const NOISE_ID: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterLabel {
    Member(usize),
    Noise,
}

impl ClusterLabel {
    pub fn id(&self) -> i64 {
        match self {
            Self::Member(c) => *c as i64,
            Self::Noise => NOISE_ID,
        }
    }

    pub fn is_noise(&self) -> bool {
        matches!(self, Self::Noise)
    }
}

impl fmt::Display for ClusterLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// One label per input point, in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterAssignment {
    labels: Vec<ClusterLabel>,
}

impl ClusterAssignment {
    pub fn new(labels: Vec<ClusterLabel>) -> Self {
        Self { labels }
    }

    pub fn labels(&self) -> &[ClusterLabel] {
        &self.labels
    }

    pub fn get(&self, index: usize) -> Option<ClusterLabel> {
        self.labels.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Number of distinct non-noise clusters.
    pub fn cluster_count(&self) -> usize {
        self.sizes().len()
    }

    pub fn noise_count(&self) -> usize {
        self.labels.iter().filter(|l| l.is_noise()).count()
    }

    /// Size of each non-noise cluster, indexed by cluster id.
    pub fn sizes(&self) -> Vec<usize> {
        let mut sizes = Vec::new();
        for label in &self.labels {
            if let ClusterLabel::Member(c) = *label {
                if c >= sizes.len() {
                    sizes.resize(c + 1, 0);
                }
                sizes[c] += 1;
            }
        }
        sizes
    }
}

pub trait Clustering {
    fn fit_predict(&self, points: &[FeatureVector]) -> Result<ClusterAssignment>;
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn check_points(points: &[FeatureVector]) -> Result<()> {
    let expected = match points.first() {
        Some(p) => p.len(),
        None => return Err(ClusterError::EmptyCorpus),
    };
    match points.iter().find(|p| p.len() != expected) {
        Some(p) => Err(ClusterError::DimensionMismatch {
            expected,
            found: p.len(),
        }),
        None => Ok(()),
    }
}

// Ties go to the lowest centroid index.
fn nearest(point: &[f64], centers: &[Vec<f64>]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (c, center) in centers.iter().enumerate() {
        let d = squared_distance(point, center);
        if d < best.1 {
            best = (c, d);
        }
    }
    best
}

/// Renumbers labels in order of first appearance.
fn canonical(labels: &[usize], k: usize) -> Vec<ClusterLabel> {
    let mut mapping: Vec<Option<usize>> = vec![None; k];
    let mut next = 0;
    labels
        .iter()
        .map(|&l| {
            let id = *mapping[l].get_or_insert_with(|| {
                next += 1;
                next - 1
            });
            ClusterLabel::Member(id)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KMeans {
    pub n_clusters: usize,
    pub n_init: usize,
    pub max_iter: usize,
    pub seed: u64,
}

struct LloydRun {
    labels: Vec<usize>,
    inertia: f64,
}

impl KMeans {
    pub fn new(n_clusters: usize, seed: u64) -> Self {
        Self {
            n_clusters,
            n_init: 10,
            max_iter: 300,
            seed,
        }
    }

    fn plus_plus(&self, points: &[FeatureVector], rng: &mut StdRng) -> Vec<Vec<f64>> {
        let n = points.len();
        let mut centers = vec![points[rng.gen_range(0..n)].clone()];
        let mut weights: Vec<f64> = points
            .iter()
            .map(|p| squared_distance(p, &centers[0]))
            .collect();
        while centers.len() < self.n_clusters {
            let total: f64 = weights.iter().sum();
            let chosen = if total > 0.0 {
                let mut target = rng.gen::<f64>() * total;
                let mut chosen = None;
                let mut last_positive = 0;
                for (i, &w) in weights.iter().enumerate() {
                    if w > 0.0 {
                        last_positive = i;
                        if target < w {
                            chosen = Some(i);
                            break;
                        }
                        target -= w;
                    }
                }
                chosen.unwrap_or(last_positive)
            } else {
                // Every point coincides with a chosen center.
                rng.gen_range(0..n)
            };
            let center = points[chosen].clone();
            for (w, p) in weights.iter_mut().zip(points) {
                *w = w.min(squared_distance(p, &center));
            }
            centers.push(center);
        }
        centers
    }

    fn lloyd(&self, points: &[FeatureVector], mut centers: Vec<Vec<f64>>) -> LloydRun {
        let k = self.n_clusters;
        let dim = points[0].len();
        let mut labels = vec![usize::MAX; points.len()];
        for iteration in 0..self.max_iter {
            let mut changed = false;
            let mut distances = Vec::with_capacity(points.len());
            for (label, point) in labels.iter_mut().zip(points) {
                let (c, d) = nearest(point, &centers);
                if *label != c {
                    *label = c;
                    changed = true;
                }
                distances.push(d);
            }
            if !changed {
                debug!("k-means converged after {} iterations", iteration);
                break;
            }

            let mut counts = vec![0usize; k];
            for &l in &labels {
                counts[l] += 1;
            }
            // Re-seed empty clusters with the point farthest from its center.
            for c in 0..k {
                if counts[c] > 0 {
                    continue;
                }
                let far = (0..points.len())
                    .filter(|&i| counts[labels[i]] > 1)
                    .max_by(|&a, &b| distances[a].total_cmp(&distances[b]).then(b.cmp(&a)));
                if let Some(i) = far {
                    counts[labels[i]] -= 1;
                    labels[i] = c;
                    counts[c] = 1;
                    distances[i] = 0.0;
                }
            }

            let mut sums = vec![vec![0.0; dim]; k];
            for (point, &l) in points.iter().zip(&labels) {
                for (s, x) in sums[l].iter_mut().zip(point) {
                    *s += x;
                }
            }
            for (c, sum) in sums.into_iter().enumerate() {
                if counts[c] > 0 {
                    centers[c] = sum.into_iter().map(|s| s / counts[c] as f64).collect();
                }
            }
        }
        let inertia = points
            .iter()
            .zip(&labels)
            .map(|(p, &l)| squared_distance(p, &centers[l]))
            .sum();
        LloydRun { labels, inertia }
    }
}

impl Clustering for KMeans {
    fn fit_predict(&self, points: &[FeatureVector]) -> Result<ClusterAssignment> {
        if self.n_clusters == 0 {
            return Err(ClusterError::InvalidClusterCount(0));
        }
        check_points(points)?;
        if points.len() < self.n_clusters {
            return Err(ClusterError::TooFewPoints {
                points: points.len(),
                clusters: self.n_clusters,
            });
        }
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut best: Option<LloydRun> = None;
        for _ in 0..self.n_init.max(1) {
            let centers = self.plus_plus(points, &mut rng);
            let run = self.lloyd(points, centers);
            if best.as_ref().map_or(true, |b| run.inertia < b.inertia) {
                best = Some(run);
            }
        }
        let best = best.ok_or(ClusterError::InvalidClusterCount(self.n_clusters))?;
        info!(
            "k-means formed {} clusters, inertia {:.4}",
            self.n_clusters, best.inertia
        );
        Ok(ClusterAssignment::new(canonical(
            &best.labels,
            self.n_clusters,
        )))
    }
}

/// Density-based clustering. Neighborhoods are found by brute force, so the
/// cost is quadratic in the number of points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dbscan {
    pub eps: f64,
    /// Neighborhood size for a core point, the point itself included.
    pub min_samples: usize,
}

impl Dbscan {
    pub fn new(eps: f64, min_samples: usize) -> Self {
        Self { eps, min_samples }
    }

    fn neighbors(&self, points: &[FeatureVector], i: usize) -> Vec<usize> {
        let eps2 = self.eps * self.eps;
        (0..points.len())
            .filter(|&j| squared_distance(&points[i], &points[j]) <= eps2)
            .collect()
    }
}

impl Clustering for Dbscan {
    fn fit_predict(&self, points: &[FeatureVector]) -> Result<ClusterAssignment> {
        if !(self.eps.is_finite() && self.eps > 0.0) {
            return Err(ClusterError::InvalidDensity(format!(
                "eps must be positive, got {}",
                self.eps
            )));
        }
        if self.min_samples == 0 {
            return Err(ClusterError::InvalidDensity(
                "min_samples must be at least 1".to_string(),
            ));
        }
        check_points(points)?;

        let mut labels: Vec<Option<ClusterLabel>> = vec![None; points.len()];
        let mut cluster = 0;
        for i in 0..points.len() {
            if labels[i].is_some() {
                continue;
            }
            let seeds = self.neighbors(points, i);
            if seeds.len() < self.min_samples {
                labels[i] = Some(ClusterLabel::Noise);
                continue;
            }
            labels[i] = Some(ClusterLabel::Member(cluster));
            let mut queue: VecDeque<usize> = seeds.into();
            while let Some(j) = queue.pop_front() {
                match labels[j] {
                    // Border point: reachable but not core.
                    Some(ClusterLabel::Noise) => labels[j] = Some(ClusterLabel::Member(cluster)),
                    Some(ClusterLabel::Member(_)) => {}
                    None => {
                        labels[j] = Some(ClusterLabel::Member(cluster));
                        let reach = self.neighbors(points, j);
                        if reach.len() >= self.min_samples {
                            queue.extend(reach);
                        }
                    }
                }
            }
            cluster += 1;
        }
        let assignment = ClusterAssignment::new(
            labels
                .into_iter()
                .map(|l| l.unwrap_or(ClusterLabel::Noise))
                .collect(),
        );
        info!(
            "dbscan found {} clusters and {} noise points",
            assignment.cluster_count(),
            assignment.noise_count()
        );
        Ok(assignment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs() -> Vec<FeatureVector> {
        let mut points = Vec::new();
        for center in [(0.0, 0.0), (10.0, 10.0), (-10.0, 10.0)] {
            for offset in [(0.0, 0.1), (0.1, 0.0), (-0.1, -0.1)] {
                points.push(vec![center.0 + offset.0, center.1 + offset.1]);
            }
        }
        points
    }

    #[test]
    fn kmeans_separates_blobs() {
        let points = blobs();
        let assignment = KMeans::new(3, 42).fit_predict(&points).unwrap();
        assert_eq!(assignment.len(), 9);
        assert_eq!(assignment.cluster_count(), 3);
        assert_eq!(assignment.sizes(), vec![3, 3, 3]);
        for group in assignment.labels().chunks(3) {
            assert!(group.iter().all(|l| *l == group[0]));
        }
        // Renumbered in order of first appearance.
        assert_eq!(assignment.get(0), Some(ClusterLabel::Member(0)));
        assert_eq!(assignment.get(3), Some(ClusterLabel::Member(1)));
        assert_eq!(assignment.get(6), Some(ClusterLabel::Member(2)));
    }

    #[test]
    fn kmeans_is_deterministic_for_a_seed() {
        let points = blobs();
        for seed in [0, 1, 42, 9000] {
            let a = KMeans::new(3, seed).fit_predict(&points).unwrap();
            let b = KMeans::new(3, seed).fit_predict(&points).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn kmeans_rejects_invalid_counts() {
        let points = blobs();
        assert!(matches!(
            KMeans::new(0, 1).fit_predict(&points),
            Err(ClusterError::InvalidClusterCount(0))
        ));
        assert!(matches!(
            KMeans::new(10, 1).fit_predict(&points),
            Err(ClusterError::TooFewPoints {
                points: 9,
                clusters: 10
            })
        ));
    }

    #[test]
    fn kmeans_handles_duplicate_points() {
        let points = vec![vec![1.0, 1.0]; 4];
        let assignment = KMeans::new(2, 3).fit_predict(&points).unwrap();
        assert_eq!(assignment.len(), 4);
        assert!(assignment.labels().iter().all(|l| !l.is_noise()));
    }

    #[test]
    fn mismatched_dimensions_are_rejected() {
        let points = vec![vec![0.0, 0.0], vec![1.0]];
        assert!(matches!(
            KMeans::new(1, 0).fit_predict(&points),
            Err(ClusterError::DimensionMismatch {
                expected: 2,
                found: 1
            })
        ));
    }

    #[test]
    fn dbscan_marks_far_outlier_as_noise() {
        let mut points: Vec<FeatureVector> = vec![
            vec![0.0, 0.0],
            vec![0.1, 0.0],
            vec![0.0, 0.1],
            vec![0.1, 0.1],
            vec![0.05, 0.05],
        ];
        points.push(vec![50.0, 50.0]);
        let assignment = Dbscan::new(0.5, 3).fit_predict(&points).unwrap();
        assert_eq!(assignment.get(5), Some(ClusterLabel::Noise));
        assert_eq!(assignment.get(5).map(|l| l.id()), Some(NOISE_ID));
        let first = assignment.get(0).unwrap();
        assert!(first.id() >= 0);
        assert!(assignment.labels()[..5].iter().all(|l| *l == first));
    }

    #[test]
    fn dbscan_border_points_join_cluster() {
        // The last point only sees one neighbor but is within eps of a core point.
        let points = vec![vec![0.0], vec![0.1], vec![0.2], vec![0.6]];
        let assignment = Dbscan::new(0.45, 3).fit_predict(&points).unwrap();
        assert_eq!(assignment.cluster_count(), 1);
        assert_eq!(assignment.noise_count(), 0);
    }

    #[test]
    fn dbscan_validates_parameters() {
        let points = blobs();
        assert!(matches!(
            Dbscan::new(0.0, 3).fit_predict(&points),
            Err(ClusterError::InvalidDensity(_))
        ));
        assert!(matches!(
            Dbscan::new(0.5, 0).fit_predict(&points),
            Err(ClusterError::InvalidDensity(_))
        ));
        assert!(matches!(
            Dbscan::new(0.5, 2).fit_predict(&[]),
            Err(ClusterError::EmptyCorpus)
        ));
    }
}
