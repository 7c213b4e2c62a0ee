//! Partition-based clustering: k-means with k-means++ seeding.
//!
//! 1. Seed k centroids with k-means++ (D² weighted sampling)
//! 2. Assign each point to its nearest centroid (squared Euclidean)
//! 3. Recompute centroids as the mean of their members
//! 4. Repeat until centroids move less than the tolerance
//!
//! Sampling draws from a `ChaCha8Rng` seeded once per fit, so identical input
//! and seed give identical labels. The best of several restarts (lowest
//! inertia, earliest on ties) is kept.

use ndarray::{Array2, ArrayView1, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::debug;

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone)]
pub struct KMeans {
  pub k: usize,
  pub seed: u64,
  pub max_iterations: usize,
  pub restarts: usize,
  pub tolerance: f32,
}

#[derive(Debug, Clone)]
pub struct KMeansFit {
  /// Cluster index per point, in `0..k`.
  pub labels: Vec<usize>,
  /// One centroid per row.
  pub centroids: Array2<f32>,
  /// Within-cluster sum of squared distances.
  pub inertia: f32,
  pub iterations: usize,
}

impl KMeansFit {
  /// Index of the centroid nearest to `point`; lowest index on ties.
  pub fn nearest_centroid(&self, point: ArrayView1<f32>) -> usize {
    nearest(point, &self.centroids).0
  }
}

impl KMeans {
  pub fn new(k: usize, seed: u64) -> Self {
    Self { k, seed, max_iterations: 300, restarts: 4, tolerance: 1e-4 }
  }

  pub fn fit(&self, points: &Array2<f32>) -> EngineResult<KMeansFit> {
    let n = points.nrows();
    if n == 0 {
      return Err(EngineError::degenerate("k-means needs at least one point"));
    }
    if self.k == 0 || self.k > n {
      return Err(EngineError::degenerate(format!("k ({}) must be within 1..={}", self.k, n)));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
    let mut best: Option<KMeansFit> = None;

    for restart in 0..self.restarts.max(1) {
      let fit = self.fit_once(points, &mut rng)?;
      debug!(restart, inertia = fit.inertia, iterations = fit.iterations, "k-means run finished");
      if best.as_ref().map_or(true, |b| fit.inertia < b.inertia) {
        best = Some(fit);
      }
    }

    best.ok_or_else(|| EngineError::computation("k-means produced no result"))
  }

  fn fit_once(&self, points: &Array2<f32>, rng: &mut ChaCha8Rng) -> EngineResult<KMeansFit> {
    let mut centroids = plus_plus_init(points, self.k, rng);
    let mut labels = vec![0usize; points.nrows()];
    let mut iterations = 0;

    for iter in 0..self.max_iterations {
      iterations = iter + 1;

      let assigned = assign(points, &centroids);
      let changed = assigned.iter().zip(labels.iter()).any(|((label, _), old)| label != old);
      labels = assigned.iter().map(|(label, _)| *label).collect();

      let updated = update_centroids(points, &labels, &assigned, self.k);
      let movement = max_movement(&centroids, &updated);
      centroids = updated;

      if movement < self.tolerance || (!changed && iter > 0) {
        break;
      }
    }

    // Final assignment against the settled centroids
    let assigned = assign(points, &centroids);
    labels = assigned.iter().map(|(label, _)| *label).collect();
    let inertia: f32 = assigned.iter().map(|(_, d)| d).sum();

    if !inertia.is_finite() {
      return Err(EngineError::computation("k-means inertia is not finite"));
    }

    Ok(KMeansFit { labels, centroids, inertia, iterations })
  }
}

/// k-means++ seeding: first centroid uniform, the rest with probability proportional to D².
fn plus_plus_init(points: &Array2<f32>, k: usize, rng: &mut ChaCha8Rng) -> Array2<f32> {
  let n = points.nrows();
  let mut chosen: Vec<usize> = Vec::with_capacity(k);
  chosen.push(rng.gen_range(0..n));

  let mut min_distances = vec![f32::MAX; n];

  while chosen.len() < k {
    let last = points.row(chosen[chosen.len() - 1]);
    for (i, point) in points.axis_iter(Axis(0)).enumerate() {
      let d = squared_distance(point, last);
      if d < min_distances[i] {
        min_distances[i] = d;
      }
    }

    let total: f64 = min_distances.iter().map(|&d| d as f64).sum();
    let next = if total <= 0.0 {
      // Every point sits on a chosen centroid; take the next unused index
      (0..n).find(|i| !chosen.contains(i)).unwrap_or(0)
    } else {
      let target = rng.gen::<f64>() * total;
      let mut cumulative = 0.0f64;
      let mut pick = n - 1;
      for (i, &d) in min_distances.iter().enumerate() {
        cumulative += d as f64;
        if cumulative >= target && d > 0.0 {
          pick = i;
          break;
        }
      }
      pick
    };
    chosen.push(next);
  }

  points.select(Axis(0), &chosen)
}

/// Nearest centroid and squared distance for every point.
fn assign(points: &Array2<f32>, centroids: &Array2<f32>) -> Vec<(usize, f32)> {
  (0..points.nrows())
    .into_par_iter()
    .map(|i| nearest(points.row(i), centroids))
    .collect()
}

fn nearest(point: ArrayView1<f32>, centroids: &Array2<f32>) -> (usize, f32) {
  let mut best = (0usize, f32::MAX);
  for (j, centroid) in centroids.axis_iter(Axis(0)).enumerate() {
    let d = squared_distance(point, centroid);
    if d < best.1 {
      best = (j, d);
    }
  }
  best
}

fn update_centroids(
  points: &Array2<f32>,
  labels: &[usize],
  assigned: &[(usize, f32)],
  k: usize,
) -> Array2<f32> {
  let mut sums = Array2::<f32>::zeros((k, points.ncols()));
  let mut counts = vec![0usize; k];

  for (i, &label) in labels.iter().enumerate() {
    counts[label] += 1;
    let mut row = sums.row_mut(label);
    row += &points.row(i);
  }

  // Empty clusters take the points farthest from their current centroid
  let mut donors: Vec<usize> = (0..points.nrows()).collect();
  donors.sort_by(|&a, &b| assigned[b].1.total_cmp(&assigned[a].1).then(a.cmp(&b)));
  let mut donors = donors.into_iter();

  for cluster in 0..k {
    if counts[cluster] > 0 {
      let count = counts[cluster] as f32;
      sums.row_mut(cluster).mapv_inplace(|x| x / count);
    } else if let Some(donor) = donors.next() {
      sums.row_mut(cluster).assign(&points.row(donor));
    }
  }

  sums
}

fn max_movement(old: &Array2<f32>, new: &Array2<f32>) -> f32 {
  old
    .axis_iter(Axis(0))
    .zip(new.axis_iter(Axis(0)))
    .map(|(a, b)| squared_distance(a, b).sqrt())
    .fold(0.0f32, f32::max)
}

fn squared_distance(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f32 {
  a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}
