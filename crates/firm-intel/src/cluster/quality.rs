use ndarray::Array2;
use rayon::prelude::*;
use std::collections::BTreeMap;

/// Mean silhouette coefficient over all points.
///
/// s(i) = (b(i) - a(i)) / max(a(i), b(i)), where a(i) is the mean distance to
/// the rest of its own cluster and b(i) the smallest mean distance to another
/// cluster. Points alone in their cluster score 0. Returns `None` when there
/// are fewer than two clusters, where the score is undefined.
pub fn silhouette(labels: &[usize], distances: &Array2<f32>) -> Option<f32> {
  let mut sizes: BTreeMap<usize, usize> = BTreeMap::new();
  for &label in labels {
    *sizes.entry(label).or_default() += 1;
  }
  if sizes.len() < 2 {
    return None;
  }

  let n = labels.len();
  // Summed sequentially so the score does not depend on work splitting
  let scores: Vec<f32> = (0..n)
    .into_par_iter()
    .map(|i| point_silhouette(i, labels, &sizes, distances))
    .collect();

  Some(scores.iter().sum::<f32>() / n as f32)
}

fn point_silhouette(
  i: usize,
  labels: &[usize],
  sizes: &BTreeMap<usize, usize>,
  distances: &Array2<f32>,
) -> f32 {
  let own = labels[i];
  if sizes[&own] < 2 {
    return 0.0;
  }

  let mut sums: BTreeMap<usize, f32> = BTreeMap::new();
  for (j, &label) in labels.iter().enumerate() {
    if j != i {
      *sums.entry(label).or_default() += distances[[i, j]];
    }
  }

  let a = sums.get(&own).copied().unwrap_or(0.0) / (sizes[&own] - 1) as f32;
  let b = sums
    .iter()
    .filter(|(label, _)| **label != own)
    .map(|(label, sum)| sum / sizes[label] as f32)
    .fold(f32::MAX, f32::min);

  let max_ab = a.max(b);
  if max_ab <= f32::EPSILON {
    0.0
  } else {
    (b - a) / max_ab
  }
}
