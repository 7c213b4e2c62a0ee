//! Agglomerative clustering with Ward linkage.
//!
//! Merges are found with the nearest-neighbour chain algorithm over squared
//! Euclidean distances, updated with the Lance-Williams formula for Ward.
//! The merges are then sorted by height and replayed until `k` clusters remain.

use ndarray::Array2;

use crate::error::{EngineError, EngineResult};
use crate::similarity::squared_euclidean;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Merge {
  a: usize,
  b: usize,
  height: f64,
}

/// Cut the Ward dendrogram at `k` clusters. Labels are numbered by first
/// appearance in input order.
pub fn ward(points: &Array2<f32>, k: usize) -> EngineResult<Vec<usize>> {
  let n = points.nrows();
  if n == 0 {
    return Err(EngineError::degenerate("hierarchical clustering needs at least one point"));
  }
  if k == 0 || k > n {
    return Err(EngineError::degenerate(format!("k ({}) must be within 1..={}", k, n)));
  }

  let mut merges = nn_chain(points);
  merges.sort_by(|x, y| x.height.total_cmp(&y.height));

  let mut parent: Vec<usize> = (0..n).collect();
  for merge in merges.iter().take(n - k) {
    let ra = find(&mut parent, merge.a);
    let rb = find(&mut parent, merge.b);
    if ra != rb {
      parent[ra.max(rb)] = ra.min(rb);
    }
  }

  let mut roots: Vec<usize> = Vec::new();
  let labels = (0..n)
    .map(|i| {
      let root = find(&mut parent, i);
      match roots.iter().position(|&r| r == root) {
        Some(label) => label,
        None => {
          roots.push(root);
          roots.len() - 1
        }
      }
    })
    .collect();

  Ok(labels)
}

fn find(parent: &mut [usize], mut x: usize) -> usize {
  while parent[x] != x {
    parent[x] = parent[parent[x]];
    x = parent[x];
  }
  x
}

/// Nearest-neighbour chain. Slot `j` always holds a cluster containing point `j`,
/// so merges can be replayed with union-find on point indices.
fn nn_chain(points: &Array2<f32>) -> Vec<Merge> {
  let n = points.nrows();
  let rows: Vec<Vec<f32>> = points.rows().into_iter().map(|r| r.to_vec()).collect();

  let mut d = vec![0.0f64; n * n];
  for i in 0..n {
    for j in (i + 1)..n {
      let sq = squared_euclidean(&rows[i], &rows[j]) as f64;
      d[i * n + j] = sq;
      d[j * n + i] = sq;
    }
  }

  let mut active = vec![true; n];
  let mut size = vec![1usize; n];
  let mut chain: Vec<usize> = Vec::with_capacity(n);
  let mut merges = Vec::with_capacity(n.saturating_sub(1));
  let mut remaining = n;

  while remaining > 1 {
    if chain.is_empty() {
      if let Some(first) = (0..n).find(|&i| active[i]) {
        chain.push(first);
      }
    }

    let (a, b, dist) = loop {
      let a = chain[chain.len() - 1];
      let prev = if chain.len() >= 2 { Some(chain[chain.len() - 2]) } else { None };

      // Start from the previous chain element so it wins ties
      let mut best = prev.map_or((usize::MAX, f64::INFINITY), |p| (p, d[a * n + p]));
      for x in 0..n {
        if active[x] && x != a && d[a * n + x] < best.1 {
          best = (x, d[a * n + x]);
        }
      }

      if Some(best.0) == prev {
        chain.pop();
        chain.pop();
        break (a, best.0, best.1);
      }
      chain.push(best.0);
    };

    merges.push(Merge { a, b, height: dist.max(0.0).sqrt() });

    let keep = a.max(b);
    let drop = a.min(b);
    let (sa, sb) = (size[a] as f64, size[b] as f64);
    for x in 0..n {
      if !active[x] || x == a || x == b {
        continue;
      }
      let sx = size[x] as f64;
      let updated =
        ((sa + sx) * d[a * n + x] + (sb + sx) * d[b * n + x] - sx * dist) / (sa + sb + sx);
      d[keep * n + x] = updated;
      d[x * n + keep] = updated;
    }

    active[drop] = false;
    size[keep] = size[a] + size[b];
    remaining -= 1;
  }

  merges
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::array;

  #[test]
  fn test_ward_separates_groups() {
    let points = array![
      [0.0, 0.0],
      [10.0, 10.0],
      [0.2, 0.1],
      [10.1, 10.2],
      [0.1, 0.3],
      [20.0, 0.0],
    ];
    let labels = ward(&points, 3).unwrap();

    assert_eq!(labels[0], 0);
    assert_eq!(labels[1], 1);
    assert_eq!(labels[2], labels[0]);
    assert_eq!(labels[4], labels[0]);
    assert_eq!(labels[3], labels[1]);
    assert_eq!(labels[5], 2);
  }

  #[test]
  fn test_ward_k_equals_n_and_one() {
    let points = array![[0.0], [1.0], [5.0]];
    assert_eq!(ward(&points, 3).unwrap(), vec![0, 1, 2]);
    assert_eq!(ward(&points, 1).unwrap(), vec![0, 0, 0]);
  }

  #[test]
  fn test_ward_two_clusters_on_a_line() {
    let points = array![[0.0], [1.0], [5.0], [6.0]];
    assert_eq!(ward(&points, 2).unwrap(), vec![0, 0, 1, 1]);
  }

  #[test]
  fn test_ward_rejects_bad_k() {
    let points = array![[0.0], [1.0]];
    assert!(ward(&points, 0).is_err());
    assert!(ward(&points, 3).is_err());
  }
}
