//! Density-based clustering (HDBSCAN).
//!
//! # Algorithm
//!
//! 1. Core distance of a point: distance to its `min_samples`-th nearest
//!    neighbour, counting the point itself
//! 2. Mutual reachability: max(core(a), core(b), d(a, b))
//! 3. Minimum spanning tree over mutual reachability (Prim, dense)
//! 4. Single-linkage hierarchy from the sorted tree edges
//! 5. Condense the hierarchy: splits where both sides hold at least
//!    `min_cluster_size` points create new clusters, smaller sides fall out
//! 6. Excess-of-mass selection of the most stable clusters
//!
//! Points that never belong to a selected cluster are noise (`None`).

use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;
use std::collections::BTreeMap;

use crate::cluster::kmeans::KMeansFit;
use crate::config::NoisePolicy;
use crate::error::{EngineError, EngineResult};

const MIN_DISTANCE: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DensityParams {
  /// Minimum number of points to form a cluster.
  pub min_cluster_size: usize,
  /// Neighbourhood size for core distances.
  pub min_samples: usize,
}

impl DensityParams {
  /// Parameters for the adaptive and ensemble paths: cluster size scales with n.
  pub fn scaled_to(n: usize) -> Self {
    let size = (n / 20).max(5);
    Self { min_cluster_size: size, min_samples: size }
  }

  /// Parameters when density clustering is requested explicitly on any size.
  pub fn explicit_for(n: usize) -> Self {
    let size = (n / 20).clamp(2, 5);
    Self { min_cluster_size: size, min_samples: size }
  }

  #[must_use]
  pub fn with_min_samples(mut self, min_samples: Option<usize>) -> Self {
    if let Some(samples) = min_samples {
      self.min_samples = samples;
    }
    self
  }

  pub fn validate(&self) -> EngineResult<()> {
    if self.min_cluster_size < 2 {
      return Err(EngineError::computation(format!(
        "min_cluster_size must be >= 2, got {}",
        self.min_cluster_size
      )));
    }
    if self.min_samples < 1 {
      return Err(EngineError::computation("min_samples must be >= 1"));
    }
    Ok(())
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DensityLabels {
  pub labels: Vec<Option<usize>>,
  pub n_clusters: usize,
}

impl DensityLabels {
  pub fn noise_count(&self) -> usize {
    self.labels.iter().filter(|l| l.is_none()).count()
  }
}

#[derive(Debug, Clone)]
struct CondensedCluster {
  parent: Option<usize>,
  birth: f64,
  stability: f64,
  children: Vec<usize>,
}

/// Run HDBSCAN over a precomputed distance matrix.
pub fn hdbscan(distances: &Array2<f32>, params: &DensityParams) -> EngineResult<DensityLabels> {
  params.validate()?;
  let n = distances.nrows();
  if distances.ncols() != n {
    return Err(EngineError::data("distance matrix must be square"));
  }
  if n < params.min_cluster_size || n < 2 {
    return Ok(DensityLabels { labels: vec![None; n], n_clusters: 0 });
  }

  let core = core_distances(distances.view(), params.min_samples);
  let edges = mutual_reachability_mst(distances.view(), &core);
  let hierarchy = single_linkage(n, edges);
  let (clusters, fell_from) = condense(n, &hierarchy, params.min_cluster_size);
  let selected = select_eom(&clusters);

  // Compact labels by ascending condensed cluster id
  let mut compact: BTreeMap<usize, usize> = BTreeMap::new();
  for (id, &is_selected) in selected.iter().enumerate() {
    if is_selected {
      let next = compact.len();
      compact.insert(id, next);
    }
  }

  let labels = fell_from
    .iter()
    .map(|&start| {
      let mut cluster = Some(start);
      while let Some(c) = cluster {
        if selected[c] {
          return compact.get(&c).copied();
        }
        cluster = clusters[c].parent;
      }
      None
    })
    .collect();

  Ok(DensityLabels { labels, n_clusters: compact.len() })
}

fn core_distances(distances: ArrayView2<f32>, min_samples: usize) -> Vec<f32> {
  let n = distances.nrows();
  let kth = min_samples.saturating_sub(1).min(n - 1);

  (0..n)
    .into_par_iter()
    .map(|i| {
      let mut row: Vec<f32> = distances.row(i).to_vec();
      row.sort_by(|a, b| a.total_cmp(b));
      row[kth]
    })
    .collect()
}

/// Prim's algorithm on the dense mutual reachability graph.
fn mutual_reachability_mst(distances: ArrayView2<f32>, core: &[f32]) -> Vec<(usize, usize, f32)> {
  let n = distances.nrows();
  let mut in_tree = vec![false; n];
  let mut best = vec![f32::INFINITY; n];
  let mut parent = vec![0usize; n];
  let mut edges = Vec::with_capacity(n.saturating_sub(1));

  let mut current = 0;
  in_tree[0] = true;

  for _ in 1..n {
    for j in 0..n {
      if in_tree[j] {
        continue;
      }
      let reach = distances[[current, j]].max(core[current]).max(core[j]);
      if reach < best[j] {
        best[j] = reach;
        parent[j] = current;
      }
    }

    let next = (0..n)
      .filter(|&j| !in_tree[j])
      .min_by(|&a, &b| best[a].total_cmp(&best[b]).then(a.cmp(&b)));

    if let Some(next) = next {
      edges.push((parent[next], next, best[next]));
      in_tree[next] = true;
      current = next;
    }
  }

  edges
}

/// Internal dendrogram node: (left, right, distance, size). Node ids `0..n` are points.
type Merge = (usize, usize, f32, usize);

fn single_linkage(n: usize, mut edges: Vec<(usize, usize, f32)>) -> Vec<Merge> {
  edges.sort_by(|a, b| a.2.total_cmp(&b.2).then(a.0.cmp(&b.0)).then(a.1.cmp(&b.1)));

  let mut parent: Vec<usize> = (0..n).collect();
  let mut node_of: Vec<usize> = (0..n).collect();
  let mut size_of: Vec<usize> = vec![1; n];
  let mut merges = Vec::with_capacity(n.saturating_sub(1));

  fn find(parent: &mut [usize], mut x: usize) -> usize {
    while parent[x] != x {
      parent[x] = parent[parent[x]];
      x = parent[x];
    }
    x
  }

  for (a, b, distance) in edges {
    let ra = find(&mut parent, a);
    let rb = find(&mut parent, b);
    if ra == rb {
      continue;
    }
    let size = size_of[ra] + size_of[rb];
    merges.push((node_of[ra], node_of[rb], distance, size));
    parent[rb] = ra;
    size_of[ra] = size;
    node_of[ra] = n + merges.len() - 1;
  }

  merges
}

fn node_size(n: usize, hierarchy: &[Merge], node: usize) -> usize {
  if node < n {
    1
  } else {
    hierarchy[node - n].3
  }
}

fn leaves_under(n: usize, hierarchy: &[Merge], node: usize) -> Vec<usize> {
  let mut leaves = Vec::new();
  let mut stack = vec![node];
  while let Some(current) = stack.pop() {
    if current < n {
      leaves.push(current);
    } else {
      let (left, right, _, _) = hierarchy[current - n];
      stack.push(left);
      stack.push(right);
    }
  }
  leaves
}

fn lambda_of(distance: f32) -> f64 {
  1.0 / (distance as f64).max(MIN_DISTANCE)
}

/// Walk the hierarchy top-down, building the condensed cluster tree and
/// recording for each point the condensed cluster it fell out of.
fn condense(
  n: usize,
  hierarchy: &[Merge],
  min_cluster_size: usize,
) -> (Vec<CondensedCluster>, Vec<usize>) {
  let mut clusters =
    vec![CondensedCluster { parent: None, birth: 0.0, stability: 0.0, children: Vec::new() }];
  let mut fell_from = vec![0usize; n];

  // A forest (disconnected input) cannot occur for a dense graph, so the last merge is the root
  let root = n + hierarchy.len().saturating_sub(1);
  let mut stack = vec![(root, 0usize)];

  while let Some((node, cluster)) = stack.pop() {
    if node < n {
      fell_from[node] = cluster;
      continue;
    }

    let (left, right, distance, _) = hierarchy[node - n];
    let lambda = lambda_of(distance);
    let birth = clusters[cluster].birth;
    let left_big = node_size(n, hierarchy, left) >= min_cluster_size;
    let right_big = node_size(n, hierarchy, right) >= min_cluster_size;

    match (left_big, right_big) {
      (true, true) => {
        for child in [left, right] {
          let size = node_size(n, hierarchy, child);
          let id = clusters.len();
          clusters.push(CondensedCluster {
            parent: Some(cluster),
            birth: lambda,
            stability: 0.0,
            children: Vec::new(),
          });
          clusters[cluster].children.push(id);
          clusters[cluster].stability += size as f64 * (lambda - birth);
          stack.push((child, id));
        }
      }
      (true, false) | (false, true) => {
        let (kept, dropped) = if left_big { (left, right) } else { (right, left) };
        for point in leaves_under(n, hierarchy, dropped) {
          fell_from[point] = cluster;
          clusters[cluster].stability += lambda - birth;
        }
        stack.push((kept, cluster));
      }
      (false, false) => {
        for point in leaves_under(n, hierarchy, node) {
          fell_from[point] = cluster;
          clusters[cluster].stability += lambda - birth;
        }
      }
    }
  }

  (clusters, fell_from)
}

/// Excess-of-mass selection. The root is never selected.
fn select_eom(clusters: &[CondensedCluster]) -> Vec<bool> {
  let mut selected = vec![false; clusters.len()];
  let mut subtree = vec![0.0f64; clusters.len()];

  // Children always carry larger ids than their parent
  for id in (1..clusters.len()).rev() {
    let children_total: f64 = clusters[id].children.iter().map(|&c| subtree[c]).sum();

    if clusters[id].children.is_empty() || clusters[id].stability >= children_total {
      selected[id] = true;
      subtree[id] = clusters[id].stability;

      let mut stack = clusters[id].children.clone();
      while let Some(descendant) = stack.pop() {
        selected[descendant] = false;
        stack.extend(clusters[descendant].children.iter().copied());
      }
    } else {
      subtree[id] = children_total;
    }
  }

  selected
}

/// Turn density labels into a full assignment according to the noise policy.
///
/// Under `MergeNearest` a noise point goes to its nearest partition centroid
/// and joins the density cluster holding most of that partition cluster's
/// members; if that partition cluster has no clustered members, its noise
/// points form a cluster of their own. Under `OwnCluster` every noise point
/// lands in one extra cluster.
pub fn resolve_noise(
  density: &DensityLabels,
  policy: NoisePolicy,
  partition: &KMeansFit,
  points: &Array2<f32>,
) -> Vec<usize> {
  match policy {
    NoisePolicy::OwnCluster => {
      density.labels.iter().map(|label| label.unwrap_or(density.n_clusters)).collect()
    }
    NoisePolicy::MergeNearest => {
      let mut votes: BTreeMap<usize, BTreeMap<usize, usize>> = BTreeMap::new();
      for (i, label) in density.labels.iter().enumerate() {
        if let Some(label) = label {
          *votes.entry(partition.labels[i]).or_default().entry(*label).or_default() += 1;
        }
      }

      density
        .labels
        .iter()
        .enumerate()
        .map(|(i, label)| match label {
          Some(label) => *label,
          None => {
            let nearest = partition.nearest_centroid(points.row(i));
            votes
              .get(&nearest)
              .and_then(|counts| most_common(counts))
              .unwrap_or(density.n_clusters + nearest)
          }
        })
        .collect()
    }
  }
}

/// Key with the highest count; lowest key on ties.
pub(crate) fn most_common(counts: &BTreeMap<usize, usize>) -> Option<usize> {
  counts
    .iter()
    .max_by(|(ka, ca), (kb, cb)| ca.cmp(cb).then(kb.cmp(ka)))
    .map(|(k, _)| *k)
}
