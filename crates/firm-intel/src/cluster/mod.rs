//! Adaptive clustering of firm embeddings.
//!
//! The engine picks a strategy from the dataset size unless one is configured
//! explicitly:
//!
//! | n          | strategy                                                    |
//! |------------|-------------------------------------------------------------|
//! | < 2        | single cluster                                              |
//! | < 100      | k-means, k = min(k_hint, n)                                 |
//! | 100..500   | k-means, density fallback when silhouette < threshold       |
//! | >= 500     | majority vote of k-means, density and hierarchical          |
//!
//! Output is always a partition of the input ids. Any routine failure
//! degrades to a single cluster holding every id.

pub mod density;
pub mod ensemble;
pub mod hierarchical;
pub mod kmeans;
pub mod quality;

use ndarray::Array2;
use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroUsize;
use tracing::{debug, info, warn};

use crate::config::{ClusterMethod, ClusteringConfig};
use crate::error::{EngineError, EngineResult};
use crate::model::{Centroids, Cluster, ClusterId, ClusterMap, FirmId};
use crate::outcome::Outcome;
use crate::similarity::{euclidean_distance_matrix, stack_rows};

use density::{hdbscan, resolve_noise, DensityParams};
use kmeans::{KMeans, KMeansFit};

const SMALL_DATASET: usize = 100;
const LARGE_DATASET: usize = 500;

/// Groups firm embeddings into a partition.
#[cfg_attr(test, mockall::automock)]
pub trait Clusterer: Send + Sync {
  fn cluster(
    &self,
    embeddings: &[Vec<f32>],
    ids: &[FirmId],
    k_hint: NonZeroUsize,
  ) -> Outcome<ClusterMap>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  Single,
  KMeans,
  /// k-means, replaced by density clustering when the silhouette is too low
  QualityChecked,
  Density,
  Hierarchical,
  Ensemble,
}

impl Strategy {
  pub fn select(method: ClusterMethod, n: usize) -> Self {
    if n < 2 {
      return Strategy::Single;
    }
    match method {
      ClusterMethod::Adaptive if n < SMALL_DATASET => Strategy::KMeans,
      ClusterMethod::Adaptive if n < LARGE_DATASET => Strategy::QualityChecked,
      ClusterMethod::Adaptive => Strategy::Ensemble,
      ClusterMethod::KMeans => Strategy::KMeans,
      ClusterMethod::Density => Strategy::Density,
      ClusterMethod::Hierarchical => Strategy::Hierarchical,
      ClusterMethod::Ensemble => Strategy::Ensemble,
    }
  }
}

impl fmt::Display for Strategy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Strategy::Single => "single",
      Strategy::KMeans => "kmeans",
      Strategy::QualityChecked => "kmeans+quality",
      Strategy::Density => "density",
      Strategy::Hierarchical => "hierarchical",
      Strategy::Ensemble => "ensemble",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Clone)]
pub struct ClusterEngine {
  config: ClusteringConfig,
}

impl ClusterEngine {
  pub fn new(config: ClusteringConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &ClusteringConfig {
    &self.config
  }

  fn kmeans(&self, k: usize) -> KMeans {
    KMeans {
      k,
      seed: self.config.seed,
      max_iterations: self.config.max_iterations,
      restarts: self.config.restarts,
      tolerance: self.config.convergence_tolerance,
    }
  }

  fn labels(
    &self,
    points: &Array2<f32>,
    strategy: Strategy,
    k: usize,
  ) -> EngineResult<Vec<usize>> {
    let n = points.nrows();
    match strategy {
      Strategy::Single => Ok(vec![0; n]),
      Strategy::KMeans => Ok(self.kmeans(k).fit(points)?.labels),
      Strategy::QualityChecked => {
        let partition = self.kmeans(k).fit(points)?;
        let distances = euclidean_distance_matrix(points);
        match quality::silhouette(&partition.labels, &distances) {
          Some(score) if score < self.config.quality_threshold => {
            info!(
              score,
              threshold = self.config.quality_threshold,
              "partition quality low, using density clustering"
            );
            let params =
              DensityParams::scaled_to(n).with_min_samples(self.config.density_min_samples);
            self.density_labels(points, &distances, &params, &partition)
          }
          score => {
            debug!(score = ?score, "partition quality accepted");
            Ok(partition.labels)
          }
        }
      }
      Strategy::Density => {
        let partition = self.kmeans(k).fit(points)?;
        let distances = euclidean_distance_matrix(points);
        let params =
          DensityParams::explicit_for(n).with_min_samples(self.config.density_min_samples);
        self.density_labels(points, &distances, &params, &partition)
      }
      Strategy::Hierarchical => hierarchical::ward(points, k),
      Strategy::Ensemble => {
        let partition = self.kmeans(k).fit(points)?;
        let distances = euclidean_distance_matrix(points);
        let params =
          DensityParams::scaled_to(n).with_min_samples(self.config.density_min_samples);
        let dense = hdbscan(&distances, &params)?;
        let tree: Vec<Option<usize>> =
          hierarchical::ward(points, k)?.into_iter().map(Some).collect();

        debug!(
          density_clusters = dense.n_clusters,
          noise = dense.noise_count(),
          "ensemble voters ready"
        );
        let voters = vec![
          ensemble::align_to(&partition.labels, &dense.labels),
          ensemble::align_to(&partition.labels, &tree),
        ];
        Ok(ensemble::majority_vote(&partition.labels, &voters))
      }
    }
  }

  fn density_labels(
    &self,
    points: &Array2<f32>,
    distances: &Array2<f32>,
    params: &DensityParams,
    partition: &KMeansFit,
  ) -> EngineResult<Vec<usize>> {
    let dense = hdbscan(distances, params)?;
    debug!(
      clusters = dense.n_clusters,
      noise = dense.noise_count(),
      policy = self.config.noise_policy.as_str(),
      "density clustering finished"
    );
    Ok(resolve_noise(&dense, self.config.noise_policy, partition, points))
  }

  fn try_cluster(
    &self,
    embeddings: &[Vec<f32>],
    ids: &[FirmId],
    k_hint: NonZeroUsize,
  ) -> EngineResult<ClusterMap> {
    if embeddings.len() != ids.len() {
      return Err(EngineError::data(format!(
        "{} embeddings for {} ids",
        embeddings.len(),
        ids.len()
      )));
    }

    let n = ids.len();
    let strategy = Strategy::select(self.config.method, n);
    let k = k_hint.get().min(n);
    info!(firms = n, k, strategy = %strategy, "clustering firms");

    let rows: Vec<&[f32]> = embeddings.iter().map(|e| e.as_slice()).collect();
    let points = stack_rows(&rows)?;
    let labels = self.labels(&points, strategy, k)?;

    if labels.len() != n {
      return Err(EngineError::computation(format!("{} labels for {} firms", labels.len(), n)));
    }
    Ok(group_by_label(ids, &labels))
  }
}

impl Clusterer for ClusterEngine {
  fn cluster(
    &self,
    embeddings: &[Vec<f32>],
    ids: &[FirmId],
    k_hint: NonZeroUsize,
  ) -> Outcome<ClusterMap> {
    if ids.is_empty() {
      return Outcome::no_data("no firms to cluster");
    }

    match self.try_cluster(embeddings, ids, k_hint) {
      Ok(clusters) => {
        info!(clusters = clusters.len(), "clustering complete");
        Outcome::complete(clusters)
      }
      Err(e) => {
        warn!(error = %e, "clustering failed, falling back to a single cluster");
        Outcome::degraded(single_cluster(ids), e.to_string())
      }
    }
  }
}

pub fn single_cluster(ids: &[FirmId]) -> ClusterMap {
  let mut clusters = ClusterMap::new();
  if !ids.is_empty() {
    clusters.insert(0, ids.to_vec());
  }
  clusters
}

/// Group ids by label, renumbering clusters by first appearance.
pub fn group_by_label(ids: &[FirmId], labels: &[usize]) -> ClusterMap {
  let mut renumbered: BTreeMap<usize, ClusterId> = BTreeMap::new();
  let mut clusters = ClusterMap::new();

  for (id, label) in ids.iter().zip(labels) {
    let next = renumbered.len();
    let cluster = *renumbered.entry(*label).or_insert(next);
    clusters.entry(cluster).or_default().push(id.clone());
  }
  clusters
}

/// Firm id to its cluster.
pub fn membership(clusters: &ClusterMap) -> BTreeMap<FirmId, ClusterId> {
  clusters
    .iter()
    .flat_map(|(cluster, members)| members.iter().map(move |id| (id.clone(), *cluster)))
    .collect()
}

/// Mean member embedding per cluster. Members without an embedding are
/// skipped; a cluster with no embedded member has no centroid.
pub fn compute_centroids(
  clusters: &ClusterMap,
  embeddings: &BTreeMap<FirmId, Vec<f32>>,
) -> Centroids {
  clusters
    .iter()
    .map(|(cluster, members)| {
      let vectors: Vec<&Vec<f32>> = members.iter().filter_map(|id| embeddings.get(id)).collect();
      (*cluster, mean(&vectors))
    })
    .collect()
}

fn mean(vectors: &[&Vec<f32>]) -> Option<Vec<f32>> {
  let first = vectors.first()?;
  let dim = first.len();
  if dim == 0 || vectors.iter().any(|v| v.len() != dim) {
    return None;
  }

  let mut acc = vec![0.0f32; dim];
  for vector in vectors {
    for (a, x) in acc.iter_mut().zip(vector.iter()) {
      *a += x;
    }
  }
  let count = vectors.len() as f32;
  acc.iter_mut().for_each(|a| *a /= count);
  Some(acc)
}

pub fn cluster_records(clusters: &ClusterMap, centroids: &Centroids) -> Vec<Cluster> {
  clusters
    .iter()
    .map(|(id, members)| Cluster {
      id: *id,
      members: members.clone(),
      centroid: centroids.get(id).cloned().flatten(),
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::NoisePolicy;
  use rand::{Rng, SeedableRng};
  use rand_chacha::ChaCha8Rng;
  use std::collections::BTreeSet;

  fn ids(n: usize) -> Vec<FirmId> {
    (0..n).map(|i| format!("firm-{:03}", i)).collect()
  }

  fn k(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap()
  }

  /// `groups` tight blobs laid out on a line, `per_group` points each, interleaved.
  fn blobs(groups: usize, per_group: usize) -> Vec<Vec<f32>> {
    (0..groups * per_group)
      .map(|i| {
        let g = (i % groups) as f32;
        let jitter = (i / groups) as f32 * 0.01;
        vec![g * 10.0 + jitter, g * -5.0 + jitter, 1.0]
      })
      .collect()
  }

  fn matrix(embeddings: &[Vec<f32>]) -> Array2<f32> {
    let rows: Vec<&[f32]> = embeddings.iter().map(|e| e.as_slice()).collect();
    stack_rows(&rows).unwrap()
  }

  /// Points drawn uniformly from the unit hypercube: no cluster structure at all.
  fn uniform(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n).map(|_| (0..dim).map(|_| rng.gen_range(0.0f32..1.0)).collect()).collect()
  }

  fn assert_partition(clusters: &ClusterMap, ids: &[FirmId]) {
    let flat: Vec<&FirmId> = clusters.values().flatten().collect();
    assert_eq!(flat.len(), ids.len());
    let unique: BTreeSet<&FirmId> = flat.into_iter().collect();
    assert_eq!(unique, ids.iter().collect::<BTreeSet<_>>());
    assert!(clusters.values().all(|m| !m.is_empty()));
  }

  #[test]
  fn test_strategy_selection() {
    assert_eq!(Strategy::select(ClusterMethod::Adaptive, 1), Strategy::Single);
    assert_eq!(Strategy::select(ClusterMethod::Adaptive, 99), Strategy::KMeans);
    assert_eq!(Strategy::select(ClusterMethod::Adaptive, 100), Strategy::QualityChecked);
    assert_eq!(Strategy::select(ClusterMethod::Adaptive, 499), Strategy::QualityChecked);
    assert_eq!(Strategy::select(ClusterMethod::Adaptive, 500), Strategy::Ensemble);
    assert_eq!(Strategy::select(ClusterMethod::Hierarchical, 3), Strategy::Hierarchical);
    assert_eq!(Strategy::select(ClusterMethod::Density, 0), Strategy::Single);
  }

  #[test]
  fn test_empty_input_is_no_data() {
    let engine = ClusterEngine::new(ClusteringConfig::default());
    let outcome = engine.cluster(&[], &[], k(5));
    assert!(outcome.is_no_data());
    assert!(outcome.value.is_empty());
  }

  #[test]
  fn test_single_firm_single_cluster() {
    let engine = ClusterEngine::new(ClusteringConfig::default());
    let outcome = engine.cluster(&[vec![1.0, 0.0]], &ids(1), k(5));
    assert!(outcome.is_complete());
    assert_eq!(outcome.value.len(), 1);
    assert_eq!(outcome.value[&0], ids(1));
  }

  #[test]
  fn test_small_dataset_uses_kmeans_with_capped_k() {
    let engine = ClusterEngine::new(ClusteringConfig::default());
    let embeddings = blobs(3, 2);
    let firm_ids = ids(6);
    let outcome = engine.cluster(&embeddings, &firm_ids, k(10));

    assert!(outcome.is_complete());
    assert!(outcome.value.len() <= 6);
    assert_partition(&outcome.value, &firm_ids);
  }

  #[test]
  fn test_blobs_are_recovered() {
    let engine = ClusterEngine::new(ClusteringConfig::default());
    let embeddings = blobs(3, 5);
    let firm_ids = ids(15);
    let outcome = engine.cluster(&embeddings, &firm_ids, k(3));

    assert_eq!(outcome.value.len(), 3);
    // Interleaved layout: firm i belongs to blob i % 3, and cluster ids follow first appearance
    assert_eq!(outcome.value[&0][0], "firm-000");
    assert!(outcome.value[&0].iter().all(|id| {
      let i: usize = id.trim_start_matches("firm-").parse().unwrap();
      i % 3 == 0
    }));
  }

  #[test]
  fn test_non_finite_embedding_degrades() {
    let engine = ClusterEngine::new(ClusteringConfig::default());
    let embeddings = vec![vec![1.0, 0.0], vec![f32::NAN, 0.0], vec![0.0, 1.0]];
    let firm_ids = ids(3);
    let outcome = engine.cluster(&embeddings, &firm_ids, k(2));

    assert!(outcome.is_degraded());
    assert_eq!(outcome.value, single_cluster(&firm_ids));
  }

  #[test]
  fn test_length_mismatch_degrades() {
    let engine = ClusterEngine::new(ClusteringConfig::default());
    let outcome = engine.cluster(&[vec![1.0]], &ids(2), k(2));
    assert!(outcome.is_degraded());
    assert_eq!(outcome.value[&0].len(), 2);
  }

  #[test]
  fn test_every_explicit_method_partitions() {
    let embeddings = blobs(4, 6);
    let firm_ids = ids(24);
    for method in [
      ClusterMethod::KMeans,
      ClusterMethod::Density,
      ClusterMethod::Hierarchical,
      ClusterMethod::Ensemble,
    ] {
      for policy in [NoisePolicy::MergeNearest, NoisePolicy::OwnCluster] {
        let config = ClusteringConfig { method, noise_policy: policy, ..Default::default() };
        let outcome = ClusterEngine::new(config).cluster(&embeddings, &firm_ids, k(4));
        assert!(outcome.is_complete(), "{} / {:?}: {:?}", method, policy, outcome.status);
        assert_partition(&outcome.value, &firm_ids);
      }
    }
  }

  #[test]
  fn test_quality_check_keeps_well_separated_partition() {
    let engine = ClusterEngine::new(ClusteringConfig::default());
    let embeddings = blobs(3, 50);
    let points = matrix(&embeddings);
    assert_eq!(Strategy::select(engine.config().method, 150), Strategy::QualityChecked);

    let partition = engine.kmeans(3).fit(&points).unwrap();
    let score = quality::silhouette(&partition.labels, &euclidean_distance_matrix(&points));
    assert!(score.unwrap() >= engine.config().quality_threshold, "silhouette {:?}", score);

    let labels = engine.labels(&points, Strategy::QualityChecked, 3).unwrap();
    assert_eq!(labels, partition.labels);
  }

  #[test]
  fn test_quality_check_falls_back_to_density_on_weak_structure() {
    let engine = ClusterEngine::new(ClusteringConfig::default());
    let embeddings = uniform(200, 16, 7);
    let points = matrix(&embeddings);
    let distances = euclidean_distance_matrix(&points);

    let partition = engine.kmeans(5).fit(&points).unwrap();
    let score = quality::silhouette(&partition.labels, &distances);
    assert!(score.unwrap() < engine.config().quality_threshold, "silhouette {:?}", score);

    let params = DensityParams::scaled_to(200);
    assert_eq!(params.min_cluster_size, 10);
    let expected = engine.density_labels(&points, &distances, &params, &partition).unwrap();
    assert_eq!(engine.labels(&points, Strategy::QualityChecked, 5).unwrap(), expected);

    let firm_ids = ids(200);
    let outcome = engine.cluster(&embeddings, &firm_ids, k(5));
    assert!(outcome.is_complete());
    assert_partition(&outcome.value, &firm_ids);
    assert_eq!(outcome.value, group_by_label(&firm_ids, &expected));
  }

  #[test]
  fn test_quality_threshold_decides_between_partition_and_density() {
    let embeddings = blobs(4, 30);
    let points = matrix(&embeddings);
    let distances = euclidean_distance_matrix(&points);

    // Silhouette never drops below -1, so the partition is always kept
    let lenient = ClusterEngine::new(ClusteringConfig {
      quality_threshold: -1.0,
      ..Default::default()
    });
    let partition = lenient.kmeans(4).fit(&points).unwrap();
    assert_eq!(lenient.labels(&points, Strategy::QualityChecked, 4).unwrap(), partition.labels);

    // Distinct points keep the silhouette below 1, so density clustering always runs
    let strict =
      ClusterEngine::new(ClusteringConfig { quality_threshold: 1.0, ..Default::default() });
    let expected = strict
      .density_labels(&points, &distances, &DensityParams::scaled_to(120), &partition)
      .unwrap();
    let labels = strict.labels(&points, Strategy::QualityChecked, 4).unwrap();
    assert_eq!(labels, expected);
    assert_eq!(labels.len(), 120);
  }

  #[test]
  fn test_group_by_label_renumbers_by_first_appearance() {
    let grouped = group_by_label(&ids(4), &[7, 2, 7, 9]);
    assert_eq!(grouped[&0], vec!["firm-000".to_string(), "firm-002".to_string()]);
    assert_eq!(grouped[&1], vec!["firm-001".to_string()]);
    assert_eq!(grouped[&2], vec!["firm-003".to_string()]);
  }

  #[test]
  fn test_compute_centroids_skips_missing_embeddings() {
    let mut clusters = ClusterMap::new();
    clusters.insert(0, vec!["a".to_string(), "b".to_string()]);
    clusters.insert(1, vec!["c".to_string()]);

    let mut embeddings = BTreeMap::new();
    embeddings.insert("a".to_string(), vec![1.0, 0.0]);
    embeddings.insert("b".to_string(), vec![3.0, 2.0]);

    let centroids = compute_centroids(&clusters, &embeddings);
    assert_eq!(centroids[&0], Some(vec![2.0, 1.0]));
    assert_eq!(centroids[&1], None);

    let records = cluster_records(&clusters, &centroids);
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].centroid, None);
  }

  #[test]
  fn test_membership_lookup() {
    let grouped = group_by_label(&ids(3), &[0, 1, 0]);
    let lookup = membership(&grouped);
    assert_eq!(lookup["firm-002"], 0);
    assert_eq!(lookup["firm-001"], 1);
  }
}
