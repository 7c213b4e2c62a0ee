use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeSet;
use std::num::NonZeroUsize;

use firm_intel::config::{ClusteringConfig, MatchingConfig};
use firm_intel::model::{ClusterMap, RelationshipKind};
use firm_intel::{
  ClusterEngine, ClusterMethod, Clusterer, EngineConfig, Firm, FounderProfile, MatchRanker, Matcher,
  NoisePolicy, Orchestrator,
};

/// Firms scattered around four themes with random portfolios.
fn synthetic_firms(n: usize, dim: usize, seed: u64) -> Vec<Firm> {
  let mut rng = ChaCha8Rng::seed_from_u64(seed);
  let mut firms = Vec::with_capacity(n);

  for i in 0..n {
    let theme = i % 4;
    let embedding: Vec<f32> = (0..dim)
      .map(|d| {
        let base: f32 = if d % 4 == theme { 1.0 } else { 0.0 };
        base + rng.gen_range(-0.35f32..0.35)
      })
      .collect();

    let holdings = rng.gen_range(0..6);
    let mut portfolio = Vec::with_capacity(holdings);
    for _ in 0..holdings {
      portfolio.push(format!("co-{}", rng.gen_range(0..40)));
    }

    firms.push(Firm::new(format!("firm-{:04}", i), embedding).with_portfolio(portfolio));
  }
  firms
}

fn split(firms: &[Firm]) -> (Vec<String>, Vec<Vec<f32>>) {
  firms.iter().map(|f| (f.id.clone(), f.embedding.clone().unwrap_or_default())).unzip()
}

fn assert_partition(clusters: &ClusterMap, ids: &[String]) {
  let mut seen = BTreeSet::new();
  for members in clusters.values() {
    assert!(!members.is_empty(), "empty cluster in {:?}", clusters.keys());
    for id in members {
      assert!(seen.insert(id.clone()), "{} appears in two clusters", id);
    }
  }
  assert_eq!(seen, ids.iter().cloned().collect::<BTreeSet<_>>());
}

#[test]
fn test_partition_property_across_sizes() {
  let engine = ClusterEngine::new(ClusteringConfig::default());
  let k = NonZeroUsize::new(5).unwrap();

  // Each size lands in a different adaptive branch
  for n in [1, 2, 7, 150, 520] {
    let (ids, embeddings) = split(&synthetic_firms(n, 8, n as u64));
    let outcome = engine.cluster(&embeddings, &ids, k);

    assert!(outcome.is_complete(), "n = {}: {:?}", n, outcome.status);
    assert_partition(&outcome.value, &ids);
  }
}

#[test]
fn test_partition_property_for_explicit_methods() {
  let (ids, embeddings) = split(&synthetic_firms(60, 6, 11));
  let k = NonZeroUsize::new(4).unwrap();

  let methods = [
    ClusterMethod::KMeans,
    ClusterMethod::Density,
    ClusterMethod::Hierarchical,
    ClusterMethod::Ensemble,
  ];

  for method in methods {
    for noise_policy in [NoisePolicy::MergeNearest, NoisePolicy::OwnCluster] {
      let config = ClusteringConfig { method, noise_policy, ..Default::default() };
      let outcome = ClusterEngine::new(config).cluster(&embeddings, &ids, k);
      assert!(outcome.is_complete(), "{}: {:?}", method, outcome.status);
      assert_partition(&outcome.value, &ids);
    }
  }
}

#[test]
fn test_k_hint_is_capped_by_firm_count() {
  let (ids, embeddings) = split(&synthetic_firms(3, 4, 5));
  let config = ClusteringConfig { method: ClusterMethod::KMeans, ..Default::default() };
  let k = NonZeroUsize::new(50).unwrap();
  let outcome = ClusterEngine::new(config).cluster(&embeddings, &ids, k);

  assert!(outcome.is_complete());
  assert!(outcome.value.len() <= 3);
  assert_partition(&outcome.value, &ids);
}

#[test]
fn test_relationships_are_symmetric_and_unique() {
  let firms = synthetic_firms(25, 6, 3);
  let founder = FounderProfile::new(firms[0].embedding.clone().unwrap_or_default(), "");
  let report = Orchestrator::new(EngineConfig::default()).unwrap().run(&firms, &founder).unwrap();
  let table = report.relationship_table();

  assert_eq!(table.len(), 25 * 24 / 2);

  let mut pairs = BTreeSet::new();
  for record in table.records() {
    assert!(record.firm_a < record.firm_b);
    assert!(pairs.insert((record.firm_a.clone(), record.firm_b.clone())));

    let reversed = table.get(&record.firm_b, &record.firm_a).unwrap();
    assert_eq!(reversed.jaccard, record.jaccard);
    assert_eq!(reversed.cosine, record.cosine);
    assert!((-1.0..=1.0).contains(&record.cosine));
    assert!((0.0..=1.0).contains(&record.jaccard));
  }
}

#[test]
fn test_zero_overlap_is_no_relationship() {
  let firms = synthetic_firms(30, 4, 9);
  let founder = FounderProfile::new(vec![1.0, 0.0, 0.0, 0.0], "");
  let report = Orchestrator::new(EngineConfig::default()).unwrap().run(&firms, &founder).unwrap();

  let mut zero_overlap_pairs = 0;
  for record in &report.relationships.value {
    if record.shared_count == 0 {
      zero_overlap_pairs += 1;
      assert_eq!(record.jaccard, 0.0);
      assert_eq!(record.kind, RelationshipKind::NoRelationship);
    } else {
      assert_ne!(record.kind, RelationshipKind::NoRelationship);
    }
  }
  assert!(zero_overlap_pairs > 0);
}

#[test]
fn test_match_ranking_order() {
  let firms = synthetic_firms(40, 5, 21);
  let (ids, embeddings) = split(&firms);
  let ranker = MatchRanker::new(MatchingConfig { top_k: 40 });
  let outcome = ranker.rank(&[0.3, 1.0, 0.0, 0.2, 0.0], &embeddings, &ids, &ClusterMap::new());

  assert_eq!(outcome.value.len(), 40);
  for pair in outcome.value.windows(2) {
    assert!(
      pair[0].score > pair[1].score
        || (pair[0].score == pair[1].score && pair[0].firm_id < pair[1].firm_id)
    );
  }
}

#[test]
fn test_gap_ordering_and_length() {
  let firms = synthetic_firms(40, 5, 33);
  let founder = FounderProfile::new(vec![1.0, 0.0, 0.0, 0.0, 0.0], "");
  let mut config = EngineConfig::default();
  config.gaps.bottom_n = 2;
  let report = Orchestrator::new(config).unwrap().run(&firms, &founder).unwrap();

  let defined = report.centroids.values().filter(|c| c.is_some()).count();
  assert_eq!(report.gaps.value.len(), defined.min(2));
  assert!(report.gaps.value.windows(2).all(|w| w[0].score <= w[1].score));
}

#[test]
fn test_pipeline_is_idempotent() {
  // Quality-checked k-means band and majority-vote band
  for (n, seed) in [(150, 77), (520, 91)] {
    let firms = synthetic_firms(n, 8, seed);
    let founder = FounderProfile::new(firms[3].embedding.clone().unwrap_or_default(), "");
    let orchestrator = Orchestrator::new(EngineConfig::default()).unwrap();

    let first = orchestrator.run(&firms, &founder).unwrap();
    let second = orchestrator.run(&firms, &founder).unwrap();

    assert!(first.clusters.is_complete(), "n = {}: {:?}", n, first.clusters.status);
    assert_eq!(first.clusters, second.clusters, "n = {}", n);
    assert_eq!(first.relationships, second.relationships, "n = {}", n);
    assert_eq!(first, second, "n = {}", n);

    // A fresh orchestrator reproduces the same run
    let fresh = Orchestrator::new(EngineConfig::default()).unwrap().run(&firms, &founder).unwrap();
    assert_eq!(first.clusters, fresh.clusters, "n = {}", n);
  }
}
