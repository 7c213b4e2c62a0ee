//! Sequencing of the engine stages.
//!
//! cluster embeddings -> centroids -> relationship table -> founder matches -> gaps
//!
//! Configuration and caller-supplied dimension errors are rejected before any
//! stage runs. After that the run always produces a complete report: a stage
//! that cannot run is marked skipped, and later stages see its empty value.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

use crate::cluster::{cluster_records, compute_centroids, ClusterEngine, Clusterer};
use crate::config::EngineConfig;
use crate::error::ConfigError;
use crate::gaps::{CentroidGapDetector, GapDetector};
use crate::matching::{MatchRanker, Matcher, SimilarCompanyFinder};
use crate::model::{
  invert_portfolios, Centroids, Cluster, ClusterMap, CompanyMatch, Firm, FirmId, FounderProfile,
  GapInsight, MatchResult, RelationshipRecord,
};
use crate::outcome::{Outcome, Status};
use crate::relationships::{RelationshipAnalyzer, RelationshipGraphBuilder, RelationshipTable};
use crate::similarity::is_usable;

/// Everything one run needs, as read from a JSON snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
  pub firms: Vec<Firm>,
  #[serde(default)]
  pub founder: FounderProfile,
  /// Portfolio company embeddings, for similar-company lookup.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub company_embeddings: BTreeMap<String, Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
  pub clusters: Outcome<ClusterMap>,
  pub centroids: Centroids,
  pub cluster_records: Vec<Cluster>,
  pub relationships: Outcome<Vec<RelationshipRecord>>,
  pub matches: Outcome<Vec<MatchResult>>,
  pub gaps: Outcome<Vec<GapInsight>>,
  pub similar_companies: Outcome<Vec<CompanyMatch>>,
}

impl PipelineReport {
  /// A report where clustering had nothing to work with and nothing else ran.
  fn empty(reason: &str) -> Self {
    let skipped = format!("skipped: {}", reason);
    Self {
      clusters: Outcome::no_data(reason),
      centroids: Centroids::new(),
      cluster_records: Vec::new(),
      relationships: Outcome::skipped(skipped.clone()),
      matches: Outcome::skipped(skipped.clone()),
      gaps: Outcome::skipped(skipped.clone()),
      similar_companies: Outcome::skipped(skipped),
    }
  }

  pub fn relationship_table(&self) -> RelationshipTable {
    RelationshipTable::new(self.relationships.value.clone())
  }

  pub fn stages(&self) -> Vec<(&'static str, &Status)> {
    vec![
      ("clusters", &self.clusters.status),
      ("relationships", &self.relationships.status),
      ("matches", &self.matches.status),
      ("gaps", &self.gaps.status),
      ("similar companies", &self.similar_companies.status),
    ]
  }
}

pub struct Orchestrator {
  config: EngineConfig,
  clusterer: Box<dyn Clusterer>,
  analyzer: Box<dyn RelationshipAnalyzer>,
  matcher: Box<dyn Matcher>,
  gap_detector: Box<dyn GapDetector>,
  company_finder: SimilarCompanyFinder,
}

impl Orchestrator {
  /// Build the default components from a validated configuration.
  pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
    config.validate()?;
    Ok(Self::with_components(
      config.clone(),
      Box::new(ClusterEngine::new(config.clustering.clone())),
      Box::new(RelationshipGraphBuilder::new(config.relationships.clone())),
      Box::new(MatchRanker::new(config.matching.clone())),
      Box::new(CentroidGapDetector::new(config.gaps.clone())),
    ))
  }

  pub fn with_components(
    config: EngineConfig,
    clusterer: Box<dyn Clusterer>,
    analyzer: Box<dyn RelationshipAnalyzer>,
    matcher: Box<dyn Matcher>,
    gap_detector: Box<dyn GapDetector>,
  ) -> Self {
    let company_finder = SimilarCompanyFinder::new(config.matching.clone());
    Self { config, clusterer, analyzer, matcher, gap_detector, company_finder }
  }

  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  pub fn run(
    &self,
    firms: &[Firm],
    founder: &FounderProfile,
  ) -> Result<PipelineReport, ConfigError> {
    self.run_with_companies(firms, founder, &BTreeMap::new())
  }

  pub fn run_snapshot(&self, snapshot: &Snapshot) -> Result<PipelineReport, ConfigError> {
    self.run_with_companies(&snapshot.firms, &snapshot.founder, &snapshot.company_embeddings)
  }

  pub fn run_with_companies(
    &self,
    firms: &[Firm],
    founder: &FounderProfile,
    company_embeddings: &BTreeMap<String, Vec<f32>>,
  ) -> Result<PipelineReport, ConfigError> {
    let k_hint = self.config.clustering.k_hint()?;
    validate_input(firms, founder)?;

    if firms.is_empty() {
      info!("no firms supplied, returning an empty report");
      return Ok(PipelineReport::empty("no firms supplied"));
    }

    let (ids, embeddings): (Vec<FirmId>, Vec<Vec<f32>>) = firms
      .iter()
      .filter_map(|f| {
        f.embedding.as_ref().filter(|e| !e.is_empty()).map(|e| (f.id.clone(), e.clone()))
      })
      .unzip();

    if ids.is_empty() {
      warn!(firms = firms.len(), "no firm has an embedding, returning an empty report");
      return Ok(PipelineReport::empty("no firm embeddings available"));
    }

    info!(firms = firms.len(), embedded = ids.len(), "running pipeline");

    // Stage 1: clusters
    let mut clusters = self.clusterer.cluster(&embeddings, &ids, k_hint);
    if clusters.value.is_empty() {
      warn!(status = clusters.status.label(), "clustering produced no clusters");
      let reason =
        clusters.status.reason().unwrap_or("clustering produced no clusters").to_string();
      let mut report = PipelineReport::empty(&reason);
      report.clusters = clusters;
      return Ok(report);
    }
    attach_unembedded(&mut clusters.value, firms, &ids);

    // Stage 2: centroids
    let embedding_of: BTreeMap<FirmId, Vec<f32>> =
      ids.iter().cloned().zip(embeddings.iter().cloned()).collect();
    let centroids = compute_centroids(&clusters.value, &embedding_of);
    let cluster_records = cluster_records(&clusters.value, &centroids);

    // Stage 3: relationships, unless the founder already makes the run moot
    let founder_vector: &[f32] = founder.embedding.as_deref().unwrap_or(&[]);
    let founder_usable = is_usable(founder_vector);

    let relationships = if !founder_usable && self.config.pipeline.abort_on_degenerate_founder {
      info!("founder embedding is missing or zero, skipping relationship analysis");
      Outcome::skipped("founder embedding is missing or zero")
    } else {
      let portfolios: BTreeMap<FirmId, BTreeSet<String>> =
        firms.iter().map(|f| (f.id.clone(), f.portfolio.clone())).collect();
      self.analyzer.analyze(&portfolios, &embedding_of)
    };

    // Stage 4 and 5: founder matching and gaps
    let matches = self.matcher.rank(founder_vector, &embeddings, &ids, &clusters.value);
    let gaps = self.gap_detector.detect(founder_vector, &centroids);
    let similar_companies =
      self.company_finder.find(founder_vector, company_embeddings, &invert_portfolios(firms));

    let report = PipelineReport {
      clusters,
      centroids,
      cluster_records,
      relationships,
      matches,
      gaps,
      similar_companies,
    };

    for (stage, status) in report.stages() {
      match status {
        Status::Complete => info!(stage, "stage complete"),
        other => warn!(
          stage,
          status = other.label(),
          reason = other.reason().unwrap_or(""),
          "stage incomplete"
        ),
      }
    }

    Ok(report)
  }
}

/// Reject duplicate ids and embeddings whose dimension differs from the first one seen.
fn validate_input(firms: &[Firm], founder: &FounderProfile) -> Result<(), ConfigError> {
  let mut seen = BTreeSet::new();
  let mut expected: Option<usize> = None;

  for firm in firms {
    if !seen.insert(firm.id.as_str()) {
      return Err(ConfigError::invalid_value(
        "firms",
        format!("duplicate firm id '{}'", firm.id),
      ));
    }
    if let Some(embedding) = firm.embedding.as_ref().filter(|e| !e.is_empty()) {
      match expected {
        None => expected = Some(embedding.len()),
        Some(dim) if dim != embedding.len() => {
          return Err(ConfigError::dimension_mismatch(&firm.id, dim, embedding.len()));
        }
        Some(_) => {}
      }
    }
  }

  if let (Some(dim), Some(embedding)) = (expected, founder.embedding.as_ref()) {
    if !embedding.is_empty() && embedding.len() != dim {
      return Err(ConfigError::dimension_mismatch("founder", dim, embedding.len()));
    }
  }

  Ok(())
}

/// Firms without an embedding cannot be clustered; they share one extra
/// cluster, which has no centroid.
fn attach_unembedded(clusters: &mut ClusterMap, firms: &[Firm], embedded: &[FirmId]) {
  let embedded: BTreeSet<&str> = embedded.iter().map(|id| id.as_str()).collect();
  let missing: Vec<FirmId> =
    firms.iter().filter(|f| !embedded.contains(f.id.as_str())).map(|f| f.id.clone()).collect();

  if missing.is_empty() {
    return;
  }

  let next = clusters.keys().next_back().map_or(0, |last| last + 1);
  warn!(firms = missing.len(), cluster = next, "firms without embeddings grouped separately");
  clusters.insert(next, missing);
}
