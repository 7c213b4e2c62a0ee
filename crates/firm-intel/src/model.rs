use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub type FirmId = String;
pub type ClusterId = usize;

/// Cluster id to member firm ids, in input order.
pub type ClusterMap = BTreeMap<ClusterId, Vec<FirmId>>;

/// Cluster id to centroid. `None` marks a cluster whose centroid is undefined
/// because no member contributed an embedding.
pub type Centroids = BTreeMap<ClusterId, Option<Vec<f32>>>;

/// A venture firm as handed over by ingestion. Immutable for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Firm {
  pub id: FirmId,
  #[serde(default)]
  pub embedding: Option<Vec<f32>>,
  #[serde(default)]
  pub portfolio: BTreeSet<String>,
  /// Opaque to this crate; consumed by external description generators.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub summary: Option<String>,
}

impl Firm {
  pub fn new(id: impl Into<String>, embedding: Vec<f32>) -> Self {
    Self { id: id.into(), embedding: Some(embedding), portfolio: BTreeSet::new(), summary: None }
  }

  pub fn with_portfolio<I, S>(mut self, companies: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.portfolio = companies.into_iter().map(Into::into).collect();
    self
  }

  pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
    self.summary = Some(summary.into());
    self
  }

  pub fn has_embedding(&self) -> bool {
    self.embedding.as_ref().is_some_and(|e| !e.is_empty())
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FounderProfile {
  #[serde(default)]
  pub embedding: Option<Vec<f32>>,
  #[serde(default)]
  pub summary: String,
}

impl FounderProfile {
  pub fn new(embedding: Vec<f32>, summary: impl Into<String>) -> Self {
    Self { embedding: Some(embedding), summary: summary.into() }
  }
}

/// A cluster with its members and centroid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
  pub id: ClusterId,
  pub members: Vec<FirmId>,
  pub centroid: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationshipKind {
  #[serde(rename = "Strong Collaborators")]
  StrongCollaborators,
  #[serde(rename = "Occasional Co-Investors")]
  OccasionalCoInvestors,
  #[serde(rename = "Loose Competitors")]
  LooseCompetitors,
  #[serde(rename = "No Significant Overlap")]
  NoSignificantOverlap,
  #[serde(rename = "No Relationship")]
  NoRelationship,
}

impl RelationshipKind {
  /// Classify a pair from its portfolio overlap.
  ///
  /// Zero shared companies is always "No Relationship"; a small but nonzero
  /// overlap is "No Significant Overlap".
  pub fn classify(jaccard: f32, shared_count: usize) -> Self {
    if shared_count == 0 {
      RelationshipKind::NoRelationship
    } else if jaccard > 0.30 {
      RelationshipKind::StrongCollaborators
    } else if jaccard > 0.15 {
      RelationshipKind::OccasionalCoInvestors
    } else if jaccard > 0.05 {
      RelationshipKind::LooseCompetitors
    } else {
      RelationshipKind::NoSignificantOverlap
    }
  }

  pub fn label(&self) -> &'static str {
    match self {
      RelationshipKind::StrongCollaborators => "Strong Collaborators",
      RelationshipKind::OccasionalCoInvestors => "Occasional Co-Investors",
      RelationshipKind::LooseCompetitors => "Loose Competitors",
      RelationshipKind::NoSignificantOverlap => "No Significant Overlap",
      RelationshipKind::NoRelationship => "No Relationship",
    }
  }
}

impl fmt::Display for RelationshipKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.label())
  }
}

/// One unordered firm pair; `firm_a < firm_b`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipRecord {
  pub firm_a: FirmId,
  pub firm_b: FirmId,
  pub jaccard: f32,
  pub cosine: f32,
  pub kind: RelationshipKind,
  pub shared_companies: Vec<String>,
  /// More shared companies exist than `shared_companies` holds.
  pub more_shared: bool,
  pub shared_count: usize,
  pub a_unique: usize,
  pub b_unique: usize,
}

impl RelationshipRecord {
  pub fn involves(&self, firm: &str) -> bool {
    self.firm_a == firm || self.firm_b == firm
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
  pub firm_id: FirmId,
  pub score: f32,
  pub cluster_id: Option<ClusterId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapInsight {
  pub cluster_id: ClusterId,
  pub score: f32,
  pub rationale: String,
}

/// A portfolio company ranked against the founder, with the firms backing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyMatch {
  pub company: String,
  pub score: f32,
  pub invested_firms: Vec<FirmId>,
}

/// Reverse the firm to portfolio mapping into company to investing firms.
pub fn invert_portfolios<'a, I>(firms: I) -> BTreeMap<String, Vec<FirmId>>
where
  I: IntoIterator<Item = &'a Firm>,
{
  let mut index: BTreeMap<String, Vec<FirmId>> = BTreeMap::new();
  for firm in firms {
    for company in &firm.portfolio {
      index.entry(company.clone()).or_default().push(firm.id.clone());
    }
  }
  for backers in index.values_mut() {
    backers.sort();
    backers.dedup();
  }
  index
}
