//! Pairwise firm relationships from portfolio overlap and embedding similarity.
//!
//! Cosine similarity for every pair comes out of one matrix product; the
//! per-pair work left is the set intersection. Rows of the pair triangle are
//! built in parallel and collected in order, so the output never depends on
//! scheduling.

use ndarray::Array2;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::config::RelationshipConfig;
use crate::error::EngineResult;
use crate::model::{FirmId, RelationshipKind, RelationshipRecord};
use crate::outcome::Outcome;
use crate::similarity::{cosine_matrix, overlap, stack_rows};

/// Builds relationship records for every unordered firm pair.
#[cfg_attr(test, mockall::automock)]
pub trait RelationshipAnalyzer: Send + Sync {
  fn analyze(
    &self,
    portfolios: &BTreeMap<FirmId, BTreeSet<String>>,
    embeddings: &BTreeMap<FirmId, Vec<f32>>,
  ) -> Outcome<Vec<RelationshipRecord>>;
}

#[derive(Debug, Clone)]
pub struct RelationshipGraphBuilder {
  shared_company_cap: usize,
}

impl RelationshipGraphBuilder {
  pub fn new(config: RelationshipConfig) -> Self {
    Self { shared_company_cap: config.shared_company_cap }
  }

  fn build(
    &self,
    portfolios: &BTreeMap<FirmId, BTreeSet<String>>,
    embeddings: &BTreeMap<FirmId, Vec<f32>>,
  ) -> EngineResult<Vec<RelationshipRecord>> {
    let ids: Vec<&FirmId> = portfolios.keys().collect();
    let n = ids.len();

    // Matrix row for each firm that has an embedding
    let mut rows: Vec<&[f32]> = Vec::new();
    let row_of: Vec<Option<usize>> = ids
      .iter()
      .map(|id| {
        embeddings.get(*id).filter(|e| !e.is_empty()).map(|e| {
          rows.push(e.as_slice());
          rows.len() - 1
        })
      })
      .collect();

    let missing = row_of.iter().filter(|r| r.is_none()).count();
    if missing > 0 {
      warn!(missing, "firms without embeddings score cosine 0 against every other firm");
    }

    let similarities =
      if rows.is_empty() { Array2::zeros((0, 0)) } else { cosine_matrix(&stack_rows(&rows)?) };

    let records: Vec<RelationshipRecord> = (0..n)
      .into_par_iter()
      .flat_map_iter(|i| {
        let ids = &ids;
        let row_of = &row_of;
        let similarities = &similarities;
        ((i + 1)..n).map(move |j| {
          let cosine = match (row_of[i], row_of[j]) {
            (Some(ri), Some(rj)) => similarities[[ri, rj]].clamp(-1.0, 1.0),
            _ => 0.0,
          };
          self.record(ids[i], ids[j], &portfolios[ids[i]], &portfolios[ids[j]], cosine)
        })
      })
      .collect();

    Ok(records)
  }

  fn record(
    &self,
    a: &FirmId,
    b: &FirmId,
    portfolio_a: &BTreeSet<String>,
    portfolio_b: &BTreeSet<String>,
    cosine: f32,
  ) -> RelationshipRecord {
    let mut shared = overlap(portfolio_a, portfolio_b);
    let shared_count = shared.shared.len();
    shared.shared.truncate(self.shared_company_cap);

    RelationshipRecord {
      firm_a: a.clone(),
      firm_b: b.clone(),
      jaccard: shared.jaccard,
      cosine,
      kind: RelationshipKind::classify(shared.jaccard, shared_count),
      shared_companies: shared.shared,
      more_shared: shared_count > self.shared_company_cap,
      shared_count,
      a_unique: shared.a_unique,
      b_unique: shared.b_unique,
    }
  }
}

impl RelationshipAnalyzer for RelationshipGraphBuilder {
  fn analyze(
    &self,
    portfolios: &BTreeMap<FirmId, BTreeSet<String>>,
    embeddings: &BTreeMap<FirmId, Vec<f32>>,
  ) -> Outcome<Vec<RelationshipRecord>> {
    if portfolios.len() < 2 {
      return Outcome::no_data("fewer than two firms to relate");
    }

    match self.build(portfolios, embeddings) {
      Ok(records) => {
        info!(firms = portfolios.len(), pairs = records.len(), "relationship table built");
        Outcome::complete(records)
      }
      Err(e) => {
        warn!(error = %e, "relationship analysis failed, reporting no relationships");
        Outcome::degraded(Vec::new(), e.to_string())
      }
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
  Jaccard,
  Cosine,
}

/// Firms in canonical order and a symmetric score matrix over them.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityMatrix {
  pub firms: Vec<FirmId>,
  pub values: Array2<f32>,
}

/// Order-insensitive lookup over relationship records.
#[derive(Debug, Clone, Default)]
pub struct RelationshipTable {
  records: Vec<RelationshipRecord>,
  index: BTreeMap<(FirmId, FirmId), usize>,
}

fn pair_key(a: &str, b: &str) -> (FirmId, FirmId) {
  if a <= b {
    (a.to_string(), b.to_string())
  } else {
    (b.to_string(), a.to_string())
  }
}

impl RelationshipTable {
  pub fn new(records: Vec<RelationshipRecord>) -> Self {
    let index = records
      .iter()
      .enumerate()
      .map(|(i, r)| (pair_key(&r.firm_a, &r.firm_b), i))
      .collect();
    Self { records, index }
  }

  pub fn records(&self) -> &[RelationshipRecord] {
    &self.records
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }

  pub fn get(&self, a: &str, b: &str) -> Option<&RelationshipRecord> {
    self.index.get(&pair_key(a, b)).map(|&i| &self.records[i])
  }

  pub fn for_firm<'a>(&'a self, firm: &'a str) -> impl Iterator<Item = &'a RelationshipRecord> {
    self.records.iter().filter(move |r| r.involves(firm))
  }

  /// Human-readable description of one pair, named in the order asked.
  pub fn summary(&self, a: &str, b: &str) -> Option<String> {
    let record = self.get(a, b)?;

    let shared = if record.shared_companies.is_empty() {
      "none".to_string()
    } else if record.more_shared {
      format!("{}, and more", record.shared_companies.join(", "))
    } else {
      record.shared_companies.join(", ")
    };

    Some(format!(
      "{} and {} are classified as {}.\nThey share {} portfolio companies.\nShared: {}\nJaccard: {:.3} | Embedding Similarity: {:.3}",
      a, b, record.kind, record.shared_count, shared, record.jaccard, record.cosine
    ))
  }

  /// Symmetric matrix of one metric over every firm in the table; 1.0 on the diagonal.
  pub fn matrix(&self, metric: Metric) -> SimilarityMatrix {
    let firms: Vec<FirmId> = self
      .records
      .iter()
      .flat_map(|r| [r.firm_a.clone(), r.firm_b.clone()])
      .collect::<BTreeSet<_>>()
      .into_iter()
      .collect();
    let position: BTreeMap<&str, usize> =
      firms.iter().enumerate().map(|(i, f)| (f.as_str(), i)).collect();

    let mut values = Array2::<f32>::eye(firms.len());
    for record in &self.records {
      let (i, j) = (position[record.firm_a.as_str()], position[record.firm_b.as_str()]);
      let score = match metric {
        Metric::Jaccard => record.jaccard,
        Metric::Cosine => record.cosine,
      };
      values[[i, j]] = score;
      values[[j, i]] = score;
    }

    debug!(firms = firms.len(), metric = ?metric, "relationship matrix built");
    SimilarityMatrix { firms, values }
  }
}

impl From<Vec<RelationshipRecord>> for RelationshipTable {
  fn from(records: Vec<RelationshipRecord>) -> Self {
    Self::new(records)
  }
}
