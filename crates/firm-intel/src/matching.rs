//! Founder-to-firm ranking.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::cluster::membership;
use crate::config::MatchingConfig;
use crate::error::{EngineError, EngineResult};
use crate::model::{ClusterMap, CompanyMatch, FirmId, MatchResult};
use crate::outcome::Outcome;
use crate::similarity::{cosine_against_rows, is_usable, stack_rows};

/// Ranks firms by similarity to a founder embedding.
#[cfg_attr(test, mockall::automock)]
pub trait Matcher: Send + Sync {
  /// `founder` may be empty when the founder has no embedding.
  fn rank(
    &self,
    founder: &[f32],
    embeddings: &[Vec<f32>],
    ids: &[FirmId],
    clusters: &ClusterMap,
  ) -> Outcome<Vec<MatchResult>>;
}

#[derive(Debug, Clone)]
pub struct MatchRanker {
  top_k: usize,
}

impl MatchRanker {
  pub fn new(config: MatchingConfig) -> Self {
    Self { top_k: config.top_k }
  }
}

/// Descending score, ascending id on ties.
fn by_score_desc(a: (&str, f32), b: (&str, f32)) -> Ordering {
  b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0))
}

/// Cosine of `founder` against each candidate, best `top_k` first.
/// Candidates whose dimension differs from the founder's are skipped; an
/// error when that leaves nothing to compare.
fn rank_candidates<'a>(
  founder: &[f32],
  candidates: impl Iterator<Item = (&'a str, &'a [f32])>,
  top_k: usize,
) -> EngineResult<Vec<(&'a str, f32)>> {
  let (names, rows): (Vec<&str>, Vec<&[f32]>) = candidates
    .filter(|(name, vector)| {
      if vector.len() == founder.len() {
        true
      } else {
        warn!(
          candidate = *name,
          found = vector.len(),
          expected = founder.len(),
          "skipping candidate with mismatched dimension"
        );
        false
      }
    })
    .unzip();

  if rows.is_empty() {
    return Err(EngineError::data(format!(
      "no candidate has the founder's dimension {}",
      founder.len()
    )));
  }

  let scores = cosine_against_rows(founder, &stack_rows(&rows)?);
  let mut ranked: Vec<(&str, f32)> = names.into_iter().zip(scores.iter().copied()).collect();
  ranked.sort_by(|a, b| by_score_desc(*a, *b));
  ranked.truncate(top_k);
  Ok(ranked)
}

impl Matcher for MatchRanker {
  fn rank(
    &self,
    founder: &[f32],
    embeddings: &[Vec<f32>],
    ids: &[FirmId],
    clusters: &ClusterMap,
  ) -> Outcome<Vec<MatchResult>> {
    if ids.is_empty() {
      return Outcome::no_data("no firms to rank");
    }
    if !is_usable(founder) {
      return Outcome::no_data("founder embedding is missing or zero");
    }
    if embeddings.len() != ids.len() {
      let reason = format!("{} embeddings for {} firms", embeddings.len(), ids.len());
      warn!(reason = %reason, "firm ranking failed");
      return Outcome::degraded(Vec::new(), reason);
    }

    let cluster_of = membership(clusters);
    let candidates = ids.iter().zip(embeddings).map(|(id, e)| (id.as_str(), e.as_slice()));

    match rank_candidates(founder, candidates, self.top_k) {
      Ok(ranked) => {
        debug!(ranked = ranked.len(), top_k = self.top_k, "firms ranked");
        Outcome::complete(
          ranked
            .into_iter()
            .map(|(id, score)| MatchResult {
              firm_id: id.to_string(),
              score,
              cluster_id: cluster_of.get(id).copied(),
            })
            .collect(),
        )
      }
      Err(e) => {
        warn!(error = %e, "firm ranking failed");
        Outcome::degraded(Vec::new(), e.to_string())
      }
    }
  }
}

/// Ranks portfolio companies against the founder and lists the firms backing each.
#[derive(Debug, Clone)]
pub struct SimilarCompanyFinder {
  top_k: usize,
}

impl SimilarCompanyFinder {
  pub fn new(config: MatchingConfig) -> Self {
    Self { top_k: config.top_k }
  }

  pub fn find(
    &self,
    founder: &[f32],
    company_embeddings: &BTreeMap<String, Vec<f32>>,
    backers: &BTreeMap<String, Vec<FirmId>>,
  ) -> Outcome<Vec<CompanyMatch>> {
    if company_embeddings.is_empty() {
      return Outcome::no_data("no portfolio company embeddings");
    }
    if !is_usable(founder) {
      return Outcome::no_data("founder embedding is missing or zero");
    }

    let candidates = company_embeddings.iter().map(|(name, e)| (name.as_str(), e.as_slice()));
    match rank_candidates(founder, candidates, self.top_k) {
      Ok(ranked) => Outcome::complete(
        ranked
          .into_iter()
          .map(|(company, score)| CompanyMatch {
            company: company.to_string(),
            score,
            invested_firms: backers.get(company).cloned().unwrap_or_default(),
          })
          .collect(),
      ),
      Err(e) => {
        warn!(error = %e, "company ranking failed");
        Outcome::degraded(Vec::new(), e.to_string())
      }
    }
  }
}
