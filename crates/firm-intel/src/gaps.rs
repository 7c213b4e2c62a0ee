//! White-space detection: the cluster themes least similar to a founder.

use tracing::{debug, warn};

use crate::config::GapConfig;
use crate::model::{Centroids, ClusterId, GapInsight};
use crate::outcome::Outcome;
use crate::similarity::{cosine_against_rows, is_usable, stack_rows};

#[cfg_attr(test, mockall::automock)]
pub trait GapDetector: Send + Sync {
  fn detect(&self, founder: &[f32], centroids: &Centroids) -> Outcome<Vec<GapInsight>>;
}

#[derive(Debug, Clone)]
pub struct CentroidGapDetector {
  bottom_n: usize,
}

impl CentroidGapDetector {
  pub fn new(config: GapConfig) -> Self {
    Self { bottom_n: config.bottom_n }
  }
}

pub fn rationale(score: f32) -> String {
  format!("underserved theme, similarity {:.3}", score)
}

impl GapDetector for CentroidGapDetector {
  fn detect(&self, founder: &[f32], centroids: &Centroids) -> Outcome<Vec<GapInsight>> {
    if !is_usable(founder) {
      return Outcome::no_data("founder embedding is missing or zero");
    }

    // Clusters without a centroid have no theme to compare against
    let defined: Vec<(ClusterId, &[f32])> = centroids
      .iter()
      .filter_map(|(id, centroid)| centroid.as_deref().map(|c| (*id, c)))
      .filter(|(id, centroid)| {
        let fits = centroid.len() == founder.len();
        if !fits {
          warn!(cluster = id, "skipping centroid with mismatched dimension");
        }
        fits
      })
      .collect();

    if defined.is_empty() {
      return Outcome::no_data("no clusters with a defined centroid");
    }

    let rows: Vec<&[f32]> = defined.iter().map(|(_, c)| *c).collect();
    let matrix = match stack_rows(&rows) {
      Ok(matrix) => matrix,
      Err(e) => {
        warn!(error = %e, "gap detection failed");
        return Outcome::degraded(Vec::new(), e.to_string());
      }
    };
    let scores = cosine_against_rows(founder, &matrix);

    let mut ranked: Vec<(ClusterId, f32)> =
      defined.iter().map(|(id, _)| *id).zip(scores.iter().copied()).collect();
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
    ranked.truncate(self.bottom_n);

    debug!(clusters = defined.len(), gaps = ranked.len(), "gaps detected");
    Outcome::complete(
      ranked
        .into_iter()
        .map(|(cluster_id, score)| GapInsight { cluster_id, score, rationale: rationale(score) })
        .collect(),
    )
  }
}
