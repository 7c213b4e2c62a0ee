//! Vector and set similarity math.
//!
//! Pairwise work goes through `ndarray` matrix products rather than one call
//! per pair: rows are stacked once, L2-normalised once, and every cosine or
//! distance comes out of a single Gram matrix.

use ndarray::{Array1, Array2, Axis};
use std::collections::BTreeSet;

use crate::error::{EngineError, EngineResult};

/// Calculate cosine similarity between two embeddings
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
  if a.len() != b.len() {
    return 0.0;
  }

  let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
  let magnitude_a = l2_norm(a);
  let magnitude_b = l2_norm(b);

  if magnitude_a == 0.0 || magnitude_b == 0.0 {
    0.0
  } else {
    dot_product / (magnitude_a * magnitude_b)
  }
}

pub fn l2_norm(v: &[f32]) -> f32 {
  v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// A vector can be ranked against when it is non-empty, finite and nonzero.
pub fn is_usable(v: &[f32]) -> bool {
  !v.is_empty() && v.iter().all(|x| x.is_finite()) && l2_norm(v) > 0.0
}

/// Portfolio overlap between two firms.
#[derive(Debug, Clone, PartialEq)]
pub struct Overlap {
  pub jaccard: f32,
  /// Shared companies in sorted order.
  pub shared: Vec<String>,
  pub a_unique: usize,
  pub b_unique: usize,
}

/// Jaccard similarity (intersection over union). Two empty sets score 0.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f32 {
  overlap(a, b).jaccard
}

pub fn overlap(a: &BTreeSet<String>, b: &BTreeSet<String>) -> Overlap {
  let shared: Vec<String> = a.intersection(b).cloned().collect();
  let union = a.len() + b.len() - shared.len();
  let jaccard = if union == 0 || shared.is_empty() {
    0.0
  } else {
    shared.len() as f32 / union as f32
  };

  Overlap {
    jaccard,
    a_unique: a.len() - shared.len(),
    b_unique: b.len() - shared.len(),
    shared,
  }
}

/// Stack equally sized rows into a matrix, rejecting ragged or non-finite input.
pub fn stack_rows(rows: &[&[f32]]) -> EngineResult<Array2<f32>> {
  let dim = rows.first().map(|r| r.len()).unwrap_or(0);
  let mut flat = Vec::with_capacity(rows.len() * dim);

  for (i, row) in rows.iter().enumerate() {
    if row.len() != dim {
      return Err(EngineError::data(format!(
        "row {} has dimension {}, expected {}",
        i,
        row.len(),
        dim
      )));
    }
    if row.iter().any(|x| !x.is_finite()) {
      return Err(EngineError::data(format!("row {} contains non-finite values", i)));
    }
    flat.extend_from_slice(row);
  }

  Array2::from_shape_vec((rows.len(), dim), flat)
    .map_err(|e| EngineError::computation(format!("failed to shape matrix: {}", e)))
}

/// Scale every row to unit length. Zero rows stay zero, so they score 0 against everything.
pub fn normalize_rows(matrix: &mut Array2<f32>) {
  for mut row in matrix.rows_mut() {
    let norm = row.dot(&row).sqrt();
    if norm > 0.0 {
      row.mapv_inplace(|x| x / norm);
    }
  }
}

/// All-pairs cosine similarity as one matrix product.
pub fn cosine_matrix(rows: &Array2<f32>) -> Array2<f32> {
  let mut normalized = rows.clone();
  normalize_rows(&mut normalized);
  normalized.dot(&normalized.t())
}

/// Cosine similarity of one query against every row.
pub fn cosine_against_rows(query: &[f32], rows: &Array2<f32>) -> Array1<f32> {
  let query_norm = l2_norm(query);
  if rows.ncols() != query.len() || query_norm == 0.0 {
    return Array1::zeros(rows.nrows());
  }

  let mut normalized = rows.clone();
  normalize_rows(&mut normalized);
  let q = Array1::from_iter(query.iter().map(|x| x / query_norm));
  normalized.dot(&q)
}

/// Pairwise Euclidean distances derived from the Gram matrix.
pub fn euclidean_distance_matrix(points: &Array2<f32>) -> Array2<f32> {
  let gram = points.dot(&points.t());
  let squared_norms = gram.diag().to_owned();
  let n = points.nrows();

  let mut distances = Array2::<f32>::zeros((n, n));
  for i in 0..n {
    for j in (i + 1)..n {
      let squared = (squared_norms[i] + squared_norms[j] - 2.0 * gram[[i, j]]).max(0.0);
      let d = squared.sqrt();
      distances[[i, j]] = d;
      distances[[j, i]] = d;
    }
  }
  distances
}

pub fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
  a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Arithmetic mean of the given rows of `points`. `None` when no rows are given.
pub fn mean_of_rows(points: &Array2<f32>, rows: &[usize]) -> Option<Vec<f32>> {
  if rows.is_empty() {
    return None;
  }

  let mut acc = Array1::<f32>::zeros(points.ncols());
  for &r in rows {
    acc += &points.index_axis(Axis(0), r);
  }
  acc /= rows.len() as f32;
  Some(acc.to_vec())
}
