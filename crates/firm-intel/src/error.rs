use thiserror::Error;

/// Programmer errors that are rejected before any processing begins.
#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("Unknown clustering method '{name}' (expected adaptive, kmeans, density, hierarchical or ensemble)")]
  UnknownMethod { name: String },

  #[error("Unknown noise policy '{name}' (expected merge_nearest or own_cluster)")]
  UnknownNoisePolicy { name: String },

  #[error("Cluster count must be greater than zero")]
  ZeroClusterCount,

  #[error("Invalid value for {field}: {reason}")]
  InvalidValue { field: String, reason: String },

  #[error("Embedding for '{id}' has dimension {found}, expected {expected}")]
  DimensionMismatch { id: String, expected: usize, found: usize },

  #[error("Failed to read configuration: {0}")]
  Io(#[from] std::io::Error),

  #[error("Failed to parse JSON configuration: {0}")]
  Json(#[from] serde_json::Error),

  #[error("Failed to parse YAML configuration: {0}")]
  Yaml(#[from] serde_yaml::Error),
}

impl ConfigError {
  pub fn unknown_method(name: impl Into<String>) -> Self {
    Self::UnknownMethod { name: name.into() }
  }

  pub fn unknown_noise_policy(name: impl Into<String>) -> Self {
    Self::UnknownNoisePolicy { name: name.into() }
  }

  pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
    Self::InvalidValue { field: field.into(), reason: reason.into() }
  }

  pub fn dimension_mismatch(id: impl Into<String>, expected: usize, found: usize) -> Self {
    Self::DimensionMismatch { id: id.into(), expected, found }
  }
}

/// Failures inside a clustering or similarity routine.
///
/// These are caught where the routine is called and turned into a degraded
/// stage outcome; they never reach the caller of the pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
  #[error("Malformed embedding data: {message}")]
  Data { message: String },

  #[error("Degenerate input: {message}")]
  Degenerate { message: String },

  #[error("Computation failed: {message}")]
  Computation { message: String },
}

impl EngineError {
  pub fn data(message: impl Into<String>) -> Self {
    Self::Data { message: message.into() }
  }

  pub fn degenerate(message: impl Into<String>) -> Self {
    Self::Degenerate { message: message.into() }
  }

  pub fn computation(message: impl Into<String>) -> Self {
    Self::Computation { message: message.into() }
  }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
