//! Configuration management for the firm intelligence engine
//!
//! Handles loading, validating, and defaulting the clustering, relationship,
//! matching and gap detection settings. Validation happens before any
//! processing so bad settings fail fast instead of degrading a run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use std::path::Path;
use std::str::FromStr;

use crate::error::ConfigError;

/// Which clustering strategy the engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ClusterMethod {
  /// Pick a strategy from dataset size and partition quality.
  #[default]
  Adaptive,
  KMeans,
  Density,
  Hierarchical,
  Ensemble,
}

impl ClusterMethod {
  pub fn as_str(&self) -> &'static str {
    match self {
      ClusterMethod::Adaptive => "adaptive",
      ClusterMethod::KMeans => "kmeans",
      ClusterMethod::Density => "density",
      ClusterMethod::Hierarchical => "hierarchical",
      ClusterMethod::Ensemble => "ensemble",
    }
  }
}

impl FromStr for ClusterMethod {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "adaptive" => Ok(ClusterMethod::Adaptive),
      "kmeans" | "k-means" => Ok(ClusterMethod::KMeans),
      "density" | "hdbscan" => Ok(ClusterMethod::Density),
      "hierarchical" | "agglomerative" => Ok(ClusterMethod::Hierarchical),
      "ensemble" => Ok(ClusterMethod::Ensemble),
      _ => Err(ConfigError::unknown_method(s)),
    }
  }
}

impl TryFrom<String> for ClusterMethod {
  type Error = ConfigError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.parse()
  }
}

impl From<ClusterMethod> for String {
  fn from(method: ClusterMethod) -> Self {
    method.as_str().to_string()
  }
}

impl fmt::Display for ClusterMethod {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// What happens to points density clustering leaves unassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NoisePolicy {
  /// Follow the nearest k-means centroid into the density cluster holding
  /// most of that centroid's members. When none of its members were
  /// clustered, the noise points nearest to it form a new cluster, so this
  /// policy can still add clusters beyond the density result.
  #[default]
  MergeNearest,
  /// Collect all noise points in one extra cluster.
  OwnCluster,
}

impl NoisePolicy {
  pub fn as_str(&self) -> &'static str {
    match self {
      NoisePolicy::MergeNearest => "merge_nearest",
      NoisePolicy::OwnCluster => "own_cluster",
    }
  }
}

impl FromStr for NoisePolicy {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "merge_nearest" | "merge" => Ok(NoisePolicy::MergeNearest),
      "own_cluster" | "separate" => Ok(NoisePolicy::OwnCluster),
      _ => Err(ConfigError::unknown_noise_policy(s)),
    }
  }
}

impl TryFrom<String> for NoisePolicy {
  type Error = ConfigError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.parse()
  }
}

impl From<NoisePolicy> for String {
  fn from(policy: NoisePolicy) -> Self {
    policy.as_str().to_string()
  }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
  #[serde(default)]
  pub clustering: ClusteringConfig,
  #[serde(default)]
  pub relationships: RelationshipConfig,
  #[serde(default)]
  pub matching: MatchingConfig,
  #[serde(default)]
  pub gaps: GapConfig,
  #[serde(default)]
  pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringConfig {
  #[serde(default)]
  pub method: ClusterMethod,
  /// Requested number of partition clusters (k hint)
  #[serde(default = "default_n_clusters")]
  pub n_clusters: usize,
  /// Seed for every stochastic routine
  #[serde(default = "default_seed")]
  pub seed: u64,
  /// Silhouette score below which mid-sized datasets fall back to density clustering
  #[serde(default = "default_quality_threshold")]
  pub quality_threshold: f32,
  #[serde(default)]
  pub noise_policy: NoisePolicy,
  #[serde(default = "default_max_iterations")]
  pub max_iterations: usize,
  /// Independent k-means runs; the lowest inertia wins
  #[serde(default = "default_restarts")]
  pub restarts: usize,
  #[serde(default = "default_convergence_tolerance")]
  pub convergence_tolerance: f32,
  /// Core point neighbourhood size; defaults to the minimum cluster size
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub density_min_samples: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipConfig {
  /// Maximum shared companies stored per record
  #[serde(default = "default_shared_company_cap")]
  pub shared_company_cap: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchingConfig {
  #[serde(default = "default_top_k")]
  pub top_k: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapConfig {
  #[serde(default = "default_bottom_n")]
  pub bottom_n: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
  /// Skip the quadratic relationship stage when the founder vector is unusable
  #[serde(default = "default_abort_on_degenerate_founder")]
  pub abort_on_degenerate_founder: bool,
}

// Default value functions
fn default_n_clusters() -> usize {
  5
}
fn default_seed() -> u64 {
  42
}
fn default_quality_threshold() -> f32 {
  0.25
}
fn default_max_iterations() -> usize {
  300
}
fn default_restarts() -> usize {
  4
}
fn default_convergence_tolerance() -> f32 {
  1e-4
}
fn default_shared_company_cap() -> usize {
  5
}
fn default_top_k() -> usize {
  5
}
fn default_bottom_n() -> usize {
  3
}
fn default_abort_on_degenerate_founder() -> bool {
  true
}

impl Default for ClusteringConfig {
  fn default() -> Self {
    Self {
      method: ClusterMethod::default(),
      n_clusters: default_n_clusters(),
      seed: default_seed(),
      quality_threshold: default_quality_threshold(),
      noise_policy: NoisePolicy::default(),
      max_iterations: default_max_iterations(),
      restarts: default_restarts(),
      convergence_tolerance: default_convergence_tolerance(),
      density_min_samples: None,
    }
  }
}

impl Default for RelationshipConfig {
  fn default() -> Self {
    Self { shared_company_cap: default_shared_company_cap() }
  }
}

impl Default for MatchingConfig {
  fn default() -> Self {
    Self { top_k: default_top_k() }
  }
}

impl Default for GapConfig {
  fn default() -> Self {
    Self { bottom_n: default_bottom_n() }
  }
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self { abort_on_degenerate_founder: default_abort_on_degenerate_founder() }
  }
}

impl ClusteringConfig {
  /// The validated k hint.
  pub fn k_hint(&self) -> Result<NonZeroUsize, ConfigError> {
    NonZeroUsize::new(self.n_clusters).ok_or(ConfigError::ZeroClusterCount)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    self.k_hint()?;

    if !self.quality_threshold.is_finite() || !(-1.0..=1.0).contains(&self.quality_threshold) {
      return Err(ConfigError::invalid_value(
        "clustering.quality_threshold",
        format!("must be within [-1, 1], got {}", self.quality_threshold),
      ));
    }
    if self.max_iterations == 0 {
      return Err(ConfigError::invalid_value("clustering.max_iterations", "must be > 0"));
    }
    if self.restarts == 0 {
      return Err(ConfigError::invalid_value("clustering.restarts", "must be > 0"));
    }
    if !self.convergence_tolerance.is_finite() || self.convergence_tolerance <= 0.0 {
      return Err(ConfigError::invalid_value(
        "clustering.convergence_tolerance",
        "must be a finite positive number",
      ));
    }
    if self.density_min_samples == Some(0) {
      return Err(ConfigError::invalid_value("clustering.density_min_samples", "must be > 0"));
    }

    Ok(())
  }
}

impl EngineConfig {
  /// Load configuration from a file. `.yaml`/`.yml` files are read as YAML, everything else as JSON.
  pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;

    let config: EngineConfig = match path.extension().and_then(|e| e.to_str()) {
      Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
      _ => serde_json::from_str(&content)?,
    };

    config.validate()?;
    Ok(config)
  }

  /// Load configuration from current directory or defaults
  pub fn load() -> Result<Self, ConfigError> {
    let config_paths = [".firm-intel.json", "firm-intel.json", ".firm-intel/config.json"];

    for path in &config_paths {
      if Path::new(path).exists() {
        return Self::load_from_file(path);
      }
    }

    Ok(EngineConfig::default())
  }

  /// Save configuration to a file
  pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
    let content = serde_json::to_string_pretty(self)?;
    std::fs::write(path, content)?;
    Ok(())
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    self.clustering.validate()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use tempfile::TempDir;

  #[test]
  fn test_config_default() {
    let config = EngineConfig::default();
    assert_eq!(config.clustering.method, ClusterMethod::Adaptive);
    assert_eq!(config.clustering.n_clusters, 5);
    assert_eq!(config.clustering.seed, 42);
    assert_eq!(config.clustering.quality_threshold, 0.25);
    assert_eq!(config.clustering.noise_policy, NoisePolicy::MergeNearest);
    assert_eq!(config.relationships.shared_company_cap, 5);
    assert_eq!(config.matching.top_k, 5);
    assert_eq!(config.gaps.bottom_n, 3);
    assert!(config.pipeline.abort_on_degenerate_founder);
    assert!(config.validate().is_ok());
  }

  #[test]
  fn test_method_parsing() {
    assert_eq!("kmeans".parse::<ClusterMethod>().unwrap(), ClusterMethod::KMeans);
    assert_eq!("HDBSCAN".parse::<ClusterMethod>().unwrap(), ClusterMethod::Density);
    assert_eq!("ensemble".parse::<ClusterMethod>().unwrap(), ClusterMethod::Ensemble);

    let err = "spectral".parse::<ClusterMethod>().unwrap_err();
    assert!(matches!(err, ConfigError::UnknownMethod { .. }));
  }

  #[test]
  fn test_config_load_partial_config() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("partial.json");

    fs::write(&config_path, r#"{ "clustering": { "n_clusters": 8, "method": "kmeans" } }"#).unwrap();

    let config = EngineConfig::load_from_file(&config_path).unwrap();
    assert_eq!(config.clustering.n_clusters, 8);
    assert_eq!(config.clustering.method, ClusterMethod::KMeans);
    // Other fields should have defaults
    assert_eq!(config.clustering.seed, 42);
    assert_eq!(config.matching.top_k, 5);
  }

  #[test]
  fn test_config_load_yaml() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("engine.yaml");

    fs::write(&config_path, "gaps:\n  bottom_n: 1\nclustering:\n  noise_policy: own_cluster\n").unwrap();

    let config = EngineConfig::load_from_file(&config_path).unwrap();
    assert_eq!(config.gaps.bottom_n, 1);
    assert_eq!(config.clustering.noise_policy, NoisePolicy::OwnCluster);
  }

  #[test]
  fn test_config_rejects_unknown_method() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("bad.json");

    fs::write(&config_path, r#"{ "clustering": { "method": "spectral" } }"#).unwrap();

    let result = EngineConfig::load_from_file(&config_path);
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("spectral"));
  }

  #[test]
  fn test_config_rejects_zero_clusters() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("zero.json");

    fs::write(&config_path, r#"{ "clustering": { "n_clusters": 0 } }"#).unwrap();

    let result = EngineConfig::load_from_file(&config_path);
    assert!(matches!(result, Err(ConfigError::ZeroClusterCount)));
  }

  #[test]
  fn test_validate_rejects_bad_threshold() {
    let mut config = EngineConfig::default();
    config.clustering.quality_threshold = 1.5;
    assert!(matches!(config.validate(), Err(ConfigError::InvalidValue { .. })));
  }

  #[test]
  fn test_config_load_invalid_json() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("invalid.json");

    fs::write(&config_path, "{ invalid json }").unwrap();

    assert!(matches!(EngineConfig::load_from_file(&config_path), Err(ConfigError::Json(_))));
  }

  #[test]
  fn test_config_load_and_save() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("saved.json");

    let mut config = EngineConfig::default();
    config.clustering.method = ClusterMethod::Hierarchical;
    config.matching.top_k = 10;
    config.save_to_file(&config_path).unwrap();

    let loaded = EngineConfig::load_from_file(&config_path).unwrap();
    assert_eq!(loaded, config);
  }
}
