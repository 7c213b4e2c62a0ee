//! Firm Intelligence Engine
//!
//! Profiles venture firms from embedding vectors and portfolio data: adaptive
//! clustering, pairwise relationship classification, founder-to-firm matching
//! and white-space detection over cluster centroids.

pub mod cluster;
pub mod config;
pub mod display;
pub mod error;
pub mod gaps;
pub mod matching;
pub mod model;
pub mod outcome;
pub mod pipeline;
pub mod relationships;
pub mod similarity;

pub use cluster::{ClusterEngine, Clusterer};
pub use config::{ClusterMethod, EngineConfig, NoisePolicy};
pub use error::{ConfigError, EngineError};
pub use gaps::{CentroidGapDetector, GapDetector};
pub use matching::{MatchRanker, Matcher, SimilarCompanyFinder};
pub use model::{
  Cluster, ClusterMap, Firm, FounderProfile, GapInsight, MatchResult, RelationshipKind,
  RelationshipRecord,
};
pub use outcome::{Outcome, Status};
pub use pipeline::{Orchestrator, PipelineReport, Snapshot};
pub use relationships::{RelationshipAnalyzer, RelationshipGraphBuilder, RelationshipTable};
