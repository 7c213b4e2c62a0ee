use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use firm_intel::config::{ClusterMethod, EngineConfig};
use firm_intel::display::render_report;
use firm_intel::pipeline::{Orchestrator, Snapshot};
use firm_intel::relationships::{RelationshipAnalyzer, RelationshipGraphBuilder, RelationshipTable};

#[derive(Parser)]
#[command(name = "firm-intel")]
#[command(
  about = "Firm Intelligence Engine\nCluster venture firms, map their relationships and match founders"
)]
#[command(version)]
struct Cli {
  /// Enable debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
  Pretty,
  Json,
}

#[derive(Subcommand)]
enum Commands {
  /// Run the full pipeline over a snapshot
  Run {
    /// Snapshot JSON with firms, founder and optional company embeddings
    #[arg(short, long)]
    input: PathBuf,
    /// Configuration file (JSON or YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Clustering method override
    #[arg(short, long)]
    method: Option<ClusterMethod>,
    /// Number of firm matches to report
    #[arg(long)]
    top_k: Option<usize>,
    /// Number of white-space clusters to report
    #[arg(long)]
    bottom_n: Option<usize>,
    #[arg(short, long, value_enum, default_value = "pretty")]
    format: OutputFormat,
  },
  /// Describe the relationship between two firms
  Relationship {
    #[arg(short, long)]
    input: PathBuf,
    #[arg(short, long)]
    config: Option<PathBuf>,
    firm_a: String,
    firm_b: String,
  },
  /// Print the effective configuration
  Config {
    #[arg(short, long)]
    config: Option<PathBuf>,
  },
}

fn init_logging(verbose: bool) {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
    if verbose {
      EnvFilter::new("firm_intel=debug,warn")
    } else {
      EnvFilter::new("firm_intel=info,warn")
    }
  });

  // Logs go to stderr so JSON output stays clean
  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(std::io::stderr))
    .with(filter)
    .init();
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
  match path {
    Some(path) => EngineConfig::load_from_file(path)
      .with_context(|| format!("failed to load configuration from {}", path.display())),
    None => EngineConfig::load().context("failed to load configuration"),
  }
}

fn load_snapshot(path: &Path) -> Result<Snapshot> {
  let content = std::fs::read_to_string(path)
    .with_context(|| format!("failed to read snapshot {}", path.display()))?;
  serde_json::from_str(&content).with_context(|| format!("invalid snapshot {}", path.display()))
}

fn run(
  input: &Path,
  config: Option<&Path>,
  method: Option<ClusterMethod>,
  top_k: Option<usize>,
  bottom_n: Option<usize>,
  format: OutputFormat,
) -> Result<()> {
  let mut config = load_config(config)?;
  if let Some(method) = method {
    config.clustering.method = method;
  }
  if let Some(top_k) = top_k {
    config.matching.top_k = top_k;
  }
  if let Some(bottom_n) = bottom_n {
    config.gaps.bottom_n = bottom_n;
  }

  let snapshot = load_snapshot(input)?;
  let orchestrator = Orchestrator::new(config)?;
  let report = orchestrator.run_snapshot(&snapshot)?;

  match format {
    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    OutputFormat::Pretty => print!("{}", render_report(&report)),
  }
  Ok(())
}

fn relationship(input: &Path, config: Option<&Path>, firm_a: &str, firm_b: &str) -> Result<()> {
  let config = load_config(config)?;
  let snapshot = load_snapshot(input)?;

  for firm in [firm_a, firm_b] {
    if !snapshot.firms.iter().any(|f| f.id == firm) {
      return Err(anyhow!("firm '{}' is not in the snapshot", firm));
    }
  }
  if firm_a == firm_b {
    return Err(anyhow!("a firm has no relationship with itself"));
  }

  let portfolios: BTreeMap<String, BTreeSet<String>> = snapshot
    .firms
    .iter()
    .filter(|f| f.id == firm_a || f.id == firm_b)
    .map(|f| (f.id.clone(), f.portfolio.clone()))
    .collect();
  let embeddings: BTreeMap<String, Vec<f32>> = snapshot
    .firms
    .iter()
    .filter(|f| portfolios.contains_key(&f.id))
    .filter_map(|f| f.embedding.clone().map(|e| (f.id.clone(), e)))
    .collect();

  let outcome =
    RelationshipGraphBuilder::new(config.relationships).analyze(&portfolios, &embeddings);
  let table = RelationshipTable::new(outcome.value);

  match table.summary(firm_a, firm_b) {
    Some(summary) => println!("{}", summary),
    None => println!(
      "{} {}",
      "!".red(),
      outcome.status.reason().unwrap_or("no relationship could be computed")
    ),
  }
  Ok(())
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  init_logging(cli.verbose);

  match cli.command {
    Commands::Run { input, config, method, top_k, bottom_n, format } => {
      run(&input, config.as_deref(), method, top_k, bottom_n, format)?;
    }
    Commands::Relationship { input, config, firm_a, firm_b } => {
      relationship(&input, config.as_deref(), &firm_a, &firm_b)?;
    }
    Commands::Config { config } => {
      let config = load_config(config.as_deref())?;
      println!("{}", serde_json::to_string_pretty(&config)?);
    }
  }

  Ok(())
}
