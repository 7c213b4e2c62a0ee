use colored::*;
use std::fmt::Write;

use crate::outcome::Status;
use crate::pipeline::PipelineReport;

fn status_tag(status: &Status) -> ColoredString {
  match status {
    Status::Complete => "✓".green(),
    Status::NoData { .. } => "∅".yellow(),
    Status::Degraded { .. } => "!".red(),
    Status::Skipped { .. } => "-".dimmed(),
  }
}

fn section(out: &mut String, title: &str, status: &Status) {
  let _ = write!(out, "\n{} {}", status_tag(status), title.blue().bold());
  if let Some(reason) = status.reason() {
    let _ = write!(out, " ({}: {})", status.label(), reason.dimmed());
  }
  out.push('\n');
}

/// Render a pipeline report as colored terminal text.
pub fn render_report(report: &PipelineReport) -> String {
  let mut out = String::new();

  section(&mut out, "Clusters", &report.clusters.status);
  for cluster in &report.cluster_records {
    let centroid = if cluster.centroid.is_some() { "" } else { " (no centroid)" };
    let _ = writeln!(
      out,
      "  {} {}{}",
      format!("#{}", cluster.id).cyan(),
      cluster.members.join(", "),
      centroid.dimmed()
    );
  }

  section(&mut out, "Founder matches", &report.matches.status);
  for (rank, m) in report.matches.value.iter().enumerate() {
    let cluster = m.cluster_id.map(|c| format!(" [cluster {}]", c)).unwrap_or_default();
    let _ = writeln!(
      out,
      "  {}. {} {}{}",
      rank + 1,
      m.firm_id.yellow(),
      format!("{:.3}", m.score).green(),
      cluster.dimmed()
    );
  }

  section(&mut out, "White space", &report.gaps.status);
  for gap in &report.gaps.value {
    let _ = writeln!(out, "  {} {}", format!("#{}", gap.cluster_id).cyan(), gap.rationale);
  }

  section(&mut out, "Relationships", &report.relationships.status);
  for record in report.relationships.value.iter().filter(|r| r.shared_count > 0) {
    let _ = writeln!(
      out,
      "  {} / {}: {} (jaccard {:.3}, cosine {:.3})",
      record.firm_a.yellow(),
      record.firm_b.yellow(),
      record.kind.to_string().bold(),
      record.jaccard,
      record.cosine
    );
  }
  let unrelated = report.relationships.value.iter().filter(|r| r.shared_count == 0).count();
  if unrelated > 0 {
    let _ = writeln!(out, "  {}", format!("{} pairs with no shared companies", unrelated).dimmed());
  }

  section(&mut out, "Similar portfolio companies", &report.similar_companies.status);
  for company in &report.similar_companies.value {
    let _ = writeln!(
      out,
      "  {} {} backed by {}",
      company.company.yellow(),
      format!("{:.3}", company.score).green(),
      if company.invested_firms.is_empty() {
        "no listed firm".to_string()
      } else {
        company.invested_firms.join(", ")
      }
    );
  }

  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::EngineConfig;
  use crate::model::{Firm, FounderProfile};
  use crate::pipeline::Orchestrator;

  #[test]
  fn test_render_report_lists_every_section() {
    colored::control::set_override(false);

    let firms = vec![
      Firm::new("alpha", vec![1.0, 0.0]).with_portfolio(["A", "B"]),
      Firm::new("beta", vec![0.0, 1.0]).with_portfolio(["B"]),
    ];
    let founder = FounderProfile::new(vec![1.0, 0.0], "");
    let report = Orchestrator::new(EngineConfig::default()).unwrap().run(&firms, &founder).unwrap();
    let text = render_report(&report);

    assert!(text.contains("✓ Clusters"));
    assert!(text.contains("1. alpha 1.000"));
    assert!(text.contains("underserved theme"));
    assert!(text.contains("alpha / beta: Strong Collaborators"));
    assert!(
      text.contains("Similar portfolio companies (no data: no portfolio company embeddings)")
    );
  }
}
