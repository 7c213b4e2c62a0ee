//! Majority vote across partition, density and hierarchical labelings.
//!
//! Foreign labelings are first mapped into the partition label space: each
//! foreign label becomes the partition label it shares the most items with
//! (lowest on ties). Unassigned items abstain. Each item then takes the label
//! with the most votes, preferring the partition label and then the lowest
//! label on ties.

use std::collections::BTreeMap;

use crate::cluster::density::most_common;

/// Map a foreign labeling into the reference label space.
pub fn align_to(reference: &[usize], other: &[Option<usize>]) -> Vec<Option<usize>> {
  let mut overlap: BTreeMap<usize, BTreeMap<usize, usize>> = BTreeMap::new();
  for (label, &target) in other.iter().zip(reference) {
    if let Some(label) = label {
      *overlap.entry(*label).or_default().entry(target).or_default() += 1;
    }
  }

  let mapping: BTreeMap<usize, usize> = overlap
    .iter()
    .filter_map(|(label, counts)| most_common(counts).map(|target| (*label, target)))
    .collect();

  other.iter().map(|label| label.and_then(|l| mapping.get(&l).copied())).collect()
}

/// Per-item majority label. `partition` always votes; aligned voters may abstain.
pub fn majority_vote(partition: &[usize], voters: &[Vec<Option<usize>>]) -> Vec<usize> {
  partition
    .iter()
    .enumerate()
    .map(|(i, &own)| {
      let mut tally: BTreeMap<usize, usize> = BTreeMap::new();
      *tally.entry(own).or_default() += 1;
      for voter in voters {
        if let Some(Some(label)) = voter.get(i) {
          *tally.entry(*label).or_default() += 1;
        }
      }

      let top = tally.values().copied().max().unwrap_or(0);
      if tally.get(&own) == Some(&top) {
        own
      } else {
        // BTreeMap iterates ascending, so the first hit is the lowest label
        tally.iter().find(|(_, &count)| count == top).map_or(own, |(label, _)| *label)
      }
    })
    .collect()
}
