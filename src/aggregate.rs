//! Aggregate records and ledger summaries.
//!
//! [`AggregateRecord`] is appended once per completed run. [`summarize_ledger`]
//! recomputes the same shape straight from a trial ledger, which is what the
//! `report` command works from.

use crate::ledger::TrialRecord;
use crate::stats::{CellGrid, CellMetrics};
use crate::variant::Variant;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Key of a depth column in the `cells` map
#[must_use]
pub fn depth_key(depth: u32) -> String {
    format!("depth_{depth}")
}

/// Inverse of [`depth_key`]
#[must_use]
pub fn parse_depth_key(key: &str) -> Option<u32> {
    key.strip_prefix("depth_")?.parse().ok()
}

/// One line of the aggregate ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub model: String,
    /// Run date, `YYYY-MM-DD`
    pub date: String,
    pub trials_per_cell: usize,
    #[serde(default)]
    pub extra_context: Option<usize>,
    pub overall: CellMetrics,
    /// Per-variant sums across depths
    pub per_category: BTreeMap<String, CellMetrics>,
    /// `variant -> "depth_N" -> metrics`
    pub cells: BTreeMap<String, BTreeMap<String, CellMetrics>>,
}

impl AggregateRecord {
    /// Fold a grid into an aggregate record
    #[must_use]
    pub fn from_grid(
        model: &str,
        date: &str,
        trials_per_cell: usize,
        extra_context: Option<usize>,
        grid: &CellGrid,
    ) -> Self {
        let mut cells: BTreeMap<String, BTreeMap<String, CellMetrics>> = BTreeMap::new();
        for (variant, depth, cell) in grid.iter() {
            cells
                .entry(variant.name())
                .or_default()
                .insert(depth_key(depth), cell.snapshot());
        }
        let per_category = grid
            .per_variant()
            .into_iter()
            .map(|(v, c)| (v.name(), c.snapshot()))
            .collect();

        Self {
            model: model.to_string(),
            date: date.to_string(),
            trials_per_cell,
            extra_context,
            overall: grid.overall().snapshot(),
            per_category,
            cells,
        }
    }
}

/// Statistics recomputed from one trial ledger
#[derive(Debug, Clone)]
pub struct LedgerSummary {
    /// Display label (usually the ledger file stem)
    pub label: String,
    pub model: String,
    pub extra_context: Option<usize>,
    /// Records in the ledger, before depth filtering
    pub raw_trial_count: usize,
    /// Per-variant trial counts, before depth filtering
    pub variant_totals: BTreeMap<Variant, u64>,
    /// Cells at or above the minimum depth
    pub grid: CellGrid,
    pub overall: CellMetrics,
    pub per_category: BTreeMap<Variant, CellMetrics>,
}

impl LedgerSummary {
    /// Every variant present has the same trial count
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        counts_equal(self.variant_totals.values().copied())
    }
}

fn counts_equal<I: IntoIterator<Item = u64>>(counts: I) -> bool {
    let mut counts = counts.into_iter();
    counts.next().map_or(true, |first| counts.all(|c| c == first))
}

/// Summarize a trial ledger, dropping depths below `min_depth`.
///
/// Returns `None` for an empty ledger.
#[must_use]
pub fn summarize_ledger(
    label: &str,
    records: &[TrialRecord],
    min_depth: Option<u32>,
) -> Option<LedgerSummary> {
    let first = records.first()?;
    let min_depth = min_depth.unwrap_or(0);

    let mut variant_totals: BTreeMap<Variant, u64> = BTreeMap::new();
    for record in records {
        *variant_totals.entry(record.variant).or_default() += 1;
    }
    let grid = CellGrid::from_records(records.iter().filter(|r| r.depth >= min_depth));
    let per_category = grid
        .per_variant()
        .into_iter()
        .map(|(v, c)| (v, c.snapshot()))
        .collect();

    Some(LedgerSummary {
        label: label.to_string(),
        model: first.model.clone(),
        extra_context: first.extra_context,
        raw_trial_count: records.len(),
        variant_totals,
        overall: grid.overall().snapshot(),
        per_category,
        grid,
    })
}

/// True when every variant in the ledger has the same number of trials
#[must_use]
pub fn verify_balance(records: &[TrialRecord]) -> bool {
    let mut totals: BTreeMap<Variant, u64> = BTreeMap::new();
    for record in records {
        *totals.entry(record.variant).or_default() += 1;
    }
    counts_equal(totals.into_values())
}

/// Order summaries for an overview: incomplete runs last, then accuracy
/// descending. A run is incomplete when it holds fewer records than the
/// largest run.
pub fn sort_for_overview(summaries: &mut [LedgerSummary]) {
    let expected = summaries.iter().map(|s| s.raw_trial_count).max().unwrap_or(0);
    summaries.sort_by(|a, b| {
        let a_incomplete = a.raw_trial_count < expected;
        let b_incomplete = b.raw_trial_count < expected;
        a_incomplete.cmp(&b_incomplete).then_with(|| {
            b.overall
                .accuracy
                .partial_cmp(&a.overall.accuracy)
                .unwrap_or(Ordering::Equal)
        })
    });
}
