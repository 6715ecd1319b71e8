//! Running per-cell statistics.
//!
//! A [`Cell`] only ever holds additive counters and sums; every rate and
//! average is derived on [`Cell::snapshot`] so resuming (replaying a ledger)
//! and running uninterrupted produce identical numbers.

use crate::exact::{Decimal, RESULT_SCALE};
use crate::ledger::TrialRecord;
use crate::parser::Classification;
use crate::variant::Variant;
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::collections::BTreeMap;

/// Two-sided 95% normal quantile
const Z_95: f64 = 1.959_963_984_540_054;

/// Additive counters for one `(variant, depth)` cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    /// Trials folded in
    pub total: u64,
    /// `Correct` trials
    pub correct: u64,
    /// `Deviate` trials
    pub deviate: u64,
    /// `NaN` trials
    pub nan: u64,
    /// Trials where no reply was obtained
    pub failed: u64,
    /// Sum of absolute errors over `Deviate` trials
    pub error_sum: Decimal,
    /// Summed prompt tokens
    pub prompt_tokens: u64,
    /// Summed completion tokens
    pub completion_tokens: u64,
    /// Summed cost, in pico-USD to keep sums order-independent
    cost_picos: i128,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            total: 0,
            correct: 0,
            deviate: 0,
            nan: 0,
            failed: 0,
            error_sum: Decimal::zero(RESULT_SCALE),
            prompt_tokens: 0,
            completion_tokens: 0,
            cost_picos: 0,
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn to_picos(cost: f64) -> i128 {
    (cost * 1e12).round() as i128
}

#[allow(clippy::cast_precision_loss)]
fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

impl Cell {
    /// Empty cell
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one trial in
    pub fn update(&mut self, record: &TrialRecord) {
        self.total += 1;
        match record.classification {
            Classification::Correct => self.correct += 1,
            Classification::Deviate => {
                self.deviate += 1;
                if let Some(err) = record.error.as_deref().and_then(|e| e.parse::<Decimal>().ok()) {
                    self.error_sum = &self.error_sum + &err.abs();
                }
            }
            Classification::NaN => self.nan += 1,
        }
        if record.failed_to_get_reply {
            self.failed += 1;
        }
        self.prompt_tokens += record.tokens.prompt_tokens;
        self.completion_tokens += record.tokens.completion_tokens;
        self.cost_picos += to_picos(record.cost);
    }

    /// Add another cell's counters into this one
    pub fn merge(&mut self, other: &Self) {
        self.total += other.total;
        self.correct += other.correct;
        self.deviate += other.deviate;
        self.nan += other.nan;
        self.failed += other.failed;
        self.error_sum = &self.error_sum + &other.error_sum;
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.cost_picos += other.cost_picos;
    }

    /// Summed cost in USD
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn total_cost(&self) -> f64 {
        self.cost_picos as f64 / 1e12
    }

    /// `correct + deviate + nan == total`
    #[must_use]
    pub const fn is_balanced(&self) -> bool {
        self.correct + self.deviate + self.nan == self.total
    }

    /// Derived metrics
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn snapshot(&self) -> CellMetrics {
        let avg_error = if self.deviate == 0 {
            Decimal::zero(RESULT_SCALE)
        } else {
            self.error_sum
                .div_quantized(&Decimal::from_int(BigInt::from(self.deviate)), RESULT_SCALE)
                .unwrap_or_else(|| Decimal::zero(RESULT_SCALE))
        };
        let total_cost = self.total_cost();
        let (ci_low, ci_high) = wilson_interval(self.correct, self.total);

        CellMetrics {
            total_trials: self.total,
            correct_count: self.correct,
            deviate_count: self.deviate,
            nan_count: self.nan,
            failed_count: self.failed,
            accuracy: ratio(self.correct, self.total),
            accuracy_ci_low: ci_low,
            accuracy_ci_high: ci_high,
            nan_rate: ratio(self.nan, self.total),
            deviate_rate: ratio(self.deviate, self.total),
            avg_error,
            total_prompt_tokens: self.prompt_tokens,
            total_completion_tokens: self.completion_tokens,
            avg_prompt_tokens: ratio(self.prompt_tokens, self.total),
            avg_completion_tokens: ratio(self.completion_tokens, self.total),
            total_cost,
            avg_cost: if self.total == 0 {
                0.0
            } else {
                total_cost / self.total as f64
            },
        }
    }
}

/// Metrics derived from a [`Cell`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellMetrics {
    pub total_trials: u64,
    pub correct_count: u64,
    pub deviate_count: u64,
    pub nan_count: u64,
    #[serde(default)]
    pub failed_count: u64,
    pub accuracy: f64,
    #[serde(default)]
    pub accuracy_ci_low: f64,
    #[serde(default)]
    pub accuracy_ci_high: f64,
    pub nan_rate: f64,
    pub deviate_rate: f64,
    /// Mean absolute error over `Deviate` trials, 4 fractional digits
    pub avg_error: Decimal,
    #[serde(default)]
    pub total_prompt_tokens: u64,
    #[serde(default)]
    pub total_completion_tokens: u64,
    #[serde(default)]
    pub avg_prompt_tokens: f64,
    #[serde(default)]
    pub avg_completion_tokens: f64,
    pub total_cost: f64,
    pub avg_cost: f64,
}

/// 95% Wilson score interval for `successes` out of `n`
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn wilson_interval(successes: u64, n: u64) -> (f64, f64) {
    if n == 0 {
        return (0.0, 0.0);
    }
    let z = Normal::new(0.0, 1.0).map_or(Z_95, |d| d.inverse_cdf(0.975));
    let n_f = n as f64;
    let p = successes as f64 / n_f;
    let z2 = z * z;
    let denom = 1.0 + z2 / n_f;
    let center = (p + z2 / (2.0 * n_f)) / denom;
    let half = z * (p * (1.0 - p) / n_f + z2 / (4.0 * n_f * n_f)).sqrt() / denom;
    ((center - half).max(0.0), (center + half).min(1.0))
}

/// All cells of a run, keyed by `(variant, depth)`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CellGrid {
    cells: BTreeMap<(Variant, u32), Cell>,
}

impl CellGrid {
    /// Empty grid
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Grid with a zeroed cell for every variant × depth
    #[must_use]
    pub fn with_cells(variants: &[Variant], depths: &[u32]) -> Self {
        let mut grid = Self::new();
        for &variant in variants {
            for &depth in depths {
                grid.cells.entry((variant, depth)).or_default();
            }
        }
        grid
    }

    /// Fold one trial into its cell, creating the cell if needed
    pub fn update(&mut self, record: &TrialRecord) {
        self.cells.entry(record.cell()).or_default().update(record);
    }

    /// Build a grid by replaying records
    pub fn from_records<'a, I: IntoIterator<Item = &'a TrialRecord>>(records: I) -> Self {
        let mut grid = Self::new();
        for record in records {
            grid.update(record);
        }
        grid
    }

    /// Cell for `(variant, depth)`
    #[must_use]
    pub fn get(&self, variant: Variant, depth: u32) -> Option<&Cell> {
        self.cells.get(&(variant, depth))
    }

    /// Trials recorded in `(variant, depth)`
    #[must_use]
    pub fn done(&self, variant: Variant, depth: u32) -> u64 {
        self.get(variant, depth).map_or(0, |c| c.total)
    }

    /// Cells in `(variant, depth)` order
    pub fn iter(&self) -> impl Iterator<Item = (Variant, u32, &Cell)> {
        self.cells.iter().map(|(&(v, d), c)| (v, d, c))
    }

    /// Sum of all cells
    #[must_use]
    pub fn overall(&self) -> Cell {
        let mut total = Cell::new();
        for cell in self.cells.values() {
            total.merge(cell);
        }
        total
    }

    /// Per-variant sums across depths
    #[must_use]
    pub fn per_variant(&self) -> BTreeMap<Variant, Cell> {
        let mut out: BTreeMap<Variant, Cell> = BTreeMap::new();
        for (&(variant, _), cell) in &self.cells {
            out.entry(variant).or_default().merge(cell);
        }
        out
    }

    /// Counts-only view, for comparing progress between runs
    #[must_use]
    pub fn counts(&self) -> BTreeMap<(Variant, u32), (u64, u64, u64, u64)> {
        self.cells
            .iter()
            .map(|(&k, c)| (k, (c.total, c.correct, c.deviate, c.nan)))
            .collect()
    }

    /// True when there are no cells
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}
