//! Per-model token prices and cost computation.

use crate::client::TokenUsage;
use crate::ledger::TrialRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while loading a price table
#[derive(Error, Debug)]
pub enum PricingError {
    #[error("Failed to read price table: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse price table: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Negative price for model {0}")]
    NegativePrice(String),
}

/// USD per million tokens
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    /// Price per million prompt tokens
    pub prompt: f64,
    /// Price per million completion tokens
    pub completion: f64,
}

impl ModelPrice {
    /// Cost of `usage` at this price
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn cost(&self, usage: TokenUsage) -> f64 {
        (usage.prompt_tokens as f64 / 1e6).mul_add(
            self.prompt,
            usage.completion_tokens as f64 / 1e6 * self.completion,
        )
    }
}

/// Model identifier to price
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriceTable {
    prices: BTreeMap<String, ModelPrice>,
}

impl PriceTable {
    /// Empty table; every model costs nothing
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a YAML price table.
    ///
    /// A missing file yields an empty table.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PricingError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Price table not found, costs will be zero");
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse a YAML price table
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid or a price is negative.
    pub fn from_yaml(yaml: &str) -> Result<Self, PricingError> {
        let table: Self = serde_yaml::from_str(yaml)?;
        if let Some((model, _)) = table
            .prices
            .iter()
            .find(|(_, p)| p.prompt < 0.0 || p.completion < 0.0)
        {
            return Err(PricingError::NegativePrice(model.clone()));
        }
        Ok(table)
    }

    /// Add or replace a model's price
    pub fn insert(&mut self, model: impl Into<String>, price: ModelPrice) {
        self.prices.insert(model.into(), price);
    }

    /// Price for `model`, if listed
    #[must_use]
    pub fn get(&self, model: &str) -> Option<ModelPrice> {
        self.prices.get(model).copied()
    }

    /// Cost of `usage` for `model`; unlisted models cost zero
    #[must_use]
    pub fn cost(&self, model: &str, usage: TokenUsage) -> f64 {
        self.get(model).map_or(0.0, |p| p.cost(usage))
    }

    /// Number of listed models
    #[must_use]
    pub fn len(&self) -> usize {
        self.prices.len()
    }

    /// True when no model is listed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

/// Recompute every record's cost from its token counts
#[must_use]
pub fn reprice(records: &[TrialRecord], prices: &PriceTable) -> Vec<TrialRecord> {
    records
        .iter()
        .map(|r| TrialRecord {
            cost: prices.cost(&r.model, r.tokens),
            ..r.clone()
        })
        .collect()
}
