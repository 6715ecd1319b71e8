//! Run orchestration.
//!
//! Sequences generate → evaluate → prompt → invoke → parse → ledger → stats
//! for every `(variant, depth)` cell, strictly one trial at a time. A run can
//! resume from an existing trial ledger: the ledger is replayed into the cell
//! grid and only the missing trials of each cell are executed.
//!
//! ```text
//! Initializing → (Resuming) → Running → Finalizing → Done
//!                     └──────→ Aborted (ledger identity mismatch)
//!                     └──────→ Done    (nothing left to run)
//! ```

use crate::aggregate::AggregateRecord;
use crate::client::{ModelClient, ModelRequest, TokenUsage};
use crate::config::{ConfigError, ExtraContext, RunConfig};
use crate::evaluator::{evaluate, EvalError};
use crate::generator::{GenerationError, OperandGenerator};
use crate::ledger::{append_record, read_trials, LedgerError, LedgerWriter, TrialRecord};
use crate::parser::{parse_response, Classification};
use crate::pricing::PriceTable;
use crate::prompt::{build_messages, render};
use crate::retry::invoke_with_retry;
use crate::stats::CellGrid;
use crate::variant::Variant;
use chrono::{SecondsFormat, Utc};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can stop a run
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Ledger {field} mismatch: ledger has {ledger}, run requested {requested}")]
    ConfigMismatch {
        field: &'static str,
        ledger: String,
        requested: String,
    },

    #[error("Invalid run configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Operand generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("Evaluation failed: {0}")]
    Evaluation(#[from] EvalError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Orchestrator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Initializing,
    Resuming,
    Running,
    Finalizing,
    Done,
    Aborted,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initializing => "initializing",
            Self::Resuming => "resuming",
            Self::Running => "running",
            Self::Finalizing => "finalizing",
            Self::Done => "done",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Progress after each executed trial
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialProgress {
    pub variant: Variant,
    pub depth: u32,
    /// Trials now recorded in this cell
    pub cell_done: u64,
    /// Target trials per cell
    pub cell_target: u64,
    /// Trials executed so far in this invocation
    pub executed: u64,
    /// Trials this invocation set out to execute
    pub planned: u64,
    pub classification: Classification,
    pub attempts: u32,
}

/// Result of [`Runner::run`]
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Trial ledger written (or resumed)
    pub ledger_path: PathBuf,
    /// Trials executed by this invocation
    pub trials_executed: u64,
    /// Aggregate record appended, `None` when finalization was skipped
    pub aggregate: Option<AggregateRecord>,
    /// Final cell statistics, including replayed trials
    pub grid: CellGrid,
}

type ProgressFn<'a> = Box<dyn FnMut(&TrialProgress) + 'a>;

/// Sequential benchmark orchestrator
pub struct Runner<'a, C: ModelClient> {
    config: RunConfig,
    client: C,
    prices: PriceTable,
    extra_context: ExtraContext,
    generator: OperandGenerator,
    state: RunState,
    progress: Option<ProgressFn<'a>>,
}

impl<'a, C: ModelClient> Runner<'a, C> {
    /// Create a runner, validating `config` and loading its extra context
    ///
    /// # Errors
    ///
    /// Returns `RunnerError::Config` if the configuration is invalid or the
    /// extra-context file cannot be loaded.
    pub fn new(config: RunConfig, client: C) -> Result<Self, RunnerError> {
        config.validate()?;
        let extra_context = match &config.extra_context {
            Some(ctx) => ExtraContext::load(ctx)?,
            None => ExtraContext::default(),
        };
        Ok(Self {
            generator: OperandGenerator::new(config.seed),
            config,
            client,
            prices: PriceTable::new(),
            extra_context,
            state: RunState::Initializing,
            progress: None,
        })
    }

    /// Use `prices` for trial costs
    #[must_use]
    pub fn with_prices(mut self, prices: PriceTable) -> Self {
        self.prices = prices;
        self
    }

    /// Call `f` after every executed trial
    #[must_use]
    pub fn with_progress<F: FnMut(&TrialProgress) + 'a>(mut self, f: F) -> Self {
        self.progress = Some(Box::new(f));
        self
    }

    /// Current lifecycle state
    #[must_use]
    pub const fn state(&self) -> RunState {
        self.state
    }

    /// Run configuration
    #[must_use]
    pub const fn config(&self) -> &RunConfig {
        &self.config
    }

    fn transition(&mut self, next: RunState) {
        tracing::debug!(from = %self.state, to = %next, "Run state change");
        self.state = next;
    }

    /// Execute the run to completion
    ///
    /// # Errors
    ///
    /// Returns `RunnerError::ConfigMismatch` when resuming onto a ledger of a
    /// different model or extra-context size (no trial is executed), or a
    /// ledger error if a record cannot be persisted.
    pub fn run(&mut self) -> Result<RunOutcome, RunnerError> {
        self.transition(RunState::Initializing);
        let started_at = Utc::now();
        let target = self.config.trials_per_cell as u64;
        let depths = self.config.depths.clone();
        let mut grid = CellGrid::with_cells(&Variant::ALL, &depths);

        let (ledger_path, resumed) = match self.config.resume.clone() {
            Some(path) if path.exists() => {
                self.transition(RunState::Resuming);
                let records = read_trials(&path)?;
                if let Err(e) = self.check_identity(&records) {
                    self.transition(RunState::Aborted);
                    return Err(e);
                }
                for record in &records {
                    grid.update(record);
                }
                tracing::info!(
                    path = %path.display(),
                    records = records.len(),
                    "Resuming from existing ledger"
                );
                (path, true)
            }
            Some(path) => {
                tracing::info!(path = %path.display(), "Resume ledger not found, starting fresh");
                (path, false)
            }
            None => (self.config.ledger_path(started_at), false),
        };

        let planned: u64 = Variant::ALL
            .iter()
            .flat_map(|&v| depths.iter().map(move |&d| (v, d)))
            .map(|(v, d)| target.saturating_sub(grid.done(v, d)))
            .sum();

        if resumed && planned == 0 {
            tracing::info!(
                path = %ledger_path.display(),
                "All cells already complete, skipping run and aggregate"
            );
            self.transition(RunState::Done);
            return Ok(RunOutcome {
                ledger_path,
                trials_executed: 0,
                aggregate: None,
                grid,
            });
        }

        self.transition(RunState::Running);
        let mut writer = if resumed {
            LedgerWriter::open(&ledger_path)?
        } else if self.config.resume.is_some() {
            LedgerWriter::create_new(&ledger_path)?
        } else {
            LedgerWriter::create_unique(&ledger_path)?
        };
        let ledger_path = writer.path().to_path_buf();
        tracing::info!(
            model = %self.config.model,
            ledger = %ledger_path.display(),
            trials_per_cell = target,
            depths = ?depths,
            planned,
            "Starting run"
        );

        let mut executed = 0u64;
        for variant in Variant::ALL {
            for &depth in &depths {
                let done = grid.done(variant, depth);
                if done >= target {
                    continue;
                }
                for index in done..target {
                    let record = self.run_trial(variant, depth, index)?;
                    writer.append(&record)?;
                    grid.update(&record);
                    executed += 1;

                    if let Some(progress) = self.progress.as_mut() {
                        progress(&TrialProgress {
                            variant,
                            depth,
                            cell_done: index + 1,
                            cell_target: target,
                            executed,
                            planned,
                            classification: record.classification,
                            attempts: record.attempts,
                        });
                    }
                }
                if let Some(cell) = grid.get(variant, depth) {
                    let m = cell.snapshot();
                    tracing::info!(
                        variant = %variant,
                        depth,
                        accuracy = m.accuracy,
                        nan_rate = m.nan_rate,
                        "Cell complete"
                    );
                }
            }
        }

        self.transition(RunState::Finalizing);
        let aggregate = AggregateRecord::from_grid(
            &self.config.model,
            &started_at.format("%Y-%m-%d").to_string(),
            self.config.trials_per_cell,
            self.config.extra_context_size(),
            &grid,
        );
        append_record(&self.config.aggregate_path, &aggregate)?;
        tracing::info!(
            aggregate = %self.config.aggregate_path.display(),
            executed,
            accuracy = aggregate.overall.accuracy,
            "Run complete"
        );

        self.transition(RunState::Done);
        Ok(RunOutcome {
            ledger_path,
            trials_executed: executed,
            aggregate: Some(aggregate),
            grid,
        })
    }

    /// Every record must carry this run's model and extra-context marker
    fn check_identity(&self, records: &[TrialRecord]) -> Result<(), RunnerError> {
        let requested_ctx = self.config.extra_context_size();
        for record in records {
            if record.model != self.config.model {
                return Err(RunnerError::ConfigMismatch {
                    field: "model",
                    ledger: record.model.clone(),
                    requested: self.config.model.clone(),
                });
            }
            if record.extra_context != requested_ctx {
                return Err(RunnerError::ConfigMismatch {
                    field: "extra_context",
                    ledger: describe_ctx(record.extra_context),
                    requested: describe_ctx(requested_ctx),
                });
            }
        }
        Ok(())
    }

    fn run_trial(
        &self,
        variant: Variant,
        depth: u32,
        index: u64,
    ) -> Result<TrialRecord, RunnerError> {
        let pair = self.generator.generate(variant, depth, index)?;
        let expected = evaluate(variant, &pair)?;
        let prompt = render(&pair.lhs, variant.operation, &pair.rhs);
        let request = ModelRequest {
            model: self.config.model.clone(),
            messages: build_messages(
                self.config.system_prompt.as_deref(),
                &self.extra_context.messages,
                &prompt,
            ),
            reasoning_effort: self.config.reasoning_effort.clone(),
            params: self.config.provider_params.clone(),
            timeout: self.config.timeout(),
        };

        let outcome = invoke_with_retry(&self.client, &request, self.config.retry_policy());
        let failed = outcome.failed();
        let (raw, usage) = outcome
            .reply
            .map_or_else(|| (String::new(), TokenUsage::default()), |r| (r.text, r.usage));
        let parsed = parse_response(&raw, &expected, variant);

        tracing::debug!(
            variant = %variant,
            depth,
            index,
            lhs = %pair.lhs,
            rhs = %pair.rhs,
            expected = %expected,
            classification = %parsed.classification,
            attempts = outcome.attempts,
            "Trial complete"
        );

        Ok(TrialRecord {
            model: self.config.model.clone(),
            variant,
            depth,
            operands: [pair.lhs.to_string(), pair.rhs.to_string()],
            correct: expected.to_string(),
            raw_response: raw,
            parsed: parsed.parsed.map(|v| v.to_string()),
            classification: parsed.classification,
            error: parsed.error,
            tokens: usage,
            cost: self.prices.cost(&self.config.model, usage),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            attempts: outcome.attempts,
            failed_to_get_reply: failed,
            extra_context: self.config.extra_context_size(),
        })
    }
}

fn describe_ctx(size: Option<usize>) -> String {
    size.map_or_else(|| "none".to_string(), |s| s.to_string())
}

/// Trials still missing per cell for `config`, given an existing ledger
///
/// # Errors
///
/// Returns an error if the ledger cannot be read.
pub fn remaining_trials(config: &RunConfig, ledger: &Path) -> Result<u64, LedgerError> {
    let grid = CellGrid::from_records(&read_trials(ledger)?);
    let target = config.trials_per_cell as u64;
    Ok(Variant::ALL
        .iter()
        .flat_map(|&v| config.depths.iter().map(move |&d| (v, d)))
        .map(|(v, d)| target.saturating_sub(grid.done(v, d)))
        .sum())
}
