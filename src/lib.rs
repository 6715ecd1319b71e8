//! # Arith Eval
//!
//! Benchmark harness measuring how accurately language models do arithmetic.
//!
//! Every trial draws an operand pair for one of eight variants
//! (`int`/`float` × `add`/`sub`/`mul`/`div`) at a given digit depth, asks the
//! model, and classifies the reply as `Correct`, `Deviate` or `NaN` against an
//! exact expected value. Results are appended to a trial ledger as they happen
//! and folded into per-cell statistics.
//!
//! ## Architecture
//!
//! ```text
//! Operand Generator (seeded, exact)
//!        ↓
//! Expression Evaluator (fixed-point, round-half-even, 4 digits)
//!        ↓
//! Prompt Builder → Model Client (with retry/backoff)
//!        ↓
//! Response Parser (Correct | Deviate | NaN)
//!        ↓
//! Trial Ledger (JSONL, append-only, resumable)
//!        ↓
//! Cell Statistics → Aggregate Record → Report
//! ```

pub mod aggregate;
pub mod client;
pub mod config;
pub mod evaluator;
pub mod exact;
pub mod generator;
pub mod ledger;
pub mod parser;
pub mod pricing;
pub mod prompt;
pub mod report;
pub mod retry;
pub mod runner;
pub mod stats;
pub mod variant;

pub use aggregate::{
    summarize_ledger, sort_for_overview, verify_balance, AggregateRecord, LedgerSummary,
};
pub use client::{
    CommandClient, ModelClient, ModelError, ModelReply, ModelRequest, TokenUsage,
};
pub use config::{CommandConfig, ConfigError, ExtraContext, ExtraContextConfig, RunConfig};
pub use evaluator::{evaluate, EvalError};
pub use exact::{Decimal, Value, OPERAND_SCALE, RESULT_SCALE};
pub use generator::{GenerationError, OperandGenerator, OperandPair};
pub use ledger::{read_trials, LedgerError, LedgerWriter, TrialRecord};
pub use parser::{parse_response, Classification, ParseOutcome};
pub use pricing::{reprice, ModelPrice, PriceTable, PricingError};
pub use prompt::{build_messages, render, Message, Role};
pub use report::{render_aggregate, render_overview, render_summary, ReportFormat};
pub use retry::{invoke_with_retry, RetryOutcome, RetryPolicy};
pub use runner::{remaining_trials, RunOutcome, RunState, Runner, RunnerError, TrialProgress};
pub use stats::{Cell, CellGrid, CellMetrics};
pub use variant::{Domain, Operation, Variant};
