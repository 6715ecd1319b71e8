//! End-to-end tests for the run orchestrator.
//!
//! These drive a full benchmark grid against scripted in-process clients:
//! - an oracle that answers every prompt exactly
//! - flaky and dead clients for retry accounting
//! - resume from complete, partial and mismatched ledgers

#![allow(clippy::unwrap_used)]
#![allow(clippy::uninlined_format_args)]

use arith_eval::config::ExtraContextConfig;
use arith_eval::ledger;
use arith_eval::{
    evaluate, read_trials, reprice, summarize_ledger, verify_balance, AggregateRecord,
    CellGrid, Classification, Domain, ModelClient, ModelError, ModelPrice, ModelReply,
    ModelRequest, Operation, OperandPair, PriceTable, RunConfig, RunState, Runner, RunnerError,
    TokenUsage, TrialRecord, Value, Variant,
};
use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

// ============================================================================
// Scripted clients
// ============================================================================

/// Reads the expression off the last prompt line and answers it exactly
#[derive(Default)]
struct Oracle {
    requests: RefCell<Vec<ModelRequest>>,
}

fn answer(prompt: &str) -> String {
    let line = prompt.lines().last().unwrap().trim();
    let parts: Vec<&str> = line.split_whitespace().collect();
    let [lhs, symbol, rhs] = parts[..] else {
        panic!("unexpected prompt line: {line}");
    };
    let domain = if lhs.contains('.') {
        Domain::Float
    } else {
        Domain::Int
    };
    let operation = match symbol {
        "+" => Operation::Add,
        "-" => Operation::Sub,
        "×" => Operation::Mul,
        "÷" => Operation::Div,
        other => panic!("unexpected operator {other}"),
    };
    let pair = OperandPair {
        lhs: Value::parse_in(domain, lhs).unwrap(),
        rhs: Value::parse_in(domain, rhs).unwrap(),
    };
    evaluate(Variant::new(domain, operation), &pair)
        .unwrap()
        .to_string()
}

impl ModelClient for Oracle {
    fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ModelError> {
        self.requests.borrow_mut().push(request.clone());
        let prompt = &request.messages.last().unwrap().content;
        Ok(ModelReply {
            text: format!("The answer is {}", answer(prompt)),
            usage: TokenUsage {
                prompt_tokens: 40,
                completion_tokens: 5,
            },
        })
    }
}

/// Fails its first `failures` calls, then behaves like the oracle
struct Flaky {
    failures: u32,
    calls: Cell<u32>,
}

impl ModelClient for Flaky {
    fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ModelError> {
        let n = self.calls.get();
        self.calls.set(n + 1);
        if n < self.failures {
            return Err(ModelError::Timeout(request.timeout));
        }
        Oracle::default().complete(request)
    }
}

fn config(dir: &TempDir, trials: usize, depths: &[u32]) -> RunConfig {
    let mut config = RunConfig::new("test-model");
    config.trials_per_cell = trials;
    config.depths = depths.to_vec();
    config.retry_base_delay_ms = 0;
    config.output_dir = dir.path().join("results");
    config.aggregate_path = dir.path().join("aggregate.jsonl");
    config
}

fn aggregates(path: &Path) -> Vec<AggregateRecord> {
    ledger::read_records(path).unwrap()
}

fn run_fresh(config: RunConfig) -> PathBuf {
    let mut runner = Runner::new(config, Oracle::default()).unwrap();
    runner.run().unwrap().ledger_path
}

// ============================================================================
// Full runs
// ============================================================================

#[test]
fn test_oracle_is_always_correct() {
    let dir = TempDir::new().unwrap();
    let oracle = Oracle::default();
    let mut runner = Runner::new(config(&dir, 2, &[2, 3, 6]), &oracle).unwrap();
    let outcome = runner.run().unwrap();
    assert_eq!(runner.state(), RunState::Done);
    drop(runner);

    let records = read_trials(&outcome.ledger_path).unwrap();
    assert_eq!(records.len(), 8 * 3 * 2);
    for record in &records {
        assert_eq!(
            record.classification,
            Classification::Correct,
            "{:?} {:?} -> {}",
            record.variant,
            record.operands,
            record.raw_response
        );
        assert_eq!(record.parsed.as_deref(), Some(record.correct.as_str()));
        assert!(record.error.is_none());
        assert_eq!(record.attempts, 1);
        assert!(!record.failed_to_get_reply);
        assert!(record.is_consistent());
    }

    // Fixed-point results carry four fractional digits
    let float_div = records
        .iter()
        .find(|r| r.variant.to_string() == "float_div")
        .unwrap();
    assert_eq!(float_div.correct.split('.').nth(1).unwrap().len(), 4);
    assert_eq!(float_div.operands[0].split('.').nth(1).unwrap().len(), 2);

    let aggregate = outcome.aggregate.unwrap();
    assert!((aggregate.overall.accuracy - 1.0).abs() < 1e-12);
    assert_eq!(aggregate.overall.total_prompt_tokens, 40 * 48);
    assert_eq!(aggregate.cells.len(), 8);
    assert_eq!(aggregate.cells["int_mul"].len(), 3);
    assert_eq!(aggregates(&dir.path().join("aggregate.jsonl")).len(), 1);
    assert_eq!(oracle.requests.borrow().len(), 48);
}

#[test]
fn test_ledger_partition_invariant() {
    let dir = TempDir::new().unwrap();
    let path = run_fresh(config(&dir, 3, &[2, 4]));
    let records = read_trials(&path).unwrap();
    let grid = CellGrid::from_records(&records);
    for (variant, depth, cell) in grid.iter() {
        assert!(cell.is_balanced());
        let count = records
            .iter()
            .filter(|r| r.variant == variant && r.depth == depth)
            .count() as u64;
        assert_eq!(cell.total, count);
    }
    assert!(verify_balance(&records));
}

#[test]
fn test_same_seed_same_operands() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let a = read_trials(run_fresh(config(&dir_a, 2, &[3]))).unwrap();
    let b = read_trials(run_fresh(config(&dir_b, 2, &[3]))).unwrap();
    let ops = |rs: &[TrialRecord]| rs.iter().map(|r| r.operands.clone()).collect::<Vec<_>>();
    assert_eq!(ops(&a), ops(&b));

    let dir_c = TempDir::new().unwrap();
    let mut cfg = config(&dir_c, 2, &[3]);
    cfg.seed = 7;
    let c = read_trials(run_fresh(cfg)).unwrap();
    assert_ne!(ops(&a), ops(&c));
}

#[test]
fn test_system_prompt_and_extra_context_in_request() {
    let dir = TempDir::new().unwrap();
    let ctx_path = dir.path().join("ctx.yaml");
    std::fs::write(
        &ctx_path,
        "- role: user\n  content: Hello\n- role: assistant\n  content: Hi!\n- role: user\n  content: unused\n",
    )
    .unwrap();

    let mut cfg = config(&dir, 1, &[2]);
    cfg.system_prompt = Some("You are a calculator.".to_string());
    cfg.extra_context = Some(ExtraContextConfig {
        path: ctx_path,
        size: 2,
    });
    cfg.reasoning_effort = Some("low".to_string());

    let oracle = Oracle::default();
    let mut runner = Runner::new(cfg, &oracle).unwrap();
    let outcome = runner.run().unwrap();
    drop(runner);

    assert!(outcome
        .ledger_path
        .to_string_lossy()
        .ends_with("_ctx2.jsonl"));
    let requests = oracle.requests.borrow();
    let first = &requests[0];
    assert_eq!(first.messages.len(), 4);
    assert_eq!(first.messages[0].content, "You are a calculator.");
    assert_eq!(first.messages[1].content, "Hello");
    assert_eq!(first.messages[2].content, "Hi!");
    assert!(first.messages[3]
        .content
        .starts_with("Compute the following"));
    assert_eq!(first.reasoning_effort.as_deref(), Some("low"));

    let records = read_trials(&outcome.ledger_path).unwrap();
    assert!(records.iter().all(|r| r.extra_context == Some(2)));
}

// ============================================================================
// Retry accounting
// ============================================================================

#[test]
fn test_retry_then_success_records_two_attempts() {
    let dir = TempDir::new().unwrap();
    let mut cfg = config(&dir, 1, &[2]);
    cfg.max_attempts = 2;
    let client = Flaky {
        failures: 1,
        calls: Cell::new(0),
    };
    let mut runner = Runner::new(cfg, &client).unwrap();
    let outcome = runner.run().unwrap();
    drop(runner);

    let records = read_trials(&outcome.ledger_path).unwrap();
    assert_eq!(records[0].attempts, 2);
    assert!(!records[0].failed_to_get_reply);
    assert_eq!(records[0].classification, Classification::Correct);
    assert!(records[1..].iter().all(|r| r.attempts == 1));
    assert_eq!(client.calls.get(), 9);
}

#[test]
fn test_exhausted_retries_record_nan() {
    let dir = TempDir::new().unwrap();
    let mut cfg = config(&dir, 1, &[2]);
    cfg.max_attempts = 3;
    let client = Flaky {
        failures: u32::MAX,
        calls: Cell::new(0),
    };
    let mut runner = Runner::new(cfg, &client).unwrap();
    let outcome = runner.run().unwrap();
    drop(runner);

    let records = read_trials(&outcome.ledger_path).unwrap();
    assert_eq!(records.len(), 8);
    for record in &records {
        assert_eq!(record.classification, Classification::NaN);
        assert!(record.failed_to_get_reply);
        assert_eq!(record.attempts, 3);
        assert_eq!(record.tokens, TokenUsage::default());
        assert!(record.parsed.is_none());
    }
    assert_eq!(client.calls.get(), 24);
    // The run still finalizes
    assert_eq!(outcome.aggregate.unwrap().overall.nan_count, 8);
}

// ============================================================================
// Resume
// ============================================================================

#[test]
fn test_resume_complete_ledger_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir, 2, &[2, 3]);
    let mut runner = Runner::new(cfg.clone(), Oracle::default()).unwrap();
    let first = runner.run().unwrap();

    let mut resume_cfg = cfg;
    resume_cfg.resume = Some(first.ledger_path.clone());
    let oracle = Oracle::default();
    let mut runner = Runner::new(resume_cfg, &oracle).unwrap();
    let second = runner.run().unwrap();
    assert_eq!(runner.state(), RunState::Done);
    drop(runner);

    assert_eq!(second.trials_executed, 0);
    assert!(second.aggregate.is_none());
    assert!(oracle.requests.borrow().is_empty());
    assert_eq!(second.grid.counts(), first.grid.counts());
    assert_eq!(read_trials(&first.ledger_path).unwrap().len(), 32);
    assert_eq!(aggregates(&dir.path().join("aggregate.jsonl")).len(), 1);
}

#[test]
fn test_partial_resume_runs_only_missing_trials() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir, 2, &[2, 3]);
    let full_path = run_fresh(cfg.clone());
    let full = read_trials(&full_path).unwrap();

    // Simulate a crash after the fifth trial
    let partial_path = dir.path().join("partial.jsonl");
    let lines: Vec<String> = std::fs::read_to_string(&full_path)
        .unwrap()
        .lines()
        .take(5)
        .map(str::to_string)
        .collect();
    std::fs::write(&partial_path, lines.join("\n") + "\n").unwrap();

    let mut resume_cfg = cfg;
    resume_cfg.resume = Some(partial_path.clone());
    let oracle = Oracle::default();
    let mut runner = Runner::new(resume_cfg, &oracle).unwrap();
    let outcome = runner.run().unwrap();
    drop(runner);

    assert_eq!(outcome.trials_executed, 32 - 5);
    assert_eq!(oracle.requests.borrow().len(), 27);

    let resumed = read_trials(&partial_path).unwrap();
    assert_eq!(resumed.len(), 32);
    // int_add is complete in both depths, int_sub depth 2 had one of two
    assert_eq!(resumed[5].variant.to_string(), "int_sub");
    assert_eq!(resumed[5].depth, 2);
    // Same operands as the uninterrupted run, in the same order
    let cells = |rs: &[TrialRecord]| {
        rs.iter()
            .map(|r| (r.variant, r.depth, r.operands.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(cells(&resumed), cells(&full));

    let summary = summarize_ledger("partial", &resumed, None).unwrap();
    assert_eq!(summary.overall.total_trials, 32);
    assert!(summary.is_balanced());
}

#[test]
fn test_resume_after_torn_last_line_keeps_every_record() {
    let dir = TempDir::new().unwrap();
    let path = run_fresh(config(&dir, 1, &[2]));

    // Crash mid-write: half a record, no newline
    let mut text = std::fs::read_to_string(&path).unwrap();
    text.push_str(r#"{"model":"test-model","variant":"int_"#);
    std::fs::write(&path, text).unwrap();

    let mut cfg = config(&dir, 2, &[2]);
    cfg.resume = Some(path.clone());
    let mut runner = Runner::new(cfg, Oracle::default()).unwrap();
    let outcome = runner.run().unwrap();

    assert_eq!(outcome.trials_executed, 8);
    let records = read_trials(&path).unwrap();
    let aggregate = outcome.aggregate.unwrap();
    assert_eq!(records.len(), 16);
    assert_eq!(aggregate.overall.total_trials, records.len() as u64);
    assert!(verify_balance(&records));
}

#[test]
fn test_back_to_back_fresh_runs_get_separate_ledgers() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir, 1, &[2]);

    let mut runner = Runner::new(cfg.clone(), Oracle::default()).unwrap();
    let first = runner.run().unwrap();
    let mut runner = Runner::new(cfg, Oracle::default()).unwrap();
    let second = runner.run().unwrap();

    assert_ne!(first.ledger_path, second.ledger_path);
    for outcome in [&first, &second] {
        let records = read_trials(&outcome.ledger_path).unwrap();
        assert_eq!(records.len(), 8);
        let total = outcome.aggregate.as_ref().unwrap().overall.total_trials;
        assert_eq!(total, records.len() as u64);
    }
}

#[test]
fn test_resume_with_more_trials_extends_every_cell() {
    let dir = TempDir::new().unwrap();
    let path = run_fresh(config(&dir, 1, &[2]));

    let mut cfg = config(&dir, 3, &[2]);
    cfg.resume = Some(path.clone());
    let mut runner = Runner::new(cfg, Oracle::default()).unwrap();
    let outcome = runner.run().unwrap();

    assert_eq!(outcome.trials_executed, 16);
    assert_eq!(read_trials(&path).unwrap().len(), 24);
    for variant in Variant::ALL {
        assert_eq!(outcome.grid.done(variant, 2), 3);
    }
    assert_eq!(aggregates(&dir.path().join("aggregate.jsonl")).len(), 2);
}

#[test]
fn test_resume_model_mismatch_aborts_before_any_trial() {
    let dir = TempDir::new().unwrap();
    let path = run_fresh(config(&dir, 1, &[2]));

    let mut cfg = config(&dir, 2, &[2]);
    cfg.model = "another-model".to_string();
    cfg.resume = Some(path.clone());
    let oracle = Oracle::default();
    let mut runner = Runner::new(cfg, &oracle).unwrap();
    let err = runner.run().unwrap_err();
    assert_eq!(runner.state(), RunState::Aborted);
    drop(runner);

    let message = err.to_string();
    assert!(message.contains("test-model"), "{message}");
    assert!(message.contains("another-model"), "{message}");
    assert!(oracle.requests.borrow().is_empty());
    assert_eq!(read_trials(&path).unwrap().len(), 8);
}

#[test]
fn test_resume_extra_context_mismatch_aborts() {
    let dir = TempDir::new().unwrap();
    let path = run_fresh(config(&dir, 1, &[2]));

    let ctx_path = dir.path().join("ctx.yaml");
    std::fs::write(&ctx_path, "- role: user\n  content: Hi\n").unwrap();
    let mut cfg = config(&dir, 1, &[2]);
    cfg.extra_context = Some(ExtraContextConfig {
        path: ctx_path,
        size: 1,
    });
    cfg.resume = Some(path);
    let mut runner = Runner::new(cfg, Oracle::default()).unwrap();
    match runner.run().unwrap_err() {
        RunnerError::ConfigMismatch {
            field,
            ledger,
            requested,
        } => {
            assert_eq!(field, "extra_context");
            assert_eq!(ledger, "none");
            assert_eq!(requested, "1");
        }
        other => panic!("unexpected error: {other}"),
    }
}

// ============================================================================
// Repricing
// ============================================================================

#[test]
fn test_reprice_into_new_ledger() {
    let dir = TempDir::new().unwrap();
    let path = run_fresh(config(&dir, 1, &[2]));
    let records = read_trials(&path).unwrap();
    assert!(records.iter().all(|r| r.cost.abs() < f64::EPSILON));

    let mut prices = PriceTable::new();
    prices.insert(
        "test-model",
        ModelPrice {
            prompt: 1.0,
            completion: 2.0,
        },
    );
    let repriced = reprice(&records, &prices);
    let out = dir.path().join("repriced.jsonl");
    ledger::write_new(&out, &repriced).unwrap();

    let back = read_trials(&out).unwrap();
    assert_eq!(back.len(), 8);
    // 40 prompt + 5 completion tokens
    let expected = 40.0 / 1e6 + 10.0 / 1e6;
    assert!(back.iter().all(|r| (r.cost - expected).abs() < 1e-12));
    // Source ledger untouched
    assert!(read_trials(&path).unwrap().iter().all(|r| r.cost.abs() < f64::EPSILON));
}
