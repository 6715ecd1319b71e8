//! Response parsing and classification.
//!
//! The answer is the last signed decimal literal at the very end of the
//! trimmed response, after reasoning spans have been removed. Anything that
//! cannot be read as a number in the variant's domain is classified `NaN`.

use crate::exact::{Value, RESULT_SCALE};
use crate::variant::{Domain, Variant};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

static TRAILING_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(-?\d+(?:\.\d*)?)\s*$").unwrap_or_else(|_| unreachable!("static pattern"))
});

/// Reasoning tags whose content is never part of the answer
const REASONING_TAGS: [&str; 3] = ["think", "thinking", "reasoning"];

/// Three-way outcome of a trial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Classification {
    /// Parsed value equals the expected result
    Correct,
    /// Parsed value differs from the expected result
    Deviate,
    /// No number could be extracted
    #[serde(rename = "NaN")]
    NaN,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Correct => "Correct",
            Self::Deviate => "Deviate",
            Self::NaN => "NaN",
        })
    }
}

/// Parsed answer, its classification and the absolute error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOutcome {
    /// Parsed value (`None` for `NaN`)
    pub parsed: Option<Value>,
    /// Classification
    pub classification: Classification,
    /// Absolute difference from the expected result (`Deviate` only)
    pub error: Option<String>,
}

impl ParseOutcome {
    const fn nan() -> Self {
        Self {
            parsed: None,
            classification: Classification::NaN,
            error: None,
        }
    }
}

/// Remove reasoning spans such as `<think>...</think>`.
///
/// Everything up to the last closing tag is dropped, so a response with a
/// missing opening tag is handled too. An opening tag that is never closed
/// drops the remainder of the text.
#[must_use]
pub fn strip_reasoning(raw: &str) -> String {
    let mut text = raw;
    let mut cut = None;
    for tag in REASONING_TAGS {
        let close = format!("</{tag}>");
        if let Some(pos) = text.rfind(&close) {
            let end = pos + close.len();
            cut = Some(cut.map_or(end, |c: usize| c.max(end)));
        }
    }
    if let Some(end) = cut {
        text = &text[end..];
    }
    let mut open_at = None;
    for tag in REASONING_TAGS {
        if let Some(pos) = text.find(&format!("<{tag}>")) {
            open_at = Some(open_at.map_or(pos, |o: usize| o.min(pos)));
        }
    }
    match open_at {
        Some(pos) => text[..pos].to_string(),
        None => text.to_string(),
    }
}

/// Extract the trailing numeric literal, if any
#[must_use]
pub fn extract_trailing_number(text: &str) -> Option<&str> {
    TRAILING_NUMBER
        .captures(text.trim())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Parse a raw model response and classify it against `expected`.
///
/// Never fails: every parse or coercion failure is classified `NaN`.
#[must_use]
pub fn parse_response(raw: &str, expected: &Value, variant: Variant) -> ParseOutcome {
    let cleaned = strip_reasoning(raw);
    let Some(literal) = extract_trailing_number(&cleaned) else {
        return ParseOutcome::nan();
    };
    let Ok(parsed) = Value::parse_in(variant.domain, literal) else {
        return ParseOutcome::nan();
    };

    let parsed_dec = parsed.to_decimal();
    let expected_dec = expected.to_decimal();
    if parsed_dec == expected_dec {
        return ParseOutcome {
            parsed: Some(parsed),
            classification: Classification::Correct,
            error: None,
        };
    }

    let diff = (&parsed_dec - &expected_dec).abs();
    let error = match variant.domain {
        Domain::Int => diff.trunc().to_string(),
        Domain::Float => diff.quantize(RESULT_SCALE).to_string(),
    };
    ParseOutcome {
        parsed: Some(parsed),
        classification: Classification::Deviate,
        error: Some(error),
    }
}
