//! Append-only JSONL ledgers.
//!
//! One self-describing JSON object per line. Records are written as soon as
//! they exist and never rewritten; reading tolerates a torn or hand-edited
//! file by skipping lines that do not parse.

use crate::client::TokenUsage;
use crate::parser::Classification;
use crate::variant::Variant;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while writing or reading a ledger
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Ledger I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to serialize ledger record: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Refusing to overwrite existing ledger: {0}")]
    AlreadyExists(PathBuf),
}

/// Outcome of one trial, exactly as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    /// Model identifier (or alias)
    pub model: String,
    /// Variant under test
    pub variant: Variant,
    /// Generated digit depth
    pub depth: u32,
    /// `[lhs, rhs]` as decimal literals
    #[serde(deserialize_with = "literal_pair")]
    pub operands: [String; 2],
    /// Expected result
    #[serde(deserialize_with = "literal")]
    pub correct: String,
    /// Raw model text (empty when no reply was obtained)
    pub raw_response: String,
    /// Parsed answer
    #[serde(default, deserialize_with = "optional_literal")]
    pub parsed: Option<String>,
    /// Three-way classification
    pub classification: Classification,
    /// Absolute error, `Deviate` only
    #[serde(default, deserialize_with = "optional_literal")]
    pub error: Option<String>,
    /// Token usage
    #[serde(default)]
    pub tokens: TokenUsage,
    /// Cost in USD
    #[serde(default)]
    pub cost: f64,
    /// ISO-8601 UTC timestamp
    pub timestamp: String,
    /// Invocation attempts used
    #[serde(default = "one")]
    pub attempts: u32,
    /// True when every attempt failed
    #[serde(default)]
    pub failed_to_get_reply: bool,
    /// Extra-context size marker
    #[serde(default)]
    pub extra_context: Option<usize>,
}

const fn one() -> u32 {
    1
}

impl TrialRecord {
    /// The `(variant, depth)` cell this record belongs to
    #[must_use]
    pub const fn cell(&self) -> (Variant, u32) {
        (self.variant, self.depth)
    }

    /// True when the record satisfies the classification contract:
    /// `Correct` has no error, `NaN` has no parsed value, `Deviate` has both.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        match self.classification {
            Classification::Correct => self.parsed.is_some() && self.error.is_none(),
            Classification::Deviate => self.parsed.is_some() && self.error.is_some(),
            Classification::NaN => self.parsed.is_none() && self.error.is_none(),
        }
    }
}

/// Older ledgers stored numbers as JSON numbers rather than strings
#[derive(Deserialize)]
#[serde(untagged)]
enum Literal {
    Text(String),
    Number(serde_json::Number),
}

impl Literal {
    fn into_string(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Number(n) => n.to_string(),
        }
    }
}

fn literal<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Literal::deserialize(deserializer).map(Literal::into_string)
}

fn optional_literal<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Option::<Literal>::deserialize(deserializer).map(|o| o.map(Literal::into_string))
}

fn literal_pair<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[String; 2], D::Error> {
    let [lhs, rhs] = <[Literal; 2]>::deserialize(deserializer)?;
    Ok([lhs.into_string(), rhs.into_string()])
}

/// Exclusive appender for one ledger file
pub struct LedgerWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl LedgerWriter {
    /// Open `path` for appending, creating it and its parent directories.
    ///
    /// A torn last line (no trailing newline) is terminated first so the
    /// next record starts on a line of its own.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        create_parent(&path)?;
        let torn = ends_mid_line(&path)?;
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = BufWriter::new(file);
        if torn {
            tracing::warn!(path = %path.display(), "Ledger ends mid-line, terminating it");
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        Ok(Self { path, writer })
    }

    /// Create a ledger that must not exist yet
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::AlreadyExists` if `path` exists, or an I/O error.
    pub fn create_new<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        create_parent(&path)?;
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => Ok(Self {
                path,
                writer: BufWriter::new(file),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(LedgerError::AlreadyExists(path))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Create a new ledger at `path`, or at `{stem}_{n}.{ext}` if taken
    ///
    /// # Errors
    ///
    /// Returns an error if no file can be created.
    pub fn create_unique<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        match Self::create_new(path) {
            Err(LedgerError::AlreadyExists(_)) => {}
            other => return other,
        }
        let stem = path
            .file_stem()
            .map_or_else(String::new, |s| s.to_string_lossy().into_owned());
        let ext = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let mut n = 2u32;
        loop {
            let candidate = path.with_file_name(format!("{stem}_{n}{ext}"));
            match Self::create_new(&candidate) {
                Err(LedgerError::AlreadyExists(_)) if n < u32::MAX => n += 1,
                other => return other,
            }
        }
    }

    /// Ledger location
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and flush it to disk
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn append<T: Serialize>(&mut self, record: &T) -> Result<(), LedgerError> {
        let line = serde_json::to_string(record)?;
        writeln!(self.writer, "{line}")?;
        self.writer.flush()?;
        Ok(())
    }
}

fn create_parent(path: &Path) -> Result<(), LedgerError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Non-empty file whose last byte is not `\n`
fn ends_mid_line(path: &Path) -> Result<bool, LedgerError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

/// Append a single record to `path`
///
/// # Errors
///
/// Returns an error if the file cannot be opened or written.
pub fn append_record<T: Serialize, P: AsRef<Path>>(path: P, record: &T) -> Result<(), LedgerError> {
    LedgerWriter::open(path)?.append(record)
}

/// Read every parseable record from `path`, in write order.
///
/// A missing file reads as empty. Malformed lines are skipped with a warning.
///
/// # Errors
///
/// Returns an error only if an existing file cannot be read.
pub fn read_records<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<Vec<T>, LedgerError> {
    let path = path.as_ref();
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "Ledger not found, treating as empty");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let mut records = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!(
                path = %path.display(),
                line = idx + 1,
                error = %e,
                "Skipping malformed ledger line"
            ),
        }
    }
    Ok(records)
}

/// Write `records` to a new ledger at `path`
///
/// # Errors
///
/// Returns `LedgerError::AlreadyExists` if `path` exists, or an I/O error.
pub fn write_new<T: Serialize, P: AsRef<Path>>(path: P, records: &[T]) -> Result<(), LedgerError> {
    let mut writer = LedgerWriter::create_new(path)?;
    for record in records {
        writer.append(record)?;
    }
    Ok(())
}

/// Read the trial records of a ledger
///
/// # Errors
///
/// See [`read_records`].
pub fn read_trials<P: AsRef<Path>>(path: P) -> Result<Vec<TrialRecord>, LedgerError> {
    read_records(path)
}
