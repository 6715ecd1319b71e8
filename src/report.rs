//! Text and markdown rendering of ledger summaries and aggregate records.

use crate::aggregate::{parse_depth_key, AggregateRecord, LedgerSummary};
use crate::stats::{CellGrid, CellMetrics};
use crate::variant::Variant;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as FmtWrite;
use std::str::FromStr;
use tabled::builder::Builder;
use tabled::settings::Style;
use tabled::{Table, Tabled};

/// Output flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    /// Box-drawn tables for a terminal
    #[default]
    Text,
    /// GitHub-flavoured markdown
    Markdown,
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(Self::Text),
            "markdown" | "md" => Ok(Self::Markdown),
            other => Err(format!("unknown report format: {other}")),
        }
    }
}

fn pct(rate: f64) -> String {
    format!("{:.2}%", rate * 100.0)
}

fn usd(cost: f64) -> String {
    format!("${cost:.6}")
}

fn styled(mut table: Table, format: ReportFormat) -> String {
    match format {
        ReportFormat::Text => table.with(Style::modern()).to_string(),
        ReportFormat::Markdown => table.with(Style::markdown()).to_string(),
    }
}

fn heading(output: &mut String, title: &str, format: ReportFormat) {
    match format {
        ReportFormat::Text => {
            writeln!(output, "{title}").ok();
            writeln!(output, "{}", "─".repeat(title.chars().count())).ok();
        }
        ReportFormat::Markdown => {
            writeln!(output, "## {title}").ok();
            writeln!(output).ok();
        }
    }
}

#[derive(Tabled)]
struct OverviewRow {
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Run")]
    run: String,
    #[tabled(rename = "Trials")]
    trials: u64,
    #[tabled(rename = "Correct %")]
    accuracy: String,
    #[tabled(rename = "95% CI")]
    ci: String,
    #[tabled(rename = "NaN %")]
    nan_rate: String,
    #[tabled(rename = "Dev %")]
    deviate_rate: String,
    #[tabled(rename = "Comp. Tok.")]
    completion_tokens: u64,
    #[tabled(rename = "Cost")]
    cost: String,
    #[tabled(rename = "Avg Error")]
    avg_error: String,
}

#[derive(Tabled)]
struct VariantRow {
    #[tabled(rename = "Variant")]
    variant: String,
    #[tabled(rename = "Trials")]
    trials: u64,
    #[tabled(rename = "Correct %")]
    accuracy: String,
    #[tabled(rename = "NaN %")]
    nan_rate: String,
    #[tabled(rename = "Dev %")]
    deviate_rate: String,
    #[tabled(rename = "Avg Error")]
    avg_error: String,
    #[tabled(rename = "Cost")]
    cost: String,
}

impl VariantRow {
    fn new(variant: String, m: &CellMetrics) -> Self {
        Self {
            variant,
            trials: m.total_trials,
            accuracy: pct(m.accuracy),
            nan_rate: pct(m.nan_rate),
            deviate_rate: pct(m.deviate_rate),
            avg_error: m.avg_error.to_string(),
            cost: usd(m.total_cost),
        }
    }
}

fn overall_block(output: &mut String, title: &str, m: &CellMetrics, format: ReportFormat) {
    heading(output, title, format);
    let bullet = match format {
        ReportFormat::Text => "  ",
        ReportFormat::Markdown => "- ",
    };
    let lines = [
        ("Total Trials", m.total_trials.to_string()),
        (
            "Accuracy",
            format!(
                "{} [{} - {}]",
                pct(m.accuracy),
                pct(m.accuracy_ci_low),
                pct(m.accuracy_ci_high)
            ),
        ),
        ("NaN Rate", pct(m.nan_rate)),
        ("Deviate Rate", pct(m.deviate_rate)),
        ("Total Prompt Tokens", m.total_prompt_tokens.to_string()),
        ("Total Completion Tokens", m.total_completion_tokens.to_string()),
        ("Total Cost", usd(m.total_cost)),
        ("Avg Error", m.avg_error.to_string()),
    ];
    for (label, value) in lines {
        writeln!(output, "{bullet}{label}: {value}").ok();
    }
    writeln!(output).ok();
}

fn variant_table<'a, I>(rows: I, format: ReportFormat) -> String
where
    I: IntoIterator<Item = (String, &'a CellMetrics)>,
{
    let rows: Vec<VariantRow> = rows
        .into_iter()
        .map(|(name, m)| VariantRow::new(name, m))
        .collect();
    styled(Table::new(rows), format)
}

/// Variant x depth accuracy grid; missing cells render as `-`
fn accuracy_grid(
    accuracy: &BTreeMap<(String, u32), f64>,
    format: ReportFormat,
) -> String {
    let depths: BTreeSet<u32> = accuracy.keys().map(|(_, d)| *d).collect();
    let variants: BTreeSet<&str> = accuracy.keys().map(|(v, _)| v.as_str()).collect();
    let mut ordered: Vec<&str> = Variant::ALL
        .iter()
        .map(|v| v.name())
        .filter_map(|n| variants.get(n.as_str()).copied())
        .collect();
    ordered.extend(variants.iter().filter(|v| v.parse::<Variant>().is_err()));

    let mut builder = Builder::default();
    builder.push_record(
        std::iter::once("Variant".to_string()).chain(depths.iter().map(|d| format!("d{d}"))),
    );
    for variant in ordered {
        let row = depths.iter().map(|d| {
            accuracy
                .get(&(variant.to_string(), *d))
                .map_or_else(|| "-".to_string(), |a| format!("{:.0}%", a * 100.0))
        });
        builder.push_record(std::iter::once(variant.to_string()).chain(row));
    }
    styled(builder.build(), format)
}

fn grid_accuracy(grid: &CellGrid) -> BTreeMap<(String, u32), f64> {
    grid.iter()
        .map(|(v, d, c)| ((v.name(), d), c.snapshot().accuracy))
        .collect()
}

/// Render one ledger summary: overall block, per-variant table and grid
#[must_use]
pub fn render_summary(summary: &LedgerSummary, format: ReportFormat) -> String {
    let mut output = String::new();
    let title = format!("Overall ({} @ {})", summary.model, summary.label);
    overall_block(&mut output, &title, &summary.overall, format);

    heading(&mut output, &format!("Per-Variant Summary ({})", summary.model), format);
    let rows = summary
        .per_category
        .iter()
        .map(|(v, m)| (v.name(), m));
    writeln!(output, "{}", variant_table(rows, format)).ok();
    writeln!(output).ok();

    heading(&mut output, "Accuracy by Depth", format);
    writeln!(output, "{}", accuracy_grid(&grid_accuracy(&summary.grid), format)).ok();
    output
}

/// Render an overview of several runs followed by a verification table.
///
/// `summaries` are shown in the order given; see
/// [`crate::aggregate::sort_for_overview`].
#[must_use]
pub fn render_overview(summaries: &[LedgerSummary], format: ReportFormat) -> String {
    let mut output = String::new();

    heading(&mut output, "Models Overview", format);
    let rows: Vec<OverviewRow> = summaries
        .iter()
        .map(|s| {
            let o = &s.overall;
            OverviewRow {
                model: s.model.clone(),
                run: s.label.clone(),
                trials: o.total_trials,
                accuracy: pct(o.accuracy),
                ci: format!(
                    "{:.1}-{:.1}",
                    o.accuracy_ci_low * 100.0,
                    o.accuracy_ci_high * 100.0
                ),
                nan_rate: pct(o.nan_rate),
                deviate_rate: pct(o.deviate_rate),
                completion_tokens: o.total_completion_tokens,
                cost: usd(o.total_cost),
                avg_error: o.avg_error.to_string(),
            }
        })
        .collect();
    writeln!(output, "{}", styled(Table::new(rows), format)).ok();
    writeln!(output).ok();

    heading(&mut output, "Verification", format);
    let variants: BTreeSet<Variant> = summaries
        .iter()
        .flat_map(|s| s.variant_totals.keys().copied())
        .collect();
    let mut builder = Builder::default();
    builder.push_record(
        ["Run".to_string(), "Model".to_string()]
            .into_iter()
            .chain(variants.iter().map(|v| v.name()))
            .chain(std::iter::once("Verification".to_string())),
    );
    for s in summaries {
        let counts: Vec<u64> = variants
            .iter()
            .map(|v| s.variant_totals.get(v).copied().unwrap_or(0))
            .collect();
        let valid = counts.windows(2).all(|w| w[0] == w[1]);
        builder.push_record(
            [s.label.clone(), s.model.clone()]
                .into_iter()
                .chain(counts.iter().map(ToString::to_string))
                .chain(std::iter::once(
                    if valid { "Valid" } else { "Invalid" }.to_string(),
                )),
        );
    }
    writeln!(output, "{}", styled(builder.build(), format)).ok();
    writeln!(output).ok();

    for summary in summaries {
        output.push_str(&render_summary(summary, format));
        writeln!(output).ok();
    }
    output
}

/// Render one aggregate-ledger record
#[must_use]
pub fn render_aggregate(record: &AggregateRecord, format: ReportFormat) -> String {
    let mut output = String::new();
    let mut title = format!("Overall ({} @ {})", record.model, record.date);
    if let Some(size) = record.extra_context {
        title.push_str(&format!(" ctx={size}"));
    }
    overall_block(&mut output, &title, &record.overall, format);

    heading(&mut output, "Per-Variant Summary", format);
    let rows = record
        .per_category
        .iter()
        .map(|(name, m)| (name.clone(), m));
    writeln!(output, "{}", variant_table(rows, format)).ok();
    writeln!(output).ok();

    let accuracy: BTreeMap<(String, u32), f64> = record
        .cells
        .iter()
        .flat_map(|(variant, depths)| {
            depths.iter().filter_map(move |(key, m)| {
                parse_depth_key(key).map(|d| ((variant.clone(), d), m.accuracy))
            })
        })
        .collect();
    heading(&mut output, "Accuracy by Depth", format);
    writeln!(output, "{}", accuracy_grid(&accuracy, format)).ok();
    output
}
