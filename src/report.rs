//! Report rendering
//!
//! CSV rows (one per terminal scope, discovery order) and a plain-text
//! summary. Scopes that could not be scanned keep their row; their numeric
//! cells carry the failure label instead of a count.

use crate::inventory::model::{ResourceClass, ScopeResult, ScopeStatus};
use crate::inventory::ScanReport;
use anyhow::Result;
use clap::ValueEnum;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputMode {
    /// CSV rows, summary and folder subtotals
    #[default]
    Full,
    /// Summary only
    Summary,
    /// CSV rows with header
    Data,
    /// CSV rows without header
    DataNoHeader,
}

/// A numeric CSV column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Count(ResourceClass),
    Vcpus(ResourceClass),
    Clusters,
    TotalVcpus,
}

struct Layout {
    scope: &'static str,
    columns: Vec<(&'static str, Column)>,
}

fn layout(provider: &str) -> Layout {
    use Column::*;
    use ResourceClass::*;

    match provider {
        "GCP" => Layout {
            scope: "Project",
            columns: vec![("VM Instances", Count(Vm)), ("VM vCPUs", Vcpus(Vm))],
        },
        "Azure" => Layout {
            scope: "Subscription",
            columns: vec![
                ("VMs", Count(Vm)),
                ("VM vCPUs", Vcpus(Vm)),
                ("Scale Set Instances", Count(ScaleSetMember)),
                ("Scale Set vCPUs", Vcpus(ScaleSetMember)),
                ("Total vCPUs", TotalVcpus),
            ],
        },
        "AWS" => Layout {
            scope: "Account",
            columns: vec![
                ("EC2 Instances", Count(Vm)),
                ("EC2 vCPUs", Vcpus(Vm)),
                ("ECS Clusters", Clusters),
                ("Fargate Tasks", Count(ContainerTask)),
                ("Fargate vCPUs", Vcpus(ContainerTask)),
                ("Lambda Functions", Count(ServerlessFunction)),
                ("Total vCPUs", TotalVcpus),
            ],
        },
        _ => Layout {
            scope: "Scope",
            columns: vec![("Instances", Count(Vm)), ("Total vCPUs", TotalVcpus)],
        },
    }
}

fn cell(result: &ScopeResult, column: Column) -> String {
    let tally = &result.tally;
    match column {
        Column::Count(class) => tally.class(class).count.to_string(),
        Column::Vcpus(class) => tally.class(class).vcpus.to_string(),
        Column::Clusters => tally.container_clusters.to_string(),
        Column::TotalVcpus => tally.vcpus().to_string(),
    }
}

/// Short reason shown in the numeric cells of a scope that was not scanned
pub fn failure_label(result: &ScopeResult) -> &'static str {
    result.failure_kind().map(|k| k.label()).unwrap_or("error")
}

pub fn row(provider: &str, result: &ScopeResult) -> Vec<String> {
    let layout = layout(provider);
    let mut record = vec![
        result.scope.id.clone(),
        result.scope.name.clone().unwrap_or_default(),
    ];
    for (_, column) in &layout.columns {
        record.push(match result.status {
            ScopeStatus::Failed(_) => failure_label(result).to_string(),
            _ => cell(result, *column),
        });
    }
    record.push(result.status.label());
    record
}

pub fn header(provider: &str) -> Vec<String> {
    let layout = layout(provider);
    let mut record = vec![format!("{} ID", layout.scope), format!("{} Name", layout.scope)];
    record.extend(layout.columns.iter().map(|(name, _)| name.to_string()));
    record.push("Status".to_string());
    record
}

/// Write one CSV record per terminal scope
pub fn write_rows<W: Write>(out: W, report: &ScanReport, with_header: bool) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(out);
    if with_header {
        writer.write_record(header(report.provider))?;
    }
    for result in &report.rows {
        writer.write_record(row(report.provider, result))?;
    }
    writer.flush()?;
    Ok(())
}

// ============================================================================
// Summary
// ============================================================================

/// Plain-text summary; `subtotals` adds one line per folder
pub fn summary(report: &ScanReport, subtotals: bool) -> String {
    let mut out = String::new();
    // Formatting into a String only fails if a Display impl does
    if let Err(e) = write_summary(&mut out, report, subtotals) {
        tracing::warn!("Summary is incomplete: {}", e);
    }
    out
}

fn write_summary(out: &mut String, report: &ScanReport, subtotals: bool) -> std::fmt::Result {
    let total = report.total();
    let tally = &total.tally;

    let skipped: Vec<&ScopeResult> = report.rows.iter().filter(|r| r.status.is_failed()).collect();
    let (expected, errors): (Vec<&ScopeResult>, Vec<&ScopeResult>) = skipped
        .iter()
        .copied()
        .partition(|r| r.failure_kind().is_some_and(|k| k.is_expected()));
    let partial: Vec<&ScopeResult> = report
        .rows
        .iter()
        .filter(|r| matches!(r.status, ScopeStatus::PartiallyFailed(_)))
        .collect();

    writeln!(out, "{} inventory (run {})", report.provider, report.run_id)?;
    if report.cancelled {
        writeln!(out, "Scan cancelled: totals are partial")?;
    }
    writeln!(
        out,
        "Scopes analyzed: {} ({} scanned, {} skipped)",
        report.rows.len(),
        report.rows.len() - skipped.len(),
        skipped.len()
    )?;
    writeln!(out, "Total instances: {}", tally.instances())?;
    writeln!(out, "Total vCPUs: {}", tally.vcpus())?;

    for class in ResourceClass::ALL {
        let counts = tally.class(class);
        if counts.count == 0 {
            continue;
        }
        if class.is_billable() {
            writeln!(out, "  {}: {} ({} vCPUs)", class.label(), counts.count, counts.vcpus)?;
        } else {
            writeln!(out, "  {}: {} (informational)", class.label(), counts.count)?;
        }
    }
    if tally.container_clusters > 0 {
        writeln!(out, "  Container clusters: {}", tally.container_clusters)?;
    }

    if !expected.is_empty() {
        writeln!(out, "Skipped (expected): {}", expected.len())?;
        for result in &expected {
            writeln!(out, "  {}: {}", result.scope.id, failure_label(result))?;
        }
    }
    if !errors.is_empty() {
        writeln!(out, "Skipped (errors): {}", errors.len())?;
        for result in &errors {
            let detail = result.diagnostics.first().map(|d| d.detail.as_str()).unwrap_or("");
            writeln!(out, "  {}: {} {}", result.scope.id, failure_label(result), detail)?;
        }
    }
    if !partial.is_empty() {
        writeln!(out, "Partially scanned: {}", partial.len())?;
        for result in &partial {
            writeln!(out, "  {}: {}", result.scope.id, result.status.label())?;
        }
    }

    let terminal_ids: HashSet<&str> = report.rows.iter().map(|r| r.scope.id.as_str()).collect();
    let discovery: Vec<_> = total
        .diagnostics
        .iter()
        .filter(|d| !terminal_ids.contains(d.scope_id.as_str()))
        .collect();
    if !discovery.is_empty() {
        writeln!(out, "Discovery errors: {}", discovery.len())?;
        for diagnostic in discovery {
            writeln!(out, "  {} ({})", diagnostic, diagnostic.detail)?;
        }
    }

    let mut seen = HashSet::new();
    let warnings: Vec<&String> = report
        .rows
        .iter()
        .flat_map(|r| &r.warnings)
        .filter(|w| seen.insert(w.as_str()))
        .collect();
    if !warnings.is_empty() {
        writeln!(out, "Unresolved types: {}", warnings.len())?;
        for warning in warnings {
            writeln!(out, "  {}", warning)?;
        }
    }

    if subtotals {
        let branches = report.tree.branches();
        // The run root alone carries nothing the totals above don't
        if branches.len() > 1 {
            writeln!(out, "Subtotals:")?;
            for (depth, result) in branches.iter().skip(1) {
                writeln!(
                    out,
                    "{}{}: {} instances, {} vCPUs [{}]",
                    "  ".repeat(*depth),
                    result.scope.label(),
                    result.tally.instances(),
                    result.tally.vcpus(),
                    result.status.label()
                )?;
            }
        }
    }

    Ok(())
}

/// Render `report` to `out` in the requested mode
pub fn render<W: Write>(mut out: W, report: &ScanReport, mode: OutputMode) -> Result<()> {
    match mode {
        OutputMode::Full => {
            write_rows(&mut out, report, true)?;
            writeln!(out)?;
            write!(out, "{}", summary(report, true))?;
        }
        OutputMode::Summary => write!(out, "{}", summary(report, false))?,
        OutputMode::Data => write_rows(&mut out, report, true)?,
        OutputMode::DataNoHeader => write_rows(&mut out, report, false)?,
    }
    out.flush()?;
    Ok(())
}
