//! Coverage report ingestion and mapping onto stored entities
//!
//! Reads the JSON report written by `coverage json` and recomputes the
//! tested/untested status and exact missing lines of every class and function.

use crate::error::{CoverageError, StoreError};
use crate::store::EntityStore;
use crate::types::{CoverageStatus, EntityKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::process::Command;

#[derive(Debug, Deserialize)]
struct RawReport {
    #[serde(default)]
    files: HashMap<String, RawFileCoverage>,
}

#[derive(Debug, Default, Deserialize)]
struct RawFileCoverage {
    #[serde(default)]
    missing_lines: Vec<u32>,
    #[serde(default)]
    missing: Vec<u32>,
}

/// Unexecuted lines per file, keyed by normalized relative path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageReport {
    files: HashMap<String, Vec<u32>>,
}

impl CoverageReport {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoverageError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| CoverageError::ReportRead {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json(&content)
    }

    /// Parse report JSON. `missing_lines` and `missing` are both honored and
    /// merged; a leading `./` on file keys is dropped.
    pub fn from_json(json: &str) -> Result<Self, CoverageError> {
        let raw: RawReport =
            serde_json::from_str(json).map_err(|e| CoverageError::ReportParse(e.to_string()))?;

        let files = raw
            .files
            .into_iter()
            .map(|(path, coverage)| {
                let lines: BTreeSet<u32> = coverage
                    .missing_lines
                    .into_iter()
                    .chain(coverage.missing)
                    .collect();
                (normalize_path(&path).to_string(), lines.into_iter().collect())
            })
            .collect();

        Ok(Self { files })
    }

    /// Missing lines for a file, `None` when the report does not mention it
    pub fn missing_lines(&self, file_path: &str) -> Option<&[u32]> {
        self.files
            .get(normalize_path(file_path))
            .map(|lines| lines.as_slice())
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

fn normalize_path(path: &str) -> &str {
    path.strip_prefix("./").unwrap_or(path)
}

/// Whether any line of `[start_line, end_line]` is in `missing`
pub fn has_untested_lines(missing: &[u32], start_line: u32, end_line: u32) -> bool {
    missing
        .iter()
        .any(|line| (start_line..=end_line).contains(line))
}

/// The lines of `missing` inside `[start_line, end_line]`, sorted and deduplicated
pub fn missing_in_span(missing: &[u32], start_line: u32, end_line: u32) -> Vec<u32> {
    let lines: BTreeSet<u32> = missing
        .iter()
        .copied()
        .filter(|line| (start_line..=end_line).contains(line))
        .collect();
    lines.into_iter().collect()
}

/// Totals from one mapping pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoverageSummary {
    pub tested: usize,
    pub untested: usize,
    /// Entities whose file the report does not mention
    pub not_in_report: usize,
}

pub struct CoverageMapper;

impl CoverageMapper {
    /// Recompute status and missing lines of every class and function.
    ///
    /// Previous values are always replaced, so applying the same report twice
    /// leaves the store unchanged.
    pub fn apply(
        store: &EntityStore,
        report: &CoverageReport,
    ) -> Result<CoverageSummary, StoreError> {
        let mut summary = CoverageSummary::default();

        let mut targets: Vec<(EntityKind, i64, String, u32, u32)> = store
            .classes()?
            .into_iter()
            .map(|c| (EntityKind::Class, c.id, c.file_path, c.start_line, c.end_line))
            .collect();
        targets.extend(
            store
                .functions()?
                .into_iter()
                .map(|f| (EntityKind::Function, f.id, f.file_path, f.start_line, f.end_line)),
        );

        let tx = store.begin()?;
        for (kind, id, file_path, start_line, end_line) in targets {
            let missing = match report.missing_lines(&file_path) {
                Some(lines) => missing_in_span(lines, start_line, end_line),
                None => {
                    summary.not_in_report += 1;
                    Vec::new()
                }
            };

            let status = if missing.is_empty() {
                summary.tested += 1;
                CoverageStatus::Tested
            } else {
                summary.untested += 1;
                CoverageStatus::Untested
            };

            tracing::debug!(
                "{} {} in {}: {} ({} missing)",
                kind,
                id,
                file_path,
                status,
                missing.len()
            );
            store.set_coverage(kind, id, status, &missing)?;
        }
        tx.commit()?;

        tracing::info!(
            "Coverage mapped: {} tested, {} untested",
            summary.tested,
            summary.untested
        );
        Ok(summary)
    }
}

/// Run the coverage commands in order inside `cwd`, stopping at the first
/// failure. Each command is split on whitespace.
pub fn run_coverage(commands: &[String], cwd: &Path) -> Result<(), CoverageError> {
    for command in commands {
        let mut parts = command.split_whitespace();
        let Some(program) = parts.next() else {
            continue;
        };

        tracing::info!("Running `{}`", command);
        let output = Command::new(program)
            .args(parts)
            .current_dir(cwd)
            .output()
            .map_err(|e| CoverageError::CommandFailed {
                command: command.clone(),
                detail: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CoverageError::CommandFailed {
                command: command.clone(),
                detail: format!("{}: {}", output.status, stderr.trim()),
            });
        }
    }
    Ok(())
}
