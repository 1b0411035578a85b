//! Test repair loop
//!
//! Every test whose last outcome is `fail` is driven through a small state
//! machine on an isolation branch:
//!
//! ```text
//! Pending -> Revising -> Revised -> Passing
//!               ^           |
//!               +-----------+-> Failing (attempts exhausted)
//! ```
//!
//! Each attempt asks the [`RevisionOracle`] for a new test body, writes it
//! into the test file and re-runs the test. A passing or exhausted test is
//! committed. When every test ends `Passing` the isolation branch is merged
//! back into the branch the loop started from.

mod source_edit;


pub use source_edit::{merge_imports, replace_function_source, replace_line_span};

use crate::error::{StewardError, StoreError};
use crate::indexer::EntityExtractor;
use crate::oracle::{Revision, RevisionOracle, RevisionRequest};
use crate::runner::{TestRun, TestRunner};
use crate::store::EntityStore;
use crate::types::{TestEntity, TestOutcome};
use crate::vcs::VersionControl;
use anyhow::{Context, anyhow};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Where one test sits in the repair state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "attempt", rename_all = "snake_case")]
pub enum RepairState {
    Pending,
    /// Waiting on the oracle for attempt `n`
    Revising(u32),
    /// Attempt `n` has been written, awaiting the re-run
    Revised(u32),
    Passing,
    Failing,
}

impl RepairState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RepairState::Passing | RepairState::Failing)
    }
}

/// Final state of one repaired test
#[derive(Debug, Clone, Serialize)]
pub struct TestRepair {
    pub test_id: i64,
    pub identifier: String,
    pub state: RepairState,
    /// Oracle calls spent on this test
    pub attempts: u32,
    pub committed: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RepairReport {
    /// Branch the loop started from
    pub original_branch: Option<String>,
    /// Isolation branch, absent when there was nothing to repair
    pub branch: Option<String>,
    pub merged: bool,
    pub oracle_calls: u32,
    pub tests: Vec<TestRepair>,
}

impl RepairReport {
    pub fn passing(&self) -> usize {
        self.tests
            .iter()
            .filter(|t| t.state == RepairState::Passing)
            .count()
    }

    pub fn failing(&self) -> usize {
        self.tests
            .iter()
            .filter(|t| t.state == RepairState::Failing)
            .count()
    }
}

/// Drives failing tests to passing through the oracle, isolated on a branch
pub struct RepairLoop<'a> {
    store: &'a EntityStore,
    oracle: &'a dyn RevisionOracle,
    vcs: &'a dyn VersionControl,
    runner: &'a dyn TestRunner,
    root: PathBuf,
    max_attempts: u32,
}

impl<'a> RepairLoop<'a> {
    pub fn new(
        store: &'a EntityStore,
        oracle: &'a dyn RevisionOracle,
        vcs: &'a dyn VersionControl,
        runner: &'a dyn TestRunner,
        root: impl AsRef<Path>,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            oracle,
            vcs,
            runner,
            root: root.as_ref().to_path_buf(),
            max_attempts,
        }
    }

    /// Repair every test recorded as failing.
    ///
    /// Errors only when the store cannot be read or the isolation branch
    /// cannot be set up or merged. Per-test problems end that test as
    /// `Failing` and the loop moves on.
    pub async fn run(&self) -> Result<RepairReport, StewardError> {
        let failing = self.store.tests_with_outcome(TestOutcome::Fail)?;
        if failing.is_empty() {
            tracing::info!("No failing tests to repair");
            return Ok(RepairReport::default());
        }

        let original = self.vcs.current_branch()?;
        let branch = format!(
            "{}_repair_{}",
            original,
            chrono::Local::now().format("%Y%m%d%H%M%S")
        );
        self.vcs.create_branch(&branch)?;
        tracing::info!(
            "Repairing {} failing test(s) on branch {}",
            failing.len(),
            branch
        );

        let mut report = RepairReport {
            original_branch: Some(original.clone()),
            branch: Some(branch.clone()),
            ..Default::default()
        };

        for test in &failing {
            let repair = self.repair_test(test, &mut report.oracle_calls).await;
            report.tests.push(repair);
        }

        if report.failing() > 0 {
            tracing::warn!(
                "{} test(s) still failing, leaving branch {} checked out",
                report.failing(),
                branch
            );
            return Ok(report);
        }

        self.vcs.checkout_branch(&original)?;
        self.vcs.merge_branch(&branch)?;
        report.merged = true;
        tracing::info!("All tests repaired, merged {} into {}", branch, original);

        Ok(report)
    }

    async fn repair_test(&self, test: &TestEntity, oracle_calls: &mut u32) -> TestRepair {
        let identifier = test.identifier();
        let mut state = RepairState::Pending;
        let mut attempts = 0;
        let mut best_code = test.source_text.clone();

        let mut run = self.run_test(&identifier);
        if run.passed {
            tracing::info!("{} already passes", identifier);
            self.persist(test.id, &best_code, TestOutcome::Pass);
            return TestRepair {
                test_id: test.id,
                identifier,
                state: RepairState::Passing,
                attempts,
                committed: false,
            };
        }

        let (function_code, span, missing_lines) = self.function_context(test);

        while !run.passed && attempts < self.max_attempts {
            attempts += 1;
            state = transition(&identifier, state, RepairState::Revising(attempts));

            let request = RevisionRequest {
                test_name: test.name.clone(),
                test_code: best_code.clone(),
                function_code: function_code.clone(),
                failure_output: run.output.clone(),
                start_line: span.map(|(start, _)| start),
                end_line: span.map(|(_, end)| end),
                missing_lines: missing_lines.clone(),
            };

            *oracle_calls += 1;
            match self.oracle.revise(&request).await {
                Revision::Revised { code, imports } => {
                    match self.apply_revision(test, &code, &imports) {
                        Ok(()) => best_code = code,
                        Err(e) => {
                            tracing::warn!("Could not apply revision to {}: {:#}", identifier, e)
                        }
                    }
                }
                Revision::Failed { reason } => {
                    tracing::warn!("No revision for {}: {}", identifier, reason);
                }
            }

            state = transition(&identifier, state, RepairState::Revised(attempts));
            run = self.run_test(&identifier);
        }

        let outcome = TestOutcome::from_passed(run.passed);
        self.persist(test.id, &best_code, outcome);

        let message = if run.passed {
            format!("Repair {}: passed after {} attempt(s)", identifier, attempts)
        } else {
            format!(
                "Repair {}: still failing after {} attempt(s)",
                identifier, attempts
            )
        };
        let committed = match self.vcs.commit_all(&message) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Commit for {} failed: {}", identifier, e);
                false
            }
        };

        let target = if run.passed && committed {
            RepairState::Passing
        } else {
            if !run.passed {
                tracing::warn!("{} still fails after {} attempt(s)", identifier, attempts);
            }
            RepairState::Failing
        };
        state = transition(&identifier, state, target);
        debug_assert!(state.is_terminal());

        TestRepair {
            test_id: test.id,
            identifier,
            state,
            attempts,
            committed,
        }
    }

    /// A runner that cannot start counts as a failed run
    fn run_test(&self, identifier: &str) -> TestRun {
        match self.runner.run(identifier) {
            Ok(run) => run,
            Err(e) => {
                tracing::warn!("Could not run {}: {}", identifier, e);
                TestRun {
                    output: e.to_string(),
                    passed: false,
                }
            }
        }
    }

    /// Source, span and missing lines of the function under test, if linked
    fn function_context(&self, test: &TestEntity) -> (String, Option<(u32, u32)>, Vec<u32>) {
        let Some(function_id) = test.function_id else {
            return (String::new(), None, Vec::new());
        };
        match self.store.function(function_id) {
            Ok(function) => (
                function.source_text,
                Some((function.start_line, function.end_line)),
                function.missing_lines,
            ),
            Err(e) => {
                tracing::warn!("Function {} for {} unavailable: {}", function_id, test.name, e);
                (String::new(), None, Vec::new())
            }
        }
    }

    fn persist(&self, test_id: i64, code: &str, outcome: TestOutcome) {
        if let Err(e) = self.store.record_test_revision(test_id, code, outcome) {
            log_store_error(test_id, &e);
        }
    }

    /// Merge imports and swap the test body in its file
    fn apply_revision(
        &self,
        test: &TestEntity,
        code: &str,
        imports: &[String],
    ) -> anyhow::Result<()> {
        let path = self.root.join(&test.file_path);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let (content, added) = merge_imports(&content, imports);
        if added > 0 {
            tracing::debug!("Added {} import(s) to {}", added, test.file_path);
        }

        let top_level = match test.test_class {
            Some(_) => None,
            None => replace_function_source(&content, &test.name, code),
        };
        let updated = match top_level {
            Some(updated) => updated,
            None => {
                let (start, end) = current_span(&content, test)
                    .ok_or_else(|| anyhow!("test function {} not found", test.name))?;
                replace_line_span(&content, start, end, code)
                    .ok_or_else(|| anyhow!("span {}-{} out of range", start, end))?
            }
        };

        fs::write(&path, updated).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

/// Locate a method-level test in the current file content, inside its own
/// class when that is known. Falls back to the stored span when the file no
/// longer parses.
fn current_span(content: &str, test: &TestEntity) -> Option<(u32, u32)> {
    let extracted = EntityExtractor::new()
        .and_then(|mut extractor| extractor.extract(content))
        .ok();

    match extracted {
        Some(file) => file
            .classes
            .iter()
            .filter(|class| {
                test.test_class
                    .as_deref()
                    .is_none_or(|name| class.unit.name == name)
            })
            .flat_map(|class| class.methods.iter())
            .find(|method| method.name == test.name)
            .map(|method| (method.start_line, method.end_line)),
        None => Some((test.start_line, test.end_line)),
    }
}

fn transition(identifier: &str, from: RepairState, to: RepairState) -> RepairState {
    tracing::debug!("{}: {:?} -> {:?}", identifier, from, to);
    to
}

fn log_store_error(test_id: i64, error: &StoreError) {
    tracing::error!("Failed to record outcome for test {}: {}", test_id, error);
}
