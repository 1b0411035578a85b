//! Library client for code-steward
//!
//! [`Steward`] owns the configuration, the project root and the entity store,
//! and runs each pass (sync, coverage, test run, repair, generation) against
//! them. Collaborators that talk to the outside world (oracle, git, test
//! runner) are passed in per call so callers and tests can substitute them.

use crate::config::Config;
use crate::coverage::{CoverageMapper, CoverageReport, CoverageSummary, run_coverage};
use crate::oracle::RevisionOracle;
use crate::repair::{RepairLoop, RepairReport};
use crate::runner::TestRunner;
use crate::store::EntityStore;
use crate::testgen::{GenerationReport, TestGenerator};
use crate::types::*;
use crate::vcs::VersionControl;

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Outcome tallies of a test-run pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TestRunSummary {
    pub passed: usize,
    pub failed: usize,
    /// Tests the runner could not start; their outcome is left unchanged
    pub errors: usize,
}

/// Main entry point for driving a project
///
/// # Example
///
/// ```no_run
/// use code_steward::{Config, Steward};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let steward = Steward::open("/path/to/project", Config::default())?;
///     let report = steward.sync().await?;
///     println!("Stored {} new entities", report.entities_created);
///     Ok(())
/// }
/// ```
pub struct Steward {
    pub(crate) config: Config,
    pub(crate) root: PathBuf,
    pub(crate) store: EntityStore,
}

impl Steward {
    /// Open the store configured for `root`, creating it if needed
    pub fn open(root: impl AsRef<Path>, config: Config) -> Result<Self> {
        let root = Self::normalize_path(root.as_ref())?;
        let db_path = config.resolved_db_path(&root);
        tracing::debug!("Using store at {}", db_path.display());

        let store = EntityStore::open(&db_path)
            .with_context(|| format!("Failed to open store at {}", db_path.display()))?;
        Ok(Self::with_store(root, config, store))
    }

    /// Build a client around an already open store
    pub fn with_store(root: impl AsRef<Path>, config: Config, store: EntityStore) -> Self {
        Self {
            config,
            root: root.as_ref().to_path_buf(),
            store,
        }
    }

    /// Canonical absolute form of a project root
    pub fn normalize_path(path: &Path) -> Result<PathBuf> {
        std::fs::canonicalize(path)
            .with_context(|| format!("Failed to canonicalize path: {}", path.display()))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    /// Extract every Python file under the root into the store and link
    /// tests. Existing entities are never rewritten; changed ones are counted
    /// as stale.
    pub async fn sync(&self) -> Result<SyncReport> {
        sync::do_sync(self).await
    }

    /// Map a coverage report onto stored classes and functions.
    ///
    /// With `run` set, the configured coverage commands are executed first.
    /// `report_path` defaults to the configured report location.
    pub fn update_coverage(&self, report_path: Option<&Path>, run: bool) -> Result<CoverageSummary> {
        if run {
            tracing::info!("Running coverage in {}", self.root.display());
            run_coverage(&self.config.coverage.commands, &self.root)
                .context("Coverage run failed")?;
        }

        let report_path = match report_path {
            Some(path) if path.is_absolute() => path.to_path_buf(),
            Some(path) => self.root.join(path),
            None => self.config.resolved_report_path(&self.root),
        };
        let report = CoverageReport::load(&report_path)?;
        tracing::debug!(
            "Loaded coverage for {} file(s) from {}",
            report.file_count(),
            report_path.display()
        );

        Ok(CoverageMapper::apply(&self.store, &report)?)
    }

    /// Run every stored test and record pass or fail
    pub fn run_tests(&self, runner: &dyn TestRunner) -> Result<TestRunSummary> {
        let tests = self.store.tests().context("Failed to load tests")?;
        tracing::info!("Running {} test(s)", tests.len());

        let mut summary = TestRunSummary::default();
        for test in &tests {
            let identifier = test.identifier();
            let run = match runner.run(&identifier) {
                Ok(run) => run,
                Err(e) => {
                    tracing::warn!("Could not run {}: {}", identifier, e);
                    summary.errors += 1;
                    continue;
                }
            };

            if run.passed {
                summary.passed += 1;
            } else {
                summary.failed += 1;
                tracing::debug!("{} failed:\n{}", identifier, run.output);
            }
            self.store
                .record_test_outcome(test.id, TestOutcome::from_passed(run.passed))?;
        }

        tracing::info!(
            "Test run: {} passed, {} failed, {} not run",
            summary.passed,
            summary.failed,
            summary.errors
        );
        Ok(summary)
    }

    /// Repair failing tests on an isolation branch
    pub async fn repair(
        &self,
        oracle: &dyn RevisionOracle,
        vcs: &dyn VersionControl,
        runner: &dyn TestRunner,
        max_attempts: Option<u32>,
    ) -> Result<RepairReport> {
        let max_attempts = max_attempts.unwrap_or(self.config.repair.max_attempts);
        if max_attempts == 0 {
            anyhow::bail!("max_attempts must be at least 1");
        }

        let repair = RepairLoop::new(&self.store, oracle, vcs, runner, &self.root, max_attempts);
        Ok(repair.run().await?)
    }

    /// Write tests for functions that have none.
    ///
    /// With a version control handle the tests are written and committed on
    /// a `<current>_tests_<timestamp>` branch, which is left checked out for
    /// review.
    pub async fn generate_tests(
        &self,
        oracle: &dyn RevisionOracle,
        vcs: Option<&dyn VersionControl>,
    ) -> Result<GenerationReport> {
        let generator =
            TestGenerator::new(&self.store, oracle, &self.root, &self.config.repair.tests_dir);

        let Some(vcs) = vcs else {
            return Ok(generator.generate_missing().await?);
        };

        if self.store.functions_without_tests()?.is_empty() {
            tracing::info!("Every function already has a test");
            return Ok(GenerationReport::default());
        }

        let original = vcs.current_branch()?;
        let branch = format!(
            "{}_tests_{}",
            original,
            chrono::Local::now().format("%Y%m%d%H%M%S")
        );
        vcs.create_branch(&branch)?;

        let mut report = generator.generate_missing().await?;
        if !report.generated.is_empty() {
            vcs.commit_all(&format!(
                "Add {} generated test(s)",
                report.generated.len()
            ))?;
        }
        tracing::info!("Generated tests are on branch {}", branch);
        report.branch = Some(branch);
        Ok(report)
    }

    /// Stored entities, optionally restricted to one kind and/or to classes
    /// and functions with unexecuted lines
    pub fn list(&self, kind: Option<EntityKind>, untested: bool) -> Result<Vec<Entity>> {
        let entities = if untested {
            let mut entities = self.store.query_untested()?;
            if let Some(kind) = kind {
                entities.retain(|e| e.kind() == kind);
            }
            entities
        } else {
            match kind {
                Some(kind) => self.store.query_by_kind(kind)?,
                None => {
                    let mut entities = self.store.query_by_kind(EntityKind::Class)?;
                    entities.extend(self.store.query_by_kind(EntityKind::Function)?);
                    entities.extend(self.store.query_by_kind(EntityKind::Test)?);
                    entities
                }
            }
        };
        Ok(entities)
    }

    pub fn counts(&self) -> Result<EntityCounts> {
        Ok(self.store.counts()?)
    }

    /// Drop every stored entity
    pub fn reset(&self) -> Result<()> {
        self.store.reset().context("Failed to reset store")?;
        tracing::info!("Store cleared");
        Ok(())
    }
}

mod sync;
