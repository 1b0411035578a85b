//! Test execution through an external test-runner process

use crate::config::RunnerConfig;
use crate::error::RunnerError;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Result of running one test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRun {
    /// Combined stdout and stderr
    pub output: String,
    pub passed: bool,
}

pub trait TestRunner {
    /// Run a single test given its `<file_path>::<name>` identifier
    fn run(&self, identifier: &str) -> Result<TestRun, RunnerError>;
}

/// Runs tests with `python -m pytest -q <identifier>` (configurable) from the
/// project root
pub struct PytestRunner {
    program: String,
    args: Vec<String>,
    cwd: PathBuf,
}

impl PytestRunner {
    pub fn new(config: &RunnerConfig, cwd: impl AsRef<Path>) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            cwd: cwd.as_ref().to_path_buf(),
        }
    }
}

impl TestRunner for PytestRunner {
    fn run(&self, identifier: &str) -> Result<TestRun, RunnerError> {
        tracing::debug!("Running {} {:?} {}", self.program, self.args, identifier);

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(identifier)
            .current_dir(&self.cwd)
            .output()
            .map_err(|e| RunnerError::SpawnFailed {
                program: self.program.clone(),
                reason: e.to_string(),
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }

        Ok(TestRun {
            output: combined,
            passed: output.status.success(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn runner(program: &str, args: &[&str], cwd: &Path) -> PytestRunner {
        PytestRunner::new(
            &RunnerConfig {
                program: program.to_string(),
                args: args.iter().map(|a| a.to_string()).collect(),
            },
            cwd,
        )
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_status_decides_pass() {
        let temp_dir = TempDir::new().unwrap();

        let passing = runner("sh", &["-c", "echo ok; exit 0", "sh"], temp_dir.path());
        let run = passing.run("tests/test_calc.py::test_add").unwrap();
        assert!(run.passed);
        assert!(run.output.contains("ok"));

        let failing = runner("sh", &["-c", "echo boom >&2; exit 1", "sh"], temp_dir.path());
        let run = failing.run("tests/test_calc.py::test_add").unwrap();
        assert!(!run.passed);
        assert!(run.output.contains("boom"));
    }

    #[cfg(unix)]
    #[test]
    fn test_identifier_is_last_argument() {
        let temp_dir = TempDir::new().unwrap();
        // `sh -c script name arg1`: $1 is the identifier
        let echo = runner("sh", &["-c", "echo \"$1\"", "sh"], temp_dir.path());
        let run = echo.run("tests/test_calc.py::test_add").unwrap();
        assert_eq!(run.output.trim(), "tests/test_calc.py::test_add");
    }

    #[test]
    fn test_spawn_failure() {
        let temp_dir = TempDir::new().unwrap();
        let missing = runner("definitely-not-a-real-runner-xyz", &[], temp_dir.path());
        assert!(matches!(
            missing.run("t.py::test_x"),
            Err(RunnerError::SpawnFailed { .. })
        ));
    }
}
