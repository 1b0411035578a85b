//! End-to-end pass over a small Python project: sync, coverage, test run and
//! repair through the public API, with a real git repository and a scripted
//! oracle and test runner.

use async_trait::async_trait;
use code_steward::error::RunnerError;
use code_steward::oracle::{Revision, RevisionOracle, RevisionRequest, TestRequest};
use code_steward::repair::RepairState;
use code_steward::runner::{TestRun, TestRunner};
use code_steward::types::{CoverageStatus, EntityKind, TestOutcome};
use code_steward::vcs::{GitCli, VersionControl};
use code_steward::{Config, Steward};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use tempfile::TempDir;

const CALC: &str = "def add(a, b):
    return a + b


def div(a, b):
    if b == 0:
        raise ZeroDivisionError(\"b must not be zero\")
    return a / b
";

const TEST_CALC: &str = "from calc import add


def test_add():
    assert add(1, 1) == 3
";

const REPAIR_MARKER: &str = "# repaired";

/// Fails `test_add` until the repair marker is in its file
struct ScriptedRunner {
    root: PathBuf,
}

impl TestRunner for ScriptedRunner {
    fn run(&self, identifier: &str) -> Result<TestRun, RunnerError> {
        let (file, name) = identifier.split_once("::").unwrap();
        let content = fs::read_to_string(self.root.join(file)).unwrap();
        let passed = name != "test_add" || content.contains(REPAIR_MARKER);
        Ok(TestRun {
            output: if passed {
                "1 passed".to_string()
            } else {
                "E       assert 2 == 3".to_string()
            },
            passed,
        })
    }
}

struct ScriptedOracle {
    requests: Mutex<Vec<RevisionRequest>>,
}

#[async_trait]
impl RevisionOracle for ScriptedOracle {
    async fn revise(&self, request: &RevisionRequest) -> Revision {
        self.requests.lock().unwrap().push(request.clone());
        Revision::Revised {
            code: format!(
                "def test_add():\n    {}\n    assert add(1, 2) == 3\n",
                REPAIR_MARKER
            ),
            imports: vec!["import pytest".to_string()],
        }
    }

    async fn generate_test(&self, _request: &TestRequest) -> Revision {
        Revision::failed("not scripted")
    }
}

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .status()
        .unwrap();
    assert!(status.success(), "git {:?} failed", args);
}

fn create_project() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    fs::write(root.join("calc.py"), CALC).unwrap();
    fs::create_dir(root.join("tests")).unwrap();
    fs::write(root.join("tests/test_calc.py"), TEST_CALC).unwrap();
    fs::write(
        root.join("coverage.json"),
        r#"{"meta": {"version": "7.4.0"}, "files": {"calc.py": {"executed_lines": [1, 2, 5, 6, 8], "missing_lines": [7, 8]}}}"#,
    )
    .unwrap();

    git(root, &["init", "-q"]);
    git(root, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    git(root, &["config", "user.name", "Steward Test"]);
    git(root, &["config", "user.email", "steward@example.com"]);
    git(root, &["config", "commit.gpgsign", "false"]);
    git(root, &["add", "-A"]);
    git(root, &["commit", "-q", "-m", "initial"]);
    temp_dir
}

fn tracked_files(dir: &Path) -> Vec<String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(["ls-files"])
        .output()
        .unwrap();
    String::from_utf8(output.stdout)
        .unwrap()
        .lines()
        .map(String::from)
        .collect()
}

#[tokio::test]
async fn test_sync_coverage_and_repair_cycle() {
    let project = create_project();

    // Default store location, inside the project
    let steward = Steward::open(project.path(), Config::default()).unwrap();

    // Sync
    let sync = steward.sync().await.unwrap();
    assert_eq!(sync.files_scanned, 2);
    assert_eq!(sync.entities_created, 3);
    assert_eq!(sync.tests_linked, 1);

    // Coverage
    let coverage = steward.update_coverage(None, false).unwrap();
    assert_eq!(coverage.tested, 1);
    assert_eq!(coverage.untested, 1);

    let functions = steward.store().functions().unwrap();
    let add = functions.iter().find(|f| f.name == "add").unwrap();
    let div = functions.iter().find(|f| f.name == "div").unwrap();
    assert_eq!(add.test_status, CoverageStatus::Tested);
    assert!(add.missing_lines.is_empty());
    assert_eq!(div.test_status, CoverageStatus::Untested);
    assert_eq!(div.missing_lines, vec![7, 8]);

    // Test run
    let runner = ScriptedRunner {
        root: steward.root().to_path_buf(),
    };
    let run = steward.run_tests(&runner).unwrap();
    assert_eq!(run.failed, 1);

    // Repair
    let oracle = ScriptedOracle {
        requests: Mutex::new(Vec::new()),
    };
    let vcs = GitCli::discover(steward.root())
        .unwrap()
        .excluding_store(steward.store().path().unwrap());
    let report = steward.repair(&oracle, &vcs, &runner, None).await.unwrap();

    assert!(report.merged);
    assert_eq!(report.oracle_calls, 1);
    assert_eq!(report.tests.len(), 1);
    assert_eq!(report.tests[0].state, RepairState::Passing);
    assert_eq!(report.tests[0].identifier, "tests/test_calc.py::test_add");
    assert!(report.branch.as_deref().unwrap().starts_with("main_repair_"));

    let requests = oracle.requests.lock().unwrap();
    assert_eq!(requests[0].function_code, "def add(a, b):\n    return a + b");
    assert_eq!(requests[0].failure_output, "E       assert 2 == 3");
    assert_eq!((requests[0].start_line, requests[0].end_line), (Some(1), Some(2)));

    // Back on main with the repair merged
    assert_eq!(vcs.current_branch().unwrap(), "main");
    let content = fs::read_to_string(project.path().join("tests/test_calc.py")).unwrap();
    assert!(content.starts_with("from calc import add\nimport pytest\n"));
    assert!(content.contains(REPAIR_MARKER));
    let tracked = tracked_files(project.path());
    assert!(tracked.contains(&"tests/test_calc.py".to_string()));
    assert!(tracked.iter().all(|file| !file.starts_with("code.db")));

    let tests = steward.store().tests().unwrap();
    assert_eq!(tests[0].outcome, TestOutcome::Pass);
    assert!(tests[0].source_text.contains(REPAIR_MARKER));

    // Nothing left to repair: no branch, no oracle call
    let again = steward.repair(&oracle, &vcs, &runner, None).await.unwrap();
    assert!(again.branch.is_none());
    assert_eq!(again.oracle_calls, 0);
}

#[tokio::test]
async fn test_untested_listing_after_coverage() {
    let project = create_project();
    let store_dir = TempDir::new().unwrap();

    let mut config = Config::default();
    config.store.db_path = store_dir.path().join("code.db");
    let steward = Steward::open(project.path(), config).unwrap();

    steward.sync().await.unwrap();
    steward
        .update_coverage(Some(Path::new("coverage.json")), false)
        .unwrap();

    let untested = steward.list(Some(EntityKind::Function), true).unwrap();
    assert_eq!(untested.len(), 1);
    assert_eq!(untested[0].name(), "div");

    // Re-applying the same report changes nothing
    let before = steward.store().functions().unwrap();
    steward.update_coverage(None, false).unwrap();
    let after = steward.store().functions().unwrap();
    assert_eq!(
        before.iter().map(|f| f.missing_lines.clone()).collect::<Vec<_>>(),
        after.iter().map(|f| f.missing_lines.clone()).collect::<Vec<_>>()
    );
}
