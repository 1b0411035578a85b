//! Test generation for functions that no test references
//!
//! For each untested function the oracle writes a pytest test named by the
//! linker's convention, so the next link pass would resolve it on its own.
//! The test is appended to `tests/test_<module file>` and recorded in the
//! store already linked.

use crate::error::StoreError;
use crate::oracle::{Revision, RevisionOracle, TestRequest};
use crate::repair::merge_imports;
use crate::store::{EntityStore, NewTest};
use crate::types::FunctionEntity;
use anyhow::Context;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Conventional test name: `test_<Class>_<fn>` for methods, `test_<fn>`
/// otherwise
pub fn compute_test_name(function_name: &str, class_name: Option<&str>) -> String {
    match class_name {
        Some(class_name) => format!("test_{}_{}", class_name, function_name),
        None => format!("test_{}", function_name),
    }
}

/// Test file for a module: `<tests_dir>/test_<file name>`, slash-separated
pub fn test_file_for(function_file: &str, tests_dir: &Path) -> String {
    let file_name = function_file.rsplit('/').next().unwrap_or(function_file);
    let tests_dir = tests_dir.to_string_lossy().replace('\\', "/");
    let tests_dir = tests_dir.trim_end_matches('/');
    if tests_dir.is_empty() {
        format!("test_{}", file_name)
    } else {
        format!("{}/test_{}", tests_dir, file_name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedTest {
    pub function_id: i64,
    pub test_id: i64,
    pub test_name: String,
    pub file_path: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerationReport {
    pub generated: Vec<GeneratedTest>,
    /// Functions the oracle could not write a test for, or whose test could
    /// not be written to disk
    pub skipped: usize,
    /// Branch the tests were committed on, when generation was isolated
    pub branch: Option<String>,
}

pub struct TestGenerator<'a> {
    store: &'a EntityStore,
    oracle: &'a dyn RevisionOracle,
    root: PathBuf,
    tests_dir: PathBuf,
}

impl<'a> TestGenerator<'a> {
    pub fn new(
        store: &'a EntityStore,
        oracle: &'a dyn RevisionOracle,
        root: impl AsRef<Path>,
        tests_dir: impl AsRef<Path>,
    ) -> Self {
        Self {
            store,
            oracle,
            root: root.as_ref().to_path_buf(),
            tests_dir: tests_dir.as_ref().to_path_buf(),
        }
    }

    /// Generate one test for every function without tests
    pub async fn generate_missing(&self) -> Result<GenerationReport, StoreError> {
        let functions = self.store.functions_without_tests()?;
        tracing::info!("{} function(s) without tests", functions.len());

        let mut report = GenerationReport::default();
        for function in &functions {
            match self.generate_for(function).await? {
                Some(generated) => report.generated.push(generated),
                None => report.skipped += 1,
            }
        }

        tracing::info!(
            "Generated {} test(s), skipped {}",
            report.generated.len(),
            report.skipped
        );
        Ok(report)
    }

    async fn generate_for(
        &self,
        function: &FunctionEntity,
    ) -> Result<Option<GeneratedTest>, StoreError> {
        let class_name = match function.class_id {
            Some(class_id) => Some(self.store.class(class_id)?.name),
            None => None,
        };
        let test_name = compute_test_name(&function.name, class_name.as_deref());
        let test_file = test_file_for(&function.file_path, &self.tests_dir);

        let request = TestRequest {
            function_code: function.source_text.clone(),
            function_file: function.file_path.clone(),
            test_name: test_name.clone(),
        };
        let (code, imports) = match self.oracle.generate_test(&request).await {
            Revision::Revised { code, imports } => (code, imports),
            Revision::Failed { reason } => {
                tracing::warn!("No test generated for {}: {}", function.name, reason);
                return Ok(None);
            }
        };

        let (start_line, end_line) = match self.append_test(&test_file, &code, &imports) {
            Ok(span) => span,
            Err(e) => {
                tracing::warn!("Skipping {}: {:#}", function.name, e);
                return Ok(None);
            }
        };

        let upsert = self.store.insert_test(&NewTest {
            name: test_name.clone(),
            source_text: code.trim_end().to_string(),
            file_path: test_file.clone(),
            start_line,
            end_line,
            function_id: Some(function.id),
            class_id: function.class_id,
            class_test: Some(function.class_id.is_some()),
        })?;
        tracing::debug!("Wrote {} to {}", test_name, test_file);

        Ok(Some(GeneratedTest {
            function_id: function.id,
            test_id: upsert.id,
            test_name,
            file_path: test_file,
        }))
    }

    /// Merge imports into the test file, append the test and return its span
    fn append_test(
        &self,
        test_file: &str,
        code: &str,
        imports: &[String],
    ) -> anyhow::Result<(u32, u32)> {
        let path = self.root.join(test_file);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let existing = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };

        let (merged, _) = merge_imports(&existing, imports);
        let head = merged.trim_end_matches('\n');
        let code = code.trim_end();

        let (content, start_line) = if head.trim().is_empty() {
            (format!("{}\n", code), 1)
        } else {
            let head_lines = head.lines().count() as u32;
            (format!("{}\n\n\n{}\n", head, code), head_lines + 3)
        };
        let end_line = start_line + code.lines().count().max(1) as u32 - 1;

        fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok((start_line, end_line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::RevisionRequest;
    use crate::types::CodeUnit;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Writes `def <test_name>(): assert True`, or fails for listed names
    struct ScriptedOracle {
        refuse: Vec<String>,
        requests: Mutex<Vec<TestRequest>>,
    }

    impl ScriptedOracle {
        fn new(refuse: &[&str]) -> Self {
            Self {
                refuse: refuse.iter().map(|s| s.to_string()).collect(),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RevisionOracle for ScriptedOracle {
        async fn revise(&self, _request: &RevisionRequest) -> Revision {
            Revision::failed("not used")
        }

        async fn generate_test(&self, request: &TestRequest) -> Revision {
            self.requests.lock().unwrap().push(request.clone());
            if self.refuse.contains(&request.test_name) {
                return Revision::failed("model refused");
            }
            Revision::Revised {
                code: format!("def {}():\n    assert True\n", request.test_name),
                imports: vec!["import pytest".to_string()],
            }
        }
    }

    fn unit(name: &str, start_line: u32, end_line: u32) -> CodeUnit {
        CodeUnit {
            name: name.to_string(),
            source_text: format!("def {}():\n    pass", name),
            docstring: String::new(),
            start_line,
            end_line,
        }
    }

    #[test]
    fn test_compute_test_name() {
        assert_eq!(compute_test_name("add", None), "test_add");
        assert_eq!(
            compute_test_name("add", Some("Calculator")),
            "test_Calculator_add"
        );
    }

    #[test]
    fn test_test_file_for_uses_module_file_name() {
        assert_eq!(
            test_file_for("pkg/calc.py", Path::new("tests")),
            "tests/test_calc.py"
        );
        assert_eq!(test_file_for("calc.py", Path::new("tests/")), "tests/test_calc.py");
        assert_eq!(test_file_for("calc.py", Path::new("")), "test_calc.py");
    }

    #[tokio::test]
    async fn test_generates_linked_tests() {
        let temp_dir = TempDir::new().unwrap();
        let store = EntityStore::open_in_memory().unwrap();

        let add = store.upsert_function(&unit("add", 1, 2), "pkg/calc.py", None).unwrap().id;
        let class_unit = CodeUnit {
            name: "Calculator".to_string(),
            source_text: "class Calculator:\n    def mul(self):\n        pass".to_string(),
            docstring: String::new(),
            start_line: 4,
            end_line: 6,
        };
        let class_id = store.upsert_class(&class_unit, "pkg/calc.py").unwrap().id;
        let mul = store
            .upsert_function(&unit("mul", 5, 6), "pkg/calc.py", Some(class_id))
            .unwrap()
            .id;

        let oracle = ScriptedOracle::new(&[]);
        let generator = TestGenerator::new(&store, &oracle, temp_dir.path(), "tests");
        let report = generator.generate_missing().await.unwrap();

        assert_eq!(report.generated.len(), 2);
        assert_eq!(report.skipped, 0);
        assert!(store.functions_without_tests().unwrap().is_empty());

        let content = fs::read_to_string(temp_dir.path().join("tests/test_calc.py")).unwrap();
        assert_eq!(
            content,
            "import pytest\n\n\ndef test_add():\n    assert True\n\n\ndef test_Calculator_mul():\n    assert True\n"
        );

        let add_tests = store.tests_for_function(add).unwrap();
        assert_eq!(add_tests.len(), 1);
        assert_eq!(add_tests[0].name, "test_add");
        assert_eq!(add_tests[0].class_test, Some(false));
        assert_eq!((add_tests[0].start_line, add_tests[0].end_line), (4, 5));

        let mul_tests = store.tests_for_function(mul).unwrap();
        assert_eq!(mul_tests[0].name, "test_Calculator_mul");
        assert_eq!(mul_tests[0].class_id, Some(class_id));
        assert_eq!(mul_tests[0].class_test, Some(true));
        assert_eq!((mul_tests[0].start_line, mul_tests[0].end_line), (8, 9));

        let requests = oracle.requests.lock().unwrap();
        assert_eq!(requests[0].function_file, "pkg/calc.py");
    }

    #[tokio::test]
    async fn test_oracle_failure_skips_function() {
        let temp_dir = TempDir::new().unwrap();
        let store = EntityStore::open_in_memory().unwrap();
        store.upsert_function(&unit("add", 1, 2), "calc.py", None).unwrap();
        store.upsert_function(&unit("sub", 4, 5), "calc.py", None).unwrap();

        let oracle = ScriptedOracle::new(&["test_add"]);
        let generator = TestGenerator::new(&store, &oracle, temp_dir.path(), "tests");
        let report = generator.generate_missing().await.unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.generated.len(), 1);
        assert_eq!(report.generated[0].test_name, "test_sub");

        let remaining = store.functions_without_tests().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].name, "add");
    }

    #[tokio::test]
    async fn test_appends_to_existing_file() {
        let temp_dir = TempDir::new().unwrap();
        let tests_dir = temp_dir.path().join("tests");
        fs::create_dir(&tests_dir).unwrap();
        fs::write(
            tests_dir.join("test_calc.py"),
            "import pytest\nfrom calc import sub\n\n\ndef test_sub():\n    assert sub(2, 1) == 1\n",
        )
        .unwrap();

        let store = EntityStore::open_in_memory().unwrap();
        store.upsert_function(&unit("add", 1, 2), "calc.py", None).unwrap();

        let oracle = ScriptedOracle::new(&[]);
        let generator = TestGenerator::new(&store, &oracle, temp_dir.path(), "tests");
        generator.generate_missing().await.unwrap();

        let content = fs::read_to_string(tests_dir.join("test_calc.py")).unwrap();
        assert_eq!(content.matches("import pytest").count(), 1);
        assert!(content.ends_with(
            "assert sub(2, 1) == 1\n\n\ndef test_add():\n    assert True\n"
        ));
    }

    #[tokio::test]
    async fn test_nothing_to_generate() {
        let temp_dir = TempDir::new().unwrap();
        let store = EntityStore::open_in_memory().unwrap();
        let oracle = ScriptedOracle::new(&[]);

        let report = TestGenerator::new(&store, &oracle, temp_dir.path(), "tests")
            .generate_missing()
            .await
            .unwrap();
        assert!(report.generated.is_empty());
        assert!(oracle.requests.lock().unwrap().is_empty());
        assert!(!temp_dir.path().join("tests").exists());
    }
}
