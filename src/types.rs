use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of entity held by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Class,
    Function,
    Test,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Function => "function",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "class" | "classes" => Ok(Self::Class),
            "function" | "functions" => Ok(Self::Function),
            "test" | "tests" => Ok(Self::Test),
            other => Err(format!("unknown entity kind '{}'", other)),
        }
    }
}

/// Coverage-derived status of a class or function.
///
/// Recomputed wholesale by the coverage mapper; never touched by test runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageStatus {
    #[default]
    Unknown,
    Tested,
    Untested,
}

impl CoverageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Tested => "tested",
            Self::Untested => "untested",
        }
    }

    /// Parse a stored value; anything unrecognised reads as `Unknown`
    pub fn from_db(value: Option<&str>) -> Self {
        match value {
            Some("tested") => Self::Tested,
            Some("untested") => Self::Untested,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for CoverageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of the last run of a test. A separate axis from [`CoverageStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestOutcome {
    #[default]
    Unrun,
    Pass,
    Fail,
}

impl TestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unrun => "unrun",
            Self::Pass => "pass",
            Self::Fail => "fail",
        }
    }

    pub fn from_db(value: Option<&str>) -> Self {
        match value {
            Some("pass") => Self::Pass,
            Some("fail") => Self::Fail,
            _ => Self::Unrun,
        }
    }

    pub fn from_passed(passed: bool) -> Self {
        if passed { Self::Pass } else { Self::Fail }
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One syntactic unit produced by the extractor, before it is stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeUnit {
    pub name: String,
    /// Verbatim source of the definition (without decorators)
    pub source_text: String,
    /// Docstring contents, empty when the unit has none
    pub docstring: String,
    /// 1-based, inclusive
    pub start_line: u32,
    /// 1-based, inclusive
    pub end_line: u32,
}

/// A class and the methods defined directly in its body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedClass {
    pub unit: CodeUnit,
    pub methods: Vec<CodeUnit>,
}

/// Everything extracted from one source file, in source order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedFile {
    pub classes: Vec<ExtractedClass>,
    pub functions: Vec<CodeUnit>,
}

impl ExtractedFile {
    /// Find a function or method by name, top-level functions first
    pub fn find_unit(&self, name: &str) -> Option<&CodeUnit> {
        self.functions.iter().find(|f| f.name == name).or_else(|| {
            self.classes
                .iter()
                .flat_map(|c| c.methods.iter())
                .find(|m| m.name == name)
        })
    }

    pub fn unit_count(&self) -> usize {
        self.functions.len()
            + self
                .classes
                .iter()
                .map(|c| 1 + c.methods.len())
                .sum::<usize>()
    }
}

/// A stored class record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassEntity {
    pub id: i64,
    pub name: String,
    pub source_text: String,
    pub file_path: String,
    pub docstring: Option<String>,
    pub start_line: u32,
    pub end_line: u32,
    pub test_status: CoverageStatus,
    pub missing_lines: Vec<u32>,
}

/// A stored function or method record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionEntity {
    pub id: i64,
    pub name: String,
    pub source_text: String,
    pub file_path: String,
    pub docstring: Option<String>,
    pub start_line: u32,
    pub end_line: u32,
    pub test_status: CoverageStatus,
    pub missing_lines: Vec<u32>,
    /// Parent class, if this is a method. A lookup, not ownership.
    pub class_id: Option<i64>,
    /// True for module-level functions, false for methods
    pub is_function: bool,
}

/// A stored test record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestEntity {
    pub id: i64,
    pub name: String,
    pub source_text: String,
    pub file_path: String,
    pub docstring: Option<String>,
    pub start_line: u32,
    pub end_line: u32,
    pub function_id: Option<i64>,
    pub class_id: Option<i64>,
    /// Whether the test targets a class method; `None` until the linker decides
    pub class_test: Option<bool>,
    pub outcome: TestOutcome,
    /// Class the test is a method of, for tests written inside a class
    pub test_class: Option<String>,
}

impl TestEntity {
    /// Identifier understood by the test runner: `<file_path>::<name>`, or
    /// `<file_path>::<Class>::<name>` for test methods
    pub fn identifier(&self) -> String {
        match &self.test_class {
            Some(class_name) => format!("{}::{}::{}", self.file_path, class_name, self.name),
            None => format!("{}::{}", self.file_path, self.name),
        }
    }
}

/// Any stored entity, as returned by kind-agnostic queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    Class(ClassEntity),
    Function(FunctionEntity),
    Test(TestEntity),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Class(_) => EntityKind::Class,
            Entity::Function(_) => EntityKind::Function,
            Entity::Test(_) => EntityKind::Test,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Entity::Class(c) => c.id,
            Entity::Function(f) => f.id,
            Entity::Test(t) => t.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Entity::Class(c) => &c.name,
            Entity::Function(f) => &f.name,
            Entity::Test(t) => &t.name,
        }
    }

    pub fn file_path(&self) -> &str {
        match self {
            Entity::Class(c) => &c.file_path,
            Entity::Function(f) => &f.file_path,
            Entity::Test(t) => &t.file_path,
        }
    }

    /// Inclusive line span
    pub fn span(&self) -> (u32, u32) {
        match self {
            Entity::Class(c) => (c.start_line, c.end_line),
            Entity::Function(f) => (f.start_line, f.end_line),
            Entity::Test(t) => (t.start_line, t.end_line),
        }
    }
}

/// Per-kind entity counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntityCounts {
    pub classes: usize,
    pub functions: usize,
    pub tests: usize,
}

impl EntityCounts {
    pub fn total(&self) -> usize {
        self.classes + self.functions + self.tests
    }
}

/// Summary of one synchronization pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub files_scanned: usize,
    pub files_skipped: usize,
    pub entities_created: usize,
    /// Stored entities whose source no longer matches the file
    pub stale_entities: usize,
    pub tests_linked: usize,
    pub duration_ms: u64,
    /// Non-fatal problems (unparseable files, per-file store failures)
    #[serde(default)]
    pub errors: Vec<String>,
}
