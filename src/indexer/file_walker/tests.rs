//! Tests for FileWalker

use super::*;
use std::fs;
use tempfile::TempDir;

fn names(files: &[FileInfo]) -> Vec<&str> {
    files.iter().map(|f| f.relative_path.as_str()).collect()
}

#[test]
fn test_new() {
    let walker = FileWalker::new("/tmp", 1024);
    assert_eq!(walker.root, PathBuf::from("/tmp"));
    assert_eq!(walker.max_file_size, 1024);
    assert!(walker.include_patterns.is_empty());
    assert!(walker.exclude_patterns.is_empty());
}

#[test]
fn test_walk_nonexistent_directory() {
    let walker = FileWalker::new("/nonexistent/path/12345", 1024);
    let result = walker.walk();
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("does not exist"));
}

#[test]
fn test_walk_not_a_directory() {
    let temp_dir = TempDir::new().unwrap();
    let file_path = temp_dir.path().join("module.py");
    fs::write(&file_path, "x = 1\n").unwrap();

    let walker = FileWalker::new(&file_path, 1024);
    let result = walker.walk();
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("not a directory"));
}

#[test]
fn test_walk_only_python_files() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("calc.py"), "def add(a, b):\n    return a + b\n").unwrap();
    fs::write(temp_dir.path().join("README.md"), "# calc").unwrap();
    fs::write(temp_dir.path().join("setup.cfg"), "[metadata]").unwrap();

    let walker = FileWalker::new(temp_dir.path(), 1024);
    let files = walker.walk().unwrap();
    assert_eq!(names(&files), vec!["calc.py"]);
    assert!(files[0].content.contains("def add"));
}

#[test]
fn test_walk_nested_paths_are_relative_and_sorted() {
    let temp_dir = TempDir::new().unwrap();
    let tests_dir = temp_dir.path().join("tests");
    fs::create_dir(&tests_dir).unwrap();
    fs::write(tests_dir.join("test_calc.py"), "def test_add():\n    pass\n").unwrap();
    fs::write(temp_dir.path().join("calc.py"), "x = 1\n").unwrap();

    let walker = FileWalker::new(temp_dir.path(), 1024);
    let files = walker.walk().unwrap();
    assert_eq!(names(&files), vec!["calc.py", "tests/test_calc.py"]);
}

#[test]
fn test_walk_max_file_size() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("small.py"), "x = 1\n").unwrap();
    fs::write(temp_dir.path().join("large.py"), "#".repeat(2000)).unwrap();

    let walker = FileWalker::new(temp_dir.path(), 100);
    let files = walker.walk().unwrap();
    assert_eq!(names(&files), vec!["small.py"]);
}

#[test]
fn test_walk_with_include_globs() {
    let temp_dir = TempDir::new().unwrap();
    let pkg = temp_dir.path().join("pkg");
    fs::create_dir(&pkg).unwrap();
    fs::write(pkg.join("core.py"), "x = 1\n").unwrap();
    fs::write(temp_dir.path().join("scratch.py"), "y = 2\n").unwrap();

    let walker = FileWalker::new(temp_dir.path(), 1024)
        .with_patterns(vec!["pkg/**".to_string()], vec![]);
    let files = walker.walk().unwrap();
    assert_eq!(names(&files), vec!["pkg/core.py"]);
}

#[test]
fn test_walk_with_exclude_patterns() {
    let temp_dir = TempDir::new().unwrap();
    let venv = temp_dir.path().join("venv").join("lib");
    fs::create_dir_all(&venv).unwrap();
    fs::write(venv.join("site.py"), "z = 3\n").unwrap();
    fs::write(temp_dir.path().join("app.py"), "x = 1\n").unwrap();

    let walker = FileWalker::new(temp_dir.path(), 1024)
        .with_patterns(vec![], vec!["venv/".to_string()]);
    let files = walker.walk().unwrap();
    assert_eq!(names(&files), vec!["app.py"]);
}

#[test]
fn test_walk_skips_invalid_utf8() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("valid.py"), "x = 1\n").unwrap();
    fs::write(temp_dir.path().join("invalid.py"), [0xFF, 0xFE, 0xFD]).unwrap();

    let walker = FileWalker::new(temp_dir.path(), 1024);
    let files = walker.walk().unwrap();
    assert_eq!(names(&files), vec!["valid.py"]);
}

#[test]
fn test_walk_skips_binary_files() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("text.py"), "x = 1\n").unwrap();
    fs::write(temp_dir.path().join("blob.py"), vec![0x00; 100]).unwrap();

    let walker = FileWalker::new(temp_dir.path(), 1024);
    let files = walker.walk().unwrap();
    assert_eq!(names(&files), vec!["text.py"]);
}

#[test]
fn test_walk_respects_gitignore() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join(".gitignore"), "generated.py\n").unwrap();
    fs::write(temp_dir.path().join("kept.py"), "x = 1\n").unwrap();
    fs::write(temp_dir.path().join("generated.py"), "y = 2\n").unwrap();

    let walker = FileWalker::new(temp_dir.path(), 1024);
    let files = walker.walk().unwrap();
    assert_eq!(names(&files), vec!["kept.py"]);
}

#[test]
fn test_empty_file_is_text() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("__init__.py");
    fs::write(&path, "").unwrap();

    let walker = FileWalker::new(temp_dir.path(), 1024);
    assert!(walker.is_text_file(&path).unwrap());
}

#[test]
fn test_is_text_file_nonexistent() {
    let walker = FileWalker::new("/tmp", 1024);
    assert!(walker.is_text_file(Path::new("/nonexistent/file.py")).is_err());
}

#[test]
fn test_matches_patterns_no_patterns() {
    let walker = FileWalker::new("/tmp", 1024);
    assert!(walker.matches_patterns("src/app.py", None));
}

#[test]
fn test_matches_patterns_include_and_exclude() {
    let walker = FileWalker::new("/tmp", 1024)
        .with_patterns(vec!["src/**".to_string()], vec!["migrations".to_string()]);
    let matchers = compile_patterns(&walker.include_patterns);
    let matchers = matchers.as_deref();

    assert!(walker.matches_patterns("src/app.py", matchers));
    assert!(!walker.matches_patterns("src/migrations/0001.py", matchers));
    assert!(!walker.matches_patterns("scripts/run.py", matchers));
}

#[test]
fn test_relative_slash_path() {
    let root = Path::new("/project");
    let path = Path::new("/project/pkg/sub/mod.py");
    assert_eq!(relative_slash_path(root, path), "pkg/sub/mod.py");
}
