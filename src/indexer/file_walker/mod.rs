//! File walking functionality for directory traversal

use super::file_info::FileInfo;
use crate::glob_utils::{compile_patterns, matches_any_matcher};
use anyhow::{Context, Result};
use globset::GlobMatcher;
use ignore::WalkBuilder;
use std::fs;
use std::path::{Path, PathBuf};

/// Extensions treated as Python source
const PYTHON_EXTENSIONS: &[&str] = &["py"];

pub struct FileWalker {
    pub(crate) root: PathBuf,
    pub(crate) max_file_size: usize,
    /// Glob patterns; when non-empty a file must match one of them
    pub(crate) include_patterns: Vec<String>,
    /// Plain substrings; a file whose path contains any of them is skipped
    pub(crate) exclude_patterns: Vec<String>,
}

impl FileWalker {
    pub fn new(root: impl AsRef<Path>, max_file_size: usize) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            max_file_size,
            include_patterns: vec![],
            exclude_patterns: vec![],
        }
    }

    pub fn with_patterns(
        mut self,
        include_patterns: Vec<String>,
        exclude_patterns: Vec<String>,
    ) -> Self {
        self.include_patterns = include_patterns;
        self.exclude_patterns = exclude_patterns;
        self
    }

    /// Walk the directory and collect every eligible Python file, sorted by
    /// relative path so repeated scans visit files in the same order
    pub fn walk(&self) -> Result<Vec<FileInfo>> {
        if !self.root.exists() {
            anyhow::bail!("Root directory does not exist: {:?}", self.root);
        }
        if !self.root.is_dir() {
            anyhow::bail!("Root path is not a directory: {:?}", self.root);
        }

        // Invalid globs fall back to the slower per-pattern matcher
        let include_matchers = compile_patterns(&self.include_patterns);

        let mut files = Vec::new();

        let walker = WalkBuilder::new(&self.root)
            .standard_filters(true)
            .hidden(false)
            .git_ignore(true)
            .git_exclude(true)
            .git_global(true)
            .require_git(false)
            .build();

        for entry in walker {
            let entry = entry.context("Failed to read directory entry")?;
            let path = entry.path();

            if path.is_dir() || !is_python_file(path) {
                continue;
            }

            if path.components().any(|c| c.as_os_str() == ".git") {
                continue;
            }

            if let Ok(metadata) = fs::metadata(path)
                && metadata.len() > self.max_file_size as u64
            {
                tracing::debug!("Skipping large file: {:?}", path);
                continue;
            }

            let relative_path = relative_slash_path(&self.root, path);

            if !self.matches_patterns(&relative_path, include_matchers.as_deref()) {
                continue;
            }

            if !self.is_text_file(path)? {
                tracing::debug!("Skipping binary file: {:?}", path);
                continue;
            }

            let content = match fs::read_to_string(path) {
                Ok(c) => c,
                Err(e) => {
                    tracing::debug!(
                        "Skipping file that can't be read as UTF-8: {:?}: {}",
                        path,
                        e
                    );
                    continue;
                }
            };

            files.push(FileInfo {
                path: path.to_path_buf(),
                relative_path,
                content,
            });
        }

        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        tracing::info!("Found {} Python files under {:?}", files.len(), self.root);
        Ok(files)
    }

    /// Check if a file is likely text (not binary)
    pub(crate) fn is_text_file(&self, path: &Path) -> Result<bool> {
        let content = fs::read(path).context("Failed to read file")?;
        if content.is_empty() {
            return Ok(true);
        }

        // More than 30% control bytes means binary
        let non_printable = content
            .iter()
            .filter(|&&b| b < 0x20 && b != b'\n' && b != b'\r' && b != b'\t')
            .count();

        Ok((non_printable as f64 / content.len() as f64) < 0.3)
    }

    /// Check a relative path against the include globs and exclude substrings
    pub(crate) fn matches_patterns(
        &self,
        relative_path: &str,
        include_matchers: Option<&[GlobMatcher]>,
    ) -> bool {
        if !self.include_patterns.is_empty() {
            let included = match include_matchers {
                Some(matchers) => matches_any_matcher(relative_path, matchers),
                None => crate::glob_utils::matches_any_pattern(
                    relative_path,
                    &self.include_patterns,
                ),
            };
            if !included {
                return false;
            }
        }

        !self
            .exclude_patterns
            .iter()
            .any(|pattern| relative_path.contains(pattern.as_str()))
    }
}

fn is_python_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| PYTHON_EXTENSIONS.contains(&ext))
}

/// Relative path with `/` separators on every platform
pub(crate) fn relative_slash_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests;
