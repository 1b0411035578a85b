//! Glob pattern matching for the scan include filters

use globset::{Glob, GlobMatcher};

/// Check if a relative path matches any of the given glob patterns.
///
/// Patterns also match any trailing run of path components, so `pkg/**`
/// selects `src/pkg/mod.py` as well as `pkg/mod.py`.
///
/// # Examples
///
/// ```
/// use code_steward::glob_utils::matches_any_pattern;
///
/// let patterns = vec!["pkg/**".to_string(), "**/test_*.py".to_string()];
/// assert!(matches_any_pattern("pkg/core.py", &patterns));
/// assert!(matches_any_pattern("tests/test_core.py", &patterns));
/// assert!(!matches_any_pattern("scripts/run.py", &patterns));
/// ```
pub fn matches_any_pattern(path: &str, patterns: &[String]) -> bool {
    if patterns.is_empty() {
        return true;
    }

    patterns.iter().any(|pattern| match Glob::new(pattern) {
        Ok(glob) => matches_with_suffixes(path, &glob.compile_matcher()),
        Err(e) => {
            tracing::warn!(
                "Invalid glob pattern '{}', falling back to substring match: {}",
                pattern,
                e
            );
            path.contains(pattern.as_str())
        }
    })
}

/// Compile glob patterns once for repeated matching during a walk.
///
/// Returns None if any pattern fails to compile.
pub fn compile_patterns(patterns: &[String]) -> Option<Vec<GlobMatcher>> {
    patterns
        .iter()
        .map(|pattern| {
            Glob::new(pattern)
                .map(|g| g.compile_matcher())
                .map_err(|e| {
                    tracing::warn!("Failed to compile glob pattern '{}': {}", pattern, e);
                    e
                })
                .ok()
        })
        .collect()
}

/// Check a path against precompiled matchers; empty means match everything
pub fn matches_any_matcher(path: &str, matchers: &[GlobMatcher]) -> bool {
    if matchers.is_empty() {
        return true;
    }
    matchers.iter().any(|m| matches_with_suffixes(path, m))
}

fn matches_with_suffixes(path: &str, matcher: &GlobMatcher) -> bool {
    let trimmed = path.trim_start_matches('/');
    if matcher.is_match(path) || matcher.is_match(trimmed) {
        return true;
    }

    let parts: Vec<&str> = trimmed.split('/').collect();
    (1..parts.len()).any(|i| matcher.is_match(parts[i..].join("/")))
}
