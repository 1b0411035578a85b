//! File information structure for discovered source files

use std::path::PathBuf;

/// A Python source file found under the project root
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub path: PathBuf,
    /// Relative to the walk root, always `/`-separated
    pub relative_path: String,
    pub content: String,
}
