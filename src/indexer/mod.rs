//! Source discovery and entity extraction
//!
//! Walks a project tree for Python files and turns each one into class,
//! method and function records ready for the store.

mod entity_extractor;
mod file_info;
mod file_walker;

pub use entity_extractor::{EntityExtractor, is_test_unit};
pub use file_info::FileInfo;
pub use file_walker::FileWalker;
