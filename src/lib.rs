//! # code-steward - Code Knowledge Base and Test Repair for Python Projects
//!
//! Keeps a queryable model of a Python codebase (classes, functions and their
//! tests) in SQLite, annotates it with coverage results and repairs failing
//! tests through a language-model oracle under bounded retries, isolated on
//! a git branch.
//!
//! ## Architecture
//!
//! ```text
//!  .py files ──► EntityExtractor ──► EntityStore ◄── Test Linker
//!                  (tree-sitter)      (SQLite)
//!                                        ▲  ▲
//!              coverage.json ──► CoverageMapper
//!                                           │
//!                  RepairLoop ──────────────┘
//!                 /    |     \
//!     RevisionOracle  git  TestRunner
//! ```
//!
//! ## Modules
//!
//! - [`client`]: [`Steward`], which runs each pass against one project
//! - [`indexer`]: file walking and entity extraction
//! - [`store`]: SQLite entity store
//! - [`linker`]: test to function/class association by naming convention
//! - [`coverage`]: coverage report ingestion
//! - [`repair`]: the test repair loop
//! - [`testgen`]: test generation for untested functions
//! - [`oracle`], [`vcs`], [`runner`]: the loop's external collaborators
//! - [`config`], [`error`], [`paths`], [`types`]: shared plumbing
//!
//! ## Usage Example
//!
//! ```no_run
//! use code_steward::{Config, Steward};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let steward = Steward::open(".", Config::load(None)?)?;
//!     steward.sync().await?;
//!     let summary = steward.update_coverage(None, true)?;
//!     println!("{} untested", summary.untested);
//!     Ok(())
//! }
//! ```

/// High-level client running sync, coverage, test, repair and generation passes
pub mod client;

/// Configuration management with environment variable overrides
pub mod config;

/// Coverage report parsing and mapping onto stored entities
pub mod coverage;

/// Error types and utilities
pub mod error;

/// Glob pattern matching utilities
pub mod glob_utils;

/// File walking and Python entity extraction
pub mod indexer;

/// Naming-convention linker between tests and the code they exercise
pub mod linker;

/// Language-model revision oracle
pub mod oracle;

/// Platform configuration paths
pub mod paths;

/// Bounded-retry test repair loop
pub mod repair;

/// External test runner
pub mod runner;

/// SQLite-backed entity store
pub mod store;

/// Test generation for functions without tests
pub mod testgen;

/// Entity and report types
pub mod types;

/// Version control used for branch isolation
pub mod vcs;

pub use client::{Steward, TestRunSummary};
pub use config::Config;
pub use error::StewardError;
pub use store::EntityStore;
