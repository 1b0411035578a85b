//! Revision oracle: the language model that rewrites failing tests and
//! writes new ones
//!
//! The repair loop and the test generator only see the [`RevisionOracle`]
//! trait. [`ChatOracle`] implements it against an OpenAI-compatible
//! chat-completions endpoint.

mod chat;
pub mod prompts;

pub use chat::ChatOracle;

use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use std::time::Duration;

/// Everything the oracle is told about a failing test
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RevisionRequest {
    pub test_name: String,
    pub test_code: String,
    /// Source of the function under test, empty when the test is unlinked
    pub function_code: String,
    pub failure_output: String,
    pub start_line: Option<u32>,
    pub end_line: Option<u32>,
    pub missing_lines: Vec<u32>,
}

/// A request for a brand new test
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestRequest {
    pub function_code: String,
    /// File holding the function, relative to the project root
    pub function_file: String,
    pub test_name: String,
}

/// Oracle answer. Failures are values, not errors: the caller consumes an
/// attempt and moves on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Revision {
    Revised { code: String, imports: Vec<String> },
    Failed { reason: String },
}

impl Revision {
    pub fn failed(reason: impl Into<String>) -> Self {
        Revision::Failed {
            reason: reason.into(),
        }
    }
}

#[async_trait]
pub trait RevisionOracle: Send + Sync {
    /// Propose a new body for a failing test
    async fn revise(&self, request: &RevisionRequest) -> Revision;

    /// Write a test for a function that has none
    async fn generate_test(&self, request: &TestRequest) -> Revision;
}

/// Exponential backoff with uniform jitter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub max_tries: u32,
    pub initial_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
    pub jitter_min: Duration,
    pub jitter_max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_tries: 5,
            initial_delay: Duration::from_secs(1),
            factor: 2.0,
            max_delay: Duration::from_secs(16),
            jitter_min: Duration::from_secs(1),
            jitter_max: Duration::from_secs(3),
        }
    }
}

impl BackoffPolicy {
    /// A policy that retries immediately
    pub fn immediate(max_tries: u32) -> Self {
        Self {
            max_tries,
            initial_delay: Duration::ZERO,
            factor: 1.0,
            max_delay: Duration::ZERO,
            jitter_min: Duration::ZERO,
            jitter_max: Duration::ZERO,
        }
    }

    /// Delay before retrying after failed `attempt` (1-based), without jitter:
    /// `min(initial * factor^(attempt-1), max)`
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let scaled = self.initial_delay.as_secs_f64() * self.factor.powi(exponent);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Base delay plus a random jitter drawn from `[jitter_min, jitter_max]`
    pub fn delay_with_jitter(&self, attempt: u32) -> Duration {
        let min = self.jitter_min.as_millis() as u64;
        let max = (self.jitter_max.as_millis() as u64).max(min);
        let jitter = if max == min {
            min
        } else {
            rand::thread_rng().gen_range(min..=max)
        };
        self.base_delay(attempt) + Duration::from_millis(jitter)
    }
}
