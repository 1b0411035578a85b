/// Centralized error types for code-steward using thiserror
///
/// Each component gets its own enum so callers can decide which failures are
/// fatal to a pass and which only skip one unit of work.
use thiserror::Error;

/// Main error type for the steward
#[derive(Error, Debug)]
pub enum StewardError {
    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Coverage error: {0}")]
    Coverage(#[from] CoverageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Git error: {0}")]
    Git(#[from] GitCommandError),

    #[error("Test runner error: {0}")]
    Runner(#[from] RunnerError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Errors raised while turning source text into entity records
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Failed to load the Python grammar: {0}")]
    LanguageSetup(String),

    #[error("Syntax error near line {line}")]
    ParseFailed { line: usize },

    #[error("Parser produced no tree")]
    NoTree,
}

/// Errors from the SQLite-backed entity store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to create store directory '{path}': {reason}")]
    DirectoryCreationFailed { path: String, reason: String },

    #[error("Corrupted column '{column}': {reason}")]
    CorruptedColumn { column: String, reason: String },

    #[error("{kind} with id {id} not found")]
    NotFound { kind: String, id: i64 },

    #[error("Operation '{operation}' does not apply to {kind} entities")]
    UnsupportedKind { operation: String, kind: String },
}

/// Errors while collecting or reading coverage data
#[derive(Error, Debug)]
pub enum CoverageError {
    #[error("Failed to read coverage report '{path}': {reason}")]
    ReportRead { path: String, reason: String },

    #[error("Failed to parse coverage report: {0}")]
    ReportParse(String),

    #[error("Coverage command `{command}` failed: {detail}")]
    CommandFailed { command: String, detail: String },
}

/// Errors related to configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration file: {0}")]
    LoadFailed(String),

    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    #[error("Invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

/// A version-control command exited unsuccessfully or could not be spawned.
///
/// Carries the full command line so a failed repair run can be reproduced by hand.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("git command `{command}` failed: {detail}")]
pub struct GitCommandError {
    pub command: String,
    pub detail: String,
}

impl GitCommandError {
    pub fn new(command: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            detail: detail.into(),
        }
    }
}

/// Errors from the test-runner process
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Failed to spawn `{program}`: {reason}")]
    SpawnFailed { program: String, reason: String },
}

/// Errors talking to the revision oracle. These never escape the oracle;
/// after retries they degrade to a failed revision.
#[derive(Error, Debug)]
pub enum OracleError {
    #[error("Request failed: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed oracle response: {0}")]
    Decode(String),

    #[error("Missing API key (set {0})")]
    MissingApiKey(String),
}

impl From<anyhow::Error> for StewardError {
    fn from(err: anyhow::Error) -> Self {
        StewardError::Other(format!("{:#}", err))
    }
}

impl StewardError {
    /// Create a new error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        StewardError::Other(msg.into())
    }

    /// Check if this is a user error (bad input or configuration) vs system error
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            StewardError::Config(_) | StewardError::Coverage(CoverageError::ReportParse(_))
        )
    }

    /// Check if this error is worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, StewardError::Oracle(err) if err.is_retryable())
            || matches!(self, StewardError::Io(_))
    }
}

impl OracleError {
    /// Transport failures and server-side statuses are retried; decode
    /// failures and client errors are not going to improve on a second try.
    pub fn is_retryable(&self) -> bool {
        match self {
            OracleError::Transport(_) => true,
            OracleError::Status { status, .. } => *status == 429 || *status >= 500,
            OracleError::Decode(_) | OracleError::MissingApiKey(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StewardError::Extraction(ExtractionError::ParseFailed { line: 12 });
        assert_eq!(err.to_string(), "Extraction error: Syntax error near line 12");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: StewardError = io_err.into();
        assert!(matches!(err, StewardError::Io(_)));
    }

    #[test]
    fn test_error_from_anyhow() {
        let err: StewardError = anyhow::anyhow!("test error").into();
        assert!(matches!(err, StewardError::Other(_)));
    }

    #[test]
    fn test_git_command_error_carries_command() {
        let err = GitCommandError::new("git checkout -b repair", "branch already exists");
        assert_eq!(
            err.to_string(),
            "git command `git checkout -b repair` failed: branch already exists"
        );
        let wrapped: StewardError = err.clone().into();
        assert!(matches!(wrapped, StewardError::Git(ref e) if e == &err));
    }

    #[test]
    fn test_is_user_error() {
        let user_err = StewardError::Config(ConfigError::InvalidValue {
            key: "repair.max_attempts".to_string(),
            reason: "must be greater than 0".to_string(),
        });
        assert!(user_err.is_user_error());

        let system_err = StewardError::Io(std::io::Error::other("disk"));
        assert!(!system_err.is_user_error());
    }

    #[test]
    fn test_oracle_retryable() {
        assert!(OracleError::Transport("reset".to_string()).is_retryable());
        assert!(
            OracleError::Status {
                status: 503,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(
            OracleError::Status {
                status: 429,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(
            !OracleError::Status {
                status: 400,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(!OracleError::Decode("bad json".to_string()).is_retryable());
    }

    #[test]
    fn test_store_not_found_display() {
        let err = StoreError::NotFound {
            kind: "test".to_string(),
            id: 7,
        };
        assert_eq!(err.to_string(), "test with id 7 not found");
    }

    #[test]
    fn test_coverage_command_failed_display() {
        let err = CoverageError::CommandFailed {
            command: "coverage json".to_string(),
            detail: "exit status 1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Coverage command `coverage json` failed: exit status 1"
        );
    }
}
