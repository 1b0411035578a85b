use clap::{Parser, Subcommand};
use code_steward::types::EntityKind;
use std::path::PathBuf;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_COMMIT_HASH"),
    ", built ",
    env!("BUILD_TIMESTAMP"),
    ")"
);

/// code-steward: code knowledge base and test repair for Python projects
#[derive(Parser, Debug)]
#[command(name = "code-steward", version, long_version = LONG_VERSION)]
#[command(about = "Track classes, functions and tests of a Python project and repair failing tests", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to the platform config path)
    #[arg(long, global = true, env = "CODE_STEWARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Project root to operate on
    #[arg(long, global = true, default_value = ".")]
    pub root: PathBuf,

    /// Entity store path, overriding the configuration
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Extract classes, functions and tests into the store and link tests
    Sync,

    /// Map a coverage report onto stored classes and functions
    Coverage {
        /// Report to read instead of the configured one
        #[arg(long)]
        report: Option<PathBuf>,

        /// Read an existing report without running the coverage commands
        #[arg(long, default_value_t = false)]
        no_run: bool,
    },

    /// Run every stored test and record pass or fail
    RunTests,

    /// Repair failing tests on an isolation branch
    Repair {
        /// Oracle calls allowed per failing test
        #[arg(long)]
        max_attempts: Option<u32>,
    },

    /// Write tests for functions that have none
    GenerateTests {
        /// Write into the working tree without creating a branch
        #[arg(long, default_value_t = false)]
        no_branch: bool,
    },

    /// List stored entities
    List {
        /// Only this kind (class, function or test)
        #[arg(long)]
        kind: Option<EntityKind>,

        /// Only classes and functions with unexecuted lines
        #[arg(long, default_value_t = false)]
        untested: bool,
    },

    /// Delete every stored entity
    Reset,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let cli = Cli::try_parse_from(["code-steward", "sync"]).unwrap();
        assert_eq!(cli.command, Command::Sync);
        assert_eq!(cli.root, PathBuf::from("."));
        assert!(cli.db.is_none());
        assert!(!cli.verbose);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "code-steward",
            "repair",
            "--max-attempts",
            "5",
            "--root",
            "/workspace",
            "--db",
            "/tmp/code.db",
            "-v",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Command::Repair {
                max_attempts: Some(5)
            }
        );
        assert_eq!(cli.root, PathBuf::from("/workspace"));
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/code.db")));
        assert!(cli.verbose);
    }

    #[test]
    fn test_coverage_flags() {
        let cli = Cli::try_parse_from([
            "code-steward",
            "coverage",
            "--report",
            "out/coverage.json",
            "--no-run",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Command::Coverage {
                report: Some(PathBuf::from("out/coverage.json")),
                no_run: true
            }
        );
    }

    #[test]
    fn test_list_kind_parses() {
        let cli =
            Cli::try_parse_from(["code-steward", "list", "--kind", "functions", "--untested"])
                .unwrap();
        assert_eq!(
            cli.command,
            Command::List {
                kind: Some(EntityKind::Function),
                untested: true
            }
        );

        assert!(Cli::try_parse_from(["code-steward", "list", "--kind", "module"]).is_err());
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["code-steward"]).is_err());
    }
}
