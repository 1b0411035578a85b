mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command};
use code_steward::oracle::ChatOracle;
use code_steward::runner::PytestRunner;
use code_steward::types::Entity;
use code_steward::vcs::{GitCli, VersionControl};
use code_steward::{Config, Steward};
use serde::Serialize;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so reports on stdout stay machine-readable
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(db) = &cli.db {
        config.store.db_path = db.clone();
    }

    let steward = Steward::open(&cli.root, config)?;
    tracing::debug!("Project root: {}", steward.root().display());

    match cli.command {
        Command::Sync => print_json(&steward.sync().await?),
        Command::Coverage { report, no_run } => {
            print_json(&steward.update_coverage(report.as_deref(), !no_run)?)
        }
        Command::RunTests => {
            let runner = PytestRunner::new(&steward.config().runner, steward.root());
            print_json(&steward.run_tests(&runner)?)
        }
        Command::Repair { max_attempts } => {
            let oracle = ChatOracle::from_config(&steward.config().oracle)?;
            let vcs = git_for(&steward)?;
            let runner = PytestRunner::new(&steward.config().runner, steward.root());
            print_json(&steward.repair(&oracle, &vcs, &runner, max_attempts).await?)
        }
        Command::GenerateTests { no_branch } => {
            let oracle = ChatOracle::from_config(&steward.config().oracle)?;
            let vcs = if no_branch {
                None
            } else {
                Some(git_for(&steward)?)
            };
            let vcs = vcs.as_ref().map(|git| git as &dyn VersionControl);
            print_json(&steward.generate_tests(&oracle, vcs).await?)
        }
        Command::List { kind, untested } => {
            for entity in steward.list(kind, untested)? {
                println!("{}", describe(&entity));
            }
            Ok(())
        }
        Command::Reset => steward.reset(),
    }
}

/// Git collaborator for the project, with the store kept out of commits
fn git_for(steward: &Steward) -> Result<GitCli> {
    let git = GitCli::discover(steward.root())?;
    Ok(match steward.store().path() {
        Some(db_path) => git.excluding_store(db_path),
        None => git,
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// One line per entity: kind, location, name and status
fn describe(entity: &Entity) -> String {
    let (start, end) = entity.span();
    let status = match entity {
        Entity::Class(class) => class.test_status.to_string(),
        Entity::Function(function) => function.test_status.to_string(),
        Entity::Test(test) => test.outcome.to_string(),
    };
    format!(
        "{:<8} {}:{}-{}\t{}\t{}",
        entity.kind().as_str(),
        entity.file_path(),
        start,
        end,
        entity.name(),
        status
    )
}
