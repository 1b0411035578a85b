//! Version control used by the repair loop to isolate its commits

use crate::error::GitCommandError;
use git2::Repository;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Branch and commit operations the repair loop needs
pub trait VersionControl {
    fn current_branch(&self) -> Result<String, GitCommandError>;

    /// Create `name` from the current HEAD and check it out
    fn create_branch(&self, name: &str) -> Result<(), GitCommandError>;

    fn checkout_branch(&self, name: &str) -> Result<(), GitCommandError>;

    /// Stage every change in the working tree and commit it. A clean tree is
    /// not an error.
    fn commit_all(&self, message: &str) -> Result<(), GitCommandError>;

    /// Merge `name` into the current branch
    fn merge_branch(&self, name: &str) -> Result<(), GitCommandError>;
}

/// [`VersionControl`] backed by the `git` executable
pub struct GitCli {
    repo_path: PathBuf,
    /// Repository-relative paths `commit_all` never stages
    excluded: Vec<String>,
}

impl GitCli {
    /// Discover the repository containing `path` (walks up the tree)
    pub fn discover(path: impl AsRef<Path>) -> Result<Self, GitCommandError> {
        let path = path.as_ref();
        let repo = Repository::discover(path)
            .map_err(|e| GitCommandError::new("discover repository", e.message()))?;
        let repo_path = repo
            .workdir()
            .ok_or_else(|| {
                GitCommandError::new("discover repository", "bare repositories are not supported")
            })?
            .to_path_buf();

        tracing::debug!("Using git repository at {}", repo_path.display());
        Ok(Self {
            repo_path,
            excluded: Vec::new(),
        })
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Keep the SQLite store at `db_path`, with its `-wal` and `-shm` files,
    /// out of every commit. Paths outside the repository are ignored.
    pub fn excluding_store(mut self, db_path: &Path) -> Self {
        let Some(relative) = self.relative_path(db_path) else {
            return self;
        };
        for suffix in ["", "-wal", "-shm"] {
            self.excluded.push(format!("{}{}", relative, suffix));
        }
        tracing::debug!("Excluding {} from commits", relative);
        self
    }

    pub fn excluded(&self) -> &[String] {
        &self.excluded
    }

    /// `path` relative to the working tree, slash-separated
    fn relative_path(&self, path: &Path) -> Option<String> {
        let path = match (path.parent(), path.file_name()) {
            (Some(parent), Some(name)) => parent
                .canonicalize()
                .map(|parent| parent.join(name))
                .unwrap_or_else(|_| path.to_path_buf()),
            _ => path.to_path_buf(),
        };
        let repo_path = self
            .repo_path
            .canonicalize()
            .unwrap_or_else(|_| self.repo_path.clone());
        let relative = path.strip_prefix(&repo_path).ok()?;
        Some(relative.to_string_lossy().replace('\\', "/"))
    }

    /// Run `git <args>` in the repository and return stdout
    fn git(&self, args: &[&str]) -> Result<String, GitCommandError> {
        let command = format!("git {}", args.join(" "));
        tracing::debug!("Running `{}`", command);

        let output = Command::new("git")
            .arg("-C")
            .arg(&self.repo_path)
            .args(args)
            .output()
            .map_err(|e| GitCommandError::new(&command, e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let detail = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(GitCommandError::new(command, detail));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl VersionControl for GitCli {
    fn current_branch(&self) -> Result<String, GitCommandError> {
        let repo = Repository::open(&self.repo_path)
            .map_err(|e| GitCommandError::new("open repository", e.message()))?;
        let head = repo
            .head()
            .map_err(|e| GitCommandError::new("resolve HEAD", e.message()))?;
        if !head.is_branch() {
            return Err(GitCommandError::new("resolve HEAD", "HEAD is detached"));
        }
        head.shorthand()
            .map(String::from)
            .ok_or_else(|| GitCommandError::new("resolve HEAD", "branch name is not UTF-8"))
    }

    fn create_branch(&self, name: &str) -> Result<(), GitCommandError> {
        self.git(&["checkout", "-b", name])?;
        tracing::info!("Created branch {}", name);
        Ok(())
    }

    fn checkout_branch(&self, name: &str) -> Result<(), GitCommandError> {
        self.git(&["checkout", name])?;
        Ok(())
    }

    fn commit_all(&self, message: &str) -> Result<(), GitCommandError> {
        let excludes: Vec<String> = self
            .excluded
            .iter()
            .map(|path| format!(":(exclude){}", path))
            .collect();
        let mut add = vec!["add", "-A", "--", "."];
        add.extend(excludes.iter().map(String::as_str));
        self.git(&add)?;

        let staged = self.git(&["diff", "--cached", "--name-only"])?;
        if staged.trim().is_empty() {
            tracing::debug!("Nothing to commit for '{}'", message);
            return Ok(());
        }
        self.git(&["commit", "-m", message])?;
        Ok(())
    }

    fn merge_branch(&self, name: &str) -> Result<(), GitCommandError> {
        self.git(&["merge", "--no-edit", name])?;
        tracing::info!("Merged branch {}", name);
        Ok(())
    }
}
