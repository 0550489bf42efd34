//! Shallow clone of `git_repo` sources via the `git` CLI.
//!
//! Runs `git clone --depth 1 <url> <dest>` under a timeout. The caller
//! strips version-control metadata afterwards with [`strip_vcs_metadata`].

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

use crate::config::GitConfig;
use crate::traits::Cloner;

pub struct GitCli {
    timeout: Duration,
}

impl GitCli {
    pub fn new(config: &GitConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[async_trait]
impl Cloner for GitCli {
    async fn shallow_clone(&self, url: &str, dest: &Path) -> Result<()> {
        git_clone(url, dest, self.timeout).await
    }
}

async fn git_clone(url: &str, dest: &Path, timeout: Duration) -> Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let mut cmd = Command::new("git");
    cmd.args(["clone", "--depth", "1", "--quiet"]);
    cmd.arg(url);
    cmd.arg(dest);
    cmd.env("GIT_TERMINAL_PROMPT", "0");
    cmd.kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(result) => result.with_context(|| "Failed to execute 'git clone'. Is git installed?")?,
        Err(_) => bail!("git clone timed out after {}s", timeout.as_secs()),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git clone failed: {}", stderr.trim());
    }

    Ok(())
}

/// Remove the `.git` directory (or worktree `.git` file) from a clone.
pub fn strip_vcs_metadata(repo_dir: &Path) -> Result<()> {
    let git_path = repo_dir.join(".git");
    if git_path.is_dir() {
        std::fs::remove_dir_all(&git_path)
            .with_context(|| format!("Failed to remove {}", git_path.display()))?;
    } else if git_path.exists() {
        std::fs::remove_file(&git_path)
            .with_context(|| format!("Failed to remove {}", git_path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;
    use tempfile::TempDir;

    fn git_available() -> bool {
        StdCommand::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn git(dir: &Path, args: &[&str]) {
        let status = StdCommand::new("git")
            .args(args)
            .current_dir(dir)
            .env("GIT_AUTHOR_NAME", "test")
            .env("GIT_AUTHOR_EMAIL", "test@example.com")
            .env("GIT_COMMITTER_NAME", "test")
            .env("GIT_COMMITTER_EMAIL", "test@example.com")
            .status()
            .unwrap();
        assert!(status.success(), "git {:?} failed", args);
    }

    #[test]
    fn strip_removes_git_dir_only() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join(".git/objects")).unwrap();
        std::fs::write(tmp.path().join("README.md"), "hi").unwrap();

        strip_vcs_metadata(tmp.path()).unwrap();
        assert!(!tmp.path().join(".git").exists());
        assert!(tmp.path().join("README.md").exists());

        // No-op when nothing to strip
        strip_vcs_metadata(tmp.path()).unwrap();
    }

    #[tokio::test]
    async fn clone_local_repository() {
        if !git_available() {
            return;
        }
        let tmp = TempDir::new().unwrap();
        let origin = tmp.path().join("origin");
        std::fs::create_dir_all(&origin).unwrap();
        git(&origin, &["init", "--quiet"]);
        std::fs::write(origin.join("notes.md"), "# Notes\n\nShallow.").unwrap();
        git(&origin, &["add", "."]);
        git(&origin, &["commit", "--quiet", "-m", "initial"]);

        let dest = tmp.path().join("clone");
        let url = format!("file://{}", origin.display());
        let cloner = GitCli::new(&GitConfig::default());
        cloner.shallow_clone(&url, &dest).await.unwrap();
        assert!(dest.join("notes.md").exists());
        assert!(dest.join(".git").exists());
    }

    #[tokio::test]
    async fn clone_failure_is_reported() {
        if !git_available() {
            return;
        }
        let tmp = TempDir::new().unwrap();
        let url = format!("file://{}", tmp.path().join("missing").display());
        let cloner = GitCli::new(&GitConfig::default());
        let err = cloner
            .shallow_clone(&url, &tmp.path().join("clone"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("git clone failed"));
    }
}
