// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{bail, Context};
use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, warn};

use rook_config::GitConfig;

/// What the version-control bridge actually did, for the run report.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GitOutcome {
    pub committed: bool,
    pub pushed: bool,
    pub branch: Option<String>,
    pub pr_url: Option<String>,
    pub errors: Vec<String>,
}

/// Optional auto-commit/push/branch/PR side effects after a headless run.
///
/// All git interaction goes through the `git` (and `gh` for pull requests)
/// command line; the bridge never links a VCS library.  The executor's own
/// configuration file is excluded from commits so a run cannot commit the
/// policy that produced it.
pub struct GitBridge {
    workspace: PathBuf,
    cfg: GitConfig,
    exclude: Option<PathBuf>,
}

impl GitBridge {
    pub fn new(workspace: PathBuf, cfg: GitConfig, exclude: Option<PathBuf>) -> Self {
        Self {
            workspace,
            cfg,
            exclude,
        }
    }

    async fn git(&self, args: &[&str]) -> anyhow::Result<String> {
        debug!(?args, "git");
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.workspace)
            .stdin(Stdio::null())
            .output()
            .await
            .context("spawning git")?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git {} failed: {}", args.join(" "), stderr.trim());
        }
        Ok(stdout)
    }

    /// Switch to the configured branch, creating it when missing.
    /// Idempotent: re-running on an existing branch is a plain switch.
    pub async fn ensure_branch(&self) -> anyhow::Result<Option<String>> {
        let Some(branch) = self.cfg.branch.clone() else {
            return Ok(None);
        };
        let exists = self
            .git(&["rev-parse", "--verify", "--quiet", &format!("refs/heads/{branch}")])
            .await
            .is_ok();
        if exists {
            self.git(&["switch", &branch]).await?;
        } else {
            self.git(&["switch", "-c", &branch]).await?;
        }
        Ok(Some(branch))
    }

    /// Stage everything (minus the excluded config file) and commit.
    /// Returns false when the tree is clean.
    pub async fn commit_all(&self, message: &str) -> anyhow::Result<bool> {
        self.git(&["add", "-A"]).await?;
        if let Some(exclude) = &self.exclude {
            let path = exclude.to_string_lossy();
            // rm --cached works even before the first commit; --ignore-unmatch
            // makes a config file outside the repository a no-op.
            let _ = self
                .git(&["rm", "--cached", "--quiet", "--ignore-unmatch", "--", path.as_ref()])
                .await;
        }
        let staged = self.git(&["diff", "--cached", "--name-only"]).await?;
        if staged.is_empty() {
            return Ok(false);
        }

        let mut args: Vec<String> = Vec::new();
        if let (Some(name), Some(email)) =
            (self.cfg.author_name.as_deref(), self.cfg.author_email.as_deref())
        {
            args.extend([
                "-c".into(),
                format!("user.name={name}"),
                "-c".into(),
                format!("user.email={email}"),
            ]);
        }
        args.extend(["commit".into(), "-m".into(), message.to_string()]);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.git(&arg_refs).await?;
        Ok(true)
    }

    pub async fn push(&self, branch: &str) -> anyhow::Result<()> {
        self.git(&["push", "-u", "origin", branch]).await?;
        Ok(())
    }

    /// Open a pull request via the `gh` CLI.  Returns the PR URL.
    pub async fn create_pr(&self, default_title: &str) -> anyhow::Result<String> {
        let title = self.cfg.pr_title.clone().unwrap_or_else(|| default_title.to_string());
        let body = self.cfg.pr_body.clone().unwrap_or_default();
        let mut args = vec![
            "pr".to_string(),
            "create".to_string(),
            "--title".to_string(),
            title,
            "--body".to_string(),
            body,
        ];
        if let Some(base) = &self.cfg.pr_base {
            args.push("--base".into());
            args.push(base.clone());
        }
        if self.cfg.pr_draft {
            args.push("--draft".into());
        }
        let output = Command::new("gh")
            .args(&args)
            .current_dir(&self.workspace)
            .stdin(Stdio::null())
            .output()
            .await
            .context("spawning gh")?;
        if !output.status.success() {
            bail!(
                "gh pr create failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Discard uncommitted changes to tracked files.  Used when a failed
    /// run is configured not to keep its partial changes.  Untracked files
    /// are left alone; deleting files the run did not create is not this
    /// bridge's call to make.
    pub async fn revert_tracked_changes(&self) -> anyhow::Result<()> {
        self.git(&["checkout", "--", "."]).await?;
        Ok(())
    }

    /// Drive the configured side effects; failures are collected rather than
    /// aborting, so a missing remote cannot lose the run report.
    pub async fn finalize(&self, commit_message: &str) -> GitOutcome {
        let mut outcome = GitOutcome::default();
        if !self.cfg.auto_commit {
            return outcome;
        }

        match self.ensure_branch().await {
            Ok(branch) => outcome.branch = branch,
            Err(e) => {
                warn!("branch setup failed: {e:#}");
                outcome.errors.push(format!("branch: {e:#}"));
                return outcome;
            }
        }

        match self.commit_all(commit_message).await {
            Ok(committed) => outcome.committed = committed,
            Err(e) => {
                warn!("commit failed: {e:#}");
                outcome.errors.push(format!("commit: {e:#}"));
                return outcome;
            }
        }

        if self.cfg.auto_push && outcome.committed {
            if let Some(branch) = outcome.branch.clone() {
                match self.push(&branch).await {
                    Ok(()) => outcome.pushed = true,
                    Err(e) => {
                        warn!("push failed: {e:#}");
                        outcome.errors.push(format!("push: {e:#}"));
                    }
                }
            }
        }

        if self.cfg.create_pr && outcome.committed {
            match self.create_pr(commit_message).await {
                Ok(url) => outcome.pr_url = Some(url),
                Err(e) => {
                    warn!("pull request creation failed: {e:#}");
                    outcome.errors.push(format!("pr: {e:#}"));
                }
            }
        }
        outcome
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
