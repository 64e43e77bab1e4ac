//! Git over the `git` CLI.

use std::path::Path;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tokio::process::Command;
use tracing::info;

use crate::adapters::process;
use crate::collaborators::VcsClient;
use crate::config::{CloneType, GitConfig};
use crate::domain::{BumpError, BumpResult, Repository, VcsKind, WorkingCopy};

/// HTTP credentials for clone and push. A token wins over username and
/// password.
#[derive(Debug, Clone, Default)]
pub struct GitCredentials {
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
}

impl GitCredentials {
    /// `Authorization` header value, if any credential is set.
    fn authorization(&self) -> Option<String> {
        if let Some(token) = self.token.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            return Some(format!("Bearer {token}"));
        }
        let username = self.username.as_deref().filter(|u| !u.is_empty())?;
        let password = self.password.as_deref().unwrap_or_default();
        let encoded = STANDARD.encode(format!("{username}:{password}"));
        Some(format!("Basic {encoded}"))
    }
}

/// [`VcsClient`] that shells out to `git`.
pub struct GitCli {
    config: GitConfig,
    clone_type: CloneType,
    authorization: Option<String>,
}

impl GitCli {
    pub fn new(config: GitConfig, clone_type: CloneType, credentials: GitCredentials) -> Self {
        let authorization = match clone_type {
            CloneType::Http => credentials.authorization(),
            CloneType::Ssh => None,
        };
        Self {
            config,
            clone_type,
            authorization,
        }
    }

    /// `git` with auth and TLS settings applied, running in `dir`.
    fn git(&self, dir: Option<&Path>) -> Command {
        let mut cmd = Command::new("git");
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }
        if let Some(auth) = &self.authorization {
            cmd.arg("-c").arg(format!("http.extraHeader=Authorization: {auth}"));
        }
        if self.config.insecure {
            match self.clone_type {
                CloneType::Http => {
                    cmd.args(["-c", "http.sslVerify=false"]);
                }
                CloneType::Ssh => {
                    cmd.env(
                        "GIT_SSH_COMMAND",
                        "ssh -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null",
                    );
                }
            }
        }
        cmd
    }

    async fn has_staged_changes(&self, dir: &Path) -> BumpResult<bool> {
        let mut cmd = self.git(Some(dir));
        cmd.args(["diff", "--cached", "--quiet"]);
        let out = process::output(cmd, "git diff --cached").await?;
        match out.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(process::failure("git diff --cached", &out)),
        }
    }

    async fn remote_branch_exists(&self, dir: &Path, branch: &str) -> BumpResult<bool> {
        let mut cmd = self.git(Some(dir));
        cmd.args(["ls-remote", "--heads", "origin"])
            .arg(format!("refs/heads/{branch}"));
        let listing = process::checked(cmd, "git ls-remote").await?;
        Ok(!listing.trim().is_empty())
    }
}

#[async_trait]
impl VcsClient for GitCli {
    fn kind(&self) -> VcsKind {
        VcsKind::git()
    }

    fn source_branch(&self) -> String {
        format!(
            "{}-{}",
            self.config.source_branch,
            chrono::Local::now().format("%Y%m%d%H%M%S")
        )
    }

    fn target_branch(&self) -> String {
        self.config.target_branch.clone()
    }

    async fn clone_repository(&self, repo: &Repository) -> BumpResult<WorkingCopy> {
        let path = repo.clone_path();
        let wrap = |e: BumpError| BumpError::Clone(e.to_string());

        if tokio::fs::metadata(&path).await.is_ok() {
            tokio::fs::remove_dir_all(&path).await.map_err(|e| wrap(e.into()))?;
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| wrap(e.into()))?;
        }

        let mut clone = self.git(None);
        clone
            .args(["clone", "--single-branch", "--branch", repo.target_branch.as_str()])
            .arg(&repo.url)
            .arg(&path);
        process::checked(clone, "git clone").await.map_err(wrap)?;

        let mut checkout = self.git(Some(&path));
        checkout.args(["checkout", "-B", repo.source_branch.as_str()]);
        process::checked(checkout, "git checkout").await.map_err(wrap)?;

        info!(repo = %repo.name, branch = %repo.source_branch, "cloned");
        Ok(WorkingCopy::new(path))
    }

    async fn push(&self, repo: &Repository) -> BumpResult<()> {
        let dir = repo.working_dir();
        let wrap = |e: BumpError| BumpError::Push(e.to_string());

        let manifests: Vec<&String> = self
            .config
            .manifest_files
            .iter()
            .filter(|f| dir.join(f).is_file())
            .collect();
        if !manifests.is_empty() {
            let mut add = self.git(Some(&dir));
            add.arg("add").arg("--").args(&manifests);
            process::checked(add, "git add").await.map_err(wrap)?;
        }

        if self.has_staged_changes(&dir).await.map_err(wrap)? {
            let mut commit = self.git(Some(&dir));
            commit
                .arg("-c")
                .arg(format!("user.name={}", self.config.commit_author_name))
                .arg("-c")
                .arg(format!("user.email={}", self.config.commit_author_email))
                .args(["commit", "-m", self.config.commit_message.as_str()]);
            process::checked(commit, "git commit").await.map_err(wrap)?;
        }

        let mut push = self.git(Some(&dir));
        push.args(["push", "--set-upstream", "origin", repo.source_branch.as_str()]);
        process::checked(push, "git push").await.map_err(wrap)?;

        info!(repo = %repo.name, branch = %repo.source_branch, "pushed");
        Ok(())
    }

    async fn delete_remote_branch(&self, repo: &Repository) -> BumpResult<()> {
        let dir = repo.working_dir();
        let wrap = |e: BumpError| BumpError::DeleteBranch {
            branch: repo.source_branch.clone(),
            detail: e.to_string(),
        };

        if repo.source_branch.is_empty()
            || !self
                .remote_branch_exists(&dir, &repo.source_branch)
                .await
                .map_err(wrap)?
        {
            return Ok(());
        }

        let mut delete = self.git(Some(&dir));
        delete
            .args(["push", "origin"])
            .arg(format!(":refs/heads/{}", repo.source_branch));
        process::checked(delete, "git push --delete").await.map_err(wrap)?;

        info!(repo = %repo.name, branch = %repo.source_branch, "deleted remote branch");
        Ok(())
    }
}
