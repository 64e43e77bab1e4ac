//! Repository entity and its lifecycle state machine.
//!
//! A repository moves Discovered → Cloned → Bumped → Pushed → PR-opened, and
//! back to the start through [`Repository::reset_state`] once its pull request
//! has been merged. Guards are pure; transitions are only called after the
//! matching collaborator call succeeded.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::error::{BumpError, BumpResult};
use crate::domain::update::Update;

/// Kind of source-control host (where pull requests live).
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScmKind(pub String);

impl ScmKind {
    pub const BITBUCKET_SERVER: &'static str = "bitbucketserver";

    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn bitbucket_server() -> Self {
        Self::new(Self::BITBUCKET_SERVER)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ScmKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of version-control system (how the code is cloned and pushed).
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VcsKind(pub String);

impl VcsKind {
    pub const GIT: &'static str = "git";

    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn git() -> Self {
        Self::new(Self::GIT)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VcsKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Clone,
    Merge,
    Bump,
    Push,
    OpenPullRequest,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Clone => "clone",
            Stage::Merge => "merge",
            Stage::Bump => "bump",
            Stage::Push => "push",
            Stage::OpenPullRequest => "open_pull_request",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle to a local clone, valid for the current pass only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingCopy {
    pub path: PathBuf,
}

impl WorkingCopy {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// A managed source repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub base_dir: PathBuf,
    /// Project or namespace the repository belongs to.
    pub parent: String,
    #[serde(default)]
    pub source_branch: String,
    #[serde(default)]
    pub target_branch: String,
    pub scm: ScmKind,
    pub vcs: VcsKind,
    #[serde(skip)]
    pub working_copy: Option<WorkingCopy>,
    #[serde(default)]
    pub cloned: bool,
    #[serde(default)]
    pub bumped: bool,
    #[serde(default)]
    pub pushed: bool,
    #[serde(default)]
    pub pull_request_opened: bool,
    #[serde(default)]
    pub updates: Vec<Update>,
    #[serde(default)]
    pub pull_request_id: u64,
}

impl Repository {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        parent: impl Into<String>,
        scm: ScmKind,
        vcs: VcsKind,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            base_dir: PathBuf::new(),
            parent: parent.into(),
            source_branch: String::new(),
            target_branch: String::new(),
            scm,
            vcs,
            working_copy: None,
            cloned: false,
            bumped: false,
            pushed: false,
            pull_request_opened: false,
            updates: Vec::new(),
            pull_request_id: 0,
        }
    }

    /// `base_dir/scm/parent/name`. Two repositories with the same clone path
    /// are the same logical repository across passes.
    pub fn clone_path(&self) -> PathBuf {
        self.base_dir
            .join(self.scm.as_str())
            .join(&self.parent)
            .join(&self.name)
    }

    /// Directory the update commands run in: the live clone when there is
    /// one, otherwise the derived clone path.
    pub fn working_dir(&self) -> PathBuf {
        self.working_copy
            .as_ref()
            .map(|wc| wc.path.clone())
            .unwrap_or_else(|| self.clone_path())
    }

    pub fn with_base_dir(mut self, base_dir: impl AsRef<Path>) -> Self {
        self.base_dir = base_dir.as_ref().to_path_buf();
        self
    }

    // -- guards ------------------------------------------------------------

    pub fn is_cloneable(&self, vcs: &VcsKind) -> bool {
        &self.vcs == vcs
    }

    pub fn is_mergeable(&self, scm: &ScmKind) -> bool {
        &self.scm == scm && self.pull_request_opened && self.pull_request_id != 0
    }

    pub fn is_bumpable(&self) -> bool {
        !self.pull_request_opened && !self.bumped && self.cloned
    }

    pub fn is_pushable(&self, vcs: &VcsKind) -> bool {
        &self.vcs == vcs && !self.pull_request_opened && !self.pushed && self.bumped
    }

    pub fn is_pr_able(&self, scm: &ScmKind) -> bool {
        &self.scm == scm && !self.pull_request_opened && self.pushed
    }

    pub fn is_savable(&self) -> bool {
        self.pull_request_opened && self.pull_request_id != 0
    }

    // -- transitions -------------------------------------------------------

    /// Fill in branch names that are still empty.
    pub fn ensure_branches(
        &mut self,
        source: impl FnOnce() -> String,
        target: impl FnOnce() -> String,
    ) {
        if self.source_branch.is_empty() {
            self.source_branch = source();
        }
        if self.target_branch.is_empty() {
            self.target_branch = target();
        }
    }

    pub fn set_cloned(&mut self, working_copy: WorkingCopy) {
        self.cloned = true;
        self.working_copy = Some(working_copy);
    }

    /// Record applied updates. `updates` must not be empty: a bumped
    /// repository always carries what was bumped.
    pub fn set_bumped(&mut self, updates: Vec<Update>) -> BumpResult<()> {
        if updates.is_empty() {
            return Err(BumpError::InvalidTransition(format!(
                "repo '{}' cannot be marked bumped without updates",
                self.name
            )));
        }
        self.bumped = true;
        self.updates = updates;
        Ok(())
    }

    pub fn set_pushed(&mut self) {
        self.pushed = true;
    }

    pub fn set_pull_request(&mut self, id: u64) {
        self.pull_request_opened = true;
        self.pull_request_id = id;
    }

    /// Return to the pre-pipeline state so the next pass starts from scratch.
    pub fn reset_state(&mut self) {
        self.cloned = false;
        self.bumped = false;
        self.pushed = false;
        self.pull_request_opened = false;
        self.updates.clear();
        self.source_branch.clear();
        self.target_branch.clear();
        self.pull_request_id = 0;
        self.working_copy = None;
    }
}

/// Repositories worth persisting, in their original order.
pub fn savable(repos: &[Repository]) -> Vec<Repository> {
    repos.iter().filter(|r| r.is_savable()).cloned().collect()
}
