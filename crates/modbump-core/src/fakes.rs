//! Scripted collaborators (testing only)
//!
//! `ScriptedScm`, `ScriptedVcs` and `ScriptedRunner` satisfy the collaborator
//! traits in memory, record every call, and can be told to fail for specific
//! repositories. Repositories are keyed by name; for the runner the name is
//! the last component of the working directory.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use semver::Version;

use crate::collaborators::{MergeOutcome, ScmClient, UpdateCommandRunner, VcsClient};
use crate::domain::{BumpError, BumpResult, Repository, ScmKind, VcsKind, WorkingCopy};

fn dir_key(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// ScriptedScm
// ---------------------------------------------------------------------------

/// In-memory SCM host.
#[derive(Debug)]
pub struct ScriptedScm {
    repos: Vec<Repository>,
    discovery_error: Option<String>,
    merge_outcomes: HashMap<String, MergeOutcome>,
    fail_open: HashSet<String>,
    fail_merge: HashSet<String>,
    panic_merge: HashSet<String>,
    next_id: AtomicU64,
    opened: Mutex<Vec<(String, u64)>>,
    merge_calls: Mutex<Vec<(String, u64)>>,
}

impl ScriptedScm {
    /// Host that discovers `repos` and numbers pull requests from `first_id`.
    pub fn new(repos: Vec<Repository>, first_id: u64) -> Self {
        Self {
            repos,
            discovery_error: None,
            merge_outcomes: HashMap::new(),
            fail_open: HashSet::new(),
            fail_merge: HashSet::new(),
            panic_merge: HashSet::new(),
            next_id: AtomicU64::new(first_id),
            opened: Mutex::new(Vec::new()),
            merge_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_discovery(detail: &str) -> Self {
        let mut scm = Self::new(Vec::new(), 1);
        scm.discovery_error = Some(detail.to_string());
        scm
    }

    pub fn merge_outcome(mut self, repo: &str, outcome: MergeOutcome) -> Self {
        self.merge_outcomes.insert(repo.to_string(), outcome);
        self
    }

    pub fn fail_open_for(mut self, repo: &str) -> Self {
        self.fail_open.insert(repo.to_string());
        self
    }

    pub fn fail_merge_for(mut self, repo: &str) -> Self {
        self.fail_merge.insert(repo.to_string());
        self
    }

    /// Merging `repo` panics, taking its pipeline task down with it.
    pub fn panic_on_merge_for(mut self, repo: &str) -> Self {
        self.panic_merge.insert(repo.to_string());
        self
    }

    /// `(repo, id)` for every pull request opened, in call order.
    pub fn opened(&self) -> Vec<(String, u64)> {
        self.opened.lock().unwrap().clone()
    }

    /// `(repo, id)` for every merge attempt, in call order.
    pub fn merge_calls(&self) -> Vec<(String, u64)> {
        self.merge_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScmClient for ScriptedScm {
    fn kind(&self) -> ScmKind {
        ScmKind::bitbucket_server()
    }

    async fn discover(&self, vcs: &VcsKind) -> BumpResult<Vec<Repository>> {
        if let Some(detail) = &self.discovery_error {
            return Err(BumpError::Discovery(detail.clone()));
        }
        Ok(self
            .repos
            .iter()
            .filter(|r| &r.vcs == vcs)
            .cloned()
            .collect())
    }

    async fn open_change_request(&self, repo: &Repository) -> BumpResult<u64> {
        if self.fail_open.contains(&repo.name) {
            return Err(BumpError::PullRequest(format!(
                "scripted failure for {}",
                repo.name
            )));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.opened.lock().unwrap().push((repo.name.clone(), id));
        Ok(id)
    }

    async fn merge_change_request(&self, repo: &Repository) -> BumpResult<MergeOutcome> {
        self.merge_calls
            .lock()
            .unwrap()
            .push((repo.name.clone(), repo.pull_request_id));
        if self.panic_merge.contains(&repo.name) {
            panic!("scripted panic merging {}", repo.name);
        }
        if self.fail_merge.contains(&repo.name) {
            return Err(BumpError::Merge {
                id: repo.pull_request_id,
                detail: "scripted failure".to_string(),
            });
        }
        Ok(self
            .merge_outcomes
            .get(&repo.name)
            .cloned()
            .unwrap_or(MergeOutcome::Merged))
    }
}

// ---------------------------------------------------------------------------
// ScriptedVcs
// ---------------------------------------------------------------------------

/// In-memory VCS that never touches the filesystem.
#[derive(Debug)]
pub struct ScriptedVcs {
    fail_clone: HashSet<String>,
    fail_push: HashSet<String>,
    fail_delete: HashSet<String>,
    latency: Duration,
    cloned: Mutex<Vec<String>>,
    pushed: Mutex<Vec<String>>,
    deleted: Mutex<Vec<(String, String)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for ScriptedVcs {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedVcs {
    pub fn new() -> Self {
        Self {
            fail_clone: HashSet::new(),
            fail_push: HashSet::new(),
            fail_delete: HashSet::new(),
            latency: Duration::ZERO,
            cloned: Mutex::new(Vec::new()),
            pushed: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Make every clone take `latency`, so overlapping pipelines can be
    /// observed through [`ScriptedVcs::max_concurrent_clones`].
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn fail_clone_for(mut self, repo: &str) -> Self {
        self.fail_clone.insert(repo.to_string());
        self
    }

    pub fn fail_push_for(mut self, repo: &str) -> Self {
        self.fail_push.insert(repo.to_string());
        self
    }

    pub fn fail_delete_for(mut self, repo: &str) -> Self {
        self.fail_delete.insert(repo.to_string());
        self
    }

    pub fn cloned(&self) -> Vec<String> {
        self.cloned.lock().unwrap().clone()
    }

    pub fn pushed(&self) -> Vec<String> {
        self.pushed.lock().unwrap().clone()
    }

    /// `(repo, branch)` for every remote branch deletion.
    pub fn deleted(&self) -> Vec<(String, String)> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn max_concurrent_clones(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VcsClient for ScriptedVcs {
    fn kind(&self) -> VcsKind {
        VcsKind::git()
    }

    fn source_branch(&self) -> String {
        "modbump-20240101000000".to_string()
    }

    fn target_branch(&self) -> String {
        "master".to_string()
    }

    async fn clone_repository(&self, repo: &Repository) -> BumpResult<WorkingCopy> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_clone.contains(&repo.name) {
            return Err(BumpError::Clone(format!(
                "scripted failure for {}",
                repo.name
            )));
        }
        self.cloned.lock().unwrap().push(repo.name.clone());
        Ok(WorkingCopy::new(repo.clone_path()))
    }

    async fn push(&self, repo: &Repository) -> BumpResult<()> {
        if self.fail_push.contains(&repo.name) {
            return Err(BumpError::Push(format!(
                "scripted failure for {}",
                repo.name
            )));
        }
        self.pushed.lock().unwrap().push(repo.name.clone());
        Ok(())
    }

    async fn delete_remote_branch(&self, repo: &Repository) -> BumpResult<()> {
        if self.fail_delete.contains(&repo.name) {
            return Err(BumpError::DeleteBranch {
                branch: repo.source_branch.clone(),
                detail: "scripted failure".to_string(),
            });
        }
        self.deleted
            .lock()
            .unwrap()
            .push((repo.name.clone(), repo.source_branch.clone()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ScriptedRunner
// ---------------------------------------------------------------------------

/// In-memory update command runner.
#[derive(Debug)]
pub struct ScriptedRunner {
    manifest: bool,
    default_listing: Option<String>,
    listings: HashMap<String, String>,
    fail_apply: HashSet<String>,
    fail_reconcile: bool,
    lists: Mutex<usize>,
    applied: Mutex<Vec<(String, String)>>,
    reconciles: Mutex<usize>,
}

impl ScriptedRunner {
    fn base(manifest: bool, default_listing: Option<String>) -> Self {
        Self {
            manifest,
            default_listing,
            listings: HashMap::new(),
            fail_apply: HashSet::new(),
            fail_reconcile: false,
            lists: Mutex::new(0),
            applied: Mutex::new(Vec::new()),
            reconciles: Mutex::new(0),
        }
    }

    /// Every working copy reports `listing`.
    pub fn with_listing(listing: &str) -> Self {
        Self::base(true, Some(listing.to_string()))
    }

    /// Working copies have no manifest at all.
    pub fn without_manifest() -> Self {
        Self::base(false, None)
    }

    /// Listing always fails.
    pub fn failing_listing() -> Self {
        Self::base(true, None)
    }

    /// Override the listing for the working copy of `repo`.
    pub fn listing_for(mut self, repo: &str, listing: &str) -> Self {
        self.listings.insert(repo.to_string(), listing.to_string());
        self
    }

    pub fn fail_apply_for(mut self, module: &str) -> Self {
        self.fail_apply.insert(module.to_string());
        self
    }

    pub fn fail_reconcile(mut self) -> Self {
        self.fail_reconcile = true;
        self
    }

    pub fn list_count(&self) -> usize {
        *self.lists.lock().unwrap()
    }

    /// `(module, version)` for every applied update, in call order.
    pub fn applied(&self) -> Vec<(String, String)> {
        self.applied.lock().unwrap().clone()
    }

    pub fn reconcile_count(&self) -> usize {
        *self.reconciles.lock().unwrap()
    }
}

#[async_trait]
impl UpdateCommandRunner for ScriptedRunner {
    async fn has_manifest(&self, _dir: &Path) -> bool {
        self.manifest
    }

    async fn list_candidate_updates(&self, dir: &Path) -> BumpResult<String> {
        *self.lists.lock().unwrap() += 1;
        self.listings
            .get(&dir_key(dir))
            .or(self.default_listing.as_ref())
            .cloned()
            .ok_or_else(|| BumpError::UpdateListing("scripted failure".to_string()))
    }

    async fn apply_update(&self, _dir: &Path, module: &str, version: &Version) -> BumpResult<()> {
        if self.fail_apply.contains(module) {
            return Err(BumpError::UpdateApply {
                module: module.to_string(),
                detail: "scripted failure".to_string(),
            });
        }
        self.applied
            .lock()
            .unwrap()
            .push((module.to_string(), version.to_string()));
        Ok(())
    }

    async fn reconcile(&self, _dir: &Path) -> BumpResult<()> {
        if self.fail_reconcile {
            return Err(BumpError::Reconcile("scripted failure".to_string()));
        }
        *self.reconciles.lock().unwrap() += 1;
        Ok(())
    }
}
