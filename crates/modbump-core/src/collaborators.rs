//! Collaborator traits the engine drives.
//!
//! - `ScmClient`: repository discovery and pull request lifecycle on the host
//! - `VcsClient`: clone, commit + push, remote branch cleanup
//! - `UpdateCommandRunner`: list and apply module updates in a working copy
//!
//! Implementations live in [`crate::adapters`]; scripted fakes for tests live
//! in [`crate::fakes`].

use std::path::Path;

use async_trait::async_trait;
use semver::Version;

use crate::domain::{BumpResult, Repository, ScmKind, VcsKind, WorkingCopy};

/// Result of asking the host to merge a tracked pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The pull request was merged by this call.
    Merged,
    /// The pull request was already merged or declined; nothing left to do.
    AlreadyClosed,
    /// Host policy refuses the merge for now (builds, approvals, conflicts).
    NotMergeable { vetoes: Vec<String> },
}

/// Source-control host client.
#[async_trait]
pub trait ScmClient: Send + Sync {
    fn kind(&self) -> ScmKind;

    /// List every repository the host manages for `vcs`.
    async fn discover(&self, vcs: &VcsKind) -> BumpResult<Vec<Repository>>;

    /// Open a pull request from `source_branch` into `target_branch`,
    /// returning the host's identifier.
    async fn open_change_request(&self, repo: &Repository) -> BumpResult<u64>;

    /// Merge the tracked pull request if the host allows it.
    async fn merge_change_request(&self, repo: &Repository) -> BumpResult<MergeOutcome>;
}

/// Version-control client.
#[async_trait]
pub trait VcsClient: Send + Sync {
    fn kind(&self) -> VcsKind;

    /// Fresh source branch name for this pass.
    fn source_branch(&self) -> String;

    fn target_branch(&self) -> String;

    /// Clone into `repo.clone_path()` and check out `repo.source_branch`.
    async fn clone_repository(&self, repo: &Repository) -> BumpResult<WorkingCopy>;

    /// Stage manifest files, commit if anything changed, push the source
    /// branch. Safe to repeat.
    async fn push(&self, repo: &Repository) -> BumpResult<()>;

    /// Delete `repo.source_branch` on the remote; no-op when it is absent.
    async fn delete_remote_branch(&self, repo: &Repository) -> BumpResult<()>;
}

/// Runs the ecosystem tooling that lists and applies dependency updates.
#[async_trait]
pub trait UpdateCommandRunner: Send + Sync {
    /// Whether `dir` holds a manifest this runner understands.
    async fn has_manifest(&self, dir: &Path) -> bool;

    /// Raw `module:current:available` lines for direct dependencies that
    /// have a newer version.
    async fn list_candidate_updates(&self, dir: &Path) -> BumpResult<String>;

    async fn apply_update(&self, dir: &Path, module: &str, version: &Version) -> BumpResult<()>;

    /// Tidy manifests and lock files after updates were applied.
    async fn reconcile(&self, dir: &Path) -> BumpResult<()>;
}
