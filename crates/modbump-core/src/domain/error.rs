//! Error taxonomy for the fleet engine and its collaborators.

use crate::domain::repository::Stage;

/// Errors produced by the engine, the resolver and the adapters.
#[derive(Debug, thiserror::Error)]
pub enum BumpError {
    /// Listing repositories from the SCM host failed; aborts the pass.
    #[error("repository discovery failed: {0}")]
    Discovery(String),

    /// Loading or saving the persisted snapshot failed.
    #[error("state storage error: {0}")]
    Storage(String),

    /// A single repository's pipeline stopped at `stage`.
    #[error("repo '{repo}' ({stage}): {source}")]
    Stage {
        repo: String,
        stage: Stage,
        #[source]
        source: Box<BumpError>,
    },

    #[error("clone failed: {0}")]
    Clone(String),

    #[error("push failed: {0}")]
    Push(String),

    #[error("deleting branch {branch} failed: {detail}")]
    DeleteBranch { branch: String, detail: String },

    #[error("merging pull request #{id} failed: {detail}")]
    Merge { id: u64, detail: String },

    #[error("creating pull request failed: {0}")]
    PullRequest(String),

    #[error("listing module updates failed: {0}")]
    UpdateListing(String),

    #[error("updating module '{module}' failed: {detail}")]
    UpdateApply { module: String, detail: String },

    #[error("reconcile failed: {0}")]
    Reconcile(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("command `{command}` failed: {detail}")]
    Command { command: String, detail: String },

    #[error("http error: {0}")]
    Http(String),

    #[error("scm '{scm}' does not support vcs type '{vcs}'")]
    UnsupportedVcs { scm: String, vcs: String },

    #[error("invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("pipeline task failed: {0}")]
    Task(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BumpError {
    /// Attach repository and stage context to a collaborator error.
    pub fn at_stage(repo: &str, stage: Stage, source: BumpError) -> Self {
        BumpError::Stage {
            repo: repo.to_string(),
            stage,
            source: Box::new(source),
        }
    }

    /// Repository the error is attributed to, if any.
    pub fn repo(&self) -> Option<&str> {
        match self {
            BumpError::Stage { repo, .. } => Some(repo),
            _ => None,
        }
    }

    /// Stage the error is attributed to, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            BumpError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

impl From<modbump_state::StateError> for BumpError {
    fn from(err: modbump_state::StateError) -> Self {
        BumpError::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for BumpError {
    fn from(err: reqwest::Error) -> Self {
        BumpError::Http(err.to_string())
    }
}

impl From<serde_yaml::Error> for BumpError {
    fn from(err: serde_yaml::Error) -> Self {
        BumpError::Config(err.to_string())
    }
}

/// Result type for modbump operations.
pub type BumpResult<T> = std::result::Result<T, BumpError>;
