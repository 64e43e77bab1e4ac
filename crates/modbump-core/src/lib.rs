//! modbump core: fleet-wide dependency bump orchestration.
//!
//! A pass discovers repositories on the SCM host, merges them with the
//! persisted snapshot, and drives each one through clone, merge, bump, push
//! and open-pull-request with bounded concurrency.
//!
//! - [`domain`]: repository state machine, updates, errors
//! - [`filter`] / [`resolver`]: which module updates to apply, and applying them
//! - [`converge`]: persisted state meets fresh discovery
//! - [`engine`]: the bounded, failure-isolated pass driver
//! - [`collaborators`] / [`storage`]: traits the engine consumes
//! - [`adapters`]: git, go and Bitbucket Server implementations
//! - [`config`]: `.modbump.yaml`

pub mod adapters;
pub mod collaborators;
pub mod config;
pub mod converge;
pub mod domain;
pub mod engine;
pub mod fakes;
pub mod filter;
pub mod obs;
pub mod resolver;
pub mod storage;
pub mod telemetry;

pub use telemetry::init_tracing;

pub use collaborators::{MergeOutcome, ScmClient, UpdateCommandRunner, VcsClient};
pub use config::{CloneType, Configuration, StorageConfig};
pub use converge::converge;
pub use domain::{
    parse_update_line, parse_update_listing, parse_version, savable, BumpError, BumpResult,
    Repository, ScmKind, Stage, Update, UpdateLineError, VcsKind, WorkingCopy,
};
pub use engine::{Engine, EngineConfig, PassReport, PlannedRepo, RepoOutcome, RepoReport};
pub use filter::{FilterConfig, FilterDecision};
pub use resolver::{ResolverConfig, UpdateResolver};
pub use storage::{SnapshotStore, StateStore};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
