//! Domain models for modbump.
//!
//! - `Repository`: the unit of work and its lifecycle state machine
//! - `Update`: one module bump and the listing-line parser
//! - `BumpError`: error taxonomy shared by the engine and adapters

pub mod error;
pub mod repository;
pub mod update;

pub use error::{BumpError, BumpResult};
pub use repository::{savable, Repository, ScmKind, Stage, VcsKind, WorkingCopy};
pub use update::{parse_update_line, parse_update_listing, parse_version, Update, UpdateLineError};
