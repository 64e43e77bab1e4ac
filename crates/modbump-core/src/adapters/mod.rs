//! Concrete collaborators: `git` and `go` over their CLIs, Bitbucket Server
//! over REST.

pub mod bitbucket;
pub mod git;
pub mod gomod;
mod process;

pub use bitbucket::{BitbucketCredentials, BitbucketServer};
pub use git::{GitCli, GitCredentials};
pub use gomod::GoModRunner;
