//! Go module updates through the `go` toolchain.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use semver::Version;
use tokio::process::Command;

use crate::adapters::process;
use crate::collaborators::UpdateCommandRunner;
use crate::domain::{BumpError, BumpResult};

/// `go list` template printing `module:current:available` for direct
/// dependencies that have an update.
const LIST_TEMPLATE: &str = "{{if (and (not (or .Main .Indirect)) .Update)}}{{.Path}}:{{.Version}}:{{.Update.Version}}{{end}}";

const GO_MOD: &str = "go.mod";
const GO_SUM: &str = "go.sum";

/// [`UpdateCommandRunner`] for Go modules.
#[derive(Debug, Clone)]
pub struct GoModRunner {
    program: PathBuf,
}

impl Default for GoModRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl GoModRunner {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("go"),
        }
    }

    /// Use a specific `go` binary.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn go(&self, dir: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.current_dir(dir);
        cmd
    }
}

async fn is_file(path: PathBuf) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

#[async_trait]
impl UpdateCommandRunner for GoModRunner {
    async fn has_manifest(&self, dir: &Path) -> bool {
        is_file(dir.join(GO_MOD)).await && is_file(dir.join(GO_SUM)).await
    }

    async fn list_candidate_updates(&self, dir: &Path) -> BumpResult<String> {
        let mut cmd = self.go(dir);
        cmd.args(["list", "-u", "-f", LIST_TEMPLATE, "-m", "all"]);
        process::checked(cmd, "go list")
            .await
            .map_err(|e| BumpError::UpdateListing(format!("{}: {e}", dir.display())))
    }

    async fn apply_update(&self, dir: &Path, module: &str, version: &Version) -> BumpResult<()> {
        let mut cmd = self.go(dir);
        cmd.arg("get").arg(format!("{module}@v{version}"));
        process::checked(cmd, "go get")
            .await
            .map(|_| ())
            .map_err(|e| BumpError::UpdateApply {
                module: module.to_string(),
                detail: e.to_string(),
            })
    }

    async fn reconcile(&self, dir: &Path) -> BumpResult<()> {
        let mut cmd = self.go(dir);
        cmd.args(["mod", "tidy"]);
        process::checked(cmd, "go mod tidy")
            .await
            .map(|_| ())
            .map_err(|e| BumpError::Reconcile(format!("{}: {e}", dir.display())))
    }
}
