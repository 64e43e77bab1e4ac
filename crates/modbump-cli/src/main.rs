//! modbump - bump Go module dependencies across a fleet of repositories.
//!
//! One invocation runs one pass: discover repositories, merge pull requests
//! that became mergeable, bump outdated modules, push and open pull requests.
//! State about open pull requests is carried between invocations.
//!
//! Credentials come from the environment only:
//! `BITBUCKET_SERVER_{USERNAME,PASSWORD,TOKEN}` and `GIT_{USERNAME,PASSWORD,TOKEN}`.
//! The S3 state backend uses the standard AWS credential chain.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::{info, Level};

use modbump_core::adapters::{
    BitbucketCredentials, BitbucketServer, GitCli, GitCredentials, GoModRunner,
};
use modbump_core::{
    Configuration, Engine, PassReport, PlannedRepo, RepoOutcome, SnapshotStore, StorageConfig,
    UpdateResolver,
};
use modbump_state::{FileBackend, S3Backend, SnapshotBackend};

#[derive(Parser, Debug)]
#[command(name = "modbump")]
#[command(author = "Stevedores Org")]
#[command(version = modbump_core::VERSION)]
#[command(about = "Bump Go module dependencies across a fleet of repositories", long_about = None)]
struct Cli {
    /// Config file (default: ./.modbump.yaml, then ~/.modbump.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines and a JSON summary
    #[arg(long)]
    json: bool,

    /// Stop starting new repositories after the first failure
    #[arg(long)]
    fail_fast: bool,

    /// Show what would be done without touching any repository
    #[arg(long)]
    dry_run: bool,

    #[command(flatten)]
    credentials: Credentials,
}

#[derive(clap::Args, Debug, Default)]
struct Credentials {
    #[arg(long, env = "BITBUCKET_SERVER_USERNAME", hide_env_values = true, hide = true)]
    bitbucket_username: Option<String>,
    #[arg(long, env = "BITBUCKET_SERVER_PASSWORD", hide_env_values = true, hide = true)]
    bitbucket_password: Option<String>,
    #[arg(long, env = "BITBUCKET_SERVER_TOKEN", hide_env_values = true, hide = true)]
    bitbucket_token: Option<String>,
    #[arg(long, env = "GIT_USERNAME", hide_env_values = true, hide = true)]
    git_username: Option<String>,
    #[arg(long, env = "GIT_PASSWORD", hide_env_values = true, hide = true)]
    git_password: Option<String>,
    #[arg(long, env = "GIT_TOKEN", hide_env_values = true, hide = true)]
    git_token: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    modbump_core::init_tracing(cli.json, level);

    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let path = Configuration::locate(cli.config.as_deref(), &cwd)?;
    let mut config = Configuration::load(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    if cli.fail_fast {
        config.general.fail_fast = true;
    }
    info!(config = %path.display(), "loaded configuration");

    let engine = build_engine(&config, &cli.credentials).await?;

    if cli.dry_run {
        let plan = engine.plan().await.context("Failed to plan pass")?;
        print_plan(&plan, cli.json)?;
        return Ok(());
    }

    let report = engine.run_pass().await.context("Pass failed")?;
    print_summary(&report, cli.json)?;

    let failures = report.failure_count();
    if let Err(e) = report.into_result() {
        bail!("{failures} repositories failed, first failure: {e}");
    }
    Ok(())
}

async fn build_engine(config: &Configuration, creds: &Credentials) -> Result<Engine> {
    let scm = BitbucketServer::new(
        config.scm.bitbucket_server.clone(),
        config.scm.pull_request.clone(),
        config.general.clone_type,
        BitbucketCredentials {
            username: creds.bitbucket_username.clone(),
            password: creds.bitbucket_password.clone(),
            token: creds.bitbucket_token.clone(),
        },
    )
    .context("Failed to create Bitbucket Server client")?;

    let vcs = GitCli::new(
        config.vcs.git.clone(),
        config.general.clone_type,
        GitCredentials {
            username: creds.git_username.clone(),
            password: creds.git_password.clone(),
            token: creds.git_token.clone(),
        },
    );

    let resolver = UpdateResolver::new(Arc::new(GoModRunner::new()), config.resolver_config());
    let backend = build_backend(&config.storage).await;

    Ok(Engine::new(
        config.engine_config(),
        Arc::new(scm),
        Arc::new(vcs),
        resolver,
        Arc::new(SnapshotStore::new(backend)),
    ))
}

async fn build_backend(storage: &StorageConfig) -> Arc<dyn SnapshotBackend> {
    match storage {
        StorageConfig::File(file) => Arc::new(FileBackend::from_config(file)),
        StorageConfig::S3(s3) => Arc::new(S3Backend::new(s3.clone()).await),
    }
}

#[derive(Serialize)]
struct RepoLine<'a> {
    name: &'a str,
    path: PathBuf,
    stages: Vec<&'static str>,
    outcome: String,
    pull_request_id: u64,
}

fn outcome_label(outcome: &RepoOutcome) -> String {
    match outcome {
        RepoOutcome::Completed => "completed".to_string(),
        RepoOutcome::NoUpdates => "no updates".to_string(),
        RepoOutcome::NotMergeable { vetoes } => format!("not mergeable ({})", vetoes.join("; ")),
        RepoOutcome::Cancelled => "cancelled".to_string(),
        RepoOutcome::Failed(e) => format!("failed: {e}"),
    }
}

fn print_summary(report: &PassReport, json: bool) -> Result<()> {
    let mut lines: Vec<RepoLine<'_>> = report
        .reports
        .iter()
        .map(|r| RepoLine {
            name: &r.repository.name,
            path: r.repository.clone_path(),
            stages: r.stages.iter().map(|s| s.as_str()).collect(),
            outcome: outcome_label(&r.outcome),
            pull_request_id: r.repository.pull_request_id,
        })
        .collect();
    lines.sort_by(|a, b| a.path.cmp(&b.path));

    if json {
        let summary = serde_json::json!({
            "pass_id": report.pass_id,
            "repositories": lines,
            "failed": report.failure_count(),
            "saved": report.saved,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Pass {}", report.pass_id);
    for line in &lines {
        let stages = if line.stages.is_empty() {
            "-".to_string()
        } else {
            line.stages.join(",")
        };
        println!("  {:<40} {:<40} {}", line.name, stages, line.outcome);
    }
    println!(
        "{} repositories, {} failed, {} saved",
        lines.len(),
        report.failure_count(),
        report.saved
    );
    Ok(())
}

fn print_plan(plan: &[PlannedRepo], json: bool) -> Result<()> {
    if json {
        let entries: Vec<_> = plan
            .iter()
            .map(|p| {
                serde_json::json!({
                    "name": p.repository.name,
                    "path": p.repository.clone_path(),
                    "pull_request_id": p.repository.pull_request_id,
                    "stages": p.stages.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for p in plan {
        let stages: Vec<&str> = p.stages.iter().map(|s| s.as_str()).collect();
        println!(
            "{:<40} {}",
            p.repository.clone_path().display().to_string(),
            if stages.is_empty() {
                "nothing to do".to_string()
            } else {
                stages.join(" -> ")
            }
        );
    }
    println!("{} repositories", plan.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use modbump_state::{FileBackendConfig, S3BackendConfig};

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_parse() {
        let cli = Cli::try_parse_from([
            "modbump",
            "--config",
            "fleet.yaml",
            "--dry-run",
            "--fail-fast",
            "-v",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("fleet.yaml")));
        assert!(cli.dry_run);
        assert!(cli.fail_fast);
        assert!(cli.verbose);
        assert!(!cli.json);
    }

    #[tokio::test]
    async fn file_backend_is_built_from_config() {
        let backend = build_backend(&StorageConfig::File(FileBackendConfig {
            filename: PathBuf::from("state.json"),
        }))
        .await;
        assert_eq!(backend.describe(), "file://state.json");
    }

    #[tokio::test]
    async fn s3_backend_is_built_from_config() {
        let storage = StorageConfig::S3(
            S3BackendConfig::new("fleet")
                .with_region("eu-west-1")
                .with_key("modbump/state.json"),
        );
        let backend = build_backend(&storage).await;
        assert_eq!(backend.describe(), "s3://fleet/modbump/state.json");
    }

    #[tokio::test]
    async fn engine_builds_from_default_config() {
        let config = Configuration::default();
        let engine = build_engine(&config, &Credentials::default()).await.unwrap();
        assert_eq!(engine.config().workers, 1);
        assert_eq!(engine.config().work_dir, PathBuf::from("repos"));
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(outcome_label(&RepoOutcome::NoUpdates), "no updates");
        assert_eq!(
            outcome_label(&RepoOutcome::NotMergeable {
                vetoes: vec!["a".into(), "b".into()]
            }),
            "not mergeable (a; b)"
        );
    }
}
