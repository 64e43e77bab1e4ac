//! Fleet orchestration: one bounded, isolated pipeline per repository.
//!
//! A pass loads the persisted snapshot, discovers live repositories, merges
//! the two, then fans the working set out to at most `workers` concurrent
//! pipelines. Each pipeline owns its [`Repository`] and hands it back when
//! done, failed or not, so nothing the pass learned is lost. A pipeline that
//! panics is reported with the repository as it was before the pipeline
//! started. A failing stage stops only that repository.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, instrument, warn, Instrument};

use crate::collaborators::{MergeOutcome, ScmClient, VcsClient};
use crate::converge::converge;
use crate::domain::{savable, BumpError, BumpResult, Repository, ScmKind, Stage, VcsKind};
use crate::obs;
use crate::resolver::UpdateResolver;
use crate::storage::StateStore;

/// Engine settings, usually derived from the `general` and `scm` config
/// sections.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Concurrent pipelines; zero is treated as one.
    pub workers: usize,
    pub work_dir: PathBuf,
    /// Pause after push, pull request creation and merge.
    pub delay: Duration,
    pub clean_before: bool,
    pub cleanup: bool,
    pub stateful: bool,
    pub auto_merge: bool,
    /// Stop starting new pipelines after the first failure.
    pub fail_fast: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            work_dir: PathBuf::from("repos"),
            delay: Duration::ZERO,
            clean_before: true,
            cleanup: false,
            stateful: false,
            auto_merge: false,
            fail_fast: false,
        }
    }
}

/// How a repository's pipeline ended.
#[derive(Debug)]
pub enum RepoOutcome {
    /// Every eligible stage ran.
    Completed,
    /// Nothing to bump; the pipeline stopped after the bump stage.
    NoUpdates,
    /// The host refused to merge the tracked pull request yet.
    NotMergeable { vetoes: Vec<String> },
    /// Skipped because an earlier pipeline failed in fail-fast mode.
    Cancelled,
    Failed(BumpError),
}

impl RepoOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, RepoOutcome::Failed(_))
    }
}

/// What happened to one repository during a pass.
#[derive(Debug)]
pub struct RepoReport {
    /// The repository as it stands after the pipeline.
    pub repository: Repository,
    /// Stages that completed, in order.
    pub stages: Vec<Stage>,
    pub outcome: RepoOutcome,
    position: usize,
}

/// Result of one pass over the fleet.
#[derive(Debug)]
pub struct PassReport {
    pub pass_id: String,
    /// Per-repository reports in completion order.
    pub reports: Vec<RepoReport>,
    /// Pipelines that died without a recoverable repository.
    pub lost: Vec<BumpError>,
    /// Repositories written to the snapshot, zero when nothing was saved.
    pub saved: usize,
}

impl PassReport {
    pub fn failures(&self) -> impl Iterator<Item = &BumpError> {
        self.reports
            .iter()
            .filter_map(|r| match &r.outcome {
                RepoOutcome::Failed(e) => Some(e),
                _ => None,
            })
            .chain(self.lost.iter())
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }

    pub fn report_for(&self, name: &str) -> Option<&RepoReport> {
        self.reports.iter().find(|r| r.repository.name == name)
    }

    /// Final repository values in working-set order.
    pub fn repositories(&self) -> Vec<&Repository> {
        let mut reports: Vec<&RepoReport> = self.reports.iter().collect();
        reports.sort_by_key(|r| r.position);
        reports.into_iter().map(|r| &r.repository).collect()
    }

    /// `Ok(())` when every pipeline succeeded, otherwise the first failure.
    pub fn into_result(self) -> BumpResult<()> {
        let lost = self.lost;
        let first = self
            .reports
            .into_iter()
            .find_map(|r| match r.outcome {
                RepoOutcome::Failed(e) => Some(e),
                _ => None,
            })
            .or_else(|| lost.into_iter().next());
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// A repository and the stages a pass would attempt for it.
#[derive(Debug, Clone)]
pub struct PlannedRepo {
    pub repository: Repository,
    pub stages: Vec<Stage>,
}

/// Drives passes over the fleet.
pub struct Engine {
    config: EngineConfig,
    scm: Arc<dyn ScmClient>,
    vcs: Arc<dyn VcsClient>,
    resolver: Arc<UpdateResolver>,
    storage: Arc<dyn StateStore>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        scm: Arc<dyn ScmClient>,
        vcs: Arc<dyn VcsClient>,
        resolver: UpdateResolver,
        storage: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            config,
            scm,
            vcs,
            resolver: Arc::new(resolver),
            storage,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Load, discover and converge without touching any repository.
    pub async fn plan(&self) -> BumpResult<Vec<PlannedRepo>> {
        let repos = self.working_set().await?;
        let pipeline = self.pipeline();
        Ok(repos
            .into_iter()
            .map(|repository| PlannedRepo {
                stages: pipeline.planned_stages(&repository),
                repository,
            })
            .collect())
    }

    /// Run one full pass.
    ///
    /// Fails only when the pass itself cannot proceed (load, discovery) or
    /// the final save fails. Per-repository failures are in the report.
    pub async fn run_pass(&self) -> BumpResult<PassReport> {
        let pass_id = uuid::Uuid::new_v4().to_string();
        let span = obs::pass_span(&pass_id);
        self.pass(pass_id).instrument(span).await
    }

    async fn pass(&self, pass_id: String) -> BumpResult<PassReport> {
        let started = Instant::now();

        if self.config.clean_before {
            clean_work_dir(&self.config.work_dir).await;
        }

        let repos = self.working_set().await?;
        let workers = self.config.workers.max(1);
        obs::emit_pass_started(&pass_id, repos.len(), workers);

        let (reports, lost) = self.fan_out(repos, workers).await;

        if self.config.cleanup {
            clean_work_dir(&self.config.work_dir).await;
        }

        let mut report = PassReport {
            pass_id,
            reports,
            lost,
            saved: 0,
        };

        if self.config.stateful || self.config.auto_merge {
            let snapshot: Vec<Repository> = report.repositories().into_iter().cloned().collect();
            let snapshot = savable(&snapshot);
            self.storage.save(&snapshot).await?;
            report.saved = snapshot.len();
        }

        let completed = report
            .reports
            .iter()
            .filter(|r| !r.outcome.is_failure())
            .count();
        obs::emit_pass_finished(
            &report.pass_id,
            started.elapsed().as_millis() as u64,
            completed,
            report.failure_count(),
            report.saved,
        );
        Ok(report)
    }

    async fn working_set(&self) -> BumpResult<Vec<Repository>> {
        let persisted = self.storage.load().await?;
        let discovered = self
            .scm
            .discover(&self.vcs.kind())
            .await
            .map_err(|e| match e {
                BumpError::Discovery(_) => e,
                other => BumpError::Discovery(other.to_string()),
            })?;
        info!(
            persisted = persisted.len(),
            discovered = discovered.len(),
            "converging repositories"
        );
        Ok(converge(&self.config.work_dir, persisted, discovered))
    }

    fn pipeline(&self) -> Pipeline {
        Pipeline {
            scm: Arc::clone(&self.scm),
            vcs: Arc::clone(&self.vcs),
            resolver: Arc::clone(&self.resolver),
            scm_kind: self.scm.kind(),
            vcs_kind: self.vcs.kind(),
            delay: self.config.delay,
            auto_merge: self.config.auto_merge,
        }
    }

    #[instrument(skip(self, repos), fields(repos = repos.len()))]
    async fn fan_out(
        &self,
        repos: Vec<Repository>,
        workers: usize,
    ) -> (Vec<RepoReport>, Vec<BumpError>) {
        let pipeline = Arc::new(self.pipeline());
        let sem = Arc::new(Semaphore::new(workers));
        let (fail_tx, _fail_rx) = watch::channel(false);
        let fail_flag = Arc::new(fail_tx);
        let fail_fast = self.config.fail_fast;

        let mut set = JoinSet::new();
        let mut pending = HashMap::new();
        for (position, repo) in repos.into_iter().enumerate() {
            let pipeline = Arc::clone(&pipeline);
            let sem = Arc::clone(&sem);
            let fail_flag = Arc::clone(&fail_flag);
            let fail_rx = fail_flag.subscribe();
            let before = repo.clone();

            let task = async move {
                let _permit = sem.acquire_owned().await.ok();

                if *fail_rx.borrow() {
                    info!(repo = %repo.name, "skipped after earlier failure");
                    return RepoReport {
                        repository: repo,
                        stages: Vec::new(),
                        outcome: RepoOutcome::Cancelled,
                        position,
                    };
                }

                let mut repo = repo;
                let mut stages = Vec::new();
                let outcome = match pipeline.run(&mut repo, &mut stages).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        if fail_fast {
                            let _ = fail_flag.send(true);
                        }
                        RepoOutcome::Failed(e)
                    }
                };
                RepoReport {
                    repository: repo,
                    stages,
                    outcome,
                    position,
                }
            };
            let handle = set.spawn(task.instrument(tracing::Span::current()));
            pending.insert(handle.id(), (position, before));
        }

        let mut reports = Vec::new();
        let mut lost = Vec::new();
        while let Some(joined) = set.join_next_with_id().await {
            match joined {
                Ok((id, report)) => {
                    pending.remove(&id);
                    reports.push(report);
                }
                Err(e) => {
                    let error = BumpError::Task(e.to_string());
                    match pending.remove(&e.id()) {
                        Some((position, repository)) => {
                            warn!(repo = %repository.name, error = %e, "repository pipeline aborted");
                            if fail_fast {
                                let _ = fail_flag.send(true);
                            }
                            reports.push(RepoReport {
                                repository,
                                stages: Vec::new(),
                                outcome: RepoOutcome::Failed(error),
                                position,
                            });
                        }
                        None => {
                            warn!(error = %e, "repository pipeline aborted");
                            lost.push(error);
                        }
                    }
                }
            }
        }
        (reports, lost)
    }
}

/// Everything a single repository pipeline needs, shared by all tasks.
struct Pipeline {
    scm: Arc<dyn ScmClient>,
    vcs: Arc<dyn VcsClient>,
    resolver: Arc<UpdateResolver>,
    scm_kind: ScmKind,
    vcs_kind: VcsKind,
    delay: Duration,
    auto_merge: bool,
}

impl Pipeline {
    /// Run clone, merge, bump, push and open-pull-request in order, each only
    /// when its guard holds. Completed stages are appended to `stages`.
    async fn run(&self, repo: &mut Repository, stages: &mut Vec<Stage>) -> BumpResult<RepoOutcome> {
        if repo.working_copy.is_none() && repo.is_cloneable(&self.vcs_kind) {
            let vcs = &self.vcs;
            repo.ensure_branches(|| vcs.source_branch(), || vcs.target_branch());
            let working_copy = self
                .vcs
                .clone_repository(repo)
                .await
                .map_err(|e| failed(repo, Stage::Clone, e))?;
            repo.set_cloned(working_copy);
            completed(repo, Stage::Clone, stages);
        }

        if self.auto_merge && repo.is_mergeable(&self.scm_kind) {
            let outcome = self
                .scm
                .merge_change_request(repo)
                .await
                .map_err(|e| failed(repo, Stage::Merge, e))?;
            match outcome {
                MergeOutcome::NotMergeable { vetoes } => {
                    info!(
                        repo = %repo.name,
                        pull_request_id = repo.pull_request_id,
                        vetoes = ?vetoes,
                        "pull request not mergeable yet"
                    );
                    return Ok(RepoOutcome::NotMergeable { vetoes });
                }
                MergeOutcome::Merged | MergeOutcome::AlreadyClosed => {
                    self.vcs
                        .delete_remote_branch(repo)
                        .await
                        .map_err(|e| failed(repo, Stage::Merge, e))?;
                    repo.reset_state();
                    completed(repo, Stage::Merge, stages);
                    self.throttle().await;
                }
            }
        }

        if repo.is_bumpable() {
            let updates = self
                .resolver
                .bump(&repo.working_dir())
                .await
                .map_err(|e| failed(repo, Stage::Bump, e))?;
            if updates.is_empty() {
                info!(repo = %repo.name, "no updates");
                return Ok(RepoOutcome::NoUpdates);
            }
            repo.set_bumped(updates)
                .map_err(|e| failed(repo, Stage::Bump, e))?;
            completed(repo, Stage::Bump, stages);
        }

        if repo.is_pushable(&self.vcs_kind) {
            self.vcs
                .push(repo)
                .await
                .map_err(|e| failed(repo, Stage::Push, e))?;
            repo.set_pushed();
            completed(repo, Stage::Push, stages);
            self.throttle().await;
        }

        if repo.is_pr_able(&self.scm_kind) {
            let id = self
                .scm
                .open_change_request(repo)
                .await
                .map_err(|e| failed(repo, Stage::OpenPullRequest, e))?;
            repo.set_pull_request(id);
            completed(repo, Stage::OpenPullRequest, stages);
            self.throttle().await;
        }

        Ok(RepoOutcome::Completed)
    }

    /// Stages a pass would attempt, assuming each one succeeds and the bump
    /// finds something to update.
    fn planned_stages(&self, repo: &Repository) -> Vec<Stage> {
        let mut sim = repo.clone();
        let mut stages = Vec::new();

        if sim.working_copy.is_none() && sim.is_cloneable(&self.vcs_kind) {
            stages.push(Stage::Clone);
            sim.cloned = true;
        }
        if self.auto_merge && sim.is_mergeable(&self.scm_kind) {
            stages.push(Stage::Merge);
            return stages;
        }
        if sim.is_bumpable() {
            stages.push(Stage::Bump);
            sim.bumped = true;
        }
        if sim.is_pushable(&self.vcs_kind) {
            stages.push(Stage::Push);
            sim.pushed = true;
        }
        if sim.is_pr_able(&self.scm_kind) {
            stages.push(Stage::OpenPullRequest);
        }
        stages
    }

    async fn throttle(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

fn completed(repo: &Repository, stage: Stage, stages: &mut Vec<Stage>) {
    obs::emit_stage_completed(&repo.name, stage);
    stages.push(stage);
}

fn failed(repo: &Repository, stage: Stage, source: BumpError) -> BumpError {
    obs::emit_stage_failed(&repo.name, stage, &source);
    BumpError::at_stage(&repo.name, stage, source)
}

/// Remove the work dir. A missing directory is fine; anything else is logged.
async fn clean_work_dir(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => info!(dir = %dir.display(), "cleaned work dir"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(dir = %dir.display(), error = %e, "unable to clean work dir"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{ScriptedRunner, ScriptedScm, ScriptedVcs};
    use crate::resolver::ResolverConfig;
    use crate::storage::SnapshotStore;
    use modbump_state::fakes::MemoryBackend;

    fn repo(name: &str) -> Repository {
        Repository::new(
            name,
            format!("https://bitbucket.example.com/scm/plat/{name}.git"),
            "PLAT",
            ScmKind::bitbucket_server(),
            VcsKind::git(),
        )
    }

    fn engine(config: EngineConfig, repos: Vec<Repository>) -> Engine {
        let runner = ScriptedRunner::with_listing("example.com/lib:v1.0.0:v1.1.0\n");
        Engine::new(
            config,
            Arc::new(ScriptedScm::new(repos, 1)),
            Arc::new(ScriptedVcs::new()),
            UpdateResolver::new(Arc::new(runner), ResolverConfig::default()),
            Arc::new(SnapshotStore::new(Arc::new(MemoryBackend::new()))),
        )
    }

    fn config(work_dir: &Path) -> EngineConfig {
        EngineConfig {
            work_dir: work_dir.to_path_buf(),
            ..EngineConfig::default()
        }
    }

    #[test]
    fn plan_for_fresh_repository_covers_every_stage_but_merge() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(config(tmp.path()), Vec::new());
        let stages = engine.pipeline().planned_stages(&repo("svc"));
        assert_eq!(
            stages,
            vec![Stage::Clone, Stage::Bump, Stage::Push, Stage::OpenPullRequest]
        );
    }

    #[test]
    fn plan_for_open_pull_request_merges_when_auto_merge() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = config(tmp.path());
        cfg.auto_merge = true;
        let engine = engine(cfg, Vec::new());

        let mut tracked = repo("svc");
        tracked.bumped = true;
        tracked.pushed = true;
        tracked.set_pull_request(3);

        assert_eq!(
            engine.pipeline().planned_stages(&tracked),
            vec![Stage::Clone, Stage::Merge]
        );
    }

    #[tokio::test]
    async fn clean_work_dir_ignores_missing_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("never-created");
        clean_work_dir(&dir).await;
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn clean_work_dir_removes_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("repos");
        std::fs::create_dir_all(dir.join("bitbucketserver/PLAT/svc")).unwrap();
        clean_work_dir(&dir).await;
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn zero_workers_still_makes_progress() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = config(tmp.path());
        cfg.workers = 0;
        let engine = engine(cfg, vec![repo("a"), repo("b")]);

        let report = engine.run_pass().await.unwrap();
        assert_eq!(report.reports.len(), 2);
        assert_eq!(report.failure_count(), 0);
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn stage_events_carry_the_pass_id() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_max_level(tracing::Level::INFO)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let tmp = tempfile::tempdir().unwrap();
        let report = engine(config(tmp.path()), vec![repo("a")])
            .run_pass()
            .await
            .unwrap();

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        let stage_events: Vec<&str> = output
            .lines()
            .filter(|l| l.contains("stage.completed"))
            .collect();
        assert_eq!(stage_events.len(), 4);
        assert!(stage_events.iter().all(|l| l.contains(&report.pass_id)));
    }

    #[tokio::test]
    async fn nothing_is_saved_unless_stateful_or_auto_merge() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(config(tmp.path()), vec![repo("a")]);
        let report = engine.run_pass().await.unwrap();
        assert_eq!(report.saved, 0);
        assert!(report.repositories()[0].pull_request_opened);
    }
}
