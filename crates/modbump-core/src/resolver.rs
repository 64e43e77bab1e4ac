//! Update resolution for a single working copy.
//!
//! List candidates → parse → filter → apply one by one → reconcile once.
//! Partial success is possible: when an apply fails the already-applied
//! updates stay in the working tree and the whole repository is reported as
//! failed for this pass.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::collaborators::UpdateCommandRunner;
use crate::domain::{parse_update_listing, BumpResult, Update};
use crate::filter::FilterConfig;

/// Settings for [`UpdateResolver`].
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub filter: FilterConfig,
    /// Run the runner's reconcile step after applying updates.
    pub tidy: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            filter: FilterConfig::default(),
            tidy: true,
        }
    }
}

pub struct UpdateResolver {
    runner: Arc<dyn UpdateCommandRunner>,
    config: ResolverConfig,
}

impl UpdateResolver {
    pub fn new(runner: Arc<dyn UpdateCommandRunner>, config: ResolverConfig) -> Self {
        Self { runner, config }
    }

    /// Candidate updates in `dir` that pass the filter, without applying them.
    pub async fn candidates(&self, dir: &Path) -> BumpResult<Vec<Update>> {
        if !self.runner.has_manifest(dir).await {
            info!(dir = %dir.display(), "no module manifest, skipping");
            return Ok(Vec::new());
        }

        let listing = self.runner.list_candidate_updates(dir).await?;
        let origin = dir.display().to_string();
        let updates = parse_update_listing(&listing, &origin)
            .into_iter()
            .filter(|u| {
                let decision = self.config.filter.decide(&u.module);
                if !decision.is_allowed() {
                    debug!(module = %u.module, ?decision, "update filtered out");
                }
                decision.is_allowed()
            })
            .collect();
        Ok(updates)
    }

    /// Resolve and apply updates in `dir`. An empty result means there was
    /// nothing to do and no command beyond the listing ran.
    #[instrument(skip(self, dir), fields(dir = %dir.display()))]
    pub async fn bump(&self, dir: &Path) -> BumpResult<Vec<Update>> {
        let updates = self.candidates(dir).await?;
        if updates.is_empty() {
            info!("no updates");
            return Ok(updates);
        }

        info!(count = updates.len(), "applying updates");
        for update in &updates {
            self.runner
                .apply_update(dir, &update.module, &update.new_version)
                .await?;
            debug!(%update, "applied");
        }

        if self.config.tidy {
            self.runner.reconcile(dir).await?;
        }

        Ok(updates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BumpError;
    use crate::fakes::ScriptedRunner;
    use std::path::PathBuf;

    fn dir() -> PathBuf {
        PathBuf::from("/work/bitbucketserver/PLAT/billing")
    }

    fn resolver(runner: Arc<ScriptedRunner>, filter: FilterConfig, tidy: bool) -> UpdateResolver {
        UpdateResolver::new(runner, ResolverConfig { filter, tidy })
    }

    #[tokio::test]
    async fn applies_allowed_updates_then_reconciles() {
        let runner = Arc::new(ScriptedRunner::with_listing(
            "github.com/foo/bar:v1.2.0:v1.3.0\n\
             k8s.io/client-go:v0.20.0:v0.21.0\n\
             bad:line\n",
        ));
        let filter = FilterConfig {
            blocked_domains: vec!["k8s.io".to_string()],
            ..Default::default()
        };

        let updates = resolver(runner.clone(), filter, true)
            .bump(&dir())
            .await
            .unwrap();

        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].module, "github.com/foo/bar");
        assert_eq!(
            runner.applied(),
            vec![("github.com/foo/bar".to_string(), "1.3.0".to_string())]
        );
        assert_eq!(runner.reconcile_count(), 1);
    }

    #[tokio::test]
    async fn nothing_allowed_means_no_updates_and_no_commands() {
        let runner = Arc::new(ScriptedRunner::with_listing("github.com/foo/bar:1.2.0:1.3.0\n"));
        let filter = FilterConfig {
            allowed_modules: vec!["github.com/only/this".to_string()],
            ..Default::default()
        };

        let updates = resolver(runner.clone(), filter, true)
            .bump(&dir())
            .await
            .unwrap();

        assert!(updates.is_empty());
        assert!(runner.applied().is_empty());
        assert_eq!(runner.reconcile_count(), 0);
    }

    #[tokio::test]
    async fn missing_manifest_is_not_an_error() {
        let runner = Arc::new(ScriptedRunner::without_manifest());
        let updates = resolver(runner.clone(), FilterConfig::default(), true)
            .bump(&dir())
            .await
            .unwrap();
        assert!(updates.is_empty());
        assert_eq!(runner.list_count(), 0);
    }

    #[tokio::test]
    async fn apply_failure_stops_remaining_updates() {
        let runner = Arc::new(
            ScriptedRunner::with_listing(
                "a.example.com/one:1.0.0:1.1.0\n\
                 a.example.com/two:1.0.0:1.1.0\n\
                 a.example.com/three:1.0.0:1.1.0\n",
            )
            .fail_apply_for("a.example.com/two"),
        );

        let err = resolver(runner.clone(), FilterConfig::default(), true)
            .bump(&dir())
            .await
            .unwrap_err();

        assert!(matches!(err, BumpError::UpdateApply { ref module, .. } if module == "a.example.com/two"));
        let applied: Vec<String> = runner.applied().into_iter().map(|(m, _)| m).collect();
        assert_eq!(applied, vec!["a.example.com/one"]);
        assert_eq!(runner.reconcile_count(), 0);
    }

    #[tokio::test]
    async fn reconcile_failure_fails_the_repository() {
        let runner = Arc::new(
            ScriptedRunner::with_listing("a.example.com/one:1.0.0:1.1.0\n").fail_reconcile(),
        );
        let err = resolver(runner, FilterConfig::default(), true)
            .bump(&dir())
            .await
            .unwrap_err();
        assert!(matches!(err, BumpError::Reconcile(_)));
    }

    #[tokio::test]
    async fn tidy_disabled_skips_reconcile() {
        let runner = Arc::new(ScriptedRunner::with_listing("a.example.com/one:1.0.0:1.1.0\n"));
        let updates = resolver(runner.clone(), FilterConfig::default(), false)
            .bump(&dir())
            .await
            .unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(runner.reconcile_count(), 0);
    }

    #[tokio::test]
    async fn listing_failure_is_an_error() {
        let runner = Arc::new(ScriptedRunner::failing_listing());
        let err = resolver(runner, FilterConfig::default(), true)
            .bump(&dir())
            .await
            .unwrap_err();
        assert!(matches!(err, BumpError::UpdateListing(_)));
    }
}
