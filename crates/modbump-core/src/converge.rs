//! Merge persisted repository state with freshly discovered repositories.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::domain::Repository;

/// Produce the working set for a pass.
///
/// Every repository is rebased onto `work_dir`. A discovered repository whose
/// clone path matches a persisted one is replaced by the persisted record, so
/// open pull requests and branch names survive between passes. When several
/// persisted records share a clone path the last one wins. Persisted records
/// that were not discovered again are dropped. Discovery order is kept.
pub fn converge(
    work_dir: &Path,
    persisted: Vec<Repository>,
    discovered: Vec<Repository>,
) -> Vec<Repository> {
    let mut by_path: HashMap<PathBuf, Repository> = HashMap::with_capacity(persisted.len());
    for repo in persisted {
        let repo = repo.with_base_dir(work_dir);
        by_path.insert(repo.clone_path(), repo);
    }

    discovered
        .into_iter()
        .map(|repo| {
            let repo = repo.with_base_dir(work_dir);
            match by_path.get(&repo.clone_path()) {
                Some(known) => {
                    debug!(
                        repo = %known.name,
                        pull_request_id = known.pull_request_id,
                        "carrying persisted state forward"
                    );
                    known.clone()
                }
                None => repo,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ScmKind, VcsKind};

    fn repo(name: &str, parent: &str) -> Repository {
        Repository::new(
            name,
            format!("https://bitbucket.example.com/scm/{parent}/{name}.git"),
            parent,
            ScmKind::bitbucket_server(),
            VcsKind::git(),
        )
    }

    #[test]
    fn persisted_pull_request_is_carried_forward() {
        let mut known = repo("svc", "PLAT").with_base_dir("/tmp/old");
        known.cloned = true;
        known.bumped = true;
        known.pushed = true;
        known.set_pull_request(42);
        known.source_branch = "modbump-20240101000000".to_string();

        let out = converge(Path::new("repos"), vec![known], vec![repo("svc", "PLAT")]);

        assert_eq!(out.len(), 1);
        assert!(out[0].pull_request_opened);
        assert_eq!(out[0].pull_request_id, 42);
        assert_eq!(out[0].source_branch, "modbump-20240101000000");
        assert_eq!(out[0].base_dir, PathBuf::from("repos"));
    }

    #[test]
    fn undiscovered_persisted_entries_are_dropped() {
        let mut gone = repo("retired", "PLAT");
        gone.set_pull_request(9);

        let out = converge(
            Path::new("repos"),
            vec![gone],
            vec![repo("a", "PLAT"), repo("b", "PLAT")],
        );

        let names: Vec<_> = out.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(out.iter().all(|r| !r.pull_request_opened));
    }

    #[test]
    fn last_persisted_duplicate_wins() {
        let mut first = repo("svc", "PLAT");
        first.set_pull_request(1);
        let mut second = repo("svc", "PLAT");
        second.set_pull_request(2);

        let out = converge(Path::new("repos"), vec![first, second], vec![repo("svc", "PLAT")]);
        assert_eq!(out[0].pull_request_id, 2);
    }

    #[test]
    fn same_name_in_other_project_is_not_matched() {
        let mut known = repo("svc", "OTHER");
        known.set_pull_request(5);

        let out = converge(Path::new("repos"), vec![known], vec![repo("svc", "PLAT")]);
        assert_eq!(out[0].pull_request_id, 0);
        assert_eq!(out[0].parent, "PLAT");
    }

    #[test]
    fn discovery_order_is_kept() {
        let out = converge(
            Path::new("repos"),
            Vec::new(),
            vec![repo("c", "P"), repo("a", "P"), repo("b", "P")],
        );
        let names: Vec<_> = out.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
        assert_eq!(out[1].clone_path(), PathBuf::from("repos/bitbucketserver/P/a"));
    }
}
