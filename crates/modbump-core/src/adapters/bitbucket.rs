//! Bitbucket Server REST client (API 1.0).
//!
//! Only what the engine needs: list a project's repositories, open a pull
//! request, and merge one once the server says it can be merged.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::collaborators::{MergeOutcome, ScmClient};
use crate::config::{BitbucketServerConfig, CloneType, PullRequestConfig};
use crate::domain::{BumpError, BumpResult, Repository, ScmKind, VcsKind};

const PAGE_LIMIT: u32 = 100;

/// Credentials for the REST API. A token wins over username and password.
#[derive(Debug, Clone, Default)]
pub struct BitbucketCredentials {
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
}

// -- wire types ------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "T: Deserialize<'de>"))]
struct Page<T> {
    #[serde(default)]
    values: Vec<T>,
    #[serde(default = "default_last_page")]
    is_last_page: bool,
    next_page_start: Option<u32>,
}

fn default_last_page() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RepoEntry {
    slug: String,
    #[serde(default)]
    links: RepoLinks,
}

#[derive(Debug, Default, Deserialize)]
struct RepoLinks {
    #[serde(default)]
    clone: Vec<CloneLink>,
}

#[derive(Debug, Deserialize)]
struct CloneLink {
    href: String,
    name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewPullRequest<'a> {
    title: &'a str,
    description: &'a str,
    from_ref: RefSpec<'a>,
    to_ref: RefSpec<'a>,
}

#[derive(Debug, Serialize)]
struct RefSpec<'a> {
    id: String,
    repository: RefRepository<'a>,
}

#[derive(Debug, Serialize)]
struct RefRepository<'a> {
    slug: &'a str,
    project: RefProject<'a>,
}

#[derive(Debug, Serialize)]
struct RefProject<'a> {
    key: &'a str,
}

impl<'a> RefSpec<'a> {
    fn branch(branch: &str, slug: &'a str, project: &'a str) -> Self {
        Self {
            id: format!("refs/heads/{branch}"),
            repository: RefRepository {
                slug,
                project: RefProject { key: project },
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct PullRequestEntry {
    id: u64,
    #[serde(default)]
    version: i64,
    #[serde(default)]
    open: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MergeStatus {
    can_merge: bool,
    #[serde(default)]
    vetoes: Vec<Veto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Veto {
    #[serde(default)]
    summary_message: String,
    #[serde(default)]
    detailed_message: String,
}

impl Veto {
    fn describe(&self) -> String {
        match (self.summary_message.is_empty(), self.detailed_message.is_empty()) {
            (false, false) => format!("{}: {}", self.summary_message, self.detailed_message),
            (false, true) => self.summary_message.clone(),
            _ => self.detailed_message.clone(),
        }
    }
}

// -- client ----------------------------------------------------------------

/// [`ScmClient`] for a Bitbucket Server project.
pub struct BitbucketServer {
    config: BitbucketServerConfig,
    pull_request: PullRequestConfig,
    clone_type: CloneType,
    credentials: BitbucketCredentials,
    client: reqwest::Client,
}

impl BitbucketServer {
    pub fn new(
        config: BitbucketServerConfig,
        pull_request: PullRequestConfig,
        clone_type: CloneType,
        credentials: BitbucketCredentials,
    ) -> BumpResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("modbump/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .danger_accept_invalid_certs(config.insecure)
            .build()?;

        Ok(Self {
            config,
            pull_request,
            clone_type,
            credentials,
            client,
        })
    }

    fn api(&self, path: &str) -> String {
        format!(
            "{}/rest/api/1.0/{}",
            self.config.url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn pull_requests_path(project: &str, slug: &str) -> String {
        format!("projects/{project}/repos/{slug}/pull-requests")
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        if let Some(token) = self.credentials.token.as_deref().filter(|t| !t.trim().is_empty()) {
            return request.bearer_auth(token.trim());
        }
        match self.credentials.username.as_deref().filter(|u| !u.is_empty()) {
            Some(username) => request.basic_auth(username, self.credentials.password.as_deref()),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> BumpResult<Response> {
        let response = self.authorize(request).send().await?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(BumpError::Http(format!("{status}: {}", body.trim())))
    }

    fn clone_url(&self, links: &[CloneLink]) -> Option<String> {
        links
            .iter()
            .find(|l| l.name.eq_ignore_ascii_case(self.clone_type.link_name()))
            .map(|l| l.href.clone())
    }

    fn unsupported(vcs: &VcsKind) -> BumpError {
        BumpError::UnsupportedVcs {
            scm: ScmKind::BITBUCKET_SERVER.to_string(),
            vcs: vcs.to_string(),
        }
    }
}

#[async_trait]
impl ScmClient for BitbucketServer {
    fn kind(&self) -> ScmKind {
        ScmKind::bitbucket_server()
    }

    async fn discover(&self, vcs: &VcsKind) -> BumpResult<Vec<Repository>> {
        if vcs.as_str() != VcsKind::GIT {
            return Err(Self::unsupported(vcs));
        }

        let project = &self.config.project_key;
        info!(project = %project, "listing repositories");

        let url = self.api(&format!("projects/{project}/repos"));
        let mut repos = Vec::new();
        let mut start = 0u32;
        loop {
            let request = self
                .client
                .get(&url)
                .query(&[("start", start), ("limit", PAGE_LIMIT)]);
            let page: Page<RepoEntry> = self
                .send(request)
                .await
                .map_err(|e| BumpError::Discovery(format!("project {project}: {e}")))?
                .json()
                .await
                .map_err(|e| BumpError::Discovery(format!("project {project}: {e}")))?;

            for entry in page.values {
                match self.clone_url(&entry.links.clone) {
                    Some(url) => repos.push(Repository::new(
                        entry.slug,
                        url,
                        project.clone(),
                        self.kind(),
                        vcs.clone(),
                    )),
                    None => warn!(
                        repo = %entry.slug,
                        clone_type = self.clone_type.link_name(),
                        "no clone link of the configured type, skipping"
                    ),
                }
            }

            match page.next_page_start {
                Some(next) if !page.is_last_page => start = next,
                _ => break,
            }
        }

        debug!(project = %project, repos = repos.len(), "discovered repositories");
        Ok(repos)
    }

    async fn open_change_request(&self, repo: &Repository) -> BumpResult<u64> {
        if repo.vcs.as_str() != VcsKind::GIT {
            return Err(Self::unsupported(&repo.vcs));
        }

        let body = NewPullRequest {
            title: &self.pull_request.title,
            description: &self.pull_request.description,
            from_ref: RefSpec::branch(&repo.source_branch, &repo.name, &repo.parent),
            to_ref: RefSpec::branch(&repo.target_branch, &repo.name, &repo.parent),
        };
        let url = self.api(&Self::pull_requests_path(&repo.parent, &repo.name));

        let wrap = |e: BumpError| BumpError::PullRequest(e.to_string());
        let created: PullRequestEntry = self
            .send(self.client.post(&url).json(&body))
            .await
            .map_err(wrap)?
            .json()
            .await
            .map_err(|e| wrap(e.into()))?;

        info!(repo = %repo.name, pull_request_id = created.id, "opened pull request");
        Ok(created.id)
    }

    async fn merge_change_request(&self, repo: &Repository) -> BumpResult<MergeOutcome> {
        let id = repo.pull_request_id;
        let wrap = |e: BumpError| BumpError::Merge {
            id,
            detail: e.to_string(),
        };
        let base = format!(
            "{}/{id}",
            self.api(&Self::pull_requests_path(&repo.parent, &repo.name))
        );

        let pull_request: PullRequestEntry = self
            .send(self.client.get(&base))
            .await
            .map_err(wrap)?
            .json()
            .await
            .map_err(|e| wrap(e.into()))?;
        if !pull_request.open {
            debug!(repo = %repo.name, pull_request_id = id, "pull request already closed");
            return Ok(MergeOutcome::AlreadyClosed);
        }

        let merge_url = format!("{base}/merge");
        let status: MergeStatus = self
            .send(self.client.get(&merge_url))
            .await
            .map_err(wrap)?
            .json()
            .await
            .map_err(|e| wrap(e.into()))?;
        if !status.can_merge {
            return Ok(MergeOutcome::NotMergeable {
                vetoes: status.vetoes.iter().map(Veto::describe).collect(),
            });
        }

        let request = self
            .client
            .post(&merge_url)
            .query(&[("version", pull_request.version)])
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        match self.send(request).await {
            Ok(_) => {
                info!(repo = %repo.name, pull_request_id = id, "merged pull request");
                Ok(MergeOutcome::Merged)
            }
            // Someone else merged or declined it between the two calls.
            Err(BumpError::Http(detail)) if detail.starts_with(StatusCode::CONFLICT.as_str()) => {
                warn!(repo = %repo.name, pull_request_id = id, %detail, "merge conflict");
                Ok(MergeOutcome::NotMergeable {
                    vetoes: vec![detail],
                })
            }
            Err(e) => Err(wrap(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(clone_type: CloneType) -> BitbucketServer {
        BitbucketServer::new(
            BitbucketServerConfig {
                url: "https://bitbucket.example.com/".to_string(),
                insecure: false,
                project_key: "PLAT".to_string(),
            },
            PullRequestConfig::default(),
            clone_type,
            BitbucketCredentials::default(),
        )
        .unwrap()
    }

    #[test]
    fn api_urls_are_joined_cleanly() {
        let bb = server(CloneType::Http);
        assert_eq!(
            bb.api("/projects/PLAT/repos"),
            "https://bitbucket.example.com/rest/api/1.0/projects/PLAT/repos"
        );
    }

    #[test]
    fn clone_link_matches_type_case_insensitively() {
        let links = vec![
            CloneLink {
                href: "ssh://git@bitbucket.example.com:7999/plat/svc.git".to_string(),
                name: "ssh".to_string(),
            },
            CloneLink {
                href: "https://bitbucket.example.com/scm/plat/svc.git".to_string(),
                name: "HTTP".to_string(),
            },
        ];
        assert_eq!(
            server(CloneType::Http).clone_url(&links).unwrap(),
            "https://bitbucket.example.com/scm/plat/svc.git"
        );
        assert!(server(CloneType::Ssh)
            .clone_url(&links)
            .unwrap()
            .starts_with("ssh://"));
        assert!(server(CloneType::Http).clone_url(&[]).is_none());
    }

    #[test]
    fn veto_description_prefers_both_messages() {
        let veto = Veto {
            summary_message: "Not approved".to_string(),
            detailed_message: "Needs 2 approvals".to_string(),
        };
        assert_eq!(veto.describe(), "Not approved: Needs 2 approvals");
    }

    #[tokio::test]
    async fn discovery_rejects_other_vcs() {
        let err = server(CloneType::Http)
            .discover(&VcsKind::new("hg"))
            .await
            .unwrap_err();
        assert!(matches!(err, BumpError::UnsupportedVcs { .. }));
    }
}
