//! `.modbump.yaml` schema, loading and discovery.
//!
//! Every section and key has a default, so an empty document is a valid
//! (if not very useful) configuration. Credentials are never read from the
//! file; the binary injects them from the environment.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use modbump_state::{FileBackendConfig, S3BackendConfig};
use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::{BumpError, BumpResult};
use crate::engine::EngineConfig;
use crate::filter::FilterConfig;
use crate::resolver::ResolverConfig;

/// File name looked up in the current and home directories.
pub const CONFIG_FILENAME: &str = ".modbump.yaml";

/// Which clone link to take from the host, and how git authenticates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloneType {
    #[default]
    Http,
    Ssh,
}

impl CloneType {
    /// Name of the clone link as the host reports it.
    pub fn link_name(&self) -> &'static str {
        match self {
            CloneType::Http => "http",
            CloneType::Ssh => "ssh",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub workers: usize,
    pub work_dir: PathBuf,
    pub clone_type: CloneType,
    /// Persist state after every pass even without auto merge.
    pub stateful: bool,
    pub clean_before: bool,
    pub cleanup: bool,
    /// Pause after push, pull request creation and merge.
    pub delay_secs: u64,
    pub fail_fast: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            work_dir: PathBuf::from("repos"),
            clone_type: CloneType::Http,
            stateful: false,
            clean_before: true,
            cleanup: false,
            delay_secs: 0,
            fail_fast: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PullRequestConfig {
    pub title: String,
    pub description: String,
    pub auto_merge: bool,
}

impl Default for PullRequestConfig {
    fn default() -> Self {
        Self {
            title: "Bump Go modules".to_string(),
            description: "Automated dependency update by modbump.".to_string(),
            auto_merge: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BitbucketServerConfig {
    pub url: String,
    /// Skip TLS certificate verification.
    pub insecure: bool,
    pub project_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScmConfig {
    pub pull_request: PullRequestConfig,
    pub bitbucket_server: BitbucketServerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    /// Prefix of the per-pass source branch; a timestamp is appended.
    pub source_branch: String,
    pub target_branch: String,
    pub commit_message: String,
    pub commit_author_name: String,
    pub commit_author_email: String,
    pub insecure: bool,
    /// Files staged before committing.
    pub manifest_files: Vec<String>,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            source_branch: "modbump".to_string(),
            target_branch: "master".to_string(),
            commit_message: "Bump Go modules".to_string(),
            commit_author_name: "modbump".to_string(),
            commit_author_email: "modbump@localhost".to_string(),
            insecure: false,
            manifest_files: vec!["go.mod".to_string(), "go.sum".to_string()],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VcsConfig {
    pub git: GitConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BumpConfig {
    /// Run `go mod tidy` after applying updates.
    pub tidy: bool,
    #[serde(flatten)]
    pub filter: FilterConfig,
}

impl Default for BumpConfig {
    fn default() -> Self {
        Self {
            tidy: true,
            filter: FilterConfig::default(),
        }
    }
}

/// Where the snapshot lives.
///
/// Selected by `backend: file | s3`. A section without `backend` is a file
/// backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    File(FileBackendConfig),
    S3(S3BackendConfig),
}

impl<'de> Deserialize<'de> for StorageConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(tag = "backend", rename_all = "snake_case")]
        enum Tagged {
            File(FileBackendConfig),
            S3(S3BackendConfig),
        }

        let mut value = serde_yaml::Value::deserialize(deserializer)?;
        match &mut value {
            serde_yaml::Value::Null => return Ok(StorageConfig::default()),
            serde_yaml::Value::Mapping(map) => {
                let tag = serde_yaml::Value::String("backend".to_string());
                if !map.contains_key(&tag) {
                    map.insert(tag, serde_yaml::Value::String("file".to_string()));
                }
            }
            _ => {}
        }

        match Tagged::deserialize(value).map_err(serde::de::Error::custom)? {
            Tagged::File(file) => Ok(StorageConfig::File(file)),
            Tagged::S3(s3) => Ok(StorageConfig::S3(s3)),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::File(FileBackendConfig::default())
    }
}

/// Root of `.modbump.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub general: GeneralConfig,
    pub scm: ScmConfig,
    pub vcs: VcsConfig,
    pub bump: BumpConfig,
    pub storage: StorageConfig,
}

impl Configuration {
    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> BumpResult<Self> {
        let config: Configuration = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> BumpResult<Self> {
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            BumpError::Config(format!("could not read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&yaml).map_err(|e| match e {
            BumpError::Config(detail) => {
                BumpError::Config(format!("{}: {detail}", path.display()))
            }
            other => other,
        })
    }

    /// Resolve the config file: `explicit` if given, else `.modbump.yaml` in
    /// `cwd`, else in the home directory.
    pub fn locate(explicit: Option<&Path>, cwd: &Path) -> BumpResult<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }

        let mut candidates = vec![cwd.join(CONFIG_FILENAME)];
        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join(CONFIG_FILENAME));
        }

        candidates
            .iter()
            .find(|p| p.is_file())
            .cloned()
            .ok_or_else(|| {
                let tried: Vec<String> = candidates.iter().map(|p| p.display().to_string()).collect();
                BumpError::Config(format!(
                    "could not find config file, tried: {}",
                    tried.join(", ")
                ))
            })
    }

    pub fn validate(&self) -> BumpResult<()> {
        if self.general.workers == 0 {
            return Err(BumpError::Config(
                "general.workers must be at least 1".to_string(),
            ));
        }
        if self.general.work_dir.as_os_str().is_empty() {
            return Err(BumpError::Config(
                "general.work_dir must not be empty".to_string(),
            ));
        }
        if let StorageConfig::S3(s3) = &self.storage {
            if s3.bucket.is_empty() {
                return Err(BumpError::Config(
                    "storage.bucket is required for the s3 backend".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Work dir with `.` components and duplicate separators removed.
    pub fn work_dir(&self) -> PathBuf {
        clean_path(&self.general.work_dir)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            workers: self.general.workers,
            work_dir: self.work_dir(),
            delay: Duration::from_secs(self.general.delay_secs),
            clean_before: self.general.clean_before,
            cleanup: self.general.cleanup,
            stateful: self.general.stateful,
            auto_merge: self.scm.pull_request.auto_merge,
            fail_fast: self.general.fail_fast,
        }
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            filter: self.bump.filter.clone(),
            tidy: self.bump.tidy,
        }
    }
}

/// Lexically clean `path`: drop `.`, fold `..` into preceding normal
/// components, collapse separators. An empty result is `.`.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }

    if out.is_empty() {
        return PathBuf::from(".");
    }
    out.iter().map(|c| c.as_os_str()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = Configuration::from_yaml("{}").unwrap();
        assert_eq!(config.general.workers, 1);
        assert!(config.general.clean_before);
        assert!(config.bump.tidy);
        assert_eq!(config.vcs.git.manifest_files, vec!["go.mod", "go.sum"]);
        assert_eq!(config.storage, StorageConfig::File(FileBackendConfig::default()));
    }

    #[test]
    fn full_document_parses() {
        let yaml = r#"
general:
  workers: 4
  work_dir: ./repos//
  clone_type: ssh
  stateful: true
  cleanup: true
  delay_secs: 5
scm:
  pull_request:
    title: Bump deps
    description: Weekly bump
    auto_merge: true
  bitbucket_server:
    url: https://bitbucket.example.com
    insecure: true
    project_key: PLAT
vcs:
  git:
    source_branch: bump
    target_branch: main
    commit_message: Bump deps
    commit_author_name: Bot
    commit_author_email: bot@example.com
bump:
  tidy: false
  allowed_domains: [github.com/example/]
  blocked_modules: [github.com/example/legacy]
storage:
  backend: s3
  region: eu-west-1
  bucket: modbump
"#;
        let config = Configuration::from_yaml(yaml).unwrap();
        assert_eq!(config.general.clone_type, CloneType::Ssh);
        assert_eq!(config.work_dir(), PathBuf::from("repos"));
        assert_eq!(config.scm.bitbucket_server.project_key, "PLAT");
        assert_eq!(config.vcs.git.target_branch, "main");
        assert!(!config.bump.tidy);
        assert_eq!(config.bump.filter.allowed_domains, vec!["github.com/example/"]);
        assert_eq!(config.bump.filter.blocked_modules, vec!["github.com/example/legacy"]);

        match &config.storage {
            StorageConfig::S3(s3) => {
                assert_eq!(s3.bucket, "modbump");
                assert_eq!(s3.region.as_deref(), Some("eu-west-1"));
                assert_eq!(s3.key, "modbump-state.json");
            }
            other => panic!("unexpected storage {other:?}"),
        }

        let engine = config.engine_config();
        assert_eq!(engine.workers, 4);
        assert_eq!(engine.delay, Duration::from_secs(5));
        assert!(engine.auto_merge);
        assert!(engine.stateful);
    }

    #[test]
    fn zero_workers_is_rejected() {
        let err = Configuration::from_yaml("general:\n  workers: 0\n").unwrap_err();
        assert!(err.to_string().contains("workers"));
    }

    #[test]
    fn s3_requires_bucket() {
        let yaml = "storage:\n  backend: s3\n  bucket: \"\"\n";
        assert!(Configuration::from_yaml(yaml).is_err());
    }

    #[test]
    fn s3_accepts_bucketname_and_filename_keys() {
        let yaml = "storage:\n  backend: s3\n  bucketname: fleet\n  filename: state.json\n";
        let config = Configuration::from_yaml(yaml).unwrap();
        assert_eq!(
            config.storage,
            StorageConfig::S3(S3BackendConfig::new("fleet").with_key("state.json"))
        );
    }

    #[test]
    fn storage_without_backend_is_a_file() {
        let config = Configuration::from_yaml("storage:\n  filename: state.json\n").unwrap();
        assert_eq!(
            config.storage,
            StorageConfig::File(FileBackendConfig {
                filename: PathBuf::from("state.json"),
            })
        );

        let config = Configuration::from_yaml("storage:\n").unwrap();
        assert_eq!(config.storage, StorageConfig::default());
    }

    #[test]
    fn unknown_backend_is_a_config_error() {
        let err = Configuration::from_yaml("storage:\n  backend: floppy\n").unwrap_err();
        assert!(matches!(err, BumpError::Config(_)));
    }

    #[test]
    fn clean_path_cases() {
        assert_eq!(clean_path(Path::new("./repos//")), PathBuf::from("repos"));
        assert_eq!(clean_path(Path::new("a/./b/../c")), PathBuf::from("a/c"));
        assert_eq!(clean_path(Path::new("./")), PathBuf::from("."));
        assert_eq!(clean_path(Path::new("../up")), PathBuf::from("../up"));
        assert_eq!(clean_path(Path::new("/../x")), PathBuf::from("/x"));
    }

    #[test]
    fn locate_prefers_explicit_then_cwd() {
        let tmp = tempfile::tempdir().unwrap();
        let explicit = tmp.path().join("custom.yaml");
        assert_eq!(
            Configuration::locate(Some(&explicit), tmp.path()).unwrap(),
            explicit
        );

        std::fs::write(tmp.path().join(CONFIG_FILENAME), "{}").unwrap();
        assert_eq!(
            Configuration::locate(None, tmp.path()).unwrap(),
            tmp.path().join(CONFIG_FILENAME)
        );
    }

    #[test]
    fn load_reports_path_on_parse_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.yaml");
        std::fs::write(&path, "general: [not, a, map]\n").unwrap();
        let err = Configuration::load(&path).unwrap_err();
        assert!(err.to_string().contains("bad.yaml"));
    }
}
