//! Module updates and the `module:current:available` listing format.

use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A single dependency bump: `module` from `old_version` to `new_version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    pub module: String,
    pub old_version: Version,
    pub new_version: Version,
}

impl Update {
    pub fn new(module: impl Into<String>, old_version: Version, new_version: Version) -> Self {
        Self {
            module: module.into(),
            old_version,
            new_version,
        }
    }
}

impl std::fmt::Display for Update {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} -> {}",
            self.module, self.old_version, self.new_version
        )
    }
}

/// Why a well-formed listing line was still discarded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpdateLineError {
    #[error("invalid {which} version '{value}' for module '{module}': {reason}")]
    InvalidVersion {
        module: String,
        which: &'static str,
        value: String,
        reason: String,
    },

    #[error("module '{module}' offers {new} which is not newer than {old}")]
    NotNewer {
        module: String,
        old: Version,
        new: Version,
    },
}

/// Parse a version strictly. A single leading `v` is accepted because Go
/// module versions are written `v1.2.3`; anything else must be full semver.
pub fn parse_version(raw: &str) -> Result<Version, semver::Error> {
    let raw = raw.trim();
    Version::parse(raw.strip_prefix('v').unwrap_or(raw))
}

/// Parse one listing line.
///
/// Returns `Ok(None)` for lines that are not exactly three non-empty
/// colon-separated fields; those are noise and skipped silently.
pub fn parse_update_line(line: &str) -> Result<Option<Update>, UpdateLineError> {
    let fields: Vec<&str> = line.trim().split(':').collect();
    if fields.len() != 3 || fields.iter().any(|f| f.trim().is_empty()) {
        return Ok(None);
    }

    let module = fields[0].trim();
    let old_version =
        parse_version(fields[1]).map_err(|e| UpdateLineError::InvalidVersion {
            module: module.to_string(),
            which: "current",
            value: fields[1].to_string(),
            reason: e.to_string(),
        })?;
    let new_version =
        parse_version(fields[2]).map_err(|e| UpdateLineError::InvalidVersion {
            module: module.to_string(),
            which: "available",
            value: fields[2].to_string(),
            reason: e.to_string(),
        })?;

    if new_version <= old_version {
        return Err(UpdateLineError::NotNewer {
            module: module.to_string(),
            old: old_version,
            new: new_version,
        });
    }

    Ok(Some(Update::new(module, old_version, new_version)))
}

/// Parse a whole listing. Bad records are dropped with a warning and never
/// abort the rest of the batch.
pub fn parse_update_listing(listing: &str, origin: &str) -> Vec<Update> {
    listing
        .lines()
        .filter_map(|line| match parse_update_line(line) {
            Ok(update) => update,
            Err(e) => {
                warn!(origin = %origin, error = %e, "discarding module update");
                None
            }
        })
        .collect()
}
