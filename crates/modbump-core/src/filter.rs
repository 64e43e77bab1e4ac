//! Allow/block rules over module paths.
//!
//! Evaluation order, first match wins:
//! explicit allow → allowed domain prefix → explicit block → blocked domain
//! prefix → default. The default is "allowed" unless an allow list is set, in
//! which case everything not explicitly allowed is blocked.

use serde::{Deserialize, Serialize};

/// Which rule decided a module's fate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    AllowedModule,
    AllowedDomain,
    BlockedModule,
    BlockedDomain,
    DefaultAllow,
    DefaultDeny,
}

impl FilterDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(
            self,
            FilterDecision::AllowedModule
                | FilterDecision::AllowedDomain
                | FilterDecision::DefaultAllow
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub allowed_modules: Vec<String>,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default)]
    pub blocked_modules: Vec<String>,
    #[serde(default)]
    pub blocked_domains: Vec<String>,
}

impl FilterConfig {
    /// True once any allow rule is configured; switches the default to deny.
    pub fn is_default_deny(&self) -> bool {
        !self.allowed_modules.is_empty() || !self.allowed_domains.is_empty()
    }

    pub fn decide(&self, module: &str) -> FilterDecision {
        if self.allowed_modules.iter().any(|m| m == module) {
            return FilterDecision::AllowedModule;
        }
        if self
            .allowed_domains
            .iter()
            .any(|d| module.starts_with(d.as_str()))
        {
            return FilterDecision::AllowedDomain;
        }
        if self.blocked_modules.iter().any(|m| m == module) {
            return FilterDecision::BlockedModule;
        }
        if self
            .blocked_domains
            .iter()
            .any(|d| module.starts_with(d.as_str()))
        {
            return FilterDecision::BlockedDomain;
        }
        if self.is_default_deny() {
            FilterDecision::DefaultDeny
        } else {
            FilterDecision::DefaultAllow
        }
    }

    pub fn is_module_allowed(&self, module: &str) -> bool {
        self.decide(module).is_allowed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_config_allows_everything() {
        let filter = FilterConfig::default();
        assert_eq!(filter.decide("github.com/a/b"), FilterDecision::DefaultAllow);
    }

    #[test]
    fn explicit_allow_beats_blocked_domain() {
        let filter = FilterConfig {
            allowed_modules: strings(&["git.example.com/a/b"]),
            blocked_domains: strings(&["git.example.com"]),
            ..Default::default()
        };
        assert_eq!(
            filter.decide("git.example.com/a/b"),
            FilterDecision::AllowedModule
        );
        assert_eq!(
            filter.decide("git.example.com/a/c"),
            FilterDecision::BlockedDomain
        );
    }

    #[test]
    fn allowed_domain_beats_blocked_module() {
        let filter = FilterConfig {
            allowed_domains: strings(&["github.com/acme/"]),
            blocked_modules: strings(&["github.com/acme/legacy"]),
            ..Default::default()
        };
        assert!(filter.is_module_allowed("github.com/acme/legacy"));
    }

    #[test]
    fn blocked_module_and_domain() {
        let filter = FilterConfig {
            blocked_modules: strings(&["github.com/foo/bar"]),
            blocked_domains: strings(&["k8s.io"]),
            ..Default::default()
        };
        assert_eq!(
            filter.decide("github.com/foo/bar"),
            FilterDecision::BlockedModule
        );
        assert_eq!(
            filter.decide("k8s.io/client-go"),
            FilterDecision::BlockedDomain
        );
        assert!(filter.is_module_allowed("github.com/foo/baz"));
    }

    #[test]
    fn allow_list_switches_to_default_deny() {
        let by_module = FilterConfig {
            allowed_modules: strings(&["github.com/x/y"]),
            ..Default::default()
        };
        let by_domain = FilterConfig {
            allowed_domains: strings(&["golang.org/x"]),
            ..Default::default()
        };
        let neither = FilterConfig::default();

        assert_eq!(
            by_module.decide("github.com/other/mod"),
            FilterDecision::DefaultDeny
        );
        assert_eq!(
            by_domain.decide("github.com/other/mod"),
            FilterDecision::DefaultDeny
        );
        assert!(neither.is_module_allowed("github.com/other/mod"));
    }

    #[test]
    fn domain_match_is_plain_prefix() {
        let filter = FilterConfig {
            blocked_domains: strings(&["github.com/foo"]),
            ..Default::default()
        };
        assert!(!filter.is_module_allowed("github.com/foobar/x"));
    }
}
