//! Ordered allow/deny filter chain over (user, namespace).

use regex::Regex;

use crate::error::ConfigError;
use crate::model::config::{FilterAction, FilterRuleConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Allow,
    Deny,
}

/// A single compiled filter rule. At least one of the two patterns must be
/// present; when both are present, matching either triggers the rule (OR
/// semantics).
pub struct FilterRule {
    pub action: Action,
    pub user_pattern: Option<Regex>,
    pub namespace_pattern: Option<Regex>,
}

impl FilterRule {
    fn matches(&self, username: &str, namespace: &str) -> bool {
        let user_match = self.user_pattern.as_ref().map(|r| r.is_match(username));
        let ns_match = self
            .namespace_pattern
            .as_ref()
            .map(|r| r.is_match(namespace));

        match (user_match, ns_match) {
            (Some(u), Some(n)) => u || n,
            (Some(u), None) => u,
            (None, Some(n)) => n,
            (None, None) => false,
        }
    }
}

/// A compiled, ordered filter chain. Regexes are compiled once at pipeline
/// construction; compilation failure is a `ConfigError` (surfaced as a
/// pipeline start error, source marked not-ready).
pub struct FilterChain {
    rules: Vec<FilterRule>,
}

impl FilterChain {
    pub fn compile(configs: &[FilterRuleConfig]) -> Result<Self, ConfigError> {
        let mut rules = Vec::with_capacity(configs.len());
        for (index, cfg) in configs.iter().enumerate() {
            if cfg.user_pattern.is_none() && cfg.namespace_pattern.is_none() {
                return Err(ConfigError::EmptyFilterRule { index });
            }
            let user_pattern = cfg
                .user_pattern
                .as_deref()
                .map(Regex::new)
                .transpose()
                .map_err(|source| ConfigError::InvalidUserPattern { index, source })?;
            let namespace_pattern = cfg
                .namespace_pattern
                .as_deref()
                .map(Regex::new)
                .transpose()
                .map_err(|source| ConfigError::InvalidNamespacePattern { index, source })?;
            let action = match cfg.action.unwrap_or(FilterAction::Allow) {
                FilterAction::Allow => Action::Allow,
                FilterAction::Deny => Action::Deny,
            };
            rules.push(FilterRule {
                action,
                user_pattern,
                namespace_pattern,
            });
        }
        Ok(FilterChain { rules })
    }

    /// First rule whose patterns match decides the event; default is Allow
    /// when nothing matches.
    pub fn evaluate(&self, username: &str, namespace: &str) -> Action {
        for rule in &self.rules {
            if rule.matches(username, namespace) {
                return rule.action;
            }
        }
        Action::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(action: FilterAction, user: Option<&str>, ns: Option<&str>) -> FilterRuleConfig {
        FilterRuleConfig {
            action: Some(action),
            user_pattern: user.map(str::to_string),
            namespace_pattern: ns.map(str::to_string),
        }
    }

    #[test]
    fn default_is_allow_when_nothing_matches() {
        let chain = FilterChain::compile(&[]).unwrap();
        assert_eq!(chain.evaluate("alice", "dev"), Action::Allow);
    }

    #[test]
    fn first_matching_rule_wins() {
        let chain = FilterChain::compile(&[
            cfg(FilterAction::Deny, Some("^bob$"), None),
            cfg(FilterAction::Allow, Some(".*"), None),
        ])
        .unwrap();
        assert_eq!(chain.evaluate("bob", "dev"), Action::Deny);
        assert_eq!(chain.evaluate("alice", "dev"), Action::Allow);
    }

    #[test]
    fn higher_priority_deny_is_never_overridden_by_later_allow() {
        let chain = FilterChain::compile(&[
            cfg(FilterAction::Deny, Some("^evil$"), None),
            cfg(FilterAction::Allow, Some(".*"), None),
        ])
        .unwrap();
        assert_eq!(chain.evaluate("evil", "dev"), Action::Deny);
    }

    #[test]
    fn or_semantics_when_both_patterns_present() {
        let chain =
            FilterChain::compile(&[cfg(FilterAction::Deny, Some("^bob$"), Some("^kube-"))])
                .unwrap();
        assert_eq!(chain.evaluate("bob", "dev"), Action::Deny);
        assert_eq!(chain.evaluate("alice", "kube-system"), Action::Deny);
        assert_eq!(chain.evaluate("alice", "dev"), Action::Allow);
    }

    #[test]
    fn empty_rule_is_a_config_error() {
        let err = FilterChain::compile(&[cfg(FilterAction::Allow, None, None)]);
        assert!(err.is_err());
    }

    #[test]
    fn invalid_regex_is_a_config_error() {
        let err = FilterChain::compile(&[cfg(FilterAction::Allow, Some("("), None)]);
        assert!(matches!(err, Err(ConfigError::InvalidUserPattern { .. })));
    }
}
