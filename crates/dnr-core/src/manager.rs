//! Ruleset Manager
//!
//! Holds one matcher per active provider and combines their answers.
//! Providers are consulted newest activation first.

use std::cmp::Reverse;
use std::fmt;
use std::time::SystemTime;

use log::debug;

use crate::matcher::{is_redirectable, RulesetMatcher};
use crate::types::{Decision, RequestContext};

/// Identifier of a ruleset provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProviderId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ProviderId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Registration data for an active provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInfo {
    pub id: ProviderId,
    pub activation_time: SystemTime,
    /// Whether the provider's rules also apply to private browsing requests
    pub private_enabled: bool,
}

impl ProviderInfo {
    pub fn new(id: impl Into<ProviderId>, activation_time: SystemTime) -> Self {
        Self {
            id: id.into(),
            activation_time,
            private_enabled: false,
        }
    }

    pub fn private_enabled(mut self, enabled: bool) -> Self {
        self.private_enabled = enabled;
        self
    }

    fn order_key(&self) -> (Reverse<SystemTime>, &ProviderId) {
        (Reverse(self.activation_time), &self.id)
    }
}

/// Manager configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerConfig {
    /// When false, every query answers as if no ruleset were active.
    pub enabled: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

struct Entry {
    info: ProviderInfo,
    matcher: RulesetMatcher,
}

/// Combines the matchers of all active providers.
///
/// Not synchronized; one owner performs every call.
pub struct RulesetManager {
    config: ManagerConfig,
    /// Sorted by decreasing activation time, then provider id
    entries: Vec<Entry>,
}

impl RulesetManager {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            config,
            entries: Vec::new(),
        }
    }

    pub fn config(&self) -> ManagerConfig {
        self.config
    }

    /// Register a provider's matcher.
    ///
    /// # Panics
    ///
    /// Panics if the provider is already registered.
    pub fn add(&mut self, info: ProviderInfo, matcher: RulesetMatcher) {
        assert!(
            !self.contains(&info.id),
            "provider {} added twice without remove",
            info.id
        );

        let pos = self
            .entries
            .partition_point(|e| e.info.order_key() < info.order_key());
        debug!(
            "Adding ruleset for provider {} ({} rules) at position {}",
            info.id,
            matcher.rule_count(),
            pos
        );
        self.entries.insert(pos, Entry { info, matcher });
    }

    /// Unregister a provider. Returns whether it was present.
    pub fn remove(&mut self, id: &ProviderId) -> bool {
        match self.entries.iter().position(|e| &e.info.id == id) {
            Some(pos) => {
                self.entries.remove(pos);
                debug!("Removed ruleset for provider {}", id);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &ProviderId) -> bool {
        self.entries.iter().any(|e| &e.info.id == id)
    }

    pub fn matcher_count(&self) -> usize {
        self.entries.len()
    }

    /// Active providers in evaluation order.
    pub fn providers(&self) -> impl Iterator<Item = &ProviderInfo> {
        self.entries.iter().map(|e| &e.info)
    }

    fn applicable(&self, is_private: bool) -> impl Iterator<Item = &Entry> {
        let enabled = self.config.enabled;
        self.entries
            .iter()
            .filter(move |e| enabled && (!is_private || e.info.private_enabled))
    }

    /// Does any applicable provider block the request?
    ///
    /// Allow rules only override block rules of their own provider.
    pub fn should_block(&self, is_private: bool, ctx: &RequestContext<'_>) -> bool {
        self.applicable(is_private).any(|e| e.matcher.should_block(ctx))
    }

    /// Redirect target from the most recently activated provider that has one.
    pub fn should_redirect(&self, is_private: bool, ctx: &RequestContext<'_>) -> Option<String> {
        self.applicable(is_private)
            .find_map(|e| e.matcher.should_redirect(ctx))
    }

    /// Combined decision. The first provider with an opinion decides; within a
    /// provider, blocking wins over redirecting.
    pub fn evaluate(&self, is_private: bool, ctx: &RequestContext<'_>) -> Decision {
        let redirectable = is_redirectable(ctx.element_type);

        for entry in self.applicable(is_private) {
            if entry.matcher.should_block(ctx) {
                return Decision::Blocked;
            }
            if redirectable {
                if let Some(url) = entry.matcher.should_redirect(ctx) {
                    return Decision::RedirectTo(url);
                }
            }
        }
        Decision::Allowed
    }
}

impl Default for RulesetManager {
    fn default() -> Self {
        Self::new(ManagerConfig::default())
    }
}
