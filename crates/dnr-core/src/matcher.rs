//! Ruleset Matcher
//!
//! One matcher wraps one verified ruleset buffer. This is the hot path:
//! candidate lookup reads straight from the buffer, and only the
//! per-request n-gram list is allocated.

use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::pattern::UrlPattern;
use crate::snapshot::{verify_checksum, PostingIter, RuleRecord, Snapshot, SnapshotError, SnapshotLayout};
use crate::types::{ElementType, RequestContext, RuleAction, RuleOptions};
use crate::url::{initiator_host, url_ngram_hashes, walk_host_suffixes};

// =============================================================================
// Load Errors
// =============================================================================

/// Error type for matcher construction.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Invalid ruleset path: {}", .0.display())]
    InvalidPath(PathBuf),
    #[error("Failed to read {}: {source}", path.display())]
    ReadOrMapFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Ruleset verification failed: {0}")]
    VerificationFailure(#[from] SnapshotError),
}

impl LoadError {
    pub fn load_result(&self) -> LoadResult {
        match self {
            LoadError::InvalidPath(_) => LoadResult::InvalidPath,
            LoadError::ReadOrMapFailure { .. } => LoadResult::ReadOrMapFailure,
            LoadError::VerificationFailure(_) => LoadResult::VerificationFailure,
        }
    }
}

/// Outcome of a load attempt, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadResult {
    Success,
    InvalidPath,
    ReadOrMapFailure,
    VerificationFailure,
}

impl LoadResult {
    pub fn of<T>(result: &Result<T, LoadError>) -> Self {
        match result {
            Ok(_) => LoadResult::Success,
            Err(e) => e.load_result(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LoadResult::Success => "success",
            LoadResult::InvalidPath => "invalid_path",
            LoadResult::ReadOrMapFailure => "read_or_map_failure",
            LoadResult::VerificationFailure => "verification_failure",
        }
    }
}

impl fmt::Display for LoadResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Matcher
// =============================================================================

/// Immutable matcher over exactly one verified ruleset.
pub struct RulesetMatcher {
    data: Box<[u8]>,
    layout: SnapshotLayout,
}

impl fmt::Debug for RulesetMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RulesetMatcher")
            .field("bytes", &self.data.len())
            .field("rule_count", &self.layout.rule_count)
            .finish()
    }
}

impl RulesetMatcher {
    /// Verify a buffer against its integrity value and take ownership of it.
    pub fn from_bytes(data: impl Into<Box<[u8]>>, expected_checksum: u32) -> Result<Self, LoadError> {
        let data = data.into();
        verify_checksum(&data, expected_checksum)?;
        let layout = SnapshotLayout::parse(&data)?;
        Ok(Self { data, layout })
    }

    /// Read a persisted ruleset and verify it.
    pub fn load(path: &Path, expected_checksum: u32) -> Result<Self, LoadError> {
        if path.as_os_str().is_empty() || !path.is_file() {
            return Err(LoadError::InvalidPath(path.to_path_buf()));
        }

        let data = std::fs::read(path).map_err(|source| LoadError::ReadOrMapFailure {
            path: path.to_path_buf(),
            source,
        })?;

        let matcher = Self::from_bytes(data, expected_checksum).inspect_err(|e| {
            warn!("Rejected ruleset {}: {}", path.display(), e);
        })?;
        debug!(
            "Loaded ruleset {} ({} rules, {} bytes)",
            path.display(),
            matcher.rule_count(),
            matcher.data.len()
        );
        Ok(matcher)
    }

    pub fn rule_count(&self) -> usize {
        self.layout.rule_count
    }

    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    /// Zero-copy view of the verified buffer.
    pub fn snapshot(&self) -> Snapshot<'_> {
        Snapshot::new(&self.data, &self.layout)
    }

    /// Does a block rule match that no allow rule of this ruleset overrides?
    pub fn should_block(&self, ctx: &RequestContext<'_>) -> bool {
        let query = Query::new(ctx);
        self.any_match(&query, RuleAction::Block) && !self.any_match(&query, RuleAction::Allow)
    }

    /// Target URL of the highest-priority matching redirect rule.
    ///
    /// Ties go to the lowest rule id. Callers should not ask for websocket
    /// requests.
    pub fn should_redirect(&self, ctx: &RequestContext<'_>) -> Option<String> {
        let query = Query::new(ctx);
        let snapshot = self.snapshot();

        let mut best: Option<RuleRecord> = None;
        self.for_each_match(&query, RuleAction::Redirect, |record| {
            let better = match &best {
                None => true,
                Some(b) => record.priority > b.priority || (record.priority == b.priority && record.id < b.id),
            };
            if better {
                best = Some(*record);
            }
            false
        });

        let best = best?;
        snapshot.redirects().lookup(best.id).map(str::to_owned)
    }

    fn any_match(&self, query: &Query<'_>, action: RuleAction) -> bool {
        self.for_each_match(query, action, |_| true)
    }

    /// Visit every rule of one index that fully matches. The visitor returns
    /// `true` to stop early. Returns whether it stopped.
    fn for_each_match(
        &self,
        query: &Query<'_>,
        action: RuleAction,
        mut visit: impl FnMut(&RuleRecord) -> bool,
    ) -> bool {
        let snapshot = self.snapshot();
        let index = snapshot.pattern_index(action);

        let mut check = |positions: PostingIter<'_>| -> bool {
            for pos in positions {
                let Some(record) = snapshot.rules().get(pos as usize) else {
                    continue;
                };
                if self.rule_matches(&snapshot, &record, query) && visit(&record) {
                    return true;
                }
            }
            false
        };

        if check(index.fallback()) {
            return true;
        }
        // A rule listed under several n-grams may be checked more than once;
        // the result is the same each time.
        for &hash in &query.ngrams {
            if let Some(positions) = index.lookup(hash) {
                if check(positions) {
                    return true;
                }
            }
        }
        false
    }

    /// Full verification of one candidate, cheapest checks first.
    fn rule_matches(&self, snapshot: &Snapshot<'_>, record: &RuleRecord, query: &Query<'_>) -> bool {
        let ctx = query.ctx;

        if !record.element_types.intersects(ctx.element_type) {
            return false;
        }

        let party = if ctx.is_third_party {
            RuleOptions::APPLIES_TO_THIRD_PARTY
        } else {
            RuleOptions::APPLIES_TO_FIRST_PARTY
        };
        if !record.options.contains(party) {
            return false;
        }

        if !self.domains_match(snapshot, record, query.initiator_host.as_deref()) {
            return false;
        }

        let Some(body) = snapshot.pattern_body(record) else {
            return false;
        };
        UrlPattern {
            body,
            pattern_type: record.pattern_type,
            left_anchor: record.left_anchor,
            right_anchor: record.right_anchor,
            case_sensitive: record.options.contains(RuleOptions::IS_CASE_SENSITIVE),
        }
        .matches(ctx.url)
    }

    /// The most specific initiator suffix found in either list decides.
    fn domains_match(&self, snapshot: &Snapshot<'_>, record: &RuleRecord, host: Option<&str>) -> bool {
        if record.domains.is_empty() && record.excluded_domains.is_empty() {
            return true;
        }

        let Some(host) = host else {
            return record.domains.is_empty();
        };

        let domains = snapshot.domains();
        for suffix in walk_host_suffixes(host) {
            if domains.contains(record.excluded_domains, suffix) {
                return false;
            }
            if domains.contains(record.domains, suffix) {
                return true;
            }
        }
        record.domains.is_empty()
    }
}

/// Per-request values shared by every index probe.
struct Query<'a> {
    ctx: &'a RequestContext<'a>,
    ngrams: Vec<u32>,
    initiator_host: Option<Cow<'a, str>>,
}

impl<'a> Query<'a> {
    fn new(ctx: &'a RequestContext<'a>) -> Self {
        let initiator_host = ctx.initiator.and_then(initiator_host).map(|host| {
            if host.bytes().any(|b| b.is_ascii_uppercase()) {
                Cow::Owned(host.to_ascii_lowercase())
            } else {
                Cow::Borrowed(host)
            }
        });

        Self {
            ctx,
            ngrams: url_ngram_hashes(ctx.url),
            initiator_host,
        }
    }
}

/// Element types a redirect may apply to.
pub fn is_redirectable(element_type: ElementType) -> bool {
    !element_type.contains(ElementType::WEBSOCKET)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_checksum_before_parsing() {
        let data = vec![0u8; 64];
        let err = RulesetMatcher::from_bytes(data, 1).unwrap_err();
        assert_eq!(err.load_result(), LoadResult::VerificationFailure);
        assert!(matches!(
            err,
            LoadError::VerificationFailure(SnapshotError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn rejects_garbage_with_matching_checksum() {
        let data = b"definitely not a ruleset buffer".to_vec();
        let checksum = crate::hash::crc32(&data);
        let err = RulesetMatcher::from_bytes(data, checksum).unwrap_err();
        assert!(matches!(err, LoadError::VerificationFailure(SnapshotError::InvalidMagic)));
    }

    #[test]
    fn missing_file_is_invalid_path() {
        let result = RulesetMatcher::load(Path::new("/nonexistent/dnr/rules.dnr"), 0);
        assert_eq!(LoadResult::of(&result), LoadResult::InvalidPath);
        assert_eq!(LoadResult::of(&RulesetMatcher::load(Path::new(""), 0)), LoadResult::InvalidPath);
    }

    #[test]
    fn load_result_names() {
        assert_eq!(LoadResult::Success.to_string(), "success");
        assert_eq!(LoadResult::VerificationFailure.as_str(), "verification_failure");
    }

    #[test]
    fn websocket_is_not_redirectable() {
        assert!(!is_redirectable(ElementType::WEBSOCKET));
        assert!(is_redirectable(ElementType::SCRIPT));
    }
}
