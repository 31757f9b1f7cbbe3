//! DNR Core Library
//!
//! Runtime half of the declarative request-filtering engine: the binary
//! ruleset format, its verified zero-copy loader, the per-provider matcher and
//! the manager that combines matchers across providers.
//!
//! # Architecture
//!
//! Rulesets are compiled ahead of time (see `dnr-compiler`) into one buffer per
//! provider. A buffer is checked against its out-of-band CRC32 and fully
//! validated before a [`RulesetMatcher`] is handed out, so the hot path can read
//! it without further checks beyond bounds.
//!
//! # Modules
//!
//! - `hash`: Murmur3 n-gram hashing and CRC32 integrity values
//! - `snapshot`: ruleset format and verified loader
//! - `url`: allocation-free URL helpers
//! - `pattern`: url-filter pattern matching
//! - `matcher`: single-ruleset matching
//! - `manager`: multi-provider ordering and decisions
//! - `types`: shared type definitions

pub mod hash;
pub mod manager;
pub mod matcher;
pub mod pattern;
pub mod snapshot;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use hash::{crc32, hash_ngram, NGRAM_SIZE};
pub use manager::{ManagerConfig, ProviderId, ProviderInfo, RulesetManager};
pub use matcher::{LoadError, LoadResult, RulesetMatcher};
pub use pattern::UrlPattern;
pub use snapshot::{Snapshot, SnapshotError, SnapshotLayout};
pub use types::{
    Decision, ElementType, LeftAnchor, PatternType, RequestContext, RightAnchor, RuleAction, RuleOptions,
};

/// File name of a persisted ruleset inside its provider directory.
pub const RULESET_FILE_NAME: &str = "rules.dnr";
