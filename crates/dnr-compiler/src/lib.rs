//! DNR Rule Compiler
//!
//! Turns a provider's JSON rule batch into the verified binary ruleset
//! format read by `dnr-core`.

pub mod builder;
pub mod parser;
pub mod persist;
pub mod rule;

pub use builder::{index_rules, IndexError, IndexStats, IndexedRuleset, RulesetIndexer};
pub use parser::{parse_rule, parse_rules_json, parse_url_filter, NormalizedRule, ParseError};
pub use persist::{ruleset_path, write_ruleset, PersistenceError};
pub use rule::Rule;
