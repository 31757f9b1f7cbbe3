//! Ruleset Indexer
//!
//! Folds normalized rules into the binary ruleset format: rule records, a
//! domain pool, one n-gram index per action and the redirect metadata table.
//! Output depends only on rule order, never on hash-map iteration order.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::{debug, info};
use serde::Serialize;

use dnr_core::hash::crc32;
use dnr_core::pattern::pattern_ngram_hashes;
use dnr_core::snapshot::{
    align_offset, compute_capacity, header, index_entry, index_header, redirect_entry, rule_record,
    section_entry, write_u16_le, write_u32_le, SectionId, DNR_MAGIC, DNR_VERSION, DOMAIN_ENTRY_SIZE,
    DOMAIN_POOL_HEADER_SIZE, HEADER_SIZE, INDEX_ENTRY_SIZE, INDEX_HEADER_SIZE, REDIRECT_ENTRY_SIZE,
    REDIRECT_HEADER_SIZE, RULES_HEADER_SIZE, RULE_RECORD_SIZE, SECTION_ENTRY_SIZE,
};
use dnr_core::types::RuleAction;

use crate::parser::{parse_rule, parse_rules_json, NormalizedRule, ParseError};

/// Error type for whole-batch indexing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IndexError {
    #[error("Rule {index}: {source}")]
    Rule {
        index: usize,
        #[source]
        source: ParseError,
    },
    #[error("Rule {index}: duplicate id {id}")]
    DuplicateId { index: usize, id: u32 },
}

impl IndexError {
    /// Position of the offending rule in the batch.
    pub fn index(&self) -> usize {
        match self {
            IndexError::Rule { index, .. } | IndexError::DuplicateId { index, .. } => *index,
        }
    }

    pub fn kind(&self) -> ParseError {
        match self {
            IndexError::Rule { source, .. } => source.clone(),
            IndexError::DuplicateId { id, .. } => ParseError::DuplicateId(*id),
        }
    }
}

/// Per-index counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexCounts {
    pub rules: usize,
    pub keys: usize,
    pub fallback: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub rules: usize,
    pub block: IndexCounts,
    pub allow: IndexCounts,
    pub redirect: IndexCounts,
    pub domains: usize,
    pub bytes: usize,
}

/// Serialized ruleset plus its out-of-band integrity value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedRuleset {
    pub data: Vec<u8>,
    /// CRC32 (IEEE) of `data`
    pub checksum: u32,
    pub rule_count: usize,
    pub stats: IndexStats,
}

/// Accumulates normalized rules for one provider.
#[derive(Debug, Default)]
pub struct RulesetIndexer {
    rules: Vec<NormalizedRule>,
    ids: BTreeSet<u32>,
}

impl RulesetIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one rule. Rule ids must be unique.
    pub fn add_rule(&mut self, rule: NormalizedRule) -> Result<(), ParseError> {
        if !self.ids.insert(rule.id) {
            return Err(ParseError::DuplicateId(rule.id));
        }
        self.rules.push(rule);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Serialize everything added so far.
    pub fn finish(self) -> IndexedRuleset {
        let rules = self.rules;

        let mut str_pool = StringPool::new();
        let (domain_pool, domain_ranges, domain_count) = build_domain_pool(&rules, &mut str_pool);
        let rules_section = build_rules_section(&rules, &domain_ranges, &mut str_pool);
        let (block_index, block) = build_pattern_index(&rules, RuleAction::Block);
        let (allow_index, allow) = build_pattern_index(&rules, RuleAction::Allow);
        let (redirect_index, redirect) = build_pattern_index(&rules, RuleAction::Redirect);
        let redirect_metadata = build_redirect_metadata(&rules, &mut str_pool);

        let sections = vec![
            SectionData::new(SectionId::StrPool, str_pool.build()),
            SectionData::new(SectionId::Rules, rules_section),
            SectionData::new(SectionId::DomainPool, domain_pool),
            SectionData::new(SectionId::BlockIndex, block_index),
            SectionData::new(SectionId::AllowIndex, allow_index),
            SectionData::new(SectionId::RedirectIndex, redirect_index),
            SectionData::new(SectionId::RedirectMetadata, redirect_metadata),
        ];
        let data = assemble(sections, rules.len());
        let checksum = crc32(&data);

        let stats = IndexStats {
            rules: rules.len(),
            block,
            allow,
            redirect,
            domains: domain_count,
            bytes: data.len(),
        };
        debug!("Indexed ruleset: {:?}", stats);

        IndexedRuleset {
            data,
            checksum,
            rule_count: rules.len(),
            stats,
        }
    }
}

/// Parse, validate and index a JSON rule batch.
///
/// Duplicate ids are reported before any other per-rule error.
pub fn index_rules(json: &str) -> Result<IndexedRuleset, IndexError> {
    let rules = parse_rules_json(json).map_err(|(index, source)| IndexError::Rule { index, source })?;

    let mut seen = BTreeSet::new();
    for (index, rule) in rules.iter().enumerate() {
        if let Ok(id) = u32::try_from(rule.id) {
            if !seen.insert(id) {
                return Err(IndexError::DuplicateId { index, id });
            }
        }
    }

    let mut indexer = RulesetIndexer::new();
    for (index, rule) in rules.iter().enumerate() {
        let normalized = parse_rule(rule).map_err(|source| IndexError::Rule { index, source })?;
        indexer
            .add_rule(normalized)
            .map_err(|source| IndexError::Rule { index, source })?;
    }

    let ruleset = indexer.finish();
    info!(
        "Indexed {} rules into {} bytes (checksum {:#010x})",
        ruleset.rule_count,
        ruleset.data.len(),
        ruleset.checksum
    );
    Ok(ruleset)
}

// =============================================================================
// Layout
// =============================================================================

struct SectionData {
    id: SectionId,
    data: Vec<u8>,
    offset: usize,
}

impl SectionData {
    fn new(id: SectionId, data: Vec<u8>) -> Self {
        Self { id, data, offset: 0 }
    }
}

fn assemble(mut sections: Vec<SectionData>, rule_count: usize) -> Vec<u8> {
    let section_count = sections.len();
    let section_dir_offset = HEADER_SIZE;
    let section_dir_bytes = section_count * SECTION_ENTRY_SIZE;
    let mut data_offset = align_offset(section_dir_offset + section_dir_bytes, 4);

    for section in &mut sections {
        section.offset = data_offset;
        data_offset = align_offset(data_offset + section.data.len(), 4);
    }

    let total_size = data_offset;
    let mut buffer = vec![0u8; total_size];

    buffer[0..4].copy_from_slice(&DNR_MAGIC);
    write_u16_le(&mut buffer, header::VERSION, DNR_VERSION);
    write_u16_le(&mut buffer, header::FLAGS, 0);
    write_u32_le(&mut buffer, header::HEADER_BYTES, HEADER_SIZE as u32);
    write_u32_le(&mut buffer, header::SECTION_COUNT, section_count as u32);
    write_u32_le(&mut buffer, header::SECTION_DIR_OFFSET, section_dir_offset as u32);
    write_u32_le(&mut buffer, header::RULE_COUNT, rule_count as u32);
    write_u32_le(&mut buffer, header::TOTAL_BYTES, total_size as u32);

    for (index, section) in sections.iter().enumerate() {
        let entry_offset = section_dir_offset + index * SECTION_ENTRY_SIZE;
        write_u16_le(&mut buffer, entry_offset + section_entry::ID, section.id as u16);
        write_u16_le(&mut buffer, entry_offset + section_entry::FLAGS, 0);
        write_u32_le(&mut buffer, entry_offset + section_entry::OFFSET, section.offset as u32);
        write_u32_le(&mut buffer, entry_offset + section_entry::LENGTH, section.data.len() as u32);

        let end = section.offset + section.data.len();
        buffer[section.offset..end].copy_from_slice(&section.data);
    }

    buffer
}

/// Interned strings. Offsets depend only on first-insertion order.
struct StringPool {
    data: Vec<u8>,
    index: HashMap<String, u32>,
}

impl StringPool {
    fn new() -> Self {
        Self {
            data: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn intern(&mut self, s: &str) -> (u32, u32) {
        if let Some(&offset) = self.index.get(s) {
            return (offset, s.len() as u32);
        }
        let offset = self.data.len() as u32;
        self.data.extend_from_slice(s.as_bytes());
        self.index.insert(s.to_string(), offset);
        (offset, s.len() as u32)
    }

    fn build(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.data.len());
        buf.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }
}

// =============================================================================
// Sections
// =============================================================================

/// (start, count) of a rule's included and excluded domain runs.
type DomainRanges = ((u32, u32), (u32, u32));

fn build_domain_pool(rules: &[NormalizedRule], str_pool: &mut StringPool) -> (Vec<u8>, Vec<DomainRanges>, usize) {
    let mut entries: Vec<(u32, u32)> = Vec::new();
    let mut ranges = Vec::with_capacity(rules.len());

    let mut push_run = |entries: &mut Vec<(u32, u32)>, domains: &[String]| -> (u32, u32) {
        let start = entries.len() as u32;
        for domain in domains {
            entries.push(str_pool.intern(domain));
        }
        (start, domains.len() as u32)
    };

    for rule in rules {
        let included = push_run(&mut entries, &rule.domains);
        let excluded = push_run(&mut entries, &rule.excluded_domains);
        ranges.push((included, excluded));
    }

    let mut buf = vec![0u8; DOMAIN_POOL_HEADER_SIZE + entries.len() * DOMAIN_ENTRY_SIZE];
    write_u32_le(&mut buf, 0, entries.len() as u32);
    for (i, (off, len)) in entries.iter().enumerate() {
        let entry_offset = DOMAIN_POOL_HEADER_SIZE + i * DOMAIN_ENTRY_SIZE;
        write_u32_le(&mut buf, entry_offset, *off);
        write_u32_le(&mut buf, entry_offset + 4, *len);
    }

    (buf, ranges, entries.len())
}

fn build_rules_section(rules: &[NormalizedRule], domain_ranges: &[DomainRanges], str_pool: &mut StringPool) -> Vec<u8> {
    let mut buf = vec![0u8; RULES_HEADER_SIZE + rules.len() * RULE_RECORD_SIZE];
    write_u32_le(&mut buf, 0, rules.len() as u32);

    for (pos, (rule, ranges)) in rules.iter().zip(domain_ranges).enumerate() {
        let base = RULES_HEADER_SIZE + pos * RULE_RECORD_SIZE;
        let (pattern_off, pattern_len) = str_pool.intern(&rule.filter.body);
        let ((domains_start, domains_count), (excluded_start, excluded_count)) = *ranges;

        write_u32_le(&mut buf, base + rule_record::ID, rule.id);
        write_u32_le(&mut buf, base + rule_record::PRIORITY, rule.priority);
        write_u16_le(&mut buf, base + rule_record::ELEMENT_TYPES, rule.element_types.bits());
        buf[base + rule_record::OPTIONS] = rule.options.bits();
        buf[base + rule_record::PATTERN_TYPE] = rule.filter.pattern_type as u8;
        buf[base + rule_record::LEFT_ANCHOR] = rule.filter.left_anchor as u8;
        buf[base + rule_record::RIGHT_ANCHOR] = rule.filter.right_anchor as u8;
        write_u32_le(&mut buf, base + rule_record::PATTERN_OFF, pattern_off);
        write_u32_le(&mut buf, base + rule_record::PATTERN_LEN, pattern_len);
        write_u32_le(&mut buf, base + rule_record::DOMAINS_START, domains_start);
        write_u32_le(&mut buf, base + rule_record::DOMAINS_COUNT, domains_count);
        write_u32_le(&mut buf, base + rule_record::EXCLUDED_START, excluded_start);
        write_u32_le(&mut buf, base + rule_record::EXCLUDED_COUNT, excluded_count);
    }

    buf
}

fn build_pattern_index(rules: &[NormalizedRule], action: RuleAction) -> (Vec<u8>, IndexCounts) {
    let mut keyed: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
    let mut fallback: Vec<u32> = Vec::new();
    let mut rule_total = 0;

    for (pos, rule) in rules.iter().enumerate().filter(|(_, r)| r.action == action) {
        rule_total += 1;
        let hashes = pattern_ngram_hashes(&rule.filter.body);
        if hashes.is_empty() {
            fallback.push(pos as u32);
            continue;
        }
        for hash in hashes {
            keyed.entry(hash).or_default().push(pos as u32);
        }
    }

    let mut postings = Vec::new();
    let mut entries = Vec::with_capacity(keyed.len());
    for (&hash, positions) in &keyed {
        entries.push((hash, postings.len() as u32, positions.len() as u32));
        encode_posting_list(&mut postings, positions);
    }
    let fallback_off = postings.len() as u32;
    encode_posting_list(&mut postings, &fallback);

    let capacity = compute_capacity(entries.len());
    let mut buf = vec![0u8; INDEX_HEADER_SIZE + capacity * INDEX_ENTRY_SIZE];
    write_u32_le(&mut buf, index_header::CAPACITY, capacity as u32);
    write_u32_le(&mut buf, index_header::KEY_COUNT, entries.len() as u32);
    write_u32_le(&mut buf, index_header::FALLBACK_OFF, fallback_off);
    write_u32_le(&mut buf, index_header::FALLBACK_COUNT, fallback.len() as u32);

    if capacity > 0 {
        let mask = capacity - 1;
        for &(ngram_hash, postings_off, rule_count) in &entries {
            let mut idx = (ngram_hash as usize) & mask;
            loop {
                let entry_offset = INDEX_HEADER_SIZE + idx * INDEX_ENTRY_SIZE;
                if buf[entry_offset..entry_offset + 4] == [0, 0, 0, 0] {
                    write_u32_le(&mut buf, entry_offset + index_entry::NGRAM_HASH, ngram_hash);
                    write_u32_le(&mut buf, entry_offset + index_entry::POSTINGS_OFF, postings_off);
                    write_u32_le(&mut buf, entry_offset + index_entry::RULE_COUNT, rule_count);
                    break;
                }
                idx = (idx + 1) & mask;
            }
        }
    }

    buf.extend_from_slice(&(postings.len() as u32).to_le_bytes());
    buf.extend_from_slice(&postings);

    let counts = IndexCounts {
        rules: rule_total,
        keys: entries.len(),
        fallback: fallback.len(),
    };
    (buf, counts)
}

fn build_redirect_metadata(rules: &[NormalizedRule], str_pool: &mut StringPool) -> Vec<u8> {
    let targets: BTreeMap<u32, &str> = rules
        .iter()
        .filter_map(|r| r.redirect_url.as_deref().map(|url| (r.id, url)))
        .collect();

    let mut buf = vec![0u8; REDIRECT_HEADER_SIZE + targets.len() * REDIRECT_ENTRY_SIZE];
    write_u32_le(&mut buf, 0, targets.len() as u32);
    for (i, (&rule_id, url)) in targets.iter().enumerate() {
        let entry_offset = REDIRECT_HEADER_SIZE + i * REDIRECT_ENTRY_SIZE;
        let (url_off, url_len) = str_pool.intern(url);
        write_u32_le(&mut buf, entry_offset + redirect_entry::RULE_ID, rule_id);
        write_u32_le(&mut buf, entry_offset + redirect_entry::URL_OFF, url_off);
        write_u32_le(&mut buf, entry_offset + redirect_entry::URL_LEN, url_len);
    }
    buf
}

fn encode_posting_list(buf: &mut Vec<u8>, positions: &[u32]) {
    let mut prev = 0u32;
    for &pos in positions {
        encode_varint(buf, pos.wrapping_sub(prev));
        prev = pos;
    }
}

fn encode_varint(buf: &mut Vec<u8>, mut value: u32) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            break;
        } else {
            buf.push(byte | 0x80);
        }
    }
}
