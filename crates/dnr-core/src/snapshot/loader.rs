//! Verified zero-copy ruleset loader
//!
//! [`SnapshotLayout::parse`] walks every section once and rejects anything
//! that would let an accessor read outside its section. Views created
//! afterwards borrow slices from the buffer and never copy.

use crate::hash::crc32;
use crate::types::{ElementType, LeftAnchor, PatternType, RightAnchor, RuleAction, RuleOptions};
use super::format::*;

/// Error type for ruleset loading.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Invalid magic bytes")]
    InvalidMagic,
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u16),
    #[error("Checksum mismatch: expected={expected:#010x}, computed={computed:#010x}")]
    ChecksumMismatch { expected: u32, computed: u32 },
    #[error("Data too short")]
    DataTooShort,
    #[error("Missing section: {0:?}")]
    MissingSection(SectionId),
    #[error("Invalid section {section:?}: {reason}")]
    InvalidSection { section: SectionId, reason: String },
    #[error("Invalid header: {0}")]
    InvalidHeader(&'static str),
}

fn invalid(section: SectionId, reason: impl Into<String>) -> SnapshotError {
    SnapshotError::InvalidSection {
        section,
        reason: reason.into(),
    }
}

/// Compare the CRC32 of the whole buffer against the stored integrity value.
pub fn verify_checksum(data: &[u8], expected: u32) -> Result<(), SnapshotError> {
    let computed = crc32(data);
    if computed != expected {
        return Err(SnapshotError::ChecksumMismatch { expected, computed });
    }
    Ok(())
}

/// Section metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct SectionInfo {
    pub flags: u16,
    pub offset: usize,
    pub length: usize,
}

/// Section offsets of a buffer that passed structural validation.
///
/// Holds no borrow, so it can live next to the buffer it describes.
#[derive(Debug, Clone)]
pub struct SnapshotLayout {
    pub version: u16,
    pub rule_count: usize,
    sections: [SectionInfo; SectionId::ALL.len()],
}

impl SnapshotLayout {
    /// Validate a buffer and record where each section lives.
    pub fn parse(data: &[u8]) -> Result<Self, SnapshotError> {
        if data.len() < HEADER_SIZE {
            return Err(SnapshotError::DataTooShort);
        }

        if !validate_magic(data) {
            return Err(SnapshotError::InvalidMagic);
        }

        let version = read_u16_le(data, header::VERSION);
        if version != DNR_VERSION {
            return Err(SnapshotError::UnsupportedVersion(version));
        }

        if read_u32_le(data, header::HEADER_BYTES) as usize != HEADER_SIZE {
            return Err(SnapshotError::InvalidHeader("header size"));
        }
        if read_u32_le(data, header::TOTAL_BYTES) as usize != data.len() {
            return Err(SnapshotError::InvalidHeader("total size"));
        }

        let section_count = read_u32_le(data, header::SECTION_COUNT) as usize;
        let section_dir_offset = read_u32_le(data, header::SECTION_DIR_OFFSET) as usize;
        let rule_count = read_u32_le(data, header::RULE_COUNT) as usize;

        if section_count != SectionId::ALL.len() {
            return Err(SnapshotError::InvalidHeader("section count"));
        }
        let dir_end = section_count
            .checked_mul(SECTION_ENTRY_SIZE)
            .and_then(|bytes| bytes.checked_add(section_dir_offset))
            .ok_or(SnapshotError::InvalidHeader("section directory"))?;
        if section_dir_offset < HEADER_SIZE || dir_end > data.len() {
            return Err(SnapshotError::InvalidHeader("section directory"));
        }

        // Parse section directory
        let mut sections = [SectionInfo::default(); SectionId::ALL.len()];
        let mut seen = [false; SectionId::ALL.len()];
        for i in 0..section_count {
            let entry_offset = section_dir_offset + i * SECTION_ENTRY_SIZE;

            let id_raw = read_u16_le(data, entry_offset + section_entry::ID);
            let id = SectionId::try_from(id_raw)
                .map_err(|_| SnapshotError::InvalidHeader("unknown section id"))?;
            if seen[id.slot()] {
                return Err(invalid(id, "duplicate directory entry"));
            }

            let info = SectionInfo {
                flags: read_u16_le(data, entry_offset + section_entry::FLAGS),
                offset: read_u32_le(data, entry_offset + section_entry::OFFSET) as usize,
                length: read_u32_le(data, entry_offset + section_entry::LENGTH) as usize,
            };
            let end = info
                .offset
                .checked_add(info.length)
                .ok_or_else(|| invalid(id, "length overflow"))?;
            if info.offset < dir_end || end > data.len() {
                return Err(invalid(id, "out of bounds"));
            }

            seen[id.slot()] = true;
            sections[id.slot()] = info;
        }
        if let Some(missing) = SectionId::ALL.iter().find(|id| !seen[id.slot()]) {
            return Err(SnapshotError::MissingSection(*missing));
        }

        let layout = Self {
            version,
            rule_count,
            sections,
        };
        layout.validate_sections(data)?;
        Ok(layout)
    }

    fn section<'a>(&self, data: &'a [u8], id: SectionId) -> &'a [u8] {
        let info = &self.sections[id.slot()];
        &data[info.offset..info.offset + info.length]
    }

    /// Get section info.
    pub fn section_info(&self, id: SectionId) -> SectionInfo {
        self.sections[id.slot()]
    }

    fn validate_sections(&self, data: &[u8]) -> Result<(), SnapshotError> {
        let snapshot = Snapshot { data, layout: self };

        // String pool
        let str_section = self.section(data, SectionId::StrPool);
        if str_section.len() < 4 || read_u32_le(str_section, 0) as usize > str_section.len() - 4 {
            return Err(invalid(SectionId::StrPool, "pool length"));
        }

        // Domain pool
        let domains = snapshot.domains();
        let domain_section = self.section(data, SectionId::DomainPool);
        if domain_section.len() < DOMAIN_POOL_HEADER_SIZE
            || table_bytes(domains.count, DOMAIN_ENTRY_SIZE, DOMAIN_POOL_HEADER_SIZE)
                .map_or(true, |end| end > domain_section.len())
        {
            return Err(invalid(SectionId::DomainPool, "entry table"));
        }
        for idx in 0..domains.count {
            match domains.get(idx) {
                Some(domain) if !domain.is_empty() => {}
                _ => return Err(invalid(SectionId::DomainPool, format!("domain {idx}"))),
            }
        }

        // Redirect metadata, before the rules that reference it
        let redirects = snapshot.redirects();
        let redirect_section = self.section(data, SectionId::RedirectMetadata);
        if redirect_section.len() < REDIRECT_HEADER_SIZE
            || table_bytes(redirects.count, REDIRECT_ENTRY_SIZE, REDIRECT_HEADER_SIZE)
                .map_or(true, |end| end > redirect_section.len())
        {
            return Err(invalid(SectionId::RedirectMetadata, "entry table"));
        }
        let mut prev_id = None;
        for idx in 0..redirects.count {
            let rule_id = redirects.rule_id_at(idx);
            if prev_id.is_some_and(|prev| prev >= rule_id) {
                return Err(invalid(SectionId::RedirectMetadata, "ids not strictly ascending"));
            }
            prev_id = Some(rule_id);
            match redirects.url_at(idx) {
                Some(url) if !url.is_empty() => {}
                _ => return Err(invalid(SectionId::RedirectMetadata, format!("url {idx}"))),
            }
        }

        // Rules
        let rules_section = self.section(data, SectionId::Rules);
        let rules = snapshot.rules();
        if rules_section.len() < RULES_HEADER_SIZE || rules.count != self.rule_count {
            return Err(invalid(SectionId::Rules, "rule count"));
        }
        if table_bytes(rules.count, RULE_RECORD_SIZE, RULES_HEADER_SIZE)
            .map_or(true, |end| end > rules_section.len())
        {
            return Err(invalid(SectionId::Rules, "record table"));
        }
        for pos in 0..rules.count {
            let record = rules
                .get(pos)
                .ok_or_else(|| invalid(SectionId::Rules, format!("record {pos} fields")))?;
            snapshot
                .pattern_body(&record)
                .ok_or_else(|| invalid(SectionId::Rules, format!("record {pos} pattern")))?;
            for range in [record.domains, record.excluded_domains] {
                if !domains.range_is_sorted(range) {
                    return Err(invalid(SectionId::Rules, format!("record {pos} domains")));
                }
            }
        }

        // Pattern indices
        for action in [RuleAction::Block, RuleAction::Allow, RuleAction::Redirect] {
            self.validate_index(&snapshot, action)?;
        }

        Ok(())
    }

    fn validate_index(&self, snapshot: &Snapshot<'_>, action: RuleAction) -> Result<(), SnapshotError> {
        let id = index_section(action);
        let section = self.section(snapshot.data, id);
        if section.len() < INDEX_HEADER_SIZE {
            return Err(invalid(id, "header"));
        }

        let capacity = read_u32_le(section, index_header::CAPACITY) as usize;
        if capacity != 0 && !capacity.is_power_of_two() {
            return Err(invalid(id, "capacity"));
        }
        let table_end = table_bytes(capacity, INDEX_ENTRY_SIZE, INDEX_HEADER_SIZE)
            .filter(|end| end + 4 <= section.len())
            .ok_or_else(|| invalid(id, "slot table"))?;
        let postings_len = read_u32_le(section, table_end) as usize;
        if postings_len > section.len() - table_end - 4 {
            return Err(invalid(id, "postings length"));
        }

        let index = snapshot.pattern_index(action);
        let check_list = |list: PostingIter<'_>, what: &str| -> Result<(), SnapshotError> {
            let expected = list.remaining;
            let mut decoded = 0usize;
            let mut prev = None;
            for pos in list {
                let pos = pos as usize;
                if prev.is_some_and(|p| p >= pos) || pos >= self.rule_count {
                    return Err(invalid(id, format!("{what} rule reference")));
                }
                prev = Some(pos);
                decoded += 1;

                let record = snapshot
                    .rules()
                    .get(pos)
                    .ok_or_else(|| invalid(id, format!("{what} rule reference")))?;
                if !record_belongs_to(&record, action, snapshot) {
                    return Err(invalid(id, format!("{what} rule {} in wrong index", record.id)));
                }
            }
            if decoded != expected {
                return Err(invalid(id, format!("{what} truncated")));
            }
            Ok(())
        };

        let mut occupied = 0usize;
        for slot in 0..capacity {
            if let Some(list) = index.slot(slot) {
                occupied += 1;
                check_list(list, "posting list")?;
            }
        }
        if occupied != index.key_count {
            return Err(invalid(id, "key count"));
        }
        check_list(index.fallback(), "fallback list")
    }
}

fn table_bytes(count: usize, entry_size: usize, header_size: usize) -> Option<usize> {
    count.checked_mul(entry_size)?.checked_add(header_size)
}

fn index_section(action: RuleAction) -> SectionId {
    match action {
        RuleAction::Block => SectionId::BlockIndex,
        RuleAction::Allow => SectionId::AllowIndex,
        RuleAction::Redirect => SectionId::RedirectIndex,
    }
}

fn record_belongs_to(record: &RuleRecord, action: RuleAction, snapshot: &Snapshot<'_>) -> bool {
    let is_allow = record.options.contains(RuleOptions::IS_ALLOW);
    let has_redirect = snapshot.redirects().lookup(record.id).is_some();
    match action {
        RuleAction::Block => !is_allow && !has_redirect,
        RuleAction::Allow => is_allow && !has_redirect,
        RuleAction::Redirect => !is_allow && has_redirect,
    }
}

// =============================================================================
// Snapshot View
// =============================================================================

/// Zero-copy view over a validated buffer.
#[derive(Clone, Copy)]
pub struct Snapshot<'a> {
    data: &'a [u8],
    layout: &'a SnapshotLayout,
}

impl<'a> Snapshot<'a> {
    /// Pair a buffer with the layout [`SnapshotLayout::parse`] produced for it.
    pub fn new(data: &'a [u8], layout: &'a SnapshotLayout) -> Self {
        Self { data, layout }
    }

    pub fn get_section(&self, id: SectionId) -> &'a [u8] {
        self.layout.section(self.data, id)
    }

    /// Get string from string pool.
    pub fn get_string(&self, offset: usize, length: usize) -> Option<&'a str> {
        let section = self.get_section(SectionId::StrPool);
        let pool_len = read_u32_le(section, 0) as usize;
        let pool_data = section.get(4..4 + pool_len.min(section.len().saturating_sub(4)))?;
        let end = offset.checked_add(length)?;
        std::str::from_utf8(pool_data.get(offset..end)?).ok()
    }

    /// Pattern body of a rule record.
    pub fn pattern_body(&self, record: &RuleRecord) -> Option<&'a str> {
        self.get_string(record.pattern_off as usize, record.pattern_len as usize)
    }

    /// Get rules view.
    pub fn rules(&self) -> RulesView<'a> {
        RulesView::new(self.get_section(SectionId::Rules))
    }

    /// Get domain pool view.
    pub fn domains(&self) -> DomainPool<'a> {
        DomainPool::new(*self)
    }

    /// Get the pattern index for one action.
    pub fn pattern_index(&self, action: RuleAction) -> PatternIndexView<'a> {
        PatternIndexView::new(self.get_section(index_section(action)))
    }

    /// Get redirect metadata view.
    pub fn redirects(&self) -> RedirectTable<'a> {
        RedirectTable::new(*self)
    }
}

// =============================================================================
// Rules View
// =============================================================================

/// Contiguous run of domain pool entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DomainRange {
    pub start: u32,
    pub count: u32,
}

impl DomainRange {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// One decoded rule record.
#[derive(Debug, Clone, Copy)]
pub struct RuleRecord {
    pub id: u32,
    pub priority: u32,
    pub element_types: ElementType,
    pub options: RuleOptions,
    pub pattern_type: PatternType,
    pub left_anchor: LeftAnchor,
    pub right_anchor: RightAnchor,
    pub pattern_off: u32,
    pub pattern_len: u32,
    pub domains: DomainRange,
    pub excluded_domains: DomainRange,
}

/// Zero-copy view into the rules table.
pub struct RulesView<'a> {
    data: &'a [u8],
    pub count: usize,
}

impl<'a> RulesView<'a> {
    fn new(data: &'a [u8]) -> Self {
        let count = read_u32_le(data, 0) as usize;
        Self { data, count }
    }

    /// Decode the record at `pos`. `None` if out of range or malformed.
    pub fn get(&self, pos: usize) -> Option<RuleRecord> {
        if pos >= self.count {
            return None;
        }
        let base = RULES_HEADER_SIZE + pos * RULE_RECORD_SIZE;
        let record = self.data.get(base..base + RULE_RECORD_SIZE)?;

        Some(RuleRecord {
            id: read_u32_le(record, rule_record::ID),
            priority: read_u32_le(record, rule_record::PRIORITY),
            element_types: ElementType::from_bits(read_u16_le(record, rule_record::ELEMENT_TYPES))?,
            options: RuleOptions::from_bits(record[rule_record::OPTIONS])?,
            pattern_type: PatternType::try_from(record[rule_record::PATTERN_TYPE]).ok()?,
            left_anchor: LeftAnchor::try_from(record[rule_record::LEFT_ANCHOR]).ok()?,
            right_anchor: RightAnchor::try_from(record[rule_record::RIGHT_ANCHOR]).ok()?,
            pattern_off: read_u32_le(record, rule_record::PATTERN_OFF),
            pattern_len: read_u32_le(record, rule_record::PATTERN_LEN),
            domains: DomainRange {
                start: read_u32_le(record, rule_record::DOMAINS_START),
                count: read_u32_le(record, rule_record::DOMAINS_COUNT),
            },
            excluded_domains: DomainRange {
                start: read_u32_le(record, rule_record::EXCLUDED_START),
                count: read_u32_le(record, rule_record::EXCLUDED_COUNT),
            },
        })
    }
}

// =============================================================================
// Domain Pool View
// =============================================================================

/// Zero-copy view into the domain pool.
pub struct DomainPool<'a> {
    snapshot: Snapshot<'a>,
    data: &'a [u8],
    pub count: usize,
}

impl<'a> DomainPool<'a> {
    fn new(snapshot: Snapshot<'a>) -> Self {
        let data = snapshot.get_section(SectionId::DomainPool);
        let count = read_u32_le(data, 0) as usize;
        Self { snapshot, data, count }
    }

    /// Domain string at pool index `idx`.
    pub fn get(&self, idx: usize) -> Option<&'a str> {
        if idx >= self.count {
            return None;
        }
        let entry = DOMAIN_POOL_HEADER_SIZE + idx * DOMAIN_ENTRY_SIZE;
        if entry + DOMAIN_ENTRY_SIZE > self.data.len() {
            return None;
        }
        let off = read_u32_le(self.data, entry) as usize;
        let len = read_u32_le(self.data, entry + 4) as usize;
        self.snapshot.get_string(off, len)
    }

    fn range_is_sorted(&self, range: DomainRange) -> bool {
        let start = range.start as usize;
        let Some(end) = start.checked_add(range.count as usize) else {
            return false;
        };
        if end > self.count {
            return false;
        }
        let mut prev: Option<&str> = None;
        for idx in start..end {
            let Some(domain) = self.get(idx) else {
                return false;
            };
            if prev.is_some_and(|p| p >= domain) {
                return false;
            }
            prev = Some(domain);
        }
        true
    }

    /// Binary search a sorted range for an exact domain.
    pub fn contains(&self, range: DomainRange, domain: &str) -> bool {
        let mut lo = range.start as usize;
        let mut hi = lo + range.count as usize;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.get(mid) {
                Some(candidate) => match candidate.cmp(domain) {
                    std::cmp::Ordering::Equal => return true,
                    std::cmp::Ordering::Less => lo = mid + 1,
                    std::cmp::Ordering::Greater => hi = mid,
                },
                None => return false,
            }
        }
        false
    }

    /// All domains of a range, in stored order.
    pub fn iter(&self, range: DomainRange) -> impl Iterator<Item = &'a str> + '_ {
        let start = range.start as usize;
        (start..start + range.count as usize).filter_map(move |idx| self.get(idx))
    }
}

// =============================================================================
// Pattern Index View
// =============================================================================

/// Zero-copy view into one n-gram index.
pub struct PatternIndexView<'a> {
    data: &'a [u8],
    capacity: usize,
    pub key_count: usize,
    fallback_off: usize,
    pub fallback_count: usize,
    postings: &'a [u8],
}

impl<'a> PatternIndexView<'a> {
    fn new(data: &'a [u8]) -> Self {
        let capacity = read_u32_le(data, index_header::CAPACITY) as usize;
        let table_end = INDEX_HEADER_SIZE.saturating_add(capacity.saturating_mul(INDEX_ENTRY_SIZE));
        let postings_len = read_u32_le(data, table_end) as usize;
        let postings_start = table_end.saturating_add(4).min(data.len());
        let postings_end = postings_start.saturating_add(postings_len).min(data.len());

        Self {
            data,
            capacity,
            key_count: read_u32_le(data, index_header::KEY_COUNT) as usize,
            fallback_off: read_u32_le(data, index_header::FALLBACK_OFF) as usize,
            fallback_count: read_u32_le(data, index_header::FALLBACK_COUNT) as usize,
            postings: &data[postings_start..postings_end],
        }
    }

    fn slot(&self, idx: usize) -> Option<PostingIter<'a>> {
        let entry = INDEX_HEADER_SIZE + idx * INDEX_ENTRY_SIZE;
        let hash = read_u32_le(self.data, entry + index_entry::NGRAM_HASH);
        if hash == 0 {
            return None;
        }
        Some(PostingIter::new(
            self.postings,
            read_u32_le(self.data, entry + index_entry::POSTINGS_OFF) as usize,
            read_u32_le(self.data, entry + index_entry::RULE_COUNT) as usize,
        ))
    }

    /// Look up an n-gram hash. Yields rule positions on a hit.
    pub fn lookup(&self, ngram_hash: u32) -> Option<PostingIter<'a>> {
        if self.capacity == 0 || ngram_hash == 0 {
            return None;
        }

        let mask = self.capacity - 1;
        let mut idx = (ngram_hash as usize) & mask;

        for _ in 0..self.capacity {
            let entry = INDEX_HEADER_SIZE + idx * INDEX_ENTRY_SIZE;
            let stored = read_u32_le(self.data, entry + index_entry::NGRAM_HASH);

            // Empty slot
            if stored == 0 {
                return None;
            }

            if stored == ngram_hash {
                return self.slot(idx);
            }

            // Linear probing
            idx = (idx + 1) & mask;
        }

        None
    }

    /// Rules whose pattern has no n-gram; checked for every request.
    pub fn fallback(&self) -> PostingIter<'a> {
        PostingIter::new(self.postings, self.fallback_off, self.fallback_count)
    }
}

// =============================================================================
// Redirect Metadata View
// =============================================================================

/// Zero-copy view into the id-sorted redirect table.
pub struct RedirectTable<'a> {
    snapshot: Snapshot<'a>,
    data: &'a [u8],
    pub count: usize,
}

impl<'a> RedirectTable<'a> {
    fn new(snapshot: Snapshot<'a>) -> Self {
        let data = snapshot.get_section(SectionId::RedirectMetadata);
        let count = read_u32_le(data, 0) as usize;
        Self { snapshot, data, count }
    }

    fn rule_id_at(&self, idx: usize) -> u32 {
        let entry = REDIRECT_HEADER_SIZE + idx * REDIRECT_ENTRY_SIZE;
        read_u32_le(self.data, entry + redirect_entry::RULE_ID)
    }

    fn url_at(&self, idx: usize) -> Option<&'a str> {
        let entry = REDIRECT_HEADER_SIZE + idx * REDIRECT_ENTRY_SIZE;
        if entry + REDIRECT_ENTRY_SIZE > self.data.len() {
            return None;
        }
        let off = read_u32_le(self.data, entry + redirect_entry::URL_OFF) as usize;
        let len = read_u32_le(self.data, entry + redirect_entry::URL_LEN) as usize;
        self.snapshot.get_string(off, len)
    }

    /// Binary search for the target URL of a redirect rule.
    pub fn lookup(&self, rule_id: u32) -> Option<&'a str> {
        let mut lo = 0usize;
        let mut hi = self.count;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.rule_id_at(mid).cmp(&rule_id) {
                std::cmp::Ordering::Equal => return self.url_at(mid),
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
            }
        }
        None
    }
}

// =============================================================================
// Varint Decoder
// =============================================================================

/// Decode a single unsigned LEB128 varint.
/// Returns (value, bytes_read), or `None` if truncated or overlong.
pub fn decode_varint(data: &[u8], offset: usize) -> Option<(u32, usize)> {
    let mut result: u32 = 0;
    let mut shift = 0;
    let mut bytes_read = 0;

    loop {
        let byte = *data.get(offset.checked_add(bytes_read)?)?;
        bytes_read += 1;

        if shift == 28 && byte & 0x70 != 0 {
            return None;
        }
        result |= ((byte & 0x7f) as u32) << shift;

        if byte & 0x80 == 0 {
            return Some((result, bytes_read));
        }

        shift += 7;
        if shift > 28 {
            return None;
        }
    }
}

/// Iterator over a delta-encoded posting list of rule positions.
#[derive(Clone)]
pub struct PostingIter<'a> {
    data: &'a [u8],
    pos: usize,
    remaining: usize,
    prev: u32,
}

impl<'a> PostingIter<'a> {
    fn new(data: &'a [u8], offset: usize, count: usize) -> Self {
        Self {
            data,
            pos: offset,
            remaining: count,
            prev: 0,
        }
    }
}

impl<'a> Iterator for PostingIter<'a> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.remaining == 0 {
            return None;
        }
        let Some((delta, bytes_read)) = decode_varint(self.data, self.pos) else {
            self.remaining = 0;
            return None;
        };
        self.pos += bytes_read;
        self.remaining -= 1;
        self.prev = self.prev.wrapping_add(delta);
        Some(self.prev)
    }
}
