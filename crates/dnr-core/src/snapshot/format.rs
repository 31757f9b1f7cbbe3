//! DNR Ruleset Format v1 Constants
//!
//! All values are little-endian. Layout:
//!
//! ```text
//! header (32 bytes)
//! section directory (section_count * 12 bytes)
//! sections, each 4-byte aligned
//! ```

/// Magic bytes: "DNR1"
pub const DNR_MAGIC: [u8; 4] = [0x44, 0x4E, 0x52, 0x31];

/// Current format version
pub const DNR_VERSION: u16 = 1;

/// Header size in bytes
pub const HEADER_SIZE: usize = 32;

/// Section directory entry size
pub const SECTION_ENTRY_SIZE: usize = 12;

// =============================================================================
// Header Field Offsets
// =============================================================================

/// Header field byte offsets.
pub mod header {
    /// u8[4] magic = "DNR1"
    pub const MAGIC: usize = 0;
    /// u16 version
    pub const VERSION: usize = 4;
    /// u16 flags (reserved, 0)
    pub const FLAGS: usize = 6;
    /// u32 headerBytes (always 32)
    pub const HEADER_BYTES: usize = 8;
    /// u32 sectionCount
    pub const SECTION_COUNT: usize = 12;
    /// u32 sectionDirOffset
    pub const SECTION_DIR_OFFSET: usize = 16;
    /// u32 ruleCount
    pub const RULE_COUNT: usize = 20;
    /// u32 totalBytes
    pub const TOTAL_BYTES: usize = 24;
}

// =============================================================================
// Section Directory Entry Offsets
// =============================================================================

pub mod section_entry {
    /// u16 section id
    pub const ID: usize = 0;
    /// u16 flags
    pub const FLAGS: usize = 2;
    /// u32 file offset
    pub const OFFSET: usize = 4;
    /// u32 byte length
    pub const LENGTH: usize = 8;
}

// =============================================================================
// Section IDs
// =============================================================================

/// Section type identifiers. Every section is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum SectionId {
    /// String pool for pattern bodies, domains and redirect URLs
    StrPool = 0x0001,
    /// Fixed-size rule records
    Rules = 0x0002,
    /// Domain list entries referenced by rule records
    DomainPool = 0x0003,
    /// N-gram index over block rules
    BlockIndex = 0x0004,
    /// N-gram index over allow rules
    AllowIndex = 0x0005,
    /// N-gram index over redirect rules
    RedirectIndex = 0x0006,
    /// Redirect rule id -> target URL, sorted by id
    RedirectMetadata = 0x0007,
}

impl SectionId {
    pub const ALL: [SectionId; 7] = [
        SectionId::StrPool,
        SectionId::Rules,
        SectionId::DomainPool,
        SectionId::BlockIndex,
        SectionId::AllowIndex,
        SectionId::RedirectIndex,
        SectionId::RedirectMetadata,
    ];

    /// Position in [`SectionId::ALL`].
    pub const fn slot(self) -> usize {
        self as usize - 1
    }
}

impl TryFrom<u16> for SectionId {
    type Error = ();

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0001 => Ok(Self::StrPool),
            0x0002 => Ok(Self::Rules),
            0x0003 => Ok(Self::DomainPool),
            0x0004 => Ok(Self::BlockIndex),
            0x0005 => Ok(Self::AllowIndex),
            0x0006 => Ok(Self::RedirectIndex),
            0x0007 => Ok(Self::RedirectMetadata),
            _ => Err(()),
        }
    }
}

// =============================================================================
// Rules Layout
// =============================================================================

/// Rules section header: u32 count
pub const RULES_HEADER_SIZE: usize = 4;

/// Rule record size
pub const RULE_RECORD_SIZE: usize = 40;

pub mod rule_record {
    /// u32 rule id
    pub const ID: usize = 0;
    /// u32 priority
    pub const PRIORITY: usize = 4;
    /// u16 element type mask
    pub const ELEMENT_TYPES: usize = 8;
    /// u8 option flags
    pub const OPTIONS: usize = 10;
    /// u8 pattern type
    pub const PATTERN_TYPE: usize = 11;
    /// u8 left anchor
    pub const LEFT_ANCHOR: usize = 12;
    /// u8 right anchor
    pub const RIGHT_ANCHOR: usize = 13;
    /// u32 pattern string offset
    pub const PATTERN_OFF: usize = 16;
    /// u32 pattern string length
    pub const PATTERN_LEN: usize = 20;
    /// u32 first domain entry
    pub const DOMAINS_START: usize = 24;
    /// u32 domain entry count
    pub const DOMAINS_COUNT: usize = 28;
    /// u32 first excluded domain entry
    pub const EXCLUDED_START: usize = 32;
    /// u32 excluded domain entry count
    pub const EXCLUDED_COUNT: usize = 36;
}

// =============================================================================
// Domain Pool Layout
// =============================================================================

/// Domain pool header: u32 count
pub const DOMAIN_POOL_HEADER_SIZE: usize = 4;

/// Domain entry size (string offset, string length)
pub const DOMAIN_ENTRY_SIZE: usize = 8;

// =============================================================================
// Pattern Index Layout
// =============================================================================

/// Pattern index header size
pub const INDEX_HEADER_SIZE: usize = 16;

pub mod index_header {
    /// u32 table capacity (power of two, or 0)
    pub const CAPACITY: usize = 0;
    /// u32 number of occupied slots
    pub const KEY_COUNT: usize = 4;
    /// u32 fallback posting list offset
    pub const FALLBACK_OFF: usize = 8;
    /// u32 fallback rule count
    pub const FALLBACK_COUNT: usize = 12;
}

/// Pattern index slot size
pub const INDEX_ENTRY_SIZE: usize = 12;

pub mod index_entry {
    pub const NGRAM_HASH: usize = 0;
    pub const POSTINGS_OFF: usize = 4;
    pub const RULE_COUNT: usize = 8;
}

// =============================================================================
// Redirect Metadata Layout
// =============================================================================

/// Redirect metadata header: u32 count
pub const REDIRECT_HEADER_SIZE: usize = 4;

/// Redirect metadata entry size
pub const REDIRECT_ENTRY_SIZE: usize = 12;

pub mod redirect_entry {
    pub const RULE_ID: usize = 0;
    pub const URL_OFF: usize = 4;
    pub const URL_LEN: usize = 8;
}

// =============================================================================
// Helpers
// =============================================================================

/// Align offset to boundary.
#[inline]
pub const fn align_offset(offset: usize, alignment: usize) -> usize {
    (offset + alignment - 1) & !(alignment - 1)
}

/// Validate magic bytes.
#[inline]
pub fn validate_magic(data: &[u8]) -> bool {
    data.len() >= 4 && data[..4] == DNR_MAGIC
}

/// Read u16 little-endian. Out-of-range reads yield 0.
#[inline]
pub fn read_u16_le(data: &[u8], offset: usize) -> u16 {
    match offset.checked_add(2).and_then(|end| data.get(offset..end)) {
        Some(b) => u16::from_le_bytes([b[0], b[1]]),
        None => 0,
    }
}

/// Read u32 little-endian. Out-of-range reads yield 0.
#[inline]
pub fn read_u32_le(data: &[u8], offset: usize) -> u32 {
    match offset.checked_add(4).and_then(|end| data.get(offset..end)) {
        Some(b) => u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
        None => 0,
    }
}

/// Write u16 little-endian.
#[inline]
pub fn write_u16_le(data: &mut [u8], offset: usize, value: u16) {
    data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

/// Write u32 little-endian.
#[inline]
pub fn write_u32_le(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Hash table capacity for `count` keys at a 0.7 load factor.
pub fn compute_capacity(count: usize) -> usize {
    if count == 0 {
        return 0;
    }
    let target = (count * 10).div_ceil(7);
    target.next_power_of_two().max(2)
}
