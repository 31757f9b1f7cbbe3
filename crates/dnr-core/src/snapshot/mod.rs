//! DNR ruleset format and verified loader
//!
//! `format` holds the binary layout constants; `loader` validates a buffer
//! and exposes zero-copy views over it.

mod format;
mod loader;

pub use format::*;
pub use loader::*;

/// Smallest valid buffer: every section present and empty.
#[cfg(test)]
pub(crate) fn empty_ruleset() -> Vec<u8> {
    let sections: [(SectionId, usize); 7] = [
        (SectionId::StrPool, 4),
        (SectionId::Rules, RULES_HEADER_SIZE),
        (SectionId::DomainPool, DOMAIN_POOL_HEADER_SIZE),
        (SectionId::BlockIndex, INDEX_HEADER_SIZE + 4),
        (SectionId::AllowIndex, INDEX_HEADER_SIZE + 4),
        (SectionId::RedirectIndex, INDEX_HEADER_SIZE + 4),
        (SectionId::RedirectMetadata, REDIRECT_HEADER_SIZE),
    ];
    let dir_end = HEADER_SIZE + sections.len() * SECTION_ENTRY_SIZE;
    let total = dir_end + sections.iter().map(|(_, len)| len).sum::<usize>();

    let mut data = vec![0u8; total];
    data[..4].copy_from_slice(&DNR_MAGIC);
    write_u16_le(&mut data, header::VERSION, DNR_VERSION);
    write_u32_le(&mut data, header::HEADER_BYTES, HEADER_SIZE as u32);
    write_u32_le(&mut data, header::SECTION_COUNT, sections.len() as u32);
    write_u32_le(&mut data, header::SECTION_DIR_OFFSET, HEADER_SIZE as u32);
    write_u32_le(&mut data, header::TOTAL_BYTES, total as u32);

    let mut offset = dir_end;
    for (i, (id, len)) in sections.iter().enumerate() {
        let entry = HEADER_SIZE + i * SECTION_ENTRY_SIZE;
        write_u16_le(&mut data, entry + section_entry::ID, *id as u16);
        write_u32_le(&mut data, entry + section_entry::OFFSET, offset as u32);
        write_u32_le(&mut data, entry + section_entry::LENGTH, *len as u32);
        offset += len;
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_ruleset_verifies() {
        let data = empty_ruleset();
        let layout = SnapshotLayout::parse(&data).unwrap();
        assert_eq!(layout.rule_count, 0);

        let snapshot = Snapshot::new(&data, &layout);
        assert_eq!(snapshot.rules().count, 0);
        assert!(snapshot.redirects().lookup(1).is_none());
        assert!(snapshot.pattern_index(crate::types::RuleAction::Block).lookup(42).is_none());
        assert_eq!(snapshot.pattern_index(crate::types::RuleAction::Allow).fallback().count(), 0);
    }

    #[test]
    fn every_truncation_is_rejected() {
        let data = empty_ruleset();
        for len in 0..data.len() {
            assert!(SnapshotLayout::parse(&data[..len]).is_err(), "accepted {len} bytes");
        }
    }

    #[test]
    fn section_out_of_bounds_is_rejected() {
        let mut data = empty_ruleset();
        let entry = HEADER_SIZE + SectionId::Rules.slot() * SECTION_ENTRY_SIZE;
        write_u32_le(&mut data, entry + section_entry::LENGTH, 4096);
        assert!(matches!(
            SnapshotLayout::parse(&data),
            Err(SnapshotError::InvalidSection { section: SectionId::Rules, .. })
        ));
    }

    #[test]
    fn missing_section_is_rejected() {
        let mut data = empty_ruleset();
        let entry = HEADER_SIZE + SectionId::RedirectMetadata.slot() * SECTION_ENTRY_SIZE;
        write_u16_le(&mut data, entry + section_entry::ID, SectionId::StrPool as u16);
        assert!(SnapshotLayout::parse(&data).is_err());
    }

    #[test]
    fn rule_count_must_agree_with_rules_section() {
        let mut data = empty_ruleset();
        write_u32_le(&mut data, header::RULE_COUNT, 3);
        assert!(SnapshotLayout::parse(&data).is_err());
    }
}
