//! Fast URL parsing utilities for the hot path
//!
//! These functions avoid allocations and work directly on string slices.

use crate::hash::{hash_ngram, NGRAM_SIZE};

// =============================================================================
// Scheme / Host Extraction
// =============================================================================

/// Get the position after "://".
#[inline]
pub fn get_scheme_end(url: &str) -> Option<usize> {
    let bytes = url.as_bytes();

    let colon_pos = bytes.iter().position(|&b| b == b':')?;
    if colon_pos == 0 {
        return None;
    }

    if bytes.len() > colon_pos + 2 && bytes[colon_pos + 1] == b'/' && bytes[colon_pos + 2] == b'/' {
        return Some(colon_pos + 3);
    }

    None
}

/// Get the start and end positions of the hostname in a URL.
#[inline]
pub fn get_host_position(url: &str) -> Option<(usize, usize)> {
    let scheme_end = get_scheme_end(url)?;
    let bytes = url.as_bytes();

    // Skip userinfo
    let mut host_start = scheme_end;
    for (i, &b) in bytes.iter().enumerate().skip(scheme_end) {
        if b == b'@' {
            host_start = i + 1;
            break;
        }
        if b == b'/' || b == b'?' || b == b'#' {
            break;
        }
    }

    // Find host end
    let mut host_end = bytes.len();
    for (i, &b) in bytes.iter().enumerate().skip(host_start) {
        if b == b'/' || b == b'?' || b == b'#' || b == b':' {
            host_end = i;
            break;
        }
    }

    Some((host_start, host_end))
}

/// Fast host extraction without allocations.
/// Returns a slice into the original URL.
#[inline]
pub fn extract_host(url: &str) -> Option<&str> {
    let (host_start, host_end) = get_host_position(url)?;
    Some(&url[host_start..host_end])
}

/// Host of a request initiator.
///
/// Accepts either a serialized origin (`https://example.com`) or a bare
/// host. Returns `None` for an empty or opaque initiator.
#[inline]
pub fn initiator_host(initiator: &str) -> Option<&str> {
    let host = match get_scheme_end(initiator) {
        Some(_) => extract_host(initiator)?,
        None => initiator.split(['/', ':']).next().unwrap_or(""),
    };
    let host = host.trim_end_matches('.');
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

// =============================================================================
// Host Suffix Walking
// =============================================================================

/// Iterator over a host and its parent domains, most specific first.
///
/// `a.b.example.com` yields `a.b.example.com`, `b.example.com`,
/// `example.com`, `com`.
pub struct HostSuffixIter<'a> {
    current: Option<&'a str>,
}

impl<'a> Iterator for HostSuffixIter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let result = self.current?;
        self.current = match result.find('.') {
            Some(idx) if idx + 1 < result.len() => Some(&result[idx + 1..]),
            _ => None,
        };
        Some(result)
    }
}

/// Walk host suffixes from most specific to least specific.
pub fn walk_host_suffixes(host: &str) -> HostSuffixIter<'_> {
    HostSuffixIter {
        current: if host.is_empty() { None } else { Some(host) },
    }
}

// =============================================================================
// Separator Check
// =============================================================================

/// Check if a byte is a separator for the `^` pattern metacharacter.
/// Anything but a letter, a digit, or one of `_ - . %`.
#[inline]
pub fn is_separator_char(c: u8) -> bool {
    !(c.is_ascii_alphanumeric() || matches!(c, b'_' | b'-' | b'.' | b'%'))
}

// =============================================================================
// URL N-grams
// =============================================================================

/// Hashes of every n-gram in the URL, sorted and de-duplicated.
///
/// These are the keys probed in each pattern index.
pub fn url_ngram_hashes(url: &str) -> Vec<u32> {
    let bytes = url.as_bytes();
    if bytes.len() < NGRAM_SIZE {
        return Vec::new();
    }

    let mut hashes: Vec<u32> = bytes.windows(NGRAM_SIZE).map(hash_ngram).collect();
    hashes.sort_unstable();
    hashes.dedup();
    hashes
}
