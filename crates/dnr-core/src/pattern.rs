//! URL pattern matching
//!
//! A pattern is a body plus its anchors. The body may contain two
//! metacharacters: `*` matches any run of characters and `^` matches one
//! separator character or the end of the URL.

use std::collections::BTreeSet;

use crate::hash::{hash_ngram, NGRAM_SIZE};
use crate::types::{LeftAnchor, PatternType, RightAnchor};
use crate::url::{get_host_position, is_separator_char};

pub const WILDCARD: u8 = b'*';
pub const SEPARATOR: u8 = b'^';
pub const ANCHOR: u8 = b'|';

/// Borrowed view of one rule's pattern.
#[derive(Debug, Clone, Copy)]
pub struct UrlPattern<'a> {
    pub body: &'a str,
    pub pattern_type: PatternType,
    pub left_anchor: LeftAnchor,
    pub right_anchor: RightAnchor,
    pub case_sensitive: bool,
}

impl<'a> UrlPattern<'a> {
    /// Check whether the pattern matches the URL.
    pub fn matches(&self, url: &str) -> bool {
        let text = url.as_bytes();
        let body = self.body.as_bytes();

        match self.left_anchor {
            LeftAnchor::Boundary => self.match_at(body, text, 0),
            LeftAnchor::Subdomain => {
                let (host_start, host_end) = match get_host_position(url) {
                    Some(pos) => pos,
                    None => return false,
                };
                if self.match_at(body, text, host_start) {
                    return true;
                }
                (host_start..host_end)
                    .filter(|&i| text[i] == b'.')
                    .any(|i| self.match_at(body, text, i + 1))
            }
            LeftAnchor::None => {
                if self.pattern_type == PatternType::Substring
                    && self.right_anchor == RightAnchor::None
                {
                    return self.find(body, text);
                }
                (0..=text.len()).any(|start| self.match_at(body, text, start))
            }
        }
    }

    /// Unanchored substring search.
    fn find(&self, body: &[u8], text: &[u8]) -> bool {
        if body.is_empty() {
            return true;
        }
        if body.len() > text.len() {
            return false;
        }
        text.windows(body.len()).any(|window| self.bytes_equal(window, body))
    }

    /// Match the body against `text` starting exactly at `start`.
    ///
    /// Greedy wildcard matching with single-point backtracking: on a
    /// mismatch, the most recent `*` absorbs one more character.
    fn match_at(&self, body: &[u8], text: &[u8], start: usize) -> bool {
        let right_anchored = self.right_anchor == RightAnchor::Boundary;
        let mut p = 0;
        let mut t = start;
        let mut star: Option<(usize, usize)> = None;

        loop {
            if p < body.len() {
                let c = body[p];
                if c == WILDCARD {
                    star = Some((p, t));
                    p += 1;
                    continue;
                }
                if t < text.len() && self.char_matches(c, text[t]) {
                    p += 1;
                    t += 1;
                    continue;
                }
                if c == SEPARATOR && t == text.len() {
                    p += 1;
                    continue;
                }
            } else if !right_anchored || t == text.len() {
                return true;
            }

            match star {
                Some((star_p, star_t)) if star_t < text.len() => {
                    star = Some((star_p, star_t + 1));
                    p = star_p + 1;
                    t = star_t + 1;
                }
                _ => return false,
            }
        }
    }

    #[inline]
    fn char_matches(&self, pattern_char: u8, url_char: u8) -> bool {
        if pattern_char == SEPARATOR && self.pattern_type == PatternType::Wildcarded {
            return is_separator_char(url_char);
        }
        if self.case_sensitive {
            pattern_char == url_char
        } else {
            pattern_char.eq_ignore_ascii_case(&url_char)
        }
    }

    #[inline]
    fn bytes_equal(&self, a: &[u8], b: &[u8]) -> bool {
        if self.case_sensitive {
            a == b
        } else {
            a.eq_ignore_ascii_case(b)
        }
    }
}

/// N-gram hashes of a pattern body, in ascending order.
///
/// Only literal segments (split at `*` and `^`) contribute, since a key must
/// appear verbatim in every URL the pattern matches. An empty result means
/// the pattern belongs in the fallback list.
pub fn pattern_ngram_hashes(body: &str) -> BTreeSet<u32> {
    body.as_bytes()
        .split(|&b| b == WILDCARD || b == SEPARATOR)
        .filter(|segment| segment.len() >= NGRAM_SIZE)
        .flat_map(|segment| segment.windows(NGRAM_SIZE).map(hash_ngram))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(body: &str, left: LeftAnchor, right: RightAnchor) -> UrlPattern<'_> {
        let pattern_type = if body.contains(['*', '^']) {
            PatternType::Wildcarded
        } else {
            PatternType::Substring
        };
        UrlPattern {
            body,
            pattern_type,
            left_anchor: left,
            right_anchor: right,
            case_sensitive: false,
        }
    }

    #[test]
    fn unanchored_substring_matches_anywhere() {
        let p = pattern("ads.example.com", LeftAnchor::None, RightAnchor::None);
        assert!(p.matches("http://ads.example.com/banner.png"));
        assert!(p.matches("http://example.com/path/ads.example.com"));
        assert!(!p.matches("http://example.com/ads"));
    }

    #[test]
    fn subdomain_anchor_matches_host_labels() {
        let p = pattern("example.com", LeftAnchor::Subdomain, RightAnchor::None);
        assert!(p.matches("http://a.example.com/x"));
        assert!(p.matches("http://example.com/x"));
        assert!(!p.matches("http://notexample.com/x"));
        assert!(!p.matches("http://other.com/example.com"));
    }

    #[test]
    fn both_boundaries_match_exact_url() {
        let p = pattern("http://a", LeftAnchor::Boundary, RightAnchor::Boundary);
        assert!(p.matches("http://a"));
        assert!(!p.matches("http://ab"));
        assert!(!p.matches("xhttp://a"));
    }

    #[test]
    fn wildcard_and_separator() {
        let p = pattern("dir1/*ex", LeftAnchor::None, RightAnchor::None);
        assert!(p.matches("http://example.com/dir1/index"));
        assert!(!p.matches("http://example.com/dir1/page"));

        let p = pattern("dir1/page2?q=hello^x=", LeftAnchor::None, RightAnchor::None);
        assert!(p.matches("http://google.com/dir1/page2?q=hello&x=1"));
        assert!(!p.matches("http://google.com/dir1/page2?q=hello_x=1"));
        assert!(!p.matches("http://google.com/dir1/page2?q=hello%x=1"));
    }

    #[test]
    fn separator_matches_end_of_url() {
        let p = pattern("example.com^", LeftAnchor::Subdomain, RightAnchor::None);
        assert!(p.matches("http://example.com"));
        assert!(p.matches("http://example.com/path"));
        assert!(!p.matches("http://example.company/"));
    }

    #[test]
    fn left_boundary_with_wildcards() {
        let p = pattern("http://*.us", LeftAnchor::Boundary, RightAnchor::None);
        assert!(p.matches("http://example.us/dir1/page"));
        assert!(!p.matches("http://example.jp/dir1/page"));

        let p = pattern("http://msn*/dir1/page", LeftAnchor::Boundary, RightAnchor::Boundary);
        assert!(p.matches("http://msn.com/dir1/page"));
        assert!(!p.matches("http://msn.com/dir1/page?q=hello"));
        assert!(!p.matches("http://a.msn.com/dir1/page"));
    }

    #[test]
    fn right_anchor_requires_end() {
        let p = pattern("dir1/page2", LeftAnchor::None, RightAnchor::Boundary);
        assert!(p.matches("http://example.jp/dir1/page2"));
        assert!(!p.matches("http://example.jp/dir1/page2?q=hello"));
    }

    #[test]
    fn case_sensitivity() {
        let mut p = pattern("q=hello", LeftAnchor::None, RightAnchor::None);
        assert!(p.matches("http://example.com/?q=HELLO"));
        p.case_sensitive = true;
        assert!(!p.matches("http://example.com/?q=HELLO"));
        assert!(p.matches("http://example.com/?q=hello"));
    }

    #[test]
    fn empty_body_matches_everything_unanchored() {
        let p = pattern("", LeftAnchor::None, RightAnchor::None);
        assert!(p.matches("http://anything/"));
    }

    #[test]
    fn literal_segments_produce_ngrams() {
        assert!(pattern_ngram_hashes("abcd").is_empty());
        assert!(pattern_ngram_hashes("ab*cd^ef").is_empty());
        assert_eq!(pattern_ngram_hashes("abcdef").len(), 2);
        assert_eq!(
            pattern_ngram_hashes("ABCDE*abcde").len(),
            1,
            "keys are case-folded and de-duplicated"
        );
    }
}
