//! Hash functions for the ruleset format
//!
//! Murmur3 32-bit keys the n-gram index; CRC32 is the integrity value
//! stored out-of-band for each persisted ruleset.
//!
//! # Sentinel Handling
//!
//! Empty slot sentinel in the n-gram tables is `0`.
//! We ensure this never occurs by mapping a zero hash to `1`.

/// Number of bytes in one substring index key.
pub const NGRAM_SIZE: usize = 5;

const NGRAM_SEED: u32 = 0x811c9dc5;

/// Murmur3 32-bit hash implementation.
/// Optimized for short inputs (n-grams are five bytes).
#[inline]
pub fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    let len = data.len();
    let mut h = seed;
    let mut i = 0;

    // Process 4-byte chunks
    let chunks = (len >> 2) << 2;
    while i < chunks {
        let k = u32::from_le_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);

        let k = k.wrapping_mul(0xcc9e2d51);
        let k = k.rotate_left(15);
        let k = k.wrapping_mul(0x1b873593);

        h ^= k;
        h = h.rotate_left(13);
        h = h.wrapping_mul(5).wrapping_add(0xe6546b64);

        i += 4;
    }

    // Process remaining bytes
    let mut k: u32 = 0;
    let remainder = len & 3;
    if remainder >= 3 {
        k ^= (data[i + 2] as u32) << 16;
    }
    if remainder >= 2 {
        k ^= (data[i + 1] as u32) << 8;
    }
    if remainder >= 1 {
        k ^= data[i] as u32;
        let k = k.wrapping_mul(0xcc9e2d51);
        let k = k.rotate_left(15);
        let k = k.wrapping_mul(0x1b873593);
        h ^= k;
    }

    // Finalization
    h ^= len as u32;
    h ^= h >> 16;
    h = h.wrapping_mul(0x85ebca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2ae35);
    h ^= h >> 16;

    h
}

/// Hash one n-gram for the substring index.
/// ASCII-lowercases the window first so keys are case-insensitive.
/// Ensures result is never 0 (sentinel value).
#[inline]
pub fn hash_ngram(window: &[u8]) -> u32 {
    let mut buf = [0u8; NGRAM_SIZE];
    let len = window.len().min(NGRAM_SIZE);
    for (dst, &b) in buf.iter_mut().zip(&window[..len]) {
        *dst = b.to_ascii_lowercase();
    }

    let h = murmur3_32(&buf[..len], NGRAM_SEED);
    if h == 0 {
        1
    } else {
        h
    }
}

/// Compute CRC32 for ruleset integrity checking.
/// Uses the standard CRC32 polynomial (IEEE 802.3).
pub fn crc32(data: &[u8]) -> u32 {
    static CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut c = i as u32;
            let mut j = 0;
            while j < 8 {
                c = if c & 1 != 0 {
                    0xedb88320 ^ (c >> 1)
                } else {
                    c >> 1
                };
                j += 1;
            }
            table[i] = c;
            i += 1;
        }
        table
    };

    let mut crc = 0xffffffff_u32;
    for &byte in data {
        crc = CRC32_TABLE[((crc ^ byte as u32) & 0xff) as usize] ^ (crc >> 8);
    }
    crc ^ 0xffffffff
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_murmur3_consistent() {
        let h1 = murmur3_32(b"example.com", 0);
        let h2 = murmur3_32(b"example.com", 0);
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_murmur3_different_strings() {
        let h1 = murmur3_32(b"example.com", 0);
        let h2 = murmur3_32(b"example.org", 0);
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_murmur3_different_seeds() {
        let h1 = murmur3_32(b"example.com", 0);
        let h2 = murmur3_32(b"example.com", 1);
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_hash_ngram_case_insensitive() {
        assert_eq!(hash_ngram(b"ExAmP"), hash_ngram(b"examp"));
        assert_ne!(hash_ngram(b"examp"), hash_ngram(b"xampl"));
    }

    #[test]
    fn test_hash_ngram_never_zero() {
        for window in [b"" as &[u8], b"a", b"abcde", b"?q=1&"] {
            assert_ne!(hash_ngram(window), 0);
        }
    }

    #[test]
    fn test_crc32_known_value() {
        // Standard check value for CRC-32/ISO-HDLC
        assert_eq!(crc32(b"123456789"), 0xcbf43926);
    }

    #[test]
    fn test_crc32_detects_changes() {
        let data1 = [1u8, 2, 3];
        let data2 = [1u8, 2, 4];
        assert_ne!(crc32(&data1), crc32(&data2));
    }
}
