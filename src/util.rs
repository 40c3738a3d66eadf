//! Shared utility functions

use sha2::{Digest, Sha256};

/// Truncate a string to at most `max_chars` characters.
///
/// Character-based (not byte-based) so multi-byte text never ends up split
/// mid-codepoint. Returns the input unchanged when it is already short
/// enough.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s,
    }
}

/// Short SHA-256 hex digest (first 16 hex chars) of the input.
///
/// Used to derive stable identifiers for syndication entries that lack one.
pub fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut out = String::with_capacity(16);
    for byte in &digest[..8] {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
