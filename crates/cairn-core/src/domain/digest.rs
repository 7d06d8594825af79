//! Content fingerprints used for de-duplication.

use sha2::{Digest, Sha256};

/// Hex chars kept from the SHA-256.
pub const DIGEST_LEN: usize = 16;

/// Short fingerprint of `content`: the first 16 hex chars of its SHA-256.
pub fn content_digest(content: &str) -> String {
    let hash = Sha256::digest(content.as_bytes());
    let mut hex = String::with_capacity(DIGEST_LEN);
    for byte in hash.iter().take(DIGEST_LEN / 2) {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_short_and_stable() {
        let a = content_digest("the same summary");
        let b = content_digest("the same summary");
        assert_eq!(a, b);
        assert_eq!(a.len(), DIGEST_LEN);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn different_content_differs() {
        assert_ne!(content_digest("a"), content_digest("b"));
    }

    #[test]
    fn known_vector() {
        // sha256("abc") = ba7816bf8f01cfea...
        assert_eq!(content_digest("abc"), "ba7816bf8f01cfea");
    }
}
