//! Content-hash cache keys.

use super::CacheClass;
use sha2::{Digest, Sha256};

/// SHA-256 over the class and the key parts, hex encoded.
///
/// Parts are NUL separated so `["ab", "c"]` and `["a", "bc"]` differ.
pub fn content_key(class: CacheClass, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(class.as_str().as_bytes());
    for part in parts {
        hasher.update([0u8]);
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_stable_hex() {
        let a = content_key(CacheClass::PackageSearch, &["firefox", "install"]);
        let b = content_key(CacheClass::PackageSearch, &["firefox", "install"]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_key_separates_parts_and_classes() {
        assert_ne!(
            content_key(CacheClass::PackageSearch, &["ab", "c"]),
            content_key(CacheClass::PackageSearch, &["a", "bc"])
        );
        assert_ne!(
            content_key(CacheClass::PackageSearch, &["x"]),
            content_key(CacheClass::Generations, &["x"])
        );
    }
}
