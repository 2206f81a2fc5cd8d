//! Stable external ids for exports that carry no key column.
//!
//! The id is derived from the provider and the normalized item name, so the
//! same item maps to the same entity on every import.

use sha2::{Digest, Sha256};

/// Number of hex characters kept from the name hash.
pub const HASH_ID_LEN: usize = 16;

/// Prefix that marks a derived id, keeping it apart from provider keys.
const HASH_ID_PREFIX: &str = "h:";

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// Stable id for a record known only by its name.
pub fn hashed_id(provider: &str, normalized_name: &str) -> String {
    let digest = sha256_hex(format!("{provider}:{normalized_name}").as_bytes());
    format!("{HASH_ID_PREFIX}{}", &digest[..HASH_ID_LEN])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_produces_known_hash() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn hashed_id_is_stable_and_prefixed() {
        let id = hashed_id("marketman", "roma tomatoes");
        assert_eq!(id, hashed_id("marketman", "roma tomatoes"));
        assert!(id.starts_with(HASH_ID_PREFIX));
        assert_eq!(id.len(), HASH_ID_PREFIX.len() + HASH_ID_LEN);
    }

    #[test]
    fn hashed_id_depends_on_provider() {
        assert_ne!(
            hashed_id("marketman", "roma tomatoes"),
            hashed_id("restaurant365", "roma tomatoes")
        );
    }
}
