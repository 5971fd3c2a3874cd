//! Public key fingerprints for out-of-band identity verification.
//!
//! A fingerprint is the first 16 bytes of a domain-separated SHA-256 digest
//! of the raw public key, shown as eight space-separated groups of four hex
//! digits. Two users read these aloud (or compare them side by side) before
//! pinning each other's identity.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Domain separation tag mixed into every fingerprint digest.
const FINGERPRINT_DOMAIN: &[u8] = b"cipherline-fingerprint-v1";

/// Number of digest bytes rendered into the fingerprint.
const FINGERPRINT_BYTES: usize = 16;

/// Hex digits per display group.
const GROUP_LEN: usize = 4;

/// Compute the fingerprint of raw public key bytes.
pub fn fingerprint(public_key_bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(FINGERPRINT_DOMAIN);
    hasher.update(public_key_bytes);
    let digest = hasher.finalize();

    let hex = hex::encode(&digest[..FINGERPRINT_BYTES]);
    hex.as_bytes()
        .chunks(GROUP_LEN)
        .map(|group| String::from_utf8_lossy(group).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Compare two strings without leaking the position of the first difference.
pub fn constant_time_str_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

/// Verify that a public key matches an expected fingerprint.
pub fn verify_fingerprint(public_key_bytes: &[u8], expected: &str) -> bool {
    constant_time_str_eq(&fingerprint(public_key_bytes), expected)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::keypair::KeyPair;

    #[test]
    fn fingerprint_is_eight_hex_groups() {
        let kp = KeyPair::generate().unwrap();
        let fp = kp.fingerprint();

        let groups: Vec<&str> = fp.split(' ').collect();
        assert_eq!(groups.len(), 8);
        for group in groups {
            assert_eq!(group.len(), 4);
            assert!(group.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn fingerprint_is_stable_for_identical_keys() {
        let key = [7u8; 32];
        let same = [7u8; 32];
        assert_eq!(fingerprint(&key), fingerprint(&same));
    }

    #[test]
    fn single_byte_change_changes_fingerprint() {
        let kp = KeyPair::generate().unwrap();
        let original = kp.public_bytes();

        for index in [0, 15, 31] {
            let mut flipped = original;
            flipped[index] ^= 0x01;
            assert_ne!(fingerprint(&original), fingerprint(&flipped));
        }
    }

    #[test]
    fn distinct_keys_have_distinct_fingerprints() {
        let a = KeyPair::generate().unwrap();
        let b = KeyPair::generate().unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_does_not_embed_key_material() {
        let kp = KeyPair::generate().unwrap();
        let fp = kp.fingerprint().replace(' ', "");
        assert!(!hex::encode(kp.public_bytes()).contains(&fp));
    }

    #[test]
    fn verify_fingerprint_accepts_only_matching_key() {
        let kp = KeyPair::generate().unwrap();
        let expected = kp.fingerprint();
        assert!(verify_fingerprint(&kp.public_bytes(), &expected));

        let other = KeyPair::generate().unwrap();
        assert!(!verify_fingerprint(&other.public_bytes(), &expected));
    }

    #[test]
    fn constant_time_eq_handles_length_mismatch() {
        assert!(constant_time_str_eq("abcd", "abcd"));
        assert!(!constant_time_str_eq("abcd", "abc"));
        assert!(!constant_time_str_eq("abcd", "abce"));
        assert!(constant_time_str_eq("", ""));
    }
}
