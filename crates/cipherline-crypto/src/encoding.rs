//! Portable byte encodings.
//!
//! Every key, nonce and ciphertext that crosses the transport boundary or the
//! session cache travels as standard base64.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use x25519_dalek::PublicKey;

use crate::error::CryptoError;
use crate::keypair::KEY_SIZE;

pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode(input: &str) -> Result<Vec<u8>, CryptoError> {
    Ok(STANDARD.decode(input.trim())?)
}

/// Encode a public key as base64 of its 32 raw bytes.
pub fn encode_public_key(key: &PublicKey) -> String {
    encode(key.as_bytes())
}

/// Parse a public key from raw bytes.
pub fn public_key_from_bytes(bytes: &[u8]) -> Result<PublicKey, CryptoError> {
    let arr: [u8; KEY_SIZE] = bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: bytes.len(),
        })?;
    Ok(PublicKey::from(arr))
}

/// Parse a base64-encoded public key.
pub fn decode_public_key(input: &str) -> Result<PublicKey, CryptoError> {
    public_key_from_bytes(&decode(input)?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::keypair::KeyPair;

    #[test]
    fn public_key_survives_base64() {
        let kp = KeyPair::generate().unwrap();
        let decoded = decode_public_key(&kp.public_key_base64()).unwrap();
        assert_eq!(decoded.as_bytes(), &kp.public_bytes());
    }

    #[test]
    fn decode_public_key_rejects_short_input() {
        let short = encode(&[1u8; 16]);
        assert!(matches!(
            decode_public_key(&short),
            Err(CryptoError::InvalidKeyLength {
                expected: 32,
                actual: 16
            })
        ));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            decode("not*base64!"),
            Err(CryptoError::InvalidEncoding(_))
        ));
    }

    #[test]
    fn decode_tolerates_surrounding_whitespace() {
        assert_eq!(decode("  aGk=\n").unwrap(), b"hi");
    }
}
