//! Moderation key check
//!
//! The HTTP moderation panel authenticates with a hex-encoded ed25519
//! signing key. We derive the public key and ask the peer index whether it
//! belongs to a moderator. The private key never touches the index.

use ed25519_dalek::{Signature, SigningKey, Verifier, VerifyingKey};

use crate::error::{NntpError, Result};
use crate::index::PeerIndex;

/// Derive the hex public key from a hex ed25519 signing key
pub fn derive_pubkey(privkey_hex: &str) -> Result<String> {
    let bytes = hex::decode(privkey_hex)
        .map_err(|err| NntpError::InvalidKey(format!("bad hex: {err}")))?;
    let seed: [u8; 32] = bytes
        .try_into()
        .map_err(|_| NntpError::InvalidKey("signing key must be 32 bytes".to_string()))?;
    let signing = SigningKey::from_bytes(&seed);
    Ok(hex::encode(signing.verifying_key().to_bytes()))
}

/// Is this signing key a moderator key?
pub fn check_mod_key(index: &dyn PeerIndex, privkey_hex: &str) -> Result<bool> {
    let pubkey = derive_pubkey(privkey_hex)?;
    index.check_mod_pubkey(&pubkey)
}

/// Verify an ed25519 signature against a hex public key
pub fn verify(message: &[u8], signature: &[u8], pubkey_hex: &str) -> Result<bool> {
    let key_bytes = hex::decode(pubkey_hex)
        .map_err(|err| NntpError::InvalidKey(format!("bad hex: {err}")))?;
    let key_bytes: [u8; 32] = key_bytes
        .try_into()
        .map_err(|_| NntpError::InvalidKey("public key must be 32 bytes".to_string()))?;
    let verifying = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|err| NntpError::InvalidKey(err.to_string()))?;
    let signature: [u8; 64] = signature
        .try_into()
        .map_err(|_| NntpError::InvalidKey("signature must be 64 bytes".to_string()))?;
    Ok(verifying
        .verify(message, &Signature::from_bytes(&signature))
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MemoryIndex;
    use ed25519_dalek::Signer;

    const SEED: [u8; 32] = [7u8; 32];

    #[test]
    fn test_derive_pubkey_round_trip() {
        let signing = SigningKey::from_bytes(&SEED);
        let expected = hex::encode(signing.verifying_key().to_bytes());
        assert_eq!(derive_pubkey(&hex::encode(SEED)).unwrap(), expected);
    }

    #[test]
    fn test_derive_pubkey_rejects_bad_input() {
        assert!(matches!(
            derive_pubkey("not hex"),
            Err(NntpError::InvalidKey(_))
        ));
        assert!(matches!(
            derive_pubkey("aabb"),
            Err(NntpError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_check_mod_key() {
        let index = MemoryIndex::new();
        let privkey = hex::encode(SEED);
        assert!(!check_mod_key(&index, &privkey).unwrap());

        index.add_mod_pubkey(&derive_pubkey(&privkey).unwrap());
        assert!(check_mod_key(&index, &privkey).unwrap());
    }

    #[test]
    fn test_verify() {
        let signing = SigningKey::from_bytes(&SEED);
        let pubkey = hex::encode(signing.verifying_key().to_bytes());
        let signature = signing.sign(b"moderate this").to_bytes();

        assert!(verify(b"moderate this", &signature, &pubkey).unwrap());
        assert!(!verify(b"something else", &signature, &pubkey).unwrap());
        assert!(verify(b"moderate this", &signature[..10], &pubkey).is_err());
    }
}
