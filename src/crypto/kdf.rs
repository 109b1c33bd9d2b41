//! Password-based key derivation.

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

use crate::core::{CIPHER_KEY_SIZE, KDF_ITERATIONS, KDF_SALT};

/// Stretch a shared password into an AES-256 key.
///
/// PBKDF2-HMAC-SHA256 with the fixed application salt; both endpoints
/// must run the identical derivation to arrive at the same key.
pub fn derive_key(password: &str) -> [u8; CIPHER_KEY_SIZE] {
    let mut key = [0u8; CIPHER_KEY_SIZE];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &KDF_SALT, KDF_ITERATIONS, &mut key);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivation_is_deterministic() {
        assert_eq!(derive_key("swordfish"), derive_key("swordfish"));
    }

    #[test]
    fn test_different_passwords_differ() {
        assert_ne!(derive_key("swordfish"), derive_key("Swordfish"));
        assert_ne!(derive_key(""), derive_key(" "));
    }

    #[test]
    fn test_key_size() {
        assert_eq!(derive_key("p").len(), CIPHER_KEY_SIZE);
    }
}
