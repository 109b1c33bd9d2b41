//! Per-frame AES-256-CBC encryption.

use aes::Aes256;
use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use rand::rngs::OsRng;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::core::{
    CIPHER_BLOCK_SIZE, CryptoError, FRAME_IV_SIZE, OUTER_HEADER_SIZE, SECURE_HEADER_SIZE,
};
use crate::crypto::kdf::derive_key;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Largest payload a single frame can carry for a given link MTU.
///
/// The datagram budget after the clear outer header and the per-frame IV
/// is rounded down to whole cipher blocks; PKCS7 always pads by at least
/// one byte, and the secure header rides inside the plaintext.
pub fn max_payload(mtu: usize) -> usize {
    let budget = mtu - OUTER_HEADER_SIZE - FRAME_IV_SIZE;
    (budget / CIPHER_BLOCK_SIZE) * CIPHER_BLOCK_SIZE - 1 - SECURE_HEADER_SIZE
}

/// Stateless frame cipher derived from a shared password.
///
/// Every [`seal`](Self::seal) draws a fresh random IV and emits
/// `IV || ciphertext`; [`open`](Self::open) expects the same layout.
/// No state is carried between frames, so concurrent channels of one
/// peer need no encryption ordering.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct FrameCipher {
    key: [u8; 32],
}

impl FrameCipher {
    /// Derive a cipher from a shared password.
    pub fn from_password(password: &str) -> Self {
        Self {
            key: derive_key(password),
        }
    }

    /// Encrypt `plaintext` into a self-contained frame body.
    ///
    /// Returns `IV || AES-256-CBC-PKCS7(plaintext)`. `max_plaintext`
    /// bounds the input so the finished datagram fits the MTU.
    pub fn seal(&self, plaintext: &[u8], max_plaintext: usize) -> Result<Vec<u8>, CryptoError> {
        if plaintext.len() > max_plaintext {
            return Err(CryptoError::PlaintextTooLarge {
                len: plaintext.len(),
                max: max_plaintext,
            });
        }

        let mut iv = [0u8; FRAME_IV_SIZE];
        OsRng.fill_bytes(&mut iv);

        let ciphertext = Aes256CbcEnc::new(&self.key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let mut body = Vec::with_capacity(FRAME_IV_SIZE + ciphertext.len());
        body.extend_from_slice(&iv);
        body.extend_from_slice(&ciphertext);
        Ok(body)
    }

    /// Decrypt a frame body produced by [`seal`](Self::seal).
    pub fn open(&self, body: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if body.len() < FRAME_IV_SIZE + CIPHER_BLOCK_SIZE
            || (body.len() - FRAME_IV_SIZE) % CIPHER_BLOCK_SIZE != 0
        {
            return Err(CryptoError::DecryptFailed);
        }

        let (iv, ciphertext) = body.split_at(FRAME_IV_SIZE);
        let mut iv_arr = [0u8; FRAME_IV_SIZE];
        iv_arr.copy_from_slice(iv);

        Aes256CbcDec::new(&self.key.into(), &iv_arr.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptoError::DecryptFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MTU;

    #[test]
    fn test_max_payload_reference_mtu() {
        // (1400 - 20 - 16) rounded down to blocks = 1360; minus the PKCS7
        // minimum and the secure header.
        assert_eq!(max_payload(MTU), 1347);
    }

    #[test]
    fn test_seal_open_roundtrip_all_sizes() {
        let cipher = FrameCipher::from_password("p");
        let max = max_payload(MTU) + SECURE_HEADER_SIZE;

        for len in [0, 1, 15, 16, 17, 255, 1024, max] {
            let plaintext: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let body = cipher.seal(&plaintext, max).unwrap();

            assert_eq!((body.len() - FRAME_IV_SIZE) % CIPHER_BLOCK_SIZE, 0);
            assert!(OUTER_HEADER_SIZE + body.len() <= MTU, "len {len} overflows MTU");

            assert_eq!(cipher.open(&body).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_seal_rejects_oversized_plaintext() {
        let cipher = FrameCipher::from_password("p");
        assert!(matches!(
            cipher.seal(&[0u8; 33], 32),
            Err(CryptoError::PlaintextTooLarge { len: 33, max: 32 })
        ));
    }

    #[test]
    fn test_ivs_are_unique_per_frame() {
        let cipher = FrameCipher::from_password("p");
        let a = cipher.seal(b"same bytes", 64).unwrap();
        let b = cipher.seal(b"same bytes", 64).unwrap();
        assert_ne!(a[..FRAME_IV_SIZE], b[..FRAME_IV_SIZE]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_password_fails() {
        let sealer = FrameCipher::from_password("right");
        let opener = FrameCipher::from_password("wrong");
        let body = sealer.seal(b"secret", 64).unwrap();
        assert_eq!(opener.open(&body), Err(CryptoError::DecryptFailed));
    }

    #[test]
    fn test_tampered_body_fails() {
        let cipher = FrameCipher::from_password("p");
        let mut body = cipher.seal(b"payload payload payload", 64).unwrap();
        let last = body.len() - 1;
        body[last] ^= 0xFF;
        // Flipping the final ciphertext byte scrambles the padding.
        assert_eq!(cipher.open(&body), Err(CryptoError::DecryptFailed));
    }

    #[test]
    fn test_short_or_ragged_body_fails() {
        let cipher = FrameCipher::from_password("p");
        assert_eq!(cipher.open(&[]), Err(CryptoError::DecryptFailed));
        assert_eq!(
            cipher.open(&[0u8; FRAME_IV_SIZE]),
            Err(CryptoError::DecryptFailed)
        );
        assert_eq!(
            cipher.open(&[0u8; FRAME_IV_SIZE + CIPHER_BLOCK_SIZE + 1]),
            Err(CryptoError::DecryptFailed)
        );
    }
}
