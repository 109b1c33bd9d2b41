//! Security layer: password-based key derivation and per-frame encryption.
//!
//! Two endpoints that share a password derive the same AES-256 key and can
//! then exchange frames whose encrypted region is sealed independently per
//! frame: a fresh random IV travels in the clear ahead of each ciphertext,
//! so frames can be encrypted, lost, retransmitted and decrypted in any
//! order without shared cipher state.

pub mod cipher;
pub mod kdf;

pub use cipher::{FrameCipher, max_payload};
pub use kdf::derive_key;
