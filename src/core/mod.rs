//! Core constants and error types, shared by every layer.

pub mod constants;
pub mod error;

pub use constants::*;
pub use error::{CryptoError, DiscoveryError, LanesError, LanesResult, WireError};
