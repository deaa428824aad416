//! Cryptographic primitive layer.
//!
//! Only this module and the owning session coordinator ever see
//! [`SessionKey`] material.

pub mod mask;

pub use mask::{mask, mask_identifier, unmask, CryptoError, KeyId, MaskedValue, SessionKey};
