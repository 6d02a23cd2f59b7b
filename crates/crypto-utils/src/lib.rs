//! # crypto-utils
//!
//! Hashing and Base58Check helpers shared by the address codec, the
//! transaction codec and public key derivation.

pub mod base58;
pub mod error;
pub mod hash;

pub use error::CryptoError;
