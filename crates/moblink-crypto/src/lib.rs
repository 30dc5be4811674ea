//! # Moblink Crypto
//!
//! Handshake primitives for the Moblink relay protocol.
//!
//! The controller authenticates a relay with a salted challenge/response:
//!
//! | Step | Computation |
//! |------|-------------|
//! | 1 | `b1 = base64(SHA-256(password ++ salt))` |
//! | 2 | `token = base64(SHA-256(b1 ++ challenge))` |
//!
//! Base64 uses the standard alphabet with padding and no line wrapping.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod hash;

pub use hash::{auth_token, base64_encode, sha256};

/// SHA-256 output size
pub const SHA256_OUTPUT_SIZE: usize = 32;
