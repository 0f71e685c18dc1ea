//! # Cryptographic Primitives
//!
//! This module is the foundation of everything security-related in the crate.
//! Every signing operation, every hash, every block/trie/transaction id flows
//! through here.
//!
//! We deliberately chose boring, well-audited cryptography:
//!
//! - **Ed25519** for signatures — fast, deterministic, and nobody has broken it.
//! - **BLAKE3** for hashing — because we live in the future.
//! - **SHA-256** for compatibility — because the rest of the world doesn't.
//!
//! ## A note on "rolling your own crypto"
//!
//! We don't. Everything here is a thin, type-safe wrapper around audited
//! implementations. If you're tempted to optimize these functions, please
//! reconsider. Then reconsider again. Then go read about timing attacks
//! and come back when you've lost the urge.

pub mod hash;
pub mod keys;
pub mod signatures;

// Re-export the things people actually need so they don't have to memorize
// our module hierarchy.
pub use hash::{blake3_hash, double_sha256, sha256};
pub use keys::{NovaKeypair, NovaPublicKey, NovaSignature};
pub use signatures::{sign, verify};
