//! # Storage Module
//!
//! Persistent storage for the NOVA blockchain. This module provides the
//! data structures and persistence layer that make NOVA a real chain,
//! not just a fancy calculator.
//!
//! ## Architecture
//!
//! ```text
//! block.rs    — Block structure, genesis block, hash/verify operations
//! merkle.rs   — Binary Merkle tree for transaction roots, inclusion proofs
//! trie.rs     — Authenticated, snapshot-friendly account/contract state
//! db.rs       — sled-backed block store, keyed by hash and height
//! state_db.rs — sled-backed account/contract-storage store
//! ```
//!
//! ## Data Flow
//!
//! ```text
//! Transaction → Block → NovaDB (blocks)
//!                 ↓
//!             StateTrie ←→ StateDb (accounts, contract storage)
//! ```
//!
//! Every block's transactions get applied against the `StateTrie`, whose
//! root is recorded in the block header. The `StateDb` is the durable
//! backing store the trie's contents are checkpointed to; the trie itself
//! stays in memory for fast snapshotting during speculative execution and
//! reorgs.
//!
//! ## Design Decisions
//!
//! 1. **BLAKE3 for everything.** Block hashes, Merkle roots, state roots —
//!    all BLAKE3. It's faster than SHA-256 on every architecture that matters,
//!    and security margins are comparable.
//!
//! 2. **sled, not a hand-rolled file format.** Single-process, embedded,
//!    crash-safe. We don't need RocksDB's compaction tuning for a node that
//!    owns its own data directory.
//!
//! 3. **Bincode for on-disk serialization.** Compact, fast, deterministic.
//!    JSON is for APIs and debugging; bincode is for storage.

pub mod block;
pub mod db;
pub mod merkle;
pub mod state_db;
pub mod trie;

pub use block::{Block, BlockHeader};
pub use db::NovaDB;
pub use state_db::StateDb;
pub use trie::StateTrie;
