//! # NovaDB — Persistent Block Store
//!
//! The block persistence layer, built on sled's embedded key-value store.
//! All block data flows through this module.
//!
//! ## Key Layout
//!
//! Everything lives in a single sled tree, addressed by prefix, so a single
//! atomic `Batch` covers every write a `store()` call needs to make:
//!
//! | Key                     | Value                  |
//! |--------------------------|------------------------|
//! | `block:<hash>` (32B)     | `bincode(Block)`       |
//! | `height:<height>` (8B BE)| block hash (32B)       |
//! | `latest`                 | block hash (32B)       |
//! | `genesis`                | block hash (32B)       |
//! | `count`                  | block count (8B BE)    |
//! | `height`                 | current height (8B BE) |
//!
//! Heights are stored as big-endian `u64` so sled's lexicographic ordering
//! matches numeric ordering, which makes `range`/`hashes_range` natural.
//!
//! ## Atomicity
//!
//! `store()` writes the block, the height index, and every singleton
//! (`latest`, `genesis`, `count`, `height`) in one `Batch`. Either everything
//! lands on disk or nothing does. `delete_from_height()` is the mirror image:
//! it removes every block at or above a height and rewinds the singletons to
//! the new tip in the same batch, which is what a reorg needs.

use sled::{Batch, Db};
use std::path::Path;

use super::block::Block;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during block store operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("key not found: {0}")]
    NotFound(String),
}

pub type DbResult<T> = Result<T, DbError>;

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

const PREFIX_BLOCK: &[u8] = b"block:";
const PREFIX_HEIGHT: &[u8] = b"height:";
const KEY_LATEST: &[u8] = b"latest";
const KEY_GENESIS: &[u8] = b"genesis";
const KEY_COUNT: &[u8] = b"count";
const KEY_HEIGHT: &[u8] = b"height";

fn block_key(hash: &[u8; 32]) -> Vec<u8> {
    let mut key = Vec::with_capacity(PREFIX_BLOCK.len() + 32);
    key.extend_from_slice(PREFIX_BLOCK);
    key.extend_from_slice(hash);
    key
}

fn height_key(height: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(PREFIX_HEIGHT.len() + 8);
    key.extend_from_slice(PREFIX_HEIGHT);
    key.extend_from_slice(&height.to_be_bytes());
    key
}

fn decode_hash(bytes: &[u8]) -> DbResult<[u8; 32]> {
    bytes
        .try_into()
        .map_err(|_| DbError::Serialization("expected a 32-byte hash".to_string()))
}

fn decode_u64(bytes: &[u8]) -> DbResult<u64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| DbError::Serialization("expected an 8-byte counter".to_string()))?;
    Ok(u64::from_be_bytes(arr))
}

// ---------------------------------------------------------------------------
// NovaDB
// ---------------------------------------------------------------------------

/// Persistent block store.
///
/// Wraps a sled `Db` instance in a single-tree, prefix-addressed key space.
/// sled is inherently thread-safe, so `NovaDB` can be shared via `Arc<NovaDB>`
/// across worker threads without external synchronization.
#[derive(Debug, Clone)]
pub struct NovaDB {
    db: Db,
}

impl NovaDB {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Create a temporary database that lives in memory and is cleaned up
    /// automatically when the `NovaDB` is dropped. Ideal for unit tests.
    pub fn open_temporary() -> DbResult<Self> {
        let config = sled::Config::new().temporary(true);
        let db = config.open()?;
        Ok(Self { db })
    }

    /// Open a named auxiliary sled tree from the same underlying database.
    ///
    /// Used by other storage components (the state store, the state trie)
    /// that need their own keyspace but should share a single on-disk
    /// database with the block store.
    pub fn open_tree(&self, name: &str) -> DbResult<sled::Tree> {
        Ok(self.db.open_tree(name)?)
    }

    // -- Writes --------------------------------------------------------------

    /// Persist a block, updating every index atomically.
    ///
    /// Writes `block:<hash>`, `height:<height>` -> hash, `latest` -> hash,
    /// increments `count`, and sets `genesis` -> hash if this is height 0.
    /// All of it lands in a single `Batch` so a crash mid-write can never
    /// leave the height index and the block body out of sync.
    pub fn store(&self, block: &Block) -> DbResult<()> {
        let height = block.header.height;
        let hash = block.header.hash;
        let block_bytes =
            bincode::serialize(block).map_err(|e| DbError::Serialization(e.to_string()))?;

        let mut batch = Batch::default();
        batch.insert(block_key(&hash), block_bytes);
        batch.insert(height_key(height), hash.to_vec());
        batch.insert(KEY_LATEST, hash.to_vec());
        batch.insert(KEY_HEIGHT, height.to_be_bytes().to_vec());

        let new_count = self.count()?.saturating_add(1);
        batch.insert(KEY_COUNT, new_count.to_be_bytes().to_vec());

        if height == 0 {
            batch.insert(KEY_GENESIS, hash.to_vec());
        }

        self.db.apply_batch(batch)?;
        self.db.flush()?;

        tracing::debug!(height, hash = %hex::encode(hash), "stored block");
        Ok(())
    }

    /// Rewinds the chain to drop every block at or above `from_height`,
    /// restoring `latest`/`height`/`count` to the new tip. Used to apply a
    /// reorg before replaying the winning fork.
    ///
    /// Returns the number of blocks removed. A no-op (returns `0`) if
    /// `from_height` is already past the current tip.
    pub fn delete_from_height(&self, from_height: u64) -> DbResult<u64> {
        let Some(current_height) = self.current_height()? else {
            return Ok(0);
        };
        if from_height > current_height {
            return Ok(0);
        }

        let mut batch = Batch::default();
        let mut removed = 0u64;
        for height in from_height..=current_height {
            if let Some(hash_bytes) = self.db.get(height_key(height))? {
                let hash = decode_hash(&hash_bytes)?;
                batch.remove(block_key(&hash));
                removed += 1;
            }
            batch.remove(height_key(height));
        }

        let new_count = self.count()?.saturating_sub(removed);
        batch.insert(KEY_COUNT, new_count.to_be_bytes().to_vec());

        if from_height == 0 {
            batch.remove(KEY_LATEST);
            batch.remove(KEY_GENESIS);
            batch.remove(KEY_HEIGHT);
        } else {
            let new_tip_height = from_height - 1;
            if let Some(hash_bytes) = self.db.get(height_key(new_tip_height))? {
                batch.insert(KEY_LATEST, hash_bytes.to_vec());
            }
            batch.insert(KEY_HEIGHT, new_tip_height.to_be_bytes().to_vec());
        }

        self.db.apply_batch(batch)?;
        self.db.flush()?;

        tracing::info!(from_height, removed, "pruned blocks from height");
        Ok(removed)
    }

    // -- Reads -----------------------------------------------------------------

    /// Retrieve a block by its hash.
    pub fn get_by_hash(&self, hash: &[u8; 32]) -> DbResult<Option<Block>> {
        match self.db.get(block_key(hash))? {
            Some(bytes) => {
                let block: Block = bincode::deserialize(&bytes)
                    .map_err(|e| DbError::Serialization(e.to_string()))?;
                Ok(Some(block))
            }
            None => Ok(None),
        }
    }

    /// Retrieve a block by height (two-step lookup: height -> hash -> block).
    pub fn get_by_height(&self, height: u64) -> DbResult<Option<Block>> {
        match self.db.get(height_key(height))? {
            Some(hash_bytes) => {
                let hash = decode_hash(&hash_bytes)?;
                self.get_by_hash(&hash)
            }
            None => Ok(None),
        }
    }

    /// Returns the chain tip, if any block has been stored.
    pub fn latest(&self) -> DbResult<Option<Block>> {
        match self.db.get(KEY_LATEST)? {
            Some(hash_bytes) => {
                let hash = decode_hash(&hash_bytes)?;
                self.get_by_hash(&hash)
            }
            None => Ok(None),
        }
    }

    /// Returns the genesis block, if stored.
    pub fn genesis(&self) -> DbResult<Option<Block>> {
        match self.db.get(KEY_GENESIS)? {
            Some(hash_bytes) => {
                let hash = decode_hash(&hash_bytes)?;
                self.get_by_hash(&hash)
            }
            None => Ok(None),
        }
    }

    /// `true` if a block with this hash is stored.
    pub fn has(&self, hash: &[u8; 32]) -> DbResult<bool> {
        Ok(self.db.contains_key(block_key(hash))?)
    }

    /// Total number of blocks stored.
    pub fn count(&self) -> DbResult<u64> {
        match self.db.get(KEY_COUNT)? {
            Some(bytes) => decode_u64(&bytes),
            None => Ok(0),
        }
    }

    /// Current chain tip height, or `None` if the store is empty.
    pub fn current_height(&self) -> DbResult<Option<u64>> {
        match self.db.get(KEY_HEIGHT)? {
            Some(bytes) => Ok(Some(decode_u64(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Returns blocks in `[lo, hi]` (inclusive on both ends), ascending by
    /// height. Stops at the first missing height within the range.
    pub fn range(&self, lo: u64, hi: u64) -> DbResult<Vec<Block>> {
        let mut blocks = Vec::new();
        for height in lo..=hi {
            match self.get_by_height(height)? {
                Some(block) => blocks.push(block),
                None => break,
            }
        }
        Ok(blocks)
    }

    /// Returns block hashes in `[lo, hi]` (inclusive), ascending by height,
    /// without deserializing full block bodies. Used by sync to plan which
    /// heights are still missing without paying for the full block decode.
    pub fn hashes_range(&self, lo: u64, hi: u64) -> DbResult<Vec<[u8; 32]>> {
        let mut hashes = Vec::new();
        for height in lo..=hi {
            match self.db.get(height_key(height))? {
                Some(hash_bytes) => hashes.push(decode_hash(&hash_bytes)?),
                None => break,
            }
        }
        Ok(hashes)
    }

    // -- Maintenance -----------------------------------------------------------

    /// Flushes pending writes and asks sled to reclaim space freed by
    /// deletions (e.g. after `delete_from_height`). sled compacts its LSM
    /// segments in the background; this just forces a flush so freed pages
    /// are eligible sooner rather than on the next natural write.
    pub fn compact(&self) -> DbResult<()> {
        self.db.flush()?;
        tracing::info!(size_bytes = self.db.size_on_disk().unwrap_or(0), "compacted block store");
        Ok(())
    }

    /// Scans every stored block and verifies that it deserializes and that
    /// its header hash is internally consistent, removing any entry that
    /// fails either check.
    ///
    /// Returns `(checked, removed)`. Intended for recovery after an unclean
    /// shutdown, not for routine use.
    pub fn repair(&self) -> DbResult<(u64, u64)> {
        let Some(height) = self.current_height()? else {
            return Ok((0, 0));
        };

        let mut checked = 0u64;
        let mut removed = 0u64;
        for h in 0..=height {
            checked += 1;
            let key = height_key(h);
            let hash_bytes = match self.db.get(&key)? {
                Some(b) => b,
                None => continue,
            };
            let Ok(hash) = decode_hash(&hash_bytes) else {
                self.db.remove(&key)?;
                removed += 1;
                continue;
            };

            let corrupt = match self.get_by_hash(&hash) {
                Ok(Some(block)) => block.verify().is_err() || block.header.height != h,
                Ok(None) => true,
                Err(_) => true,
            };

            if corrupt {
                tracing::warn!(height = h, "repair: dropping corrupt block entry");
                self.db.remove(&key)?;
                self.db.remove(block_key(&hash))?;
                removed += 1;
            }
        }

        self.db.flush()?;
        Ok((checked, removed))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
