//! # Pruning & Snapshots
//!
//! Two retention problems live here, coordinated so they agree on what
//! "recent" means: trimming old block bodies out of [`crate::storage::db::NovaDB`]
//! once they're older than the configured retention window, and taking
//! durable, restartable snapshots of [`crate::storage::trie::StateTrie`] so a
//! node can roll its whole account/contract state back to a known-good
//! height without replaying the chain from genesis.
//!
//! Block pruning and state snapshotting are deliberately separate concerns:
//! a node can keep every block forever but still only want a handful of
//! trie snapshots on disk, or prune aggressively while relying on peers for
//! full history. [`PruningConfig::mode`] governs the block side; snapshot
//! cadence is driven by `snapshot_interval` on whichever mode enables it.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::config::{PruningConfig, PruningMode};
use crate::storage::block::Block;
use crate::storage::db::{DbError, NovaDB};
use crate::storage::state_db::{AccountRecord, StateDb};
use crate::storage::trie::{StateTrie, TrieError};
use crate::transaction::types::Address;

#[derive(Debug, thiserror::Error)]
pub enum PruningError {
    #[error("block store error: {0}")]
    Storage(#[from] DbError),
    #[error("state trie error: {0}")]
    Trie(#[from] TrieError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("snapshot encoding error: {0}")]
    Encoding(String),
    #[error("no snapshot recorded at height {0}")]
    SnapshotNotFound(u64),
    #[error("snapshot at height {0} failed hash verification")]
    SnapshotHashMismatch(u64),
    #[error("pruning mode is Custom but no predicate has been registered")]
    MissingCustomPredicate,
    #[error("archival is disabled in the current configuration")]
    ArchivalDisabled,
}

pub type PruningResult<T> = Result<T, PruningError>;

/// Running totals of what pruning has actually done, independent of config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PruningStats {
    pub total_blocks_pruned: u64,
    pub total_state_entries_pruned: u64,
    pub total_blocks_archived: u64,
    pub last_pruning_timestamp: Option<u64>,
}

/// One contract's full storage image, keyed by address so a snapshot dump
/// stays flat and JSON-friendly rather than nesting maps-of-maps.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ContractStorageDump {
    address: Address,
    #[serde(with = "hex_pairs")]
    entries: Vec<(Vec<u8>, Vec<u8>)>,
}

/// A point-in-time image of every account and every contract's storage,
/// written to `<archive_path>/snapshots/snapshot_<height>.json`. `snapshot_hash`
/// covers every field below it and is checked by [`PruningManager::restore_from_snapshot`]
/// before anything is applied.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    block_height: u64,
    timestamp: u64,
    accounts: Vec<(Address, AccountRecord)>,
    storage: Vec<ContractStorageDump>,
    snapshot_hash: [u8; 32],
}

impl SnapshotFile {
    /// Hashes everything except `snapshot_hash` itself, via a stable
    /// bincode encoding of the other four fields in field order.
    fn compute_hash(
        block_height: u64,
        timestamp: u64,
        accounts: &[(Address, AccountRecord)],
        storage: &[ContractStorageDump],
    ) -> PruningResult<[u8; 32]> {
        let preimage = (block_height, timestamp, accounts, storage);
        let bytes = bincode::serialize(&preimage).map_err(|e| PruningError::Encoding(e.to_string()))?;
        Ok(crate::crypto::blake3_hash(&bytes))
    }
}

/// `serde_json` rejects non-string map keys, so per-slot entries round-trip
/// as an array of `[hex_key, hex_value]` pairs instead of a map.
mod hex_pairs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(pairs: &[(Vec<u8>, Vec<u8>)], s: S) -> Result<S::Ok, S::Error> {
        let encoded: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (hex::encode(k), hex::encode(v)))
            .collect();
        encoded.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<(Vec<u8>, Vec<u8>)>, D::Error> {
        let encoded: Vec<(String, String)> = Vec::deserialize(d)?;
        encoded
            .into_iter()
            .map(|(k, v)| {
                let key = hex::decode(k).map_err(serde::de::Error::custom)?;
                let value = hex::decode(v).map_err(serde::de::Error::custom)?;
                Ok((key, value))
            })
            .collect()
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

type CustomPredicate = dyn Fn(&Block, u64) -> bool + Send + Sync;

/// Coordinates block-store pruning, state-store eviction, and trie snapshot
/// archival for one running node.
pub struct PruningManager {
    db: Arc<NovaDB>,
    trie: Arc<StateTrie>,
    state_db: Arc<StateDb>,
    config: RwLock<PruningConfig>,
    custom_predicate: RwLock<Option<Arc<CustomPredicate>>>,
    stats: Mutex<PruningStats>,
    auto_pruning_active: AtomicBool,
    stop_signal: Mutex<Option<Sender<()>>>,
    auto_thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl PruningManager {
    pub fn new(
        db: Arc<NovaDB>,
        trie: Arc<StateTrie>,
        state_db: Arc<StateDb>,
        config: PruningConfig,
    ) -> PruningResult<Self> {
        if config.enable_archival {
            ensure_archive_dirs(&config.archive_path)?;
        }
        Ok(Self {
            db,
            trie,
            state_db,
            config: RwLock::new(config),
            custom_predicate: RwLock::new(None),
            stats: Mutex::new(PruningStats::default()),
            auto_pruning_active: AtomicBool::new(false),
            stop_signal: Mutex::new(None),
            auto_thread: Mutex::new(None),
        })
    }

    pub fn config(&self) -> PruningConfig {
        self.config.read().clone()
    }

    pub fn update_config(&self, config: PruningConfig) -> PruningResult<()> {
        if matches!(config.mode, PruningMode::Custom) && self.custom_predicate.read().is_none() {
            return Err(PruningError::MissingCustomPredicate);
        }
        if config.enable_archival {
            ensure_archive_dirs(&config.archive_path)?;
        }
        *self.config.write() = config;
        Ok(())
    }

    /// Registers the predicate evaluated by [`Self::should_prune_block`] when
    /// `mode` is [`PruningMode::Custom`]. Not itself part of `PruningConfig`
    /// since config values must stay serializable.
    pub fn set_custom_predicate(&self, predicate: impl Fn(&Block, u64) -> bool + Send + Sync + 'static) {
        *self.custom_predicate.write() = Some(Arc::new(predicate));
    }

    pub fn stats(&self) -> PruningStats {
        self.stats.lock().clone()
    }

    // -- Policy ---------------------------------------------------------------

    /// Whether `block` is eligible for pruning given the current retention
    /// policy. The genesis block is never eligible.
    pub fn should_prune_block(&self, block: &Block, current_height: u64) -> bool {
        if block.header.height == 0 {
            return false;
        }
        let config = self.config.read();
        let age = current_height.saturating_sub(block.header.height);

        match config.mode {
            PruningMode::FullArchive => return false,
            PruningMode::Pruned => {
                if config.keep_blocks > 0 {
                    return age > config.keep_blocks;
                }
            }
            PruningMode::Hybrid => {
                if config.keep_blocks > 0 && age > config.keep_blocks {
                    if config.snapshot_interval > 0 {
                        return block.header.height % config.snapshot_interval != 0;
                    }
                    return true;
                }
            }
            PruningMode::Custom => {
                return match self.custom_predicate.read().as_ref() {
                    Some(predicate) => predicate(block, current_height),
                    None => false,
                };
            }
        }

        if config.max_block_count > 0 {
            let total_blocks = current_height + 1;
            if total_blocks > config.max_block_count {
                return age >= config.max_block_count;
            }
        }

        if config.max_age_hours > 0 {
            let age_hours = now_unix().saturating_sub(block.header.timestamp) / 3600;
            if age_hours > config.max_age_hours {
                return true;
            }
        }

        false
    }

    /// Whether durable state associated with `block_height` is old enough to
    /// evict from the flat account store.
    pub fn should_prune_state(&self, block_height: u64, current_height: u64) -> bool {
        let config = self.config.read();
        if config.mode == PruningMode::FullArchive {
            return false;
        }
        if config.keep_state_blocks > 0 {
            return current_height.saturating_sub(block_height) > config.keep_state_blocks;
        }
        false
    }

    // -- Block pruning ----------------------------------------------------------

    /// Scans every stored block up to `current_height`, archives (if
    /// enabled) the ones the policy flags, then deletes from the lowest
    /// flagged height onwards in one atomic sweep and runs state pruning
    /// over the same horizon. Returns the number of blocks removed.
    ///
    /// Deletion is intentionally all-or-nothing from the lowest flagged
    /// height up through the tip (via [`NovaDB::delete_from_height`]) rather
    /// than surgically removing only the flagged heights — a pruned node is
    /// expected to rely on `enable_archival` (or peers) for anything below
    /// its retained window, not keep serving an arbitrary patchwork of old
    /// blocks.
    pub fn perform_pruning(&self, current_height: u64) -> PruningResult<u64> {
        let blocks = self.db.range(0, current_height)?;

        let mut lowest_prune_height = None;
        for block in &blocks {
            if self.should_prune_block(block, current_height) {
                if self.config.read().enable_archival {
                    self.archive_block_at(block.header.height)?;
                }
                lowest_prune_height = Some(match lowest_prune_height {
                    Some(lowest) => std::cmp::min(lowest, block.header.height),
                    None => block.header.height,
                });
            }
        }

        let Some(lowest_prune_height) = lowest_prune_height else {
            return Ok(0);
        };

        let removed = self.db.delete_from_height(lowest_prune_height)?;
        let state_pruned = self.perform_state_pruning(current_height)?;

        let mut stats = self.stats.lock();
        stats.total_blocks_pruned += removed;
        stats.total_state_entries_pruned += state_pruned;
        stats.last_pruning_timestamp = Some(now_unix());

        Ok(removed)
    }

    /// Reference-aware state pruning: collects every account address
    /// referenced by a transaction output in the retained window
    /// `[current_height - keep_state_blocks + 1, current_height]`, then asks
    /// [`StateDb::prune`] to discard any account that's both unreferenced
    /// and genuinely empty (zero balance, zero nonce, no code, no storage).
    pub fn perform_state_pruning(&self, current_height: u64) -> PruningResult<u64> {
        let config = self.config.read();
        if config.mode == PruningMode::FullArchive {
            return Ok(0);
        }
        let keep_state_blocks = if config.keep_state_blocks > 0 {
            config.keep_state_blocks
        } else {
            config.keep_blocks
        };
        drop(config);
        if keep_state_blocks == 0 {
            return Ok(0);
        }

        let start_height = current_height.saturating_sub(keep_state_blocks - 1);
        let recent_blocks = self.db.range(start_height, current_height)?;
        let referenced = extract_recent_addresses(&recent_blocks);

        Ok(self.state_db.prune(keep_state_blocks, current_height, &referenced)?)
    }

    // -- Trie snapshots -----------------------------------------------------------

    /// Dumps every account and every contract's storage from [`StateDb`] to
    /// `<archive_path>/snapshots/snapshot_<height>.json`, with a `snapshot_hash`
    /// covering the dump so [`Self::restore_from_snapshot`] can detect a
    /// truncated or tampered file before touching live state.
    pub fn create_snapshot(&self, block_height: u64) -> PruningResult<()> {
        let archive_path = self.config.read().archive_path.clone();
        ensure_archive_dirs(&archive_path)?;

        let mut accounts = Vec::new();
        for address in self.state_db.all_addresses()? {
            if let Some(record) = self.state_db.get_account(&address)? {
                accounts.push((address, record));
            }
        }

        let mut storage = Vec::new();
        for address in self.state_db.contract_addresses()? {
            let entries: Vec<(Vec<u8>, Vec<u8>)> = self.state_db.all_for(&address)?.into_iter().collect();
            storage.push(ContractStorageDump { address, entries });
        }

        let timestamp = now_unix();
        let snapshot_hash = SnapshotFile::compute_hash(block_height, timestamp, &accounts, &storage)?;
        let snapshot = SnapshotFile {
            block_height,
            timestamp,
            accounts,
            storage,
            snapshot_hash,
        };
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        fs::write(snapshot_file_path(&archive_path, block_height), bytes)?;
        Ok(())
    }

    /// Loads a previously written snapshot, verifies `snapshot_hash` against
    /// its contents, and replays every account and storage entry back into
    /// [`StateDb`]. Refuses to apply anything if the hash doesn't match.
    pub fn restore_from_snapshot(&self, block_height: u64) -> PruningResult<()> {
        let archive_path = self.config.read().archive_path.clone();
        let path = snapshot_file_path(&archive_path, block_height);
        if !path.exists() {
            return Err(PruningError::SnapshotNotFound(block_height));
        }
        let bytes = fs::read(path)?;
        let snapshot: SnapshotFile = serde_json::from_slice(&bytes)?;

        let expected = SnapshotFile::compute_hash(
            snapshot.block_height,
            snapshot.timestamp,
            &snapshot.accounts,
            &snapshot.storage,
        )?;
        if expected != snapshot.snapshot_hash {
            return Err(PruningError::SnapshotHashMismatch(block_height));
        }

        for (address, record) in &snapshot.accounts {
            self.state_db.store_account(address, record)?;
            self.trie.set_balance(address, record.balance);
            self.trie.set_nonce(address, record.nonce);
        }
        for dump in &snapshot.storage {
            let entries: std::collections::HashMap<Vec<u8>, Vec<u8>> =
                dump.entries.iter().cloned().collect();
            self.state_db.store_storage_batch(&dump.address, &entries)?;
            for (key, value) in &dump.entries {
                self.trie.set_storage(&dump.address, key, value.clone());
            }
        }
        Ok(())
    }

    /// Heights of every snapshot currently on disk, ascending.
    pub fn list_snapshots(&self) -> PruningResult<Vec<u64>> {
        let dir = self.config.read().archive_path.join("snapshots");
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut heights = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if let Some(height) = parse_snapshot_filename(&entry.file_name().to_string_lossy()) {
                heights.push(height);
            }
        }
        heights.sort_unstable();
        Ok(heights)
    }

    // -- Block archival -----------------------------------------------------------

    fn archive_block_at(&self, height: u64) -> PruningResult<()> {
        let config = self.config.read();
        if !config.enable_archival {
            return Ok(());
        }
        let archive_path = config.archive_path.clone();
        drop(config);

        let Some(block) = self.db.get_by_height(height)? else {
            return Ok(());
        };
        let bytes = serde_json::to_vec(&block)?;
        fs::write(archive_block_path(&archive_path, height), bytes)?;
        self.stats.lock().total_blocks_archived += 1;
        Ok(())
    }

    /// Archives every block in `[from_height, to_height]` to disk without
    /// removing them from the live store. Returns the number archived.
    pub fn archive_blocks(&self, from_height: u64, to_height: u64) -> PruningResult<u64> {
        if !self.config.read().enable_archival {
            return Err(PruningError::ArchivalDisabled);
        }
        let mut archived = 0u64;
        for height in from_height..=to_height {
            if self.db.get_by_height(height)?.is_some() {
                self.archive_block_at(height)?;
                archived += 1;
            }
        }
        Ok(archived)
    }

    /// Reads archived blocks back from disk and re-inserts them into the
    /// live store. Returns the number restored.
    pub fn restore_archived_blocks(&self, from_height: u64, to_height: u64) -> PruningResult<u64> {
        let archive_path = self.config.read().archive_path.clone();
        let mut restored = 0u64;
        for height in from_height..=to_height {
            let path = archive_block_path(&archive_path, height);
            if !path.exists() {
                continue;
            }
            let bytes = fs::read(path)?;
            let block: Block = serde_json::from_slice(&bytes)?;
            self.db.store(&block)?;
            restored += 1;
        }
        Ok(restored)
    }

    /// Contiguous `(start, end)` height ranges present in the archive
    /// directory, merging adjacent heights into one range.
    pub fn list_archived_ranges(&self) -> PruningResult<Vec<(u64, u64)>> {
        let dir = self.config.read().archive_path.join("blocks");
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut heights = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if let Some(height) = parse_block_archive_filename(&entry.file_name().to_string_lossy()) {
                heights.push(height);
            }
        }
        heights.sort_unstable();

        let mut ranges = Vec::new();
        let mut iter = heights.into_iter();
        if let Some(first) = iter.next() {
            let (mut start, mut end) = (first, first);
            for height in iter {
                if height == end + 1 {
                    end = height;
                } else {
                    ranges.push((start, end));
                    start = height;
                    end = height;
                }
            }
            ranges.push((start, end));
        }
        Ok(ranges)
    }

    // -- Diagnostics ---------------------------------------------------------

    /// Best-effort estimate of on-disk footprint, used only for reporting —
    /// sled doesn't expose exact per-record sizes.
    pub fn estimate_storage_savings(&self, candidate: &PruningConfig) -> PruningResult<u64> {
        let total_blocks = self.db.count()?;
        if candidate.keep_blocks > 0 && total_blocks > candidate.keep_blocks {
            let prunable = total_blocks - candidate.keep_blocks;
            return Ok(prunable * 1024 * 1024);
        }
        Ok(0)
    }

    /// Rough storage footprint estimate (blocks at ~1MB, accounts at ~1KB,
    /// contract storage entries at 256 bytes) — sled doesn't expose exact
    /// per-record sizes, so this is a sizing heuristic, not an audit.
    pub fn estimate_total_storage_bytes(&self) -> PruningResult<u64> {
        let blocks = self.db.count()?;
        let accounts = self.state_db.count()?;
        let storage_entries = self.state_db.storage_entry_count()?;
        Ok(blocks * 1024 * 1024 + accounts * 1024 + storage_entries * 256)
    }

    pub fn is_storage_limit_exceeded(&self) -> PruningResult<bool> {
        let max_mb = self.config.read().max_storage_size_mb;
        if max_mb == 0 {
            return Ok(false);
        }
        Ok(self.estimate_total_storage_bytes()? > max_mb * 1024 * 1024)
    }

    // -- Automatic pruning ----------------------------------------------------

    /// Spawns a background thread that calls [`Self::perform_pruning`] every
    /// `interval_seconds` against the block store's current tip. Returns
    /// `false` if automatic pruning is already running.
    pub fn start_automatic_pruning(self: &Arc<Self>, interval_seconds: u64) -> bool {
        if self.auto_pruning_active.swap(true, Ordering::SeqCst) {
            return false;
        }
        let (tx, rx) = std::sync::mpsc::channel();
        *self.stop_signal.lock() = Some(tx);

        let manager = Arc::clone(self);
        let interval = Duration::from_secs(interval_seconds.max(1));
        let handle = std::thread::spawn(move || automatic_pruning_loop(manager, rx, interval));
        *self.auto_thread.lock() = Some(handle);
        true
    }

    pub fn stop_automatic_pruning(&self) {
        if !self.auto_pruning_active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(tx) = self.stop_signal.lock().take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.auto_thread.lock().take() {
            let _ = handle.join();
        }
    }

    pub fn is_automatic_pruning_active(&self) -> bool {
        self.auto_pruning_active.load(Ordering::SeqCst)
    }
}

fn automatic_pruning_loop(manager: Arc<PruningManager>, rx: Receiver<()>, interval: Duration) {
    loop {
        match rx.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                if !manager.auto_pruning_active.load(Ordering::SeqCst) {
                    break;
                }
                match manager.db.current_height() {
                    Ok(Some(height)) => {
                        if let Err(err) = manager.perform_pruning(height) {
                            tracing::warn!(%err, "automatic pruning pass failed");
                        }
                    }
                    Ok(None) => {}
                    Err(err) => tracing::warn!(%err, "automatic pruning could not read chain height"),
                }
            }
        }
    }
}

fn extract_recent_addresses(blocks: &[Block]) -> std::collections::HashSet<Address> {
    let mut addresses = std::collections::HashSet::new();
    for block in blocks {
        for tx in &block.transactions {
            for output in &tx.outputs {
                addresses.insert(output.recipient_address);
            }
        }
    }
    addresses
}

fn ensure_archive_dirs(archive_path: &Path) -> PruningResult<()> {
    fs::create_dir_all(archive_path)?;
    fs::create_dir_all(archive_path.join("blocks"))?;
    fs::create_dir_all(archive_path.join("snapshots"))?;
    Ok(())
}

fn snapshot_file_path(archive_path: &Path, height: u64) -> PathBuf {
    archive_path
        .join("snapshots")
        .join(format!("snapshot_{height}.json"))
}

fn archive_block_path(archive_path: &Path, height: u64) -> PathBuf {
    archive_path.join("blocks").join(format!("block_{height}.json"))
}

fn parse_snapshot_filename(name: &str) -> Option<u64> {
    name.strip_prefix("snapshot_")?.strip_suffix(".json")?.parse().ok()
}

fn parse_block_archive_filename(name: &str) -> Option<u64> {
    name.strip_prefix("block_")?.strip_suffix(".json")?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::block::Block;
    use crate::transaction::builder::TransactionBuilder;
    use crate::transaction::types::{Input, Output, TransactionKind};

    fn manager_with(mode: PruningMode, keep_blocks: u64) -> (Arc<PruningManager>, tempfile::TempDir) {
        let db = Arc::new(NovaDB::open_temporary().unwrap());
        let trie = Arc::new(StateTrie::new());
        let archive_dir = tempfile::tempdir().unwrap();
        let state_db = Arc::new(StateDb::new(&db).unwrap());
        let config = PruningConfig {
            mode,
            keep_blocks,
            keep_state_blocks: keep_blocks,
            snapshot_interval: 0,
            max_storage_size_mb: 0,
            max_block_count: 0,
            max_age_hours: 0,
            enable_archival: true,
            archive_path: archive_dir.path().to_path_buf(),
            archive_after_blocks: 0,
        };
        let manager = Arc::new(PruningManager::new(db, trie, state_db, config).unwrap());
        (manager, archive_dir)
    }

    /// Builds a height-`n` chain rooted at genesis; returns only the tip.
    fn chain_block(height: u64, _previous_hash: [u8; 32]) -> Block {
        let mut block = Block::genesis();
        for h in 1..=height {
            let tx = TransactionBuilder::new(TransactionKind::Coinbase)
                .input(Input::new("seed", 0))
                .output(Output::new(10, Address::new([h as u8; 32])))
                .build();
            block = Block::new(&block, vec![tx], "validator".into(), [0u8; 32], 1);
        }
        block.header.timestamp = 0;
        block
    }

    #[test]
    fn full_archive_mode_never_prunes() {
        let (manager, _dir) = manager_with(PruningMode::FullArchive, 2);
        let block = chain_block(5, [0u8; 32]);
        assert!(!manager.should_prune_block(&block, 100));
    }

    #[test]
    fn genesis_is_never_pruned() {
        let (manager, _dir) = manager_with(PruningMode::Pruned, 2);
        let genesis = chain_block(0, [0u8; 32]);
        assert!(!manager.should_prune_block(&genesis, 100));
    }

    #[test]
    fn pruned_mode_flags_blocks_older_than_keep_blocks() {
        let (manager, _dir) = manager_with(PruningMode::Pruned, 2);
        let old = chain_block(1, [0u8; 32]);
        let recent = chain_block(9, [0u8; 32]);
        assert!(manager.should_prune_block(&old, 10));
        assert!(!manager.should_prune_block(&recent, 10));
    }

    #[test]
    fn hybrid_mode_keeps_snapshot_interval_blocks() {
        let (manager, _dir) = manager_with(PruningMode::Hybrid, 2);
        manager.update_config(PruningConfig {
            snapshot_interval: 5,
            ..manager.config()
        }).unwrap();
        let boundary = chain_block(10, [0u8; 32]);
        let off_boundary = chain_block(11, [0u8; 32]);
        assert!(!manager.should_prune_block(&boundary, 20));
        assert!(manager.should_prune_block(&off_boundary, 20));
    }

    #[test]
    fn custom_mode_without_a_registered_predicate_is_rejected() {
        let db = Arc::new(NovaDB::open_temporary().unwrap());
        let trie = Arc::new(StateTrie::new());
        let state_db = Arc::new(StateDb::new(&db).unwrap());
        let config = PruningConfig {
            mode: PruningMode::Custom,
            ..PruningConfig::default()
        };
        assert!(matches!(
            PruningManager::new(db, trie, state_db, config),
            Err(PruningError::MissingCustomPredicate)
        ));
    }

    #[test]
    fn custom_predicate_drives_pruning_decision() {
        let (manager, _dir) = manager_with(PruningMode::FullArchive, 0);
        manager.set_custom_predicate(|block, _height| block.header.height % 2 == 0);
        manager
            .update_config(PruningConfig {
                mode: PruningMode::Custom,
                ..manager.config()
            })
            .unwrap();
        let even = chain_block(4, [0u8; 32]);
        let odd = chain_block(5, [0u8; 32]);
        assert!(manager.should_prune_block(&even, 100));
        assert!(!manager.should_prune_block(&odd, 100));
    }

    #[test]
    fn perform_pruning_deletes_from_the_lowest_flagged_height_onwards() {
        let (manager, _dir) = manager_with(PruningMode::Pruned, 2);
        let mut tip = Block::genesis();
        manager.db.store(&tip).unwrap();
        for height in 1..10u64 {
            let tx = TransactionBuilder::new(TransactionKind::Coinbase)
                .input(Input::new("seed", 0))
                .output(Output::new(10, Address::new([height as u8; 32])))
                .build();
            tip = Block::new(&tip, vec![tx], "validator".into(), [0u8; 32], 1);
            manager.db.store(&tip).unwrap();
        }

        // Age 1 is the lowest flagged height with keep_blocks = 2 at tip 9;
        // delete_from_height(1) rolls everything above genesis off.
        let removed = manager.perform_pruning(9).unwrap();
        assert!(removed > 0);
        assert!(manager.db.get_by_height(1).unwrap().is_none());
        assert!(manager.db.get_by_height(0).unwrap().is_some());
        assert_eq!(manager.db.current_height().unwrap(), Some(0));
    }

    #[test]
    fn snapshot_round_trips_account_and_storage_state() {
        let (manager, _dir) = manager_with(PruningMode::FullArchive, 0);
        let address = Address::new([7u8; 32]);
        let record = AccountRecord {
            balance: 555,
            nonce: 3,
            code_hash: [0u8; 32],
            last_updated: 0,
        };
        manager.state_db.store_account(&address, &record).unwrap();
        manager.state_db.store_storage(&address, b"slot", b"value").unwrap();

        manager.create_snapshot(42).unwrap();
        manager
            .state_db
            .store_account(&address, &AccountRecord { balance: 1, ..record.clone() })
            .unwrap();

        manager.restore_from_snapshot(42).unwrap();
        assert_eq!(manager.state_db.get_account(&address).unwrap().unwrap(), record);
        assert_eq!(manager.trie.get_balance(&address), 555);
        assert_eq!(manager.trie.get_nonce(&address), 3);
        assert_eq!(
            manager.trie.get_storage(&address, b"slot").unwrap(),
            b"value".to_vec()
        );
    }

    #[test]
    fn restoring_a_tampered_snapshot_fails_hash_verification() {
        let (manager, _dir) = manager_with(PruningMode::FullArchive, 0);
        let address = Address::new([7u8; 32]);
        manager
            .state_db
            .store_account(
                &address,
                &AccountRecord { balance: 555, nonce: 0, code_hash: [0u8; 32], last_updated: 0 },
            )
            .unwrap();
        manager.create_snapshot(42).unwrap();

        let path = snapshot_file_path(&manager.config().archive_path, 42);
        let bytes = fs::read(&path).unwrap();
        let mut snapshot: SnapshotFile = serde_json::from_slice(&bytes).unwrap();
        snapshot.accounts[0].1.balance = 999;
        fs::write(&path, serde_json::to_vec_pretty(&snapshot).unwrap()).unwrap();

        assert!(matches!(
            manager.restore_from_snapshot(42),
            Err(PruningError::SnapshotHashMismatch(42))
        ));
    }

    #[test]
    fn restoring_missing_snapshot_errors() {
        let (manager, _dir) = manager_with(PruningMode::FullArchive, 0);
        assert!(matches!(
            manager.restore_from_snapshot(999),
            Err(PruningError::SnapshotNotFound(999))
        ));
    }

    #[test]
    fn list_snapshots_returns_sorted_heights() {
        let (manager, _dir) = manager_with(PruningMode::FullArchive, 0);
        manager.create_snapshot(30).unwrap();
        manager.create_snapshot(10).unwrap();
        manager.create_snapshot(20).unwrap();
        assert_eq!(manager.list_snapshots().unwrap(), vec![10, 20, 30]);
    }

    #[test]
    fn archive_and_restore_blocks_round_trip() {
        let (manager, _dir) = manager_with(PruningMode::Pruned, 100);
        let block = chain_block(3, [0u8; 32]);
        manager.db.store(&block).unwrap();

        assert_eq!(manager.archive_blocks(3, 3).unwrap(), 1);
        manager.db.delete_from_height(3).unwrap();
        assert!(manager.db.get_by_height(3).unwrap().is_none());

        assert_eq!(manager.restore_archived_blocks(3, 3).unwrap(), 1);
        assert!(manager.db.get_by_height(3).unwrap().is_some());
    }

    #[test]
    fn archived_ranges_merge_consecutive_heights() {
        let (manager, _dir) = manager_with(PruningMode::Pruned, 100);
        for height in [1u64, 2, 3, 7, 8] {
            let block = chain_block(height, [0u8; 32]);
            manager.db.store(&block).unwrap();
            manager.archive_blocks(height, height).unwrap();
        }
        assert_eq!(manager.list_archived_ranges().unwrap(), vec![(1, 3), (7, 8)]);
    }

    #[test]
    fn automatic_pruning_can_be_started_and_stopped() {
        let (manager, _dir) = manager_with(PruningMode::Pruned, 2);
        assert!(manager.start_automatic_pruning(3600));
        assert!(manager.is_automatic_pruning_active());
        assert!(!manager.start_automatic_pruning(3600));
        manager.stop_automatic_pruning();
        assert!(!manager.is_automatic_pruning_active());
    }
}
