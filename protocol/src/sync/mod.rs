//! # Fast Sync
//!
//! Brings a node from its local height up to the network's target height
//! using several peers concurrently, offloading verification onto the VM
//! execution harness rather than trusting whatever a peer claims.
//!
//! ## Modes
//!
//! [`crate::config::SyncMode::Full`] downloads every block body and replays
//! it. [`crate::config::SyncMode::Fast`] downloads headers first, verifies
//! they form a contiguous chain, downloads bodies for the same range, then
//! replays each block to confirm the state root it claims. `Light` stops
//! after headers. `Custom` is treated like `Fast`.
//!
//! ## Status machine
//!
//! `Idle -> Connecting -> DownloadingHeaders -> DownloadingBlocks ->
//! VerifyingState -> Completed`, with any phase able to fall to `Failed` or
//! `Paused`. [`SyncEngine::resume`] returns to whichever active phase was
//! running before the pause.
//!
//! ## Peer transport
//!
//! [`PeerManager`] abstracts away the network entirely — this crate ships
//! [`MockPeerManager`], a deterministic in-memory implementation good enough
//! to drive the engine in tests. A networked implementation is the
//! embedding node's problem.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::config::{SyncConfig, SyncMode};
use crate::storage::block::{Block, BlockHeader};
use crate::storage::db::{DbError, NovaDB};
use crate::storage::trie::{StateTrie, TrieError};
use crate::vm::harness::{ContractRuntime, ExecutionHarness, VmError};

pub type PeerId = String;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Where the engine is in the sync pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncStatus {
    Idle,
    Connecting,
    DownloadingHeaders,
    DownloadingBlocks,
    VerifyingState,
    Completed,
    Failed(String),
    Paused,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("no peers are connected")]
    NoPeersAvailable,
    #[error("need at least {required} peers, have {have}")]
    InsufficientPeers { required: usize, have: usize },
    #[error("peer {0} did not respond or is unknown")]
    PeerUnavailable(PeerId),
    #[error("header chain broken at height {height}: {reason}")]
    HeaderChainBroken { height: u64, reason: String },
    #[error("block at height {height} failed validation: {reason}")]
    BlockValidationFailed { height: u64, reason: String },
    #[error("state verification failed at height {height}: {reason}")]
    StateVerificationFailed { height: u64, reason: String },
    #[error("sync was cancelled")]
    Cancelled,
    #[error("block store error: {0}")]
    Storage(#[from] DbError),
    #[error("state trie error: {0}")]
    Trie(#[from] TrieError),
}

pub type SyncResult<T> = Result<T, SyncError>;

// ---------------------------------------------------------------------------
// PeerManager
// ---------------------------------------------------------------------------

/// Abstracts the peer transport. `SyncEngine` never opens a socket itself —
/// it asks a `PeerManager` for tips, headers, and bodies.
pub trait PeerManager: Send + Sync {
    /// Currently connected peers.
    fn connected_peers(&self) -> Vec<PeerId>;

    /// The chain height `peer` last reported, or `None` if unknown/gone.
    fn peer_height(&self, peer: &PeerId) -> Option<u64>;

    /// Requests `count` headers starting at `start`, ascending.
    fn request_headers(&self, peer: &PeerId, start: u64, count: u64) -> SyncResult<Vec<BlockHeader>>;

    /// Requests full blocks for the given heights.
    fn request_blocks(&self, peer: &PeerId, heights: &[u64]) -> SyncResult<Vec<Block>>;
}

/// Deterministic in-memory [`PeerManager`] for tests: every peer serves
/// slices of the same fixed chain, optionally capped at a per-peer height to
/// simulate peers that haven't caught up yet.
pub struct MockPeerManager {
    chain: Vec<Block>,
    peers: Vec<(PeerId, u64)>,
}

impl MockPeerManager {
    /// `peers` is `(id, reported_height)`; a peer only serves heights up to
    /// its reported height even if `chain` goes further.
    pub fn new(chain: Vec<Block>, peers: Vec<(PeerId, u64)>) -> Self {
        Self { chain, peers }
    }

    fn block_at(&self, height: u64) -> Option<&Block> {
        self.chain.get(height as usize)
    }
}

impl PeerManager for MockPeerManager {
    fn connected_peers(&self) -> Vec<PeerId> {
        self.peers.iter().map(|(id, _)| id.clone()).collect()
    }

    fn peer_height(&self, peer: &PeerId) -> Option<u64> {
        self.peers.iter().find(|(id, _)| id == peer).map(|(_, h)| *h)
    }

    fn request_headers(&self, peer: &PeerId, start: u64, count: u64) -> SyncResult<Vec<BlockHeader>> {
        let cap = self.peer_height(peer).ok_or_else(|| SyncError::PeerUnavailable(peer.clone()))?;
        let mut headers = Vec::new();
        for height in start..start + count {
            if height > cap {
                break;
            }
            if let Some(block) = self.block_at(height) {
                headers.push(block.header.clone());
            }
        }
        Ok(headers)
    }

    fn request_blocks(&self, peer: &PeerId, heights: &[u64]) -> SyncResult<Vec<Block>> {
        let cap = self.peer_height(peer).ok_or_else(|| SyncError::PeerUnavailable(peer.clone()))?;
        let mut blocks = Vec::new();
        for &height in heights {
            if height > cap {
                continue;
            }
            if let Some(block) = self.block_at(height) {
                blocks.push(block.clone());
            }
        }
        Ok(blocks)
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Rolling counters surfaced to callers (metrics, a status endpoint, ...).
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    pub headers_downloaded: u64,
    pub blocks_downloaded: u64,
    pub states_verified: u64,
    pub download_rate_mbps: f64,
    pub verification_rate_hps: f64,
    pub estimated_completion_time_seconds: f64,
}

/// Rough per-unit size used only to turn a download count into a throughput
/// estimate for `download_rate_mbps` -- not an accounting of real bytes.
const ASSUMED_HEADER_BYTES: f64 = 512.0;
const ASSUMED_BLOCK_BYTES: f64 = 4_096.0;

// ---------------------------------------------------------------------------
// Batching helpers
// ---------------------------------------------------------------------------

/// Splits `[start, end]` (inclusive) into ascending `(start, end)` batches of
/// at most `batch_size` heights each.
fn batch_ranges(start: u64, end: u64, batch_size: u64) -> Vec<(u64, u64)> {
    if start > end || batch_size == 0 {
        return Vec::new();
    }
    let mut batches = Vec::new();
    let mut cursor = start;
    while cursor <= end {
        let batch_end = std::cmp::min(cursor + batch_size - 1, end);
        batches.push((cursor, batch_end));
        cursor = batch_end + 1;
    }
    batches
}

/// Picks the median of connected peers' reported heights, dropping peers the
/// manager no longer recognizes. Using the median instead of the max rejects
/// a single lying/ahead-of-itself peer from setting an unreachable target.
fn median_target_height(peers: &PeerManagerHandle, connected: &[PeerId]) -> Option<u64> {
    let mut heights: Vec<u64> = connected.iter().filter_map(|p| peers.peer_height(p)).collect();
    if heights.is_empty() {
        return None;
    }
    heights.sort_unstable();
    Some(heights[heights.len() / 2])
}

type PeerManagerHandle = Arc<dyn PeerManager>;

/// Bounded counting semaphore used to cap in-flight requests per phase.
/// `parking_lot::Condvar` doesn't time out spuriously the way `std`'s does,
/// which keeps the worker loops below simple to reason about.
struct InFlightWindow {
    state: Mutex<usize>,
    cv: Condvar,
    max: usize,
}

impl InFlightWindow {
    fn new(max: usize) -> Self {
        Self { state: Mutex::new(0), cv: Condvar::new(), max: max.max(1) }
    }

    /// Blocks until a slot is free, then takes it.
    fn acquire(&self) {
        let mut in_flight = self.state.lock();
        while *in_flight >= self.max {
            self.cv.wait(&mut in_flight);
        }
        *in_flight += 1;
    }

    fn release(&self) {
        let mut in_flight = self.state.lock();
        *in_flight = in_flight.saturating_sub(1);
        self.cv.notify_one();
    }
}

// ---------------------------------------------------------------------------
// SyncEngine
// ---------------------------------------------------------------------------

/// Drives a node from its local height to the network's target height.
///
/// Generic over the contract runtime so the same `R` the node's
/// [`ExecutionHarness`] was built with is used to verify state transitions
/// during the `Fast`-mode verification phase.
pub struct SyncEngine<R: ContractRuntime> {
    db: Arc<NovaDB>,
    trie: Arc<StateTrie>,
    harness: ExecutionHarness<R>,
    config: SyncConfig,
    peers: PeerManagerHandle,

    status: Mutex<SyncStatus>,
    stats: Mutex<SyncStats>,

    sync_active: AtomicBool,
    workers_active: AtomicBool,
    verification_active: AtomicBool,

    paused: Mutex<bool>,
    pause_cv: Condvar,

    progress: Mutex<Option<Arc<dyn Fn(&SyncStatus) + Send + Sync>>>,
}

impl<R: ContractRuntime> SyncEngine<R> {
    pub fn new(db: Arc<NovaDB>, trie: Arc<StateTrie>, runtime: R, config: SyncConfig, peers: PeerManagerHandle) -> Self {
        Self {
            db,
            harness: ExecutionHarness::new(Arc::clone(&trie), runtime),
            trie,
            config,
            peers,
            status: Mutex::new(SyncStatus::Idle),
            stats: Mutex::new(SyncStats::default()),
            sync_active: AtomicBool::new(false),
            workers_active: AtomicBool::new(false),
            verification_active: AtomicBool::new(false),
            paused: Mutex::new(false),
            pause_cv: Condvar::new(),
            progress: Mutex::new(None),
        }
    }

    pub fn status(&self) -> SyncStatus {
        self.status.lock().clone()
    }

    pub fn stats(&self) -> SyncStats {
        self.stats.lock().clone()
    }

    /// Registers a callback fired every time [`Self::set_status`] changes the
    /// status. Replaces any previously registered callback.
    pub fn set_progress_callback(&self, callback: impl Fn(&SyncStatus) + Send + Sync + 'static) {
        *self.progress.lock() = Some(Arc::new(callback));
    }

    fn set_status(&self, status: SyncStatus) {
        *self.status.lock() = status.clone();
        if let Some(callback) = self.progress.lock().as_ref() {
            callback(&status);
        }
    }

    /// Blocks the calling thread until [`Self::resume`] is called, as long
    /// as the engine is still paused and still active.
    fn wait_while_paused(&self) {
        let mut paused = self.paused.lock();
        while *paused && self.sync_active.load(Ordering::SeqCst) {
            self.pause_cv.wait(&mut paused);
        }
    }

    /// Pauses an in-progress sync. Worker threads finish their current
    /// request, then block until [`Self::resume`].
    pub fn pause(&self) {
        if !self.sync_active.load(Ordering::SeqCst) {
            return;
        }
        *self.paused.lock() = true;
        self.set_status(SyncStatus::Paused);
    }

    /// Resumes a paused sync from whichever phase it was in.
    pub fn resume(&self) {
        *self.paused.lock() = false;
        self.pause_cv.notify_all();
    }

    /// Cancels an in-progress sync. Every worker thread observes this within
    /// one loop iteration and exits without finishing its current batch.
    pub fn stop_sync(&self) {
        self.sync_active.store(false, Ordering::SeqCst);
        self.workers_active.store(false, Ordering::SeqCst);
        self.verification_active.store(false, Ordering::SeqCst);
        *self.paused.lock() = false;
        self.pause_cv.notify_all();
    }

    fn check_active(&self) -> SyncResult<()> {
        if !self.sync_active.load(Ordering::SeqCst) {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    /// Like [`Self::check_active`] but also observes the download-worker
    /// flag, so a `stop_sync` mid-download is visible to workers even if
    /// they're blocked somewhere that doesn't poll `sync_active` directly.
    fn check_workers_active(&self) -> SyncResult<()> {
        if !self.workers_active.load(Ordering::SeqCst) {
            return Err(SyncError::Cancelled);
        }
        self.check_active()
    }

    // -- Pipeline -------------------------------------------------------------

    /// Runs the full pipeline to completion (or failure/cancellation),
    /// blocking the calling thread. Spawn this on its own thread to get the
    /// pause/resume/cancel semantics documented above from other threads.
    pub fn run(&self) -> SyncResult<SyncStats> {
        self.sync_active.store(true, Ordering::SeqCst);
        self.workers_active.store(true, Ordering::SeqCst);
        let start_time = Instant::now();

        let result = self.run_inner(start_time);

        self.sync_active.store(false, Ordering::SeqCst);
        self.workers_active.store(false, Ordering::SeqCst);
        self.verification_active.store(false, Ordering::SeqCst);

        match &result {
            Ok(_) => self.set_status(SyncStatus::Completed),
            Err(SyncError::Cancelled) => self.set_status(SyncStatus::Idle),
            Err(e) => self.set_status(SyncStatus::Failed(e.to_string())),
        }
        result
    }

    fn run_inner(&self, start_time: Instant) -> SyncResult<SyncStats> {
        self.set_status(SyncStatus::Connecting);
        let connected = self.connect_peers()?;

        let local_height = self.db.current_height()?.unwrap_or(0);
        let target_height = median_target_height(&self.peers, &connected).unwrap_or(local_height);
        if target_height <= local_height {
            return Ok(self.stats());
        }

        let accepted_headers = if self.config.mode == SyncMode::Full {
            None
        } else {
            self.set_status(SyncStatus::DownloadingHeaders);
            Some(self.download_headers(&connected, local_height, target_height, start_time)?)
        };

        if self.config.mode == SyncMode::Light {
            return Ok(self.stats());
        }

        self.set_status(SyncStatus::DownloadingBlocks);
        let accepted_blocks = self.download_blocks(
            &connected,
            local_height,
            target_height,
            accepted_headers.as_ref(),
            start_time,
        )?;

        if self.config.mode == SyncMode::Fast || self.config.mode == SyncMode::Custom {
            self.set_status(SyncStatus::VerifyingState);
            self.verify_state(&accepted_blocks, start_time)?;
        }

        Ok(self.stats())
    }

    fn connect_peers(&self) -> SyncResult<Vec<PeerId>> {
        let mut connected = self.peers.connected_peers();
        if connected.is_empty() {
            return Err(SyncError::NoPeersAvailable);
        }
        if connected.len() < self.config.min_peers {
            return Err(SyncError::InsufficientPeers {
                required: self.config.min_peers,
                have: connected.len(),
            });
        }
        connected.sort_by_key(|p| std::cmp::Reverse(self.peers.peer_height(p).unwrap_or(0)));
        connected.truncate(self.config.max_peers);
        Ok(connected)
    }

    /// Downloads every missing header in `(local_height, target_height]`
    /// using a bounded worker pool, verifying the result forms one
    /// contiguous chain before returning it.
    fn download_headers(
        &self,
        peers: &[PeerId],
        local_height: u64,
        target_height: u64,
        start_time: Instant,
    ) -> SyncResult<BTreeMap<u64, BlockHeader>> {
        let batches = batch_ranges(local_height + 1, target_height, self.config.batch_size);
        let queue = Mutex::new(VecDeque::from(batches));
        let window = InFlightWindow::new(self.config.max_headers_in_flight);
        let accepted: Mutex<BTreeMap<u64, BlockHeader>> = Mutex::new(BTreeMap::new());
        let failure: Mutex<Option<SyncError>> = Mutex::new(None);
        let worker_count = self.config.max_concurrent_downloads.max(1);
        let queue_ref = &queue;
        let window_ref = &window;
        let accepted_ref = &accepted;
        let failure_ref = &failure;

        std::thread::scope(|scope| {
            for worker in 0..worker_count {
                let peer = peers[worker % peers.len()].clone();
                scope.spawn(move || {
                    loop {
                        if self.check_workers_active().is_err() || failure_ref.lock().is_some() {
                            return;
                        }
                        self.wait_while_paused();
                        if self.check_active().is_err() {
                            return;
                        }

                        let batch = queue_ref.lock().pop_front();
                        let Some((start, end)) = batch else { return };

                        window_ref.acquire();
                        let result = self.peers.request_headers(&peer, start, end - start + 1);
                        window_ref.release();

                        match result {
                            Ok(headers) => {
                                let mut stats = self.stats.lock();
                                stats.headers_downloaded += headers.len() as u64;
                                stats.download_rate_mbps =
                                    download_rate_mbps(stats.headers_downloaded, ASSUMED_HEADER_BYTES, start_time);
                                drop(stats);
                                accepted_ref.lock().extend(headers.into_iter().map(|h| (h.height, h)));
                            }
                            Err(e) => {
                                *failure_ref.lock() = Some(e);
                                return;
                            }
                        }
                    }
                });
            }
        });

        self.check_active()?;
        if let Some(err) = failure.into_inner() {
            return Err(err);
        }

        let accepted = accepted.into_inner();
        verify_header_chain(&accepted, local_height, target_height)?;
        Ok(accepted)
    }

    /// Downloads every missing block body in `(local_height, target_height]`,
    /// cross-checking against `headers` (if present) and this crate's own
    /// structural verification, then persists each accepted block.
    fn download_blocks(
        &self,
        peers: &[PeerId],
        local_height: u64,
        target_height: u64,
        headers: Option<&BTreeMap<u64, BlockHeader>>,
        start_time: Instant,
    ) -> SyncResult<Vec<Block>> {
        let batches = batch_ranges(local_height + 1, target_height, self.config.batch_size);
        let queue = Mutex::new(VecDeque::from(batches));
        let window = InFlightWindow::new(self.config.max_blocks_in_flight);
        let accepted: Mutex<BTreeMap<u64, Block>> = Mutex::new(BTreeMap::new());
        let failure: Mutex<Option<SyncError>> = Mutex::new(None);
        let worker_count = self.config.max_concurrent_downloads.max(1);
        let queue_ref = &queue;
        let window_ref = &window;
        let accepted_ref = &accepted;
        let failure_ref = &failure;

        std::thread::scope(|scope| {
            for worker in 0..worker_count {
                let peer = peers[worker % peers.len()].clone();
                scope.spawn(move || {
                    loop {
                        if self.check_workers_active().is_err() || failure_ref.lock().is_some() {
                            return;
                        }
                        self.wait_while_paused();
                        if self.check_active().is_err() {
                            return;
                        }

                        let batch = queue_ref.lock().pop_front();
                        let Some((start, end)) = batch else { return };
                        let heights: Vec<u64> = (start..=end).collect();

                        window_ref.acquire();
                        let result = self.peers.request_blocks(&peer, &heights);
                        window_ref.release();

                        match result {
                            Ok(blocks) => {
                                for block in &blocks {
                                    if let Err(reason) = block.verify() {
                                        *failure_ref.lock() = Some(SyncError::BlockValidationFailed {
                                            height: block.header.height,
                                            reason,
                                        });
                                        return;
                                    }
                                    if let Some(headers) = headers {
                                        if let Some(expected) = headers.get(&block.header.height) {
                                            if expected.hash != block.header.hash {
                                                *failure_ref.lock() = Some(SyncError::BlockValidationFailed {
                                                    height: block.header.height,
                                                    reason: "body hash doesn't match downloaded header".to_string(),
                                                });
                                                return;
                                            }
                                        }
                                    }
                                }
                                let mut stats = self.stats.lock();
                                stats.blocks_downloaded += blocks.len() as u64;
                                stats.download_rate_mbps =
                                    download_rate_mbps(stats.blocks_downloaded, ASSUMED_BLOCK_BYTES, start_time);
                                drop(stats);
                                accepted_ref.lock().extend(blocks.into_iter().map(|b| (b.header.height, b)));
                            }
                            Err(e) => {
                                *failure_ref.lock() = Some(e);
                                return;
                            }
                        }
                    }
                });
            }
        });

        self.check_active()?;
        if let Some(err) = failure.into_inner() {
            return Err(err);
        }

        let accepted = accepted.into_inner();
        let blocks = verify_block_chain(accepted, local_height, target_height, &self.db)?;
        for block in &blocks {
            self.db.store(block)?;
        }
        Ok(blocks)
    }

    /// Replays each accepted block against the state trie in height order,
    /// confirming the resulting root matches what the block claims. This is
    /// what makes `Fast` mode trust peers for data but not for state.
    fn verify_state(&self, blocks: &[Block], start_time: Instant) -> SyncResult<()> {
        self.verification_active.store(true, Ordering::SeqCst);
        for block in blocks {
            if !self.verification_active.load(Ordering::SeqCst) {
                return Err(SyncError::Cancelled);
            }
            self.check_active()?;
            self.wait_while_paused();
            self.check_active()?;

            if block.transactions.is_empty() {
                continue;
            }
            match self.harness.execute_block(block) {
                Ok(_) => {
                    let computed_root = self.trie.state_root();
                    if computed_root != block.header.state_root {
                        return Err(SyncError::StateVerificationFailed {
                            height: block.header.height,
                            reason: format!(
                                "state root mismatch: computed {}, block claims {}",
                                hex::encode(computed_root),
                                hex::encode(block.header.state_root),
                            ),
                        });
                    }
                }
                Err(VmError::EmptyBlock) => {}
                Err(e) => {
                    return Err(SyncError::StateVerificationFailed {
                        height: block.header.height,
                        reason: e.to_string(),
                    })
                }
            }

            let mut stats = self.stats.lock();
            stats.states_verified += 1;
            stats.verification_rate_hps = stats.states_verified as f64 / start_time.elapsed().as_secs_f64().max(0.001);
            if stats.verification_rate_hps > 0.0 {
                let remaining = blocks.len() as u64 - stats.states_verified;
                stats.estimated_completion_time_seconds = remaining as f64 / stats.verification_rate_hps;
            }
        }
        self.verification_active.store(false, Ordering::SeqCst);
        Ok(())
    }
}

fn download_rate_mbps(units_downloaded: u64, bytes_per_unit: f64, start_time: Instant) -> f64 {
    let elapsed = start_time.elapsed().as_secs_f64().max(0.001);
    let megabits = units_downloaded as f64 * bytes_per_unit * 8.0 / 1_000_000.0;
    megabits / elapsed
}

/// Confirms `headers` covers every height in `[local_height + 1, target_height]`
/// with no gaps and a properly linked `previous_hash` chain.
fn verify_header_chain(
    headers: &BTreeMap<u64, BlockHeader>,
    local_height: u64,
    target_height: u64,
) -> SyncResult<()> {
    let mut expected_previous: Option<[u8; 32]> = None;
    for height in (local_height + 1)..=target_height {
        let header = headers.get(&height).ok_or_else(|| SyncError::HeaderChainBroken {
            height,
            reason: "missing header".to_string(),
        })?;
        if let Some(previous) = expected_previous {
            if header.previous_hash != previous {
                return Err(SyncError::HeaderChainBroken {
                    height,
                    reason: "previous_hash does not match prior header".to_string(),
                });
            }
        }
        expected_previous = Some(header.hash);
    }
    Ok(())
}

/// Confirms `blocks` covers every height in `[local_height + 1, target_height]`,
/// chains to the locally stored tip, and returns them in ascending order.
fn verify_block_chain(
    blocks: BTreeMap<u64, Block>,
    local_height: u64,
    target_height: u64,
    db: &NovaDB,
) -> SyncResult<Vec<Block>> {
    let mut expected_previous = db.get_by_height(local_height)?.map(|b| b.header.hash);

    let mut ordered = Vec::with_capacity(blocks.len());
    for height in (local_height + 1)..=target_height {
        let block = blocks.get(&height).cloned().ok_or_else(|| SyncError::BlockValidationFailed {
            height,
            reason: "missing block body".to_string(),
        })?;
        if let Some(previous) = expected_previous {
            if block.header.previous_hash != previous {
                return Err(SyncError::BlockValidationFailed {
                    height,
                    reason: "previous_hash does not match prior block".to_string(),
                });
            }
        }
        expected_previous = Some(block.header.hash);
        ordered.push(block);
    }
    Ok(ordered)
}
