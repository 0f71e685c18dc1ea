//! # Protocol Configuration & Constants
//!
//! Every magic number lives here. If you're hardcoding a constant somewhere
//! else, you're doing it wrong and you owe the team coffee.
//!
//! The first half of this module is the stuff that doesn't change at
//! runtime — protocol identifiers, crypto parameter sizes, fee schedule.
//! The second half is the stuff an operator actually tunes per node: the
//! four configuration surfaces (sync, pruning, PoW, PoS) plus the
//! `NodeConfig` that aggregates them.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Network Identifiers
// ---------------------------------------------------------------------------

/// Mainnet — the real deal. Mistakes here cost real money.
pub const NETWORK_ID_MAINNET: u32 = 0x4E4F5641; // "NOVA" in ASCII hex.

/// Testnet — where we break things on purpose and call it "testing."
pub const NETWORK_ID_TESTNET: u32 = 0x4E4F5654; // "NOVT"

/// Devnet — the wild west. Reset weekly, no promises, no survivors.
pub const NETWORK_ID_DEVNET: u32 = 0x4E4F5644; // "NOVD"

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Protocol magic bytes used in the wire-format preamble. Every message on
/// the wire starts with these 4 bytes so peers can quickly reject foreign
/// traffic without parsing further.
pub const PROTOCOL_MAGIC: u32 = 0x414C4153; // "ALAS"

/// Major version — bump on breaking consensus changes. A.k.a. hard forks.
pub const PROTOCOL_VERSION_MAJOR: u16 = 0;

/// Minor version — bump on backward-compatible additions.
pub const PROTOCOL_VERSION_MINOR: u16 = 2;

/// Patch version — bump on non-consensus bug fixes.
pub const PROTOCOL_VERSION_PATCH: u16 = 0;

/// The full version string, assembled at compile time.
pub const PROTOCOL_VERSION: &str = "0.2.0";

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// Ed25519 — the only sane choice for signatures. 128-bit security level,
/// deterministic, and resistant to side-channel attacks when implemented
/// correctly (which ed25519-dalek is).
pub const SIGNING_ALGORITHM: &str = "Ed25519";

/// Signing key length in bytes. Ed25519 secret keys are 32 bytes.
pub const SIGNING_KEY_LENGTH: usize = 32;

/// Public (verifying) key length in bytes.
pub const VERIFYING_KEY_LENGTH: usize = 32;

/// Ed25519 signature length. Always 64 bytes.
pub const SIGNATURE_LENGTH: usize = 64;

/// The hash function used for transaction ids, merkle trees, and trie nodes.
/// BLAKE3 is faster than SHA-256 on every platform that matters.
pub const PRIMARY_HASH_FUNCTION: &str = "BLAKE3";

/// Hash output length in bytes. Both SHA-256 and BLAKE3 produce 32-byte digests.
pub const HASH_OUTPUT_LENGTH: usize = 32;

// ---------------------------------------------------------------------------
// Timing Constants
// ---------------------------------------------------------------------------

/// Target block time. Used as the PoW/PoS default and as the sanity baseline
/// for difficulty adjustment.
pub const BLOCK_TIME: Duration = Duration::from_secs(10);

/// Block time as seconds — some configs want a plain integer, not a `Duration`.
pub const BLOCK_TIME_SECS: u32 = 10;

/// Maximum clock skew tolerated on block timestamps.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_millis(500);

/// Transaction expiry window. Transactions older than this are rejected by
/// the mempool layer (not enforced by the core components in this crate).
pub const TX_EXPIRY_WINDOW: Duration = Duration::from_secs(300);

// ---------------------------------------------------------------------------
// Fee / Gas Parameters
// ---------------------------------------------------------------------------

/// Flat gas cost of a regular (non-contract) transaction.
pub const REGULAR_TX_GAS: u64 = 21_000;

/// Default per-block gas limit used by the VM execution harness.
pub const DEFAULT_GAS_LIMIT: u64 = 10_000_000;

/// Default gas price (in the smallest native unit) used by the VM execution
/// harness when none is supplied by the block producer.
pub const DEFAULT_GAS_PRICE: u64 = 20;

/// Minimum transaction fee in the smallest unit ("photons").
pub const MIN_TX_FEE_PHOTONS: u64 = 100;

/// Base fee per byte of transaction data.
pub const FEE_PER_BYTE: u64 = 10;

/// Maximum fee cap. No transaction should ever need to pay more than this.
pub const MAX_TX_FEE_PHOTONS: u64 = 10_000_000;

// ---------------------------------------------------------------------------
// Transaction Limits
// ---------------------------------------------------------------------------

/// Maximum transaction size in bytes.
pub const MAX_TX_SIZE_BYTES: usize = 256 * 1024;

/// Maximum number of inputs per transaction.
pub const MAX_TX_INPUTS: usize = 256;

/// Maximum number of outputs per transaction.
pub const MAX_TX_OUTPUTS: usize = 256;

// ---------------------------------------------------------------------------
// Utility
// ---------------------------------------------------------------------------

/// Returns a friendly name for a network id, mainly for logging.
pub fn network_name(network_id: u32) -> String {
    match network_id {
        NETWORK_ID_MAINNET => "mainnet".to_string(),
        NETWORK_ID_TESTNET => "testnet".to_string(),
        NETWORK_ID_DEVNET => "devnet".to_string(),
        other => format!("unknown(0x{:08X})", other),
    }
}

// ---------------------------------------------------------------------------
// Sync configuration
// ---------------------------------------------------------------------------

/// Which fast-sync strategy a node should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// Download every block body from genesis onward.
    Full,
    /// Headers first, then bodies, then a state-verification pass.
    Fast,
    /// Headers only — never downloads block bodies.
    Light,
    /// Operator-defined strategy; this crate treats it like `Fast`.
    Custom,
}

/// Tunables for the [`crate::sync::SyncEngine`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub mode: SyncMode,
    pub max_peers: usize,
    pub min_peers: usize,
    pub connection_timeout_ms: u64,
    pub max_concurrent_downloads: usize,
    pub batch_size: u64,
    pub max_headers_in_flight: usize,
    pub max_blocks_in_flight: usize,
    pub verify_headers: bool,
    pub verify_blocks: bool,
    pub verify_state: bool,
    pub verification_workers: usize,
    pub header_timeout_ms: u64,
    pub block_timeout_ms: u64,
    pub state_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mode: SyncMode::Fast,
            max_peers: 16,
            min_peers: 1,
            connection_timeout_ms: 10_000,
            max_concurrent_downloads: 8,
            batch_size: 100,
            max_headers_in_flight: 4,
            max_blocks_in_flight: 4,
            verify_headers: true,
            verify_blocks: true,
            verify_state: true,
            verification_workers: 2,
            header_timeout_ms: 10_000,
            block_timeout_ms: 15_000,
            state_timeout_ms: 20_000,
            max_retries: 3,
            retry_delay_ms: 500,
        }
    }
}

impl SyncConfig {
    /// Cross-field sanity check. `min_peers > max_peers` or a zero batch
    /// size are configuration errors, not runtime errors.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_peers > self.max_peers {
            return Err(format!(
                "min_peers ({}) exceeds max_peers ({})",
                self.min_peers, self.max_peers
            ));
        }
        if self.batch_size == 0 {
            return Err("batch_size must be non-zero".to_string());
        }
        if self.max_headers_in_flight == 0 || self.max_blocks_in_flight == 0 {
            return Err("in-flight windows must be non-zero".to_string());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Pruning configuration
// ---------------------------------------------------------------------------

/// Block-retention strategy for the pruning manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PruningMode {
    /// Keep every block forever.
    FullArchive,
    /// Keep only the newest `keep_blocks` blocks.
    Pruned,
    /// Keep the newest `keep_blocks` blocks plus every `snapshot_interval`-th
    /// block further back.
    Hybrid,
    /// Operator-defined predicate; evaluated by the caller, not this crate.
    Custom,
}

/// Tunables for [`crate::pruning::PruningManager`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PruningConfig {
    pub mode: PruningMode,
    pub keep_blocks: u64,
    pub keep_state_blocks: u64,
    pub snapshot_interval: u64,
    pub max_storage_size_mb: u64,
    pub max_block_count: u64,
    pub max_age_hours: u64,
    pub enable_archival: bool,
    pub archive_path: PathBuf,
    pub archive_after_blocks: u64,
}

impl Default for PruningConfig {
    fn default() -> Self {
        Self {
            mode: PruningMode::FullArchive,
            keep_blocks: 10_000,
            keep_state_blocks: 10_000,
            snapshot_interval: 1_000,
            max_storage_size_mb: 0,
            max_block_count: 0,
            max_age_hours: 0,
            enable_archival: false,
            archive_path: PathBuf::from("archive"),
            archive_after_blocks: 100_000,
        }
    }
}

// ---------------------------------------------------------------------------
// PoW configuration
// ---------------------------------------------------------------------------

/// Tunables for [`crate::consensus::pow::ProofOfWork`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PowConfig {
    pub initial_difficulty: u32,
    pub target_block_time: u32,
}

impl Default for PowConfig {
    fn default() -> Self {
        Self {
            initial_difficulty: 1,
            target_block_time: BLOCK_TIME_SECS,
        }
    }
}

// ---------------------------------------------------------------------------
// PoS configuration
// ---------------------------------------------------------------------------

/// Tunables for [`crate::consensus::pos::ProofOfStake`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PosConfig {
    pub min_stake: u128,
    pub max_validators: usize,
    pub epoch_length: u64,
    pub slashing_percentage: u8,
}

impl Default for PosConfig {
    fn default() -> Self {
        Self {
            min_stake: 1_000,
            max_validators: 100,
            epoch_length: 100,
            slashing_percentage: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// Node-level aggregate config
// ---------------------------------------------------------------------------

/// Top-level configuration loaded by the `node` binary at startup and handed
/// down to every subsystem. Library code never reads this directly — it
/// only consumes the sub-configs it needs, keeping the core decoupled from
/// the process bootstrap layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub data_dir: PathBuf,
    pub sync: SyncConfig,
    pub pruning: PruningConfig,
    pub pow: PowConfig,
    pub pos: PosConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            sync: SyncConfig::default(),
            pruning: PruningConfig::default(),
            pow: PowConfig::default(),
            pos: PosConfig::default(),
        }
    }
}
