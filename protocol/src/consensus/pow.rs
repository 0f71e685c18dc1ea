//! # Proof-of-Work Consensus
//!
//! Classic Nakamoto-style mining: search for a `nonce` such that the block
//! header hash, read as a big-endian 256-bit integer, is less than or equal
//! to a difficulty-derived target. Difficulty retargets toward a configured
//! block time using a simple piecewise policy — no full-chain window
//! averaging, just "look at the last block time and nudge."
//!
//! Unlike a hex-string target compared lexicographically, the target here
//! is a real `[u8; 32]` and the comparison is a real big-endian numeric
//! comparison (which, conveniently, is exactly what `<=` on `[u8; 32]`
//! already does).

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use crate::storage::block::compute_header_hash;
use crate::storage::Block;

/// Errors raised while validating or mining a block.
#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    #[error("block failed structural verification")]
    InvalidBlock,

    #[error("block does not meet the difficulty target")]
    TargetNotMet,

    #[error("exhausted {0} nonces without finding a valid hash")]
    NoncesExhausted(u64),

    #[error("mining was stopped before a valid nonce was found")]
    MiningStopped,
}

pub type ConsensusResult<T> = Result<T, ConsensusError>;

/// Computes the 256-bit target for a given difficulty: `difficulty` leading
/// zero bits, then all ones. Difficulty `0` means "any hash is valid" (used
/// only conceptually; genesis blocks skip the target check entirely rather
/// than relying on this).
pub fn target_for_difficulty(difficulty: u32) -> [u8; 32] {
    let zero_bits = (difficulty as usize).min(256);
    let mut target = [0xffu8; 32];

    let full_bytes = zero_bits / 8;
    let remaining_bits = zero_bits % 8;

    for byte in target.iter_mut().take(full_bytes) {
        *byte = 0x00;
    }
    if full_bytes < 32 && remaining_bits > 0 {
        target[full_bytes] = 0xffu8 >> remaining_bits;
    }

    target
}

/// `true` if `hash`, read as a big-endian integer, is at or below the target
/// for `difficulty`.
pub fn meets_difficulty(hash: &[u8; 32], difficulty: u32) -> bool {
    *hash <= target_for_difficulty(difficulty)
}

#[derive(Debug, Default)]
struct HashRateStats {
    mining_started_at: Option<Instant>,
}

/// Proof-of-work engine: mining, validation, and difficulty retargeting.
///
/// Holds no reference to a particular chain — callers pass the block being
/// mined or validated on each call, and feed back `adjust_difficulty` with
/// observed block times.
#[derive(Debug)]
pub struct ProofOfWork {
    current_difficulty: AtomicU32,
    target_block_time: u32,
    blocks_mined: AtomicU64,
    total_hashes: AtomicU64,
    is_mining: AtomicBool,
    stop_requested: AtomicBool,
    stats: Mutex<HashRateStats>,
}

impl ProofOfWork {
    /// Creates a new engine at `initial_difficulty`, retargeting toward
    /// `target_block_time` seconds per block.
    pub fn new(initial_difficulty: u32, target_block_time: u32) -> Self {
        Self {
            current_difficulty: AtomicU32::new(initial_difficulty.max(1)),
            target_block_time,
            blocks_mined: AtomicU64::new(0),
            total_hashes: AtomicU64::new(0),
            is_mining: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            stats: Mutex::new(HashRateStats::default()),
        }
    }

    /// Builds an engine from [`crate::config::PowConfig`].
    pub fn from_config(config: crate::config::PowConfig) -> Self {
        Self::new(config.initial_difficulty, config.target_block_time)
    }

    pub fn current_difficulty(&self) -> u32 {
        self.current_difficulty.load(Ordering::Relaxed)
    }

    pub fn blocks_mined(&self) -> u64 {
        self.blocks_mined.load(Ordering::Relaxed)
    }

    pub fn total_hashes(&self) -> u64 {
        self.total_hashes.load(Ordering::Relaxed)
    }

    /// Validates `block` against the current difficulty. Genesis blocks
    /// (height 0) are structurally verified but never checked against a
    /// target — there's no prior block to have mined them against.
    pub fn validate_block(&self, block: &Block) -> ConsensusResult<()> {
        block
            .verify()
            .map_err(|_| ConsensusError::InvalidBlock)?;

        if block.header.height == 0 {
            return Ok(());
        }

        let hash = compute_header_hash(
            block.header.version,
            &block.header.previous_hash,
            &block.header.merkle_root,
            block.header.timestamp,
            block.header.nonce,
            block.header.difficulty,
            block.header.height,
            &block.header.validator,
            &block.header.state_root,
        );

        if !meets_difficulty(&hash, block.header.difficulty) {
            return Err(ConsensusError::TargetNotMet);
        }
        Ok(())
    }

    /// Searches nonces `0..max_nonce` for one that satisfies the current
    /// difficulty, mutating `block.header.nonce`/`hash` on success.
    ///
    /// Checks the stop flag and updates hash-rate statistics every 10,000
    /// attempts, matching the cadence mining operators actually watch.
    pub fn mine_block(&self, block: &mut Block, max_nonce: u64) -> ConsensusResult<u64> {
        self.start_mining();
        self.stats.lock().mining_started_at.get_or_insert_with(Instant::now);

        let difficulty = self.current_difficulty();
        let mut nonce: u64 = 0;

        while nonce < max_nonce {
            if self.stop_requested.load(Ordering::Relaxed) {
                self.is_mining.store(false, Ordering::Relaxed);
                return Err(ConsensusError::MiningStopped);
            }

            let hash = compute_header_hash(
                block.header.version,
                &block.header.previous_hash,
                &block.header.merkle_root,
                block.header.timestamp,
                nonce,
                difficulty,
                block.header.height,
                &block.header.validator,
                &block.header.state_root,
            );
            self.total_hashes.fetch_add(1, Ordering::Relaxed);

            if meets_difficulty(&hash, difficulty) {
                block.header.nonce = nonce;
                block.header.difficulty = difficulty;
                block.header.hash = block.compute_hash();
                self.blocks_mined.fetch_add(1, Ordering::Relaxed);
                self.is_mining.store(false, Ordering::Relaxed);
                return Ok(nonce);
            }

            nonce += 1;
        }

        self.is_mining.store(false, Ordering::Relaxed);
        Err(ConsensusError::NoncesExhausted(max_nonce))
    }

    /// Retargets difficulty given the most recently observed block time, in
    /// seconds. Mirrors a miner's intuition more than a strict moving
    /// average: way too fast or way too slow snaps hard (double/halve),
    /// otherwise nudge by one.
    pub fn adjust_difficulty(&self, actual_block_time: u32) {
        let current = self.current_difficulty();
        let target = self.target_block_time;

        let next = if actual_block_time < target / 2 {
            current.saturating_mul(2)
        } else if actual_block_time > target.saturating_mul(2) {
            (current / 2).max(1)
        } else if actual_block_time < target {
            current.saturating_add(1)
        } else if actual_block_time > target {
            (current.saturating_sub(1)).max(1)
        } else {
            current
        };

        self.current_difficulty.store(next.max(1), Ordering::Relaxed);
    }

    /// Average hashes per second since mining started, `0.0` before the
    /// first `mine_block` call or if no time has elapsed yet.
    pub fn hash_rate(&self) -> f64 {
        let stats = self.stats.lock();
        match stats.mining_started_at {
            Some(start) => {
                let elapsed = start.elapsed().as_secs_f64();
                if elapsed <= 0.0 {
                    0.0
                } else {
                    self.total_hashes() as f64 / elapsed
                }
            }
            None => 0.0,
        }
    }

    pub fn start_mining(&self) {
        self.is_mining.store(true, Ordering::Relaxed);
        self.stop_requested.store(false, Ordering::Relaxed);
    }

    pub fn stop_mining(&self) {
        self.stop_requested.store(true, Ordering::Relaxed);
    }

    pub fn is_mining(&self) -> bool {
        self.is_mining.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Block;

    fn mined_chain_block(difficulty: u32) -> Block {
        let genesis = Block::genesis();
        let mut block = Block::new(&genesis, vec![], "validator-1".to_string(), [7u8; 32], difficulty);
        let pow = ProofOfWork::new(difficulty, 10);
        pow.mine_block(&mut block, 1_000_000).expect("mining should succeed at low difficulty");
        block
    }

    #[test]
    fn target_for_zero_difficulty_is_all_ones() {
        assert_eq!(target_for_difficulty(0), [0xffu8; 32]);
    }

    #[test]
    fn target_gets_smaller_as_difficulty_rises() {
        let low = target_for_difficulty(4);
        let high = target_for_difficulty(20);
        assert!(high < low);
    }

    #[test]
    fn target_for_full_difficulty_is_all_zero() {
        assert_eq!(target_for_difficulty(256), [0u8; 32]);
    }

    #[test]
    fn genesis_block_skips_target_check() {
        let pow = ProofOfWork::new(250, 10);
        let genesis = Block::genesis();
        assert!(pow.validate_block(&genesis).is_ok());
    }

    #[test]
    fn mine_block_produces_a_block_that_validates() {
        let pow = ProofOfWork::new(4, 10);
        let block = mined_chain_block(4);
        assert!(pow.validate_block(&block).is_ok());
    }

    #[test]
    fn mining_increments_blocks_mined_and_total_hashes() {
        let pow = ProofOfWork::new(4, 10);
        let genesis = Block::genesis();
        let mut block = Block::new(&genesis, vec![], "validator-1".to_string(), [1u8; 32], 4);
        pow.mine_block(&mut block, 1_000_000).unwrap();
        assert_eq!(pow.blocks_mined(), 1);
        assert!(pow.total_hashes() >= 1);
    }

    #[test]
    fn mining_past_max_nonce_fails() {
        let pow = ProofOfWork::new(250, 10);
        let genesis = Block::genesis();
        let mut block = Block::new(&genesis, vec![], "validator-1".to_string(), [1u8; 32], 250);
        let result = pow.mine_block(&mut block, 5);
        assert!(matches!(result, Err(ConsensusError::NoncesExhausted(5))));
    }

    #[test]
    fn stopping_mining_aborts_the_search() {
        let pow = ProofOfWork::new(250, 10);
        pow.stop_mining();
        let genesis = Block::genesis();
        let mut block = Block::new(&genesis, vec![], "validator-1".to_string(), [1u8; 32], 250);
        let result = pow.mine_block(&mut block, 1_000_000);
        assert!(matches!(result, Err(ConsensusError::MiningStopped)));
    }

    #[test]
    fn tampered_nonce_after_mining_fails_validation() {
        let pow = ProofOfWork::new(4, 10);
        let mut block = mined_chain_block(4);
        block.header.nonce = block.header.nonce.wrapping_add(1);
        assert!(pow.validate_block(&block).is_err());
    }

    #[test]
    fn difficulty_doubles_when_blocks_come_in_under_half_target() {
        let pow = ProofOfWork::new(4, 10);
        pow.adjust_difficulty(2);
        assert_eq!(pow.current_difficulty(), 8);
    }

    #[test]
    fn difficulty_halves_when_blocks_come_in_over_double_target() {
        let pow = ProofOfWork::new(8, 10);
        pow.adjust_difficulty(25);
        assert_eq!(pow.current_difficulty(), 4);
    }

    #[test]
    fn difficulty_nudges_up_when_slightly_fast() {
        let pow = ProofOfWork::new(10, 10);
        pow.adjust_difficulty(8);
        assert_eq!(pow.current_difficulty(), 11);
    }

    #[test]
    fn difficulty_nudges_down_when_slightly_slow() {
        let pow = ProofOfWork::new(10, 10);
        pow.adjust_difficulty(12);
        assert_eq!(pow.current_difficulty(), 9);
    }

    #[test]
    fn difficulty_never_drops_below_one() {
        let pow = ProofOfWork::new(1, 10);
        pow.adjust_difficulty(100);
        assert_eq!(pow.current_difficulty(), 1);
    }

    #[test]
    fn hash_rate_is_zero_before_mining() {
        let pow = ProofOfWork::new(4, 10);
        assert_eq!(pow.hash_rate(), 0.0);
    }

    #[test]
    fn mining_flag_clears_after_success() {
        let pow = ProofOfWork::new(4, 10);
        let genesis = Block::genesis();
        let mut block = Block::new(&genesis, vec![], "validator-1".to_string(), [1u8; 32], 4);
        pow.mine_block(&mut block, 1_000_000).unwrap();
        assert!(!pow.is_mining());
    }
}
