//! # Block Structure
//!
//! A block is the atomic unit of consensus. Each block contains an ordered
//! list of transactions, a link to the previous block, and the header fields
//! proof-of-work mining and validation operate on.
//!
//! ## Block Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  BlockHeader                                │
//! │  ├── version: u32                           │
//! │  ├── previous_hash: [u8; 32]                 │
//! │  ├── merkle_root: [u8; 32]                   │
//! │  ├── timestamp: u64       (seconds)          │
//! │  ├── nonce: u64                              │
//! │  ├── difficulty: u32                         │
//! │  ├── height: u64                             │
//! │  ├── hash: [u8; 32]       (BLAKE3 of header) │
//! │  ├── validator: String                       │
//! │  ├── state_root: [u8; 32]                    │
//! │  └── signature: Vec<u8>                      │
//! ├─────────────────────────────────────────────┤
//! │  transactions: Vec<Transaction>             │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! `validator`/`state_root`/`signature` are carried alongside the
//! proof-of-work fields so the same header works whether a block was mined
//! or proposed by a proof-of-stake validator; the signature is not included
//! in the hash (it signs the hash, not the other way around).
//!
//! ## Merkle Root
//!
//! `merkle_root` is computed over transaction ids via [`super::merkle::root`].
//! Empty blocks have a `merkle_root` of all zeros.

use serde::{Deserialize, Serialize};

use crate::crypto::hash::blake3_hash;
use crate::storage::merkle;
use crate::transaction::Transaction;

/// Coinbase message embedded in the genesis block state root.
/// This serves as the protocol's birth certificate — a timestamped,
/// tamper-evident record of when and why the network was created.
/// (Satoshi had "The Times 03/Jan/2009"; we have this.)
pub const GENESIS_COINBASE_MESSAGE: &[u8] =
    b"ALAS/2026: The future of payments belongs to everyone";

// ---------------------------------------------------------------------------
// BlockHeader
// ---------------------------------------------------------------------------

/// Lightweight block header — everything except the transaction list.
///
/// Light clients sync headers to verify the chain without downloading
/// full block data. The header contains the Merkle root of transactions,
/// so a client can verify individual transaction inclusion via Merkle proofs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Protocol version at the time this block was produced.
    pub version: u32,
    /// Hash of the previous block's header. All zeros for genesis.
    pub previous_hash: [u8; 32],
    /// Merkle root of the transactions in this block.
    pub merkle_root: [u8; 32],
    /// Unix timestamp in seconds when this block was produced.
    pub timestamp: u64,
    /// Proof-of-work nonce. Meaningless (left at zero) for validator-proposed
    /// blocks.
    pub nonce: u64,
    /// Proof-of-work difficulty target this block was mined against.
    pub difficulty: u32,
    /// Block height (0-indexed, genesis = 0).
    pub height: u64,
    /// BLAKE3 hash of this block's header fields.
    pub hash: [u8; 32],
    /// NOVA address (hex public key) of the validator/miner that produced
    /// this block.
    pub validator: String,
    /// Root hash of the state tree after applying this block's transactions.
    pub state_root: [u8; 32],
    /// Ed25519 signature of the proposer over the block hash. Empty for
    /// proof-of-work blocks, which are authenticated by the hash meeting the
    /// difficulty target instead.
    pub signature: Vec<u8>,
}

impl BlockHeader {
    /// Return the block hash as a hex string.
    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }

    /// Return the previous block's hash as a hex string.
    pub fn previous_hash_hex(&self) -> String {
        hex::encode(self.previous_hash)
    }
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// A full block: header + ordered transaction list.
///
/// Blocks are immutable after construction. The hash is computed from
/// the header fields (excluding the signature), and the signature
/// covers the hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block metadata and chain linkage.
    pub header: BlockHeader,
    /// Ordered list of transactions included in this block.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Construct the genesis block.
    ///
    /// The genesis block has height 0, an all-zero previous hash, an empty
    /// transaction list, and a well-known validator address. The state_root
    /// represents the initial state of the network (e.g., pre-minted supply).
    pub fn genesis() -> Self {
        let genesis_validator =
            "nova:0000000000000000000000000000000000000000000000000000000000000000".to_string();

        let timestamp = 0u64; // Epoch zero — the dawn of the chain.
        let state_root = blake3_hash(GENESIS_COINBASE_MESSAGE);
        let merkle_root = merkle::EMPTY_ROOT;

        let hash = compute_header_hash(
            1,
            &[0u8; 32],
            &merkle_root,
            timestamp,
            0,
            crate::config::PowConfig::default().initial_difficulty,
            0,
            &genesis_validator,
            &state_root,
        );

        Block {
            header: BlockHeader {
                version: 1,
                previous_hash: [0u8; 32],
                merkle_root,
                timestamp,
                nonce: 0,
                difficulty: crate::config::PowConfig::default().initial_difficulty,
                height: 0,
                hash,
                validator: genesis_validator,
                state_root,
                signature: Vec::new(),
            },
            transactions: Vec::new(),
        }
    }

    /// Construct a new block linked to a parent.
    ///
    /// Computes the transaction Merkle root and the block hash from the
    /// header fields. `nonce` is left at zero and `signature` empty — a
    /// proof-of-work miner fills in the nonce via
    /// [`crate::consensus::pow::ProofOfWork::mine_block`], a proof-of-stake
    /// proposer signs separately after construction.
    pub fn new(
        parent: &Block,
        transactions: Vec<Transaction>,
        validator: String,
        state_root: [u8; 32],
        difficulty: u32,
    ) -> Self {
        let height = parent.header.height + 1;
        let previous_hash = parent.header.hash;
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let merkle_root = transaction_merkle_root(&transactions);
        let hash = compute_header_hash(
            parent.header.version,
            &previous_hash,
            &merkle_root,
            timestamp,
            0,
            difficulty,
            height,
            &validator,
            &state_root,
        );

        Block {
            header: BlockHeader {
                version: parent.header.version,
                previous_hash,
                merkle_root,
                timestamp,
                nonce: 0,
                difficulty,
                height,
                hash,
                validator,
                state_root,
                signature: Vec::new(),
            },
            transactions,
        }
    }

    /// Recompute the block hash from header fields.
    ///
    /// Use this to verify that `header.hash` matches the actual content, or
    /// after mutating `nonce` during mining.
    pub fn compute_hash(&self) -> [u8; 32] {
        compute_header_hash(
            self.header.version,
            &self.header.previous_hash,
            &self.header.merkle_root,
            self.header.timestamp,
            self.header.nonce,
            self.header.difficulty,
            self.header.height,
            &self.header.validator,
            &self.header.state_root,
        )
    }

    /// Verify block integrity: hash consistency, transaction Merkle root,
    /// and structural invariants.
    ///
    /// This does NOT verify the proof-of-work target or a validator
    /// signature — those are consensus-specific and live in
    /// `crate::consensus`. It checks:
    ///
    /// 1. The stored hash matches the recomputed hash.
    /// 2. The stored `merkle_root` matches the recomputed root.
    /// 3. Genesis blocks have height 0 and an all-zero `previous_hash`.
    pub fn verify(&self) -> Result<(), String> {
        let expected_hash = self.compute_hash();
        if self.header.hash != expected_hash {
            return Err(format!(
                "block {} hash mismatch: stored={}, computed={}",
                self.header.height,
                hex::encode(self.header.hash),
                hex::encode(expected_hash),
            ));
        }

        let expected_root = transaction_merkle_root(&self.transactions);
        if self.header.merkle_root != expected_root {
            return Err(format!(
                "block {} merkle_root mismatch: stored={}, computed={}",
                self.header.height,
                hex::encode(self.header.merkle_root),
                hex::encode(expected_root),
            ));
        }

        if self.header.height == 0 && self.header.previous_hash != [0u8; 32] {
            return Err("genesis block must have an all-zero previous_hash".to_string());
        }

        Ok(())
    }

    /// Return the block height.
    pub fn height(&self) -> u64 {
        self.header.height
    }

    /// Return the number of transactions in this block.
    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }

    /// Return the block hash as a hex string.
    pub fn hash_hex(&self) -> String {
        hex::encode(self.header.hash)
    }
}

// ---------------------------------------------------------------------------
// Hash Computation
// ---------------------------------------------------------------------------

/// Compute the BLAKE3 hash of a block header from its constituent fields.
///
/// Covers every field used for consensus agreement: version, previous_hash,
/// merkle_root, timestamp, nonce, difficulty, height, validator, state_root.
/// The signature is excluded (it signs this hash).
#[allow(clippy::too_many_arguments)]
pub(crate) fn compute_header_hash(
    version: u32,
    previous_hash: &[u8; 32],
    merkle_root: &[u8; 32],
    timestamp: u64,
    nonce: u64,
    difficulty: u32,
    height: u64,
    validator: &str,
    state_root: &[u8; 32],
) -> [u8; 32] {
    let mut preimage = Vec::with_capacity(160);
    preimage.extend_from_slice(&version.to_le_bytes());
    preimage.extend_from_slice(previous_hash);
    preimage.extend_from_slice(merkle_root);
    preimage.extend_from_slice(&timestamp.to_le_bytes());
    preimage.extend_from_slice(&nonce.to_le_bytes());
    preimage.extend_from_slice(&difficulty.to_le_bytes());
    preimage.extend_from_slice(&height.to_le_bytes());
    preimage.extend_from_slice(validator.as_bytes());
    preimage.extend_from_slice(state_root);
    blake3_hash(&preimage)
}

/// Computes the transaction Merkle root for a block: the binary Merkle tree
/// over each transaction's BLAKE3-hashed id bytes.
pub fn transaction_merkle_root(transactions: &[Transaction]) -> [u8; 32] {
    let leaves: Vec<[u8; 32]> = transactions
        .iter()
        .map(|tx| blake3_hash(tx.id.as_bytes()))
        .collect();
    merkle::root(&leaves)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::builder::TransactionBuilder;
    use crate::transaction::types::{Address, Input, Output, TransactionKind};

    fn make_test_tx(seed: u8) -> Transaction {
        TransactionBuilder::new(TransactionKind::Regular)
            .input(Input::new(hex::encode([seed; 32]), 0))
            .output(Output::new(100, Address::new([seed; 32])))
            .fee(10)
            .timestamp(1_000_000)
            .build()
    }

    #[test]
    fn genesis_block_properties() {
        let genesis = Block::genesis();
        assert_eq!(genesis.height(), 0);
        assert_eq!(genesis.header.previous_hash, [0u8; 32]);
        assert_eq!(genesis.header.timestamp, 0);
        assert!(genesis.transactions.is_empty());
        assert!(genesis.header.signature.is_empty());
        assert_eq!(genesis.header.nonce, 0);
    }

    #[test]
    fn genesis_block_verifies() {
        assert!(Block::genesis().verify().is_ok());
    }

    #[test]
    fn genesis_hash_is_deterministic() {
        let g1 = Block::genesis();
        let g2 = Block::genesis();
        assert_eq!(g1.header.hash, g2.header.hash);
    }

    #[test]
    fn new_block_links_to_parent() {
        let genesis = Block::genesis();
        let block1 = Block::new(&genesis, vec![], "nova:validator1".to_string(), [1u8; 32], 4);

        assert_eq!(block1.height(), 1);
        assert_eq!(block1.header.previous_hash, genesis.header.hash);
        assert_eq!(block1.header.state_root, [1u8; 32]);
        assert_eq!(block1.header.difficulty, 4);
    }

    #[test]
    fn new_block_verifies() {
        let genesis = Block::genesis();
        let txs = vec![make_test_tx(1), make_test_tx(2)];
        let block = Block::new(&genesis, txs, "nova:validator".to_string(), [42u8; 32], 4);

        assert!(block.verify().is_ok());
    }

    #[test]
    fn mutating_nonce_requires_rehash() {
        let genesis = Block::genesis();
        let mut block = Block::new(&genesis, vec![], "nova:val".to_string(), [0u8; 32], 4);
        block.header.nonce = 42;
        assert!(block.verify().is_err(), "stale hash after nonce change must fail");
        block.header.hash = block.compute_hash();
        assert!(block.verify().is_ok());
    }

    #[test]
    fn tampered_block_fails_verification() {
        let genesis = Block::genesis();
        let mut block = Block::new(&genesis, vec![], "nova:val".to_string(), [0u8; 32], 4);

        block.header.hash[0] ^= 0xFF;
        assert!(block.verify().is_err());
    }

    #[test]
    fn tampered_merkle_root_fails_verification() {
        let genesis = Block::genesis();
        let txs = vec![make_test_tx(1)];
        let mut block = Block::new(&genesis, txs, "nova:val".to_string(), [0u8; 32], 4);

        block.header.merkle_root[0] ^= 0xFF;
        block.header.hash = block.compute_hash();
        assert!(block.verify().is_err());
    }

    #[test]
    fn merkle_root_empty_for_empty_block() {
        let root = transaction_merkle_root(&[]);
        assert_eq!(root, merkle::EMPTY_ROOT);
    }

    #[test]
    fn merkle_root_deterministic() {
        let txs = vec![make_test_tx(1), make_test_tx(2), make_test_tx(3)];
        assert_eq!(transaction_merkle_root(&txs), transaction_merkle_root(&txs));
    }

    #[test]
    fn merkle_root_order_sensitive() {
        let tx1 = make_test_tx(1);
        let tx2 = make_test_tx(2);

        let root_12 = transaction_merkle_root(&[tx1.clone(), tx2.clone()]);
        let root_21 = transaction_merkle_root(&[tx2, tx1]);
        assert_ne!(root_12, root_21, "merkle root must be order-sensitive");
    }

    #[test]
    fn block_chain_of_three() {
        let b0 = Block::genesis();
        let b1 = Block::new(&b0, vec![make_test_tx(1)], "nova:v1".to_string(), [1u8; 32], 4);
        let b2 = Block::new(&b1, vec![make_test_tx(2)], "nova:v2".to_string(), [2u8; 32], 4);

        assert_eq!(b2.height(), 2);
        assert_eq!(b2.header.previous_hash, b1.header.hash);
        assert_eq!(b1.header.previous_hash, b0.header.hash);

        assert!(b0.verify().is_ok());
        assert!(b1.verify().is_ok());
        assert!(b2.verify().is_ok());
    }

    #[test]
    fn block_serialization_roundtrip() {
        let genesis = Block::genesis();
        let json = serde_json::to_string(&genesis).expect("serialize");
        let recovered: Block = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(genesis, recovered);
    }
}
