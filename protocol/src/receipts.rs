//! # Execution Receipts
//!
//! Every transaction the VM execution harness applies produces a `Receipt`;
//! every block produces a `BlockReceipt` aggregating its transactions'
//! receipts. These are the durable record of "what actually happened" —
//! gas spent, whether it succeeded, what a contract call returned, what
//! logs it emitted.

use serde::{Deserialize, Serialize};

use crate::transaction::types::Address;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ReceiptError {
    #[error("receipt has an empty transaction hash")]
    EmptyTxHash,
    #[error("receipt has an all-zero block hash")]
    EmptyBlockHash,
    #[error("receipt has no sender")]
    MissingFrom,
    #[error("successful receipt reports zero gas used")]
    ZeroGasOnSuccess,
    #[error("block receipt has {actual} receipts but the block declared {expected} transactions")]
    ReceiptCountMismatch { expected: usize, actual: usize },
    #[error("block receipt's total_gas_used ({stored}) doesn't match the sum of its receipts ({recomputed})")]
    GasTotalMismatch { stored: u64, recomputed: u64 },
}

/// A single log entry emitted by a contract call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<[u8; 32]>,
    pub data: Vec<u8>,
}

/// The outcome of executing one transaction within a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: String,
    pub block_hash: [u8; 32],
    pub block_number: u64,
    pub tx_index: usize,
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub gas_used: u64,
    pub gas_price: u64,
    /// Sum of `gas_used` across this transaction and every transaction
    /// before it in the same block.
    pub cumulative_gas_used: u64,
    pub success: bool,
    pub error_message: Option<String>,
    pub return_data: Vec<u8>,
    /// Set only for a successful `ContractDeploy`.
    pub contract_address: Option<Address>,
    pub logs: Vec<LogEntry>,
    pub timestamp: u64,
}

impl Receipt {
    /// The fee actually paid: `gas_used * gas_price`.
    pub fn fee(&self) -> u128 {
        self.gas_used as u128 * self.gas_price as u128
    }

    /// Checks the receipt's internal consistency: a non-empty tx hash and
    /// block hash, a sender, and non-zero gas usage on success.
    pub fn validate(&self) -> Result<(), ReceiptError> {
        if self.tx_hash.is_empty() {
            return Err(ReceiptError::EmptyTxHash);
        }
        if self.block_hash == [0u8; 32] {
            return Err(ReceiptError::EmptyBlockHash);
        }
        if self.from.is_none() {
            return Err(ReceiptError::MissingFrom);
        }
        if self.success && self.gas_used == 0 {
            return Err(ReceiptError::ZeroGasOnSuccess);
        }
        Ok(())
    }
}

/// Aggregates every transaction receipt produced while executing one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockReceipt {
    pub block_hash: [u8; 32],
    pub block_number: u64,
    pub receipts: Vec<Receipt>,
    pub total_gas_used: u64,
}

impl BlockReceipt {
    /// Builds a block receipt from its per-transaction receipts, recomputing
    /// `total_gas_used` rather than trusting a caller-supplied value.
    pub fn new(block_hash: [u8; 32], block_number: u64, receipts: Vec<Receipt>) -> Self {
        let total_gas_used = receipts.iter().map(|r| r.gas_used).sum();
        Self {
            block_hash,
            block_number,
            receipts,
            total_gas_used,
        }
    }

    /// Number of transactions that succeeded.
    pub fn success_count(&self) -> usize {
        self.receipts.iter().filter(|r| r.success).count()
    }

    /// Number of transactions that failed.
    pub fn failure_count(&self) -> usize {
        self.receipts.iter().filter(|r| !r.success).count()
    }

    /// Total fees paid across every receipt in the block.
    pub fn total_fees(&self) -> u128 {
        self.receipts.iter().map(|r| r.fee()).sum()
    }

    /// Checks that this block receipt actually accounts for every declared
    /// transaction and that `total_gas_used` hasn't drifted from its
    /// receipts.
    pub fn validate(&self, declared_tx_count: usize) -> Result<(), ReceiptError> {
        if self.receipts.len() != declared_tx_count {
            return Err(ReceiptError::ReceiptCountMismatch {
                expected: declared_tx_count,
                actual: self.receipts.len(),
            });
        }
        let recomputed: u64 = self.receipts.iter().map(|r| r.gas_used).sum();
        if recomputed != self.total_gas_used {
            return Err(ReceiptError::GasTotalMismatch {
                stored: self.total_gas_used,
                recomputed,
            });
        }
        Ok(())
    }
}
