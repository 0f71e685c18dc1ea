//! Transaction execution against the state trie.
//!
//! ## Value movement
//!
//! This crate's transactions are UTXO-shaped (inputs reference a previous
//! output by hash/index) but the authoritative ledger is the account-based
//! [`StateTrie`]. The harness bridges the two the same way a wallet would:
//! it treats the address recovered from a `Regular` transaction's first
//! input's public key as the payer, debits it the total output value plus
//! the fee, and credits each output's `recipient_address`. There's no
//! separate unspent-output index — "double spend" protection for `Regular`
//! transactions comes entirely from the payer's account balance check.
//!
//! `Coinbase` outputs are credited with no corresponding debit (they mint
//! value). `ContractDeploy`/`ContractCall` hand off to a [`ContractRuntime`]
//! after the same debit/credit bookkeeping for any attached value transfer.

use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_GAS_LIMIT, DEFAULT_GAS_PRICE, REGULAR_TX_GAS};
use crate::receipts::{BlockReceipt, LogEntry, Receipt};
use crate::storage::{Block, StateTrie};
use crate::transaction::types::{Address, TransactionKind};
use crate::transaction::Transaction;

/// Errors raised by the execution harness.
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    #[error("block has no transactions")]
    EmptyBlock,

    #[error("transaction {tx_hash} failed: {reason}")]
    TransactionFailed { tx_hash: String, reason: String },

    #[error("block gas limit {limit} exceeded at transaction {tx_hash} (would use {attempted})")]
    GasLimitExceeded {
        tx_hash: String,
        limit: u64,
        attempted: u64,
    },

    #[error("snapshot bookkeeping error: {0}")]
    Snapshot(#[from] crate::storage::trie::TrieError),
}

/// Output of a contract deploy or call, handed back to the harness so it can
/// build a [`Receipt`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeOutput {
    pub gas_used: u64,
    pub return_data: Vec<u8>,
    pub logs: Vec<LogEntry>,
    /// Set by `deploy` to the freshly assigned contract address.
    pub contract_address: Option<Address>,
}

/// A pluggable contract execution backend. The harness never interprets
/// bytecode itself — it hands deploys and calls off to whatever runtime the
/// node is configured with.
pub trait ContractRuntime: Send + Sync {
    /// Deploys `bytecode` on behalf of `deployer`, returning the assigned
    /// contract address in `RuntimeOutput::contract_address`.
    fn deploy(
        &self,
        trie: &StateTrie,
        deployer: &Address,
        bytecode: &[u8],
    ) -> Result<RuntimeOutput, String>;

    /// Invokes `contract` with `input` on behalf of `caller`.
    fn call(
        &self,
        trie: &StateTrie,
        caller: &Address,
        contract: &Address,
        input: &[u8],
    ) -> Result<RuntimeOutput, String>;
}

/// A minimal runtime used in tests and as a default: `deploy` stores the
/// bytecode verbatim and charges gas proportional to its length; `call`
/// requires the target to have code and echoes the input back as return
/// data. No actual bytecode interpretation happens.
#[derive(Debug, Default)]
pub struct StubRuntime;

impl ContractRuntime for StubRuntime {
    fn deploy(
        &self,
        trie: &StateTrie,
        deployer: &Address,
        bytecode: &[u8],
    ) -> Result<RuntimeOutput, String> {
        if bytecode.is_empty() {
            return Err("cannot deploy empty bytecode".to_string());
        }
        let contract_address =
            Address::from_public_key_bytes(&[deployer.as_bytes().as_slice(), bytecode].concat());
        trie.set_code(&contract_address, bytecode.to_vec());
        Ok(RuntimeOutput {
            gas_used: 32_000 + bytecode.len() as u64 * 20,
            return_data: Vec::new(),
            logs: Vec::new(),
            contract_address: Some(contract_address),
        })
    }

    fn call(
        &self,
        trie: &StateTrie,
        _caller: &Address,
        contract: &Address,
        input: &[u8],
    ) -> Result<RuntimeOutput, String> {
        if trie.get_code(contract).is_none() {
            return Err(format!("no code deployed at {}", contract.to_hex()));
        }
        Ok(RuntimeOutput {
            gas_used: 21_000 + input.len() as u64 * 16,
            return_data: input.to_vec(),
            logs: Vec::new(),
            contract_address: None,
        })
    }
}

/// Applies blocks against a [`StateTrie`], producing [`BlockReceipt`]s.
pub struct ExecutionHarness<R: ContractRuntime> {
    trie: std::sync::Arc<StateTrie>,
    runtime: R,
    gas_limit: u64,
    gas_price: u64,
}

impl<R: ContractRuntime> ExecutionHarness<R> {
    pub fn new(trie: std::sync::Arc<StateTrie>, runtime: R) -> Self {
        Self {
            trie,
            runtime,
            gas_limit: DEFAULT_GAS_LIMIT,
            gas_price: DEFAULT_GAS_PRICE,
        }
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    pub fn with_gas_price(mut self, gas_price: u64) -> Self {
        self.gas_price = gas_price;
        self
    }

    fn payer_address(tx: &Transaction) -> Option<Address> {
        let public_key_hex = tx.inputs.first()?.public_key.as_ref()?;
        let bytes = hex::decode(public_key_hex).ok()?;
        Some(Address::from_public_key_bytes(&bytes))
    }

    fn total_output_value(tx: &Transaction) -> u128 {
        tx.outputs.iter().map(|o| o.value as u128).sum()
    }

    /// Applies one transaction's value movement and/or contract effect.
    /// Returns the gas used and any contract-runtime output. Any `Err`
    /// triggers a whole-block rollback in `execute_block`.
    fn apply_transaction(&self, tx: &Transaction) -> Result<(u64, RuntimeOutput), String> {
        match tx.kind {
            TransactionKind::Coinbase => {
                for output in &tx.outputs {
                    let balance = self.trie.get_balance(&output.recipient_address);
                    self.trie
                        .set_balance(&output.recipient_address, balance + output.value as u128);
                }
                Ok((REGULAR_TX_GAS, RuntimeOutput::default()))
            }
            TransactionKind::Regular => {
                let payer = Self::payer_address(tx)
                    .ok_or_else(|| "regular transaction has no signing public key".to_string())?;
                let debit = Self::total_output_value(tx) + tx.fee as u128;
                let balance = self.trie.get_balance(&payer);
                if balance < debit {
                    return Err(format!(
                        "insufficient balance: have {balance}, need {debit}"
                    ));
                }
                self.trie.set_balance(&payer, balance - debit);
                for output in &tx.outputs {
                    let balance = self.trie.get_balance(&output.recipient_address);
                    self.trie
                        .set_balance(&output.recipient_address, balance + output.value as u128);
                }
                self.trie.increment_nonce(&payer);
                Ok((REGULAR_TX_GAS, RuntimeOutput::default()))
            }
            TransactionKind::ContractDeploy => {
                let deployer = Self::payer_address(tx)
                    .ok_or_else(|| "contract deploy has no signing public key".to_string())?;
                let bytecode = tx
                    .payload
                    .as_ref()
                    .ok_or_else(|| "contract deploy has no bytecode payload".to_string())?;
                let output = self
                    .runtime
                    .deploy(&self.trie, &deployer, bytecode)?;
                self.trie.increment_nonce(&deployer);
                let gas_used = output.gas_used;
                Ok((gas_used, output))
            }
            TransactionKind::ContractCall => {
                let caller = Self::payer_address(tx)
                    .ok_or_else(|| "contract call has no signing public key".to_string())?;
                let contract = tx
                    .outputs
                    .first()
                    .map(|o| o.recipient_address)
                    .ok_or_else(|| "contract call has no target output".to_string())?;
                let input = tx.payload.clone().unwrap_or_default();
                let output = self.runtime.call(&self.trie, &caller, &contract, &input)?;
                self.trie.increment_nonce(&caller);
                let gas_used = output.gas_used;
                Ok((gas_used, output))
            }
        }
    }

    /// Applies every transaction in `block` against the trie, atomically.
    ///
    /// Rejects blocks with no transactions. Any transaction failing (bad
    /// signerless input, insufficient balance, runtime error, or exceeding
    /// the remaining block gas budget) restores the trie to its
    /// pre-execution snapshot and returns the triggering error — none of
    /// the block's transactions take effect.
    pub fn execute_block(&self, block: &Block) -> Result<BlockReceipt, VmError> {
        if block.transactions.is_empty() {
            return Err(VmError::EmptyBlock);
        }

        let snapshot_name = format!("vm-exec:{}", block.header.hash_hex());
        self.trie.create_snapshot(&snapshot_name);

        match self.execute_transactions(block) {
            Ok(receipts) => {
                self.trie.delete_snapshot(&snapshot_name)?;
                Ok(BlockReceipt::new(
                    block.header.hash,
                    block.header.height,
                    receipts,
                ))
            }
            Err(e) => {
                self.trie.restore_snapshot(&snapshot_name)?;
                self.trie.delete_snapshot(&snapshot_name)?;
                Err(e)
            }
        }
    }

    fn execute_transactions(&self, block: &Block) -> Result<Vec<Receipt>, VmError> {
        let mut receipts = Vec::with_capacity(block.transactions.len());
        let mut cumulative_gas_used = 0u64;

        for (tx_index, tx) in block.transactions.iter().enumerate() {
            let (gas_used, outcome) = self.apply_transaction(tx).map_err(|reason| {
                VmError::TransactionFailed {
                    tx_hash: tx.id.clone(),
                    reason,
                }
            })?;

            cumulative_gas_used += gas_used;
            if cumulative_gas_used > self.gas_limit {
                return Err(VmError::GasLimitExceeded {
                    tx_hash: tx.id.clone(),
                    limit: self.gas_limit,
                    attempted: cumulative_gas_used,
                });
            }

            receipts.push(Receipt {
                tx_hash: tx.id.clone(),
                block_hash: block.header.hash,
                block_number: block.header.height,
                tx_index,
                from: Self::payer_address(tx),
                to: tx.outputs.first().map(|o| o.recipient_address),
                gas_used,
                gas_price: self.gas_price,
                cumulative_gas_used,
                success: true,
                error_message: None,
                return_data: outcome.return_data,
                contract_address: outcome.contract_address,
                logs: outcome.logs,
                timestamp: block.header.timestamp,
            });
        }

        Ok(receipts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::types::{Input, Output};
    use crate::transaction::TransactionBuilder;
    use std::sync::Arc;

    fn keypair_and_address() -> (crate::crypto::keys::NovaKeypair, Address) {
        let kp = crate::crypto::keys::NovaKeypair::generate();
        let address = Address::from_public_key_bytes(&kp.public_key_bytes());
        (kp, address)
    }

    fn signed_input(public_key_hex: &str) -> Input {
        let mut input = Input::new("0".repeat(64), 0);
        input.public_key = Some(public_key_hex.to_string());
        input.signature = Some("unused-in-harness-tests".to_string());
        input
    }

    fn coinbase_tx(to: Address, value: u64) -> Transaction {
        TransactionBuilder::new(TransactionKind::Coinbase)
            .output(Output::new(value, to))
            .build()
    }

    fn harness() -> ExecutionHarness<StubRuntime> {
        ExecutionHarness::new(Arc::new(StateTrie::new()), StubRuntime)
    }

    fn chain_block(transactions: Vec<Transaction>) -> Block {
        let genesis = Block::genesis();
        Block::new(&genesis, transactions, "validator-1".to_string(), [0u8; 32], 1)
    }

    #[test]
    fn empty_block_is_rejected() {
        let h = harness();
        let block = chain_block(vec![]);
        assert!(matches!(h.execute_block(&block), Err(VmError::EmptyBlock)));
    }

    #[test]
    fn coinbase_credits_recipient_with_no_debit() {
        let h = harness();
        let (_, bob) = keypair_and_address();
        let block = chain_block(vec![coinbase_tx(bob, 5_000)]);
        let receipt = h.execute_block(&block).unwrap();
        assert_eq!(receipt.success_count(), 1);
        assert_eq!(h.trie.get_balance(&bob), 5_000);
    }

    #[test]
    fn regular_transfer_moves_balance_and_charges_fee() {
        let h = harness();
        let (alice_kp, alice) = keypair_and_address();
        let (_, bob) = keypair_and_address();
        h.trie.set_balance(&alice, 10_000);

        let tx = TransactionBuilder::new(TransactionKind::Regular)
            .input(signed_input(&hex::encode(alice_kp.public_key_bytes())))
            .output(Output::new(3_000, bob))
            .fee(100)
            .build();

        let block = chain_block(vec![tx]);
        h.execute_block(&block).unwrap();

        assert_eq!(h.trie.get_balance(&alice), 10_000 - 3_000 - 100);
        assert_eq!(h.trie.get_balance(&bob), 3_000);
        assert_eq!(h.trie.get_nonce(&alice), 1);
    }

    #[test]
    fn insufficient_balance_rolls_back_entire_block() {
        let h = harness();
        let (alice_kp, alice) = keypair_and_address();
        let (_, bob) = keypair_and_address();
        h.trie.set_balance(&alice, 100);

        let good = coinbase_tx(bob, 1_000);
        let bad = TransactionBuilder::new(TransactionKind::Regular)
            .input(signed_input(&hex::encode(alice_kp.public_key_bytes())))
            .output(Output::new(3_000, bob))
            .fee(100)
            .build();

        let block = chain_block(vec![good, bad]);
        let result = h.execute_block(&block);
        assert!(result.is_err());

        // Even the coinbase tx that came before the failure must be rolled back.
        assert_eq!(h.trie.get_balance(&bob), 0);
        assert_eq!(h.trie.get_balance(&alice), 100);
    }

    #[test]
    fn contract_deploy_then_call_round_trips() {
        let h = harness();
        let (deployer_kp, deployer) = keypair_and_address();
        h.trie.set_balance(&deployer, 100_000);

        let deploy_tx = TransactionBuilder::new(TransactionKind::ContractDeploy)
            .input(signed_input(&hex::encode(deployer_kp.public_key_bytes())))
            .payload(b"CONTRACT bytecode".to_vec())
            .build();

        let deploy_block = chain_block(vec![deploy_tx]);
        let deploy_receipt = h.execute_block(&deploy_block).unwrap();
        let contract_address = deploy_receipt.receipts[0].contract_address.unwrap();

        let call_tx = TransactionBuilder::new(TransactionKind::ContractCall)
            .input(signed_input(&hex::encode(deployer_kp.public_key_bytes())))
            .output(Output::new(0, contract_address))
            .payload(b"call-data".to_vec())
            .build();

        let call_block = Block::new(
            &deploy_block,
            vec![call_tx],
            "validator-1".to_string(),
            [0u8; 32],
            1,
        );
        let call_receipt = h.execute_block(&call_block).unwrap();
        assert_eq!(call_receipt.receipts[0].return_data, b"call-data".to_vec());
    }

    #[test]
    fn calling_a_contract_with_no_code_fails_and_rolls_back() {
        let h = harness();
        let (caller_kp, caller) = keypair_and_address();
        let (_, phantom_contract) = keypair_and_address();
        h.trie.set_balance(&caller, 1_000);

        let call_tx = TransactionBuilder::new(TransactionKind::ContractCall)
            .input(signed_input(&hex::encode(caller_kp.public_key_bytes())))
            .output(Output::new(0, phantom_contract))
            .payload(b"call-data".to_vec())
            .build();

        let block = chain_block(vec![call_tx]);
        assert!(h.execute_block(&block).is_err());
    }

    #[test]
    fn gas_limit_is_enforced_per_block() {
        let h = ExecutionHarness::new(Arc::new(StateTrie::new()), StubRuntime).with_gas_limit(10_000);
        let (_, bob) = keypair_and_address();
        let block = chain_block(vec![coinbase_tx(bob, 1_000)]);
        let result = h.execute_block(&block);
        assert!(matches!(result, Err(VmError::GasLimitExceeded { .. })));
    }

    #[test]
    fn cumulative_gas_used_accumulates_across_transactions() {
        let h = harness();
        let (_, bob) = keypair_and_address();
        let (_, carol) = keypair_and_address();
        let block = chain_block(vec![coinbase_tx(bob, 1_000), coinbase_tx(carol, 2_000)]);
        let receipt = h.execute_block(&block).unwrap();
        assert_eq!(receipt.receipts[0].cumulative_gas_used, REGULAR_TX_GAS);
        assert_eq!(receipt.receipts[1].cumulative_gas_used, REGULAR_TX_GAS * 2);
        assert_eq!(receipt.total_gas_used, REGULAR_TX_GAS * 2);
    }
}
