//! Transaction construction via the builder pattern.
//!
//! The [`TransactionBuilder`] enforces a disciplined construction flow:
//! set inputs/outputs, call `.build()`, and get back an unsigned
//! [`Transaction`] with a deterministic id derived from its contents.
//!
//! The builder does not sign -- that happens in [`super::signing`]. Signing
//! fills in each input's `signature`/`public_key`, which is why those fields
//! live on [`Input`] rather than on the transaction as a whole: a `Regular`
//! transaction may spend outputs owned by different keys.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::types::{Input, Output, TransactionKind};
use crate::crypto::hash::double_sha256;

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// A NOVA protocol transaction.
///
/// Transactions are UTXO-style: a `Regular` transaction spends prior
/// [`Output`]s (referenced by [`Input`]) and creates new ones. `Coinbase`
/// transactions carry no real input and mint the block reward directly into
/// their outputs. `ContractDeploy`/`ContractCall` transactions route through
/// the VM execution harness instead of touching outputs directly; their
/// `payload` carries bytecode or calldata respectively.
///
/// The `id` field is `hex(double_sha256(signable_bytes))`, stable across
/// signing since [`Transaction::signable_bytes`] excludes each input's
/// `signature`/`public_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction id: `hex(double_sha256(signable_bytes))`.
    pub id: String,

    /// Protocol version at the time of creation.
    pub version: u16,

    /// The operation this transaction represents.
    pub kind: TransactionKind,

    /// Outputs being spent. Empty for `Coinbase`; exactly the outputs a
    /// `Regular` transaction consumes.
    pub inputs: Vec<Input>,

    /// Newly created outputs. Empty for `ContractDeploy`/`ContractCall`
    /// (value movement there, if any, happens inside contract execution).
    pub outputs: Vec<Output>,

    /// Fee paid to the block proposer, in photons. Implicitly the difference
    /// between summed input value and summed output value for `Regular`
    /// transactions; carried explicitly here so fee accounting doesn't
    /// require a UTXO set lookup during signable-byte computation.
    pub fee: u64,

    /// Unix timestamp in milliseconds when the transaction was created.
    pub timestamp: u64,

    /// Application payload: contract bytecode for `ContractDeploy`, calldata
    /// for `ContractCall`, `None` otherwise.
    pub payload: Option<Vec<u8>>,
}

impl Transaction {
    /// Returns the canonical byte representation used for signing and id
    /// computation.
    ///
    /// Deterministically concatenates: version, kind, fee, timestamp,
    /// payload, then each input's `previous_tx_hash`/`output_index`/
    /// `sequence` (signature and public key excluded), then each output's
    /// `value`/`recipient_address`/`script_pubkey`. JSON/serde is
    /// intentionally avoided because field ordering is not guaranteed
    /// across serialization formats.
    pub fn signable_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(256);

        buf.extend_from_slice(&self.version.to_le_bytes());

        buf.extend_from_slice(format!("{}", self.kind).as_bytes());
        buf.push(0x00);

        buf.extend_from_slice(&self.fee.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());

        match &self.payload {
            Some(payload) => {
                buf.push(0x01);
                buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
                buf.extend_from_slice(payload);
            }
            None => buf.push(0x00),
        }

        buf.extend_from_slice(&(self.inputs.len() as u32).to_le_bytes());
        for input in &self.inputs {
            buf.extend_from_slice(input.previous_tx_hash.as_bytes());
            buf.push(0x00);
            buf.extend_from_slice(&input.output_index.to_le_bytes());
            buf.extend_from_slice(&input.sequence.to_le_bytes());
        }

        buf.extend_from_slice(&(self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            buf.extend_from_slice(&output.value.to_le_bytes());
            buf.extend_from_slice(output.recipient_address.as_bytes());
            match &output.script_pubkey {
                Some(script) => {
                    buf.push(0x01);
                    buf.extend_from_slice(&(script.len() as u32).to_le_bytes());
                    buf.extend_from_slice(script);
                }
                None => buf.push(0x00),
            }
        }

        buf
    }

    /// Computes the transaction id from the current field values.
    pub fn compute_id(&self) -> String {
        let hash = double_sha256(&self.signable_bytes());
        hex::encode(hash)
    }

    /// Total serialized size in bytes, used for fee-per-byte calculation and
    /// mempool accounting.
    pub fn size_bytes(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }

    /// Fee per byte, used for mempool priority ordering.
    pub fn fee_per_byte(&self) -> u64 {
        let size = self.size_bytes() as u64;
        if size == 0 {
            return 0;
        }
        self.fee / size
    }

    /// `true` once every input carries a signature. Vacuously `true` for
    /// transactions with no inputs (coinbase, deploy, call).
    pub fn is_signed(&self) -> bool {
        self.inputs.iter().all(|i| i.signature.is_some())
    }

    /// Sum of output values.
    pub fn total_output_value(&self) -> u128 {
        self.outputs.iter().map(|o| o.value as u128).sum()
    }

    /// `true` if any output's `script_pubkey` or any input's `signature`
    /// carries the frozen `CONTRACT`/`DEPLOY` marker used by the VM harness
    /// to route this transaction to the contract runtime.
    pub fn carries_contract_marker(&self) -> bool {
        self.outputs.iter().any(|o| o.carries_contract_marker())
            || self.inputs.iter().any(|i| i.carries_deploy_marker())
    }

    /// Returns the transaction id as a hex string (convenience alias).
    pub fn id_hex(&self) -> String {
        self.id.clone()
    }
}

// ---------------------------------------------------------------------------
// TransactionBuilder
// ---------------------------------------------------------------------------

/// Fluent builder for constructing unsigned [`Transaction`] instances.
///
/// The builder sets `version` to the current protocol version and
/// `timestamp` to the current UTC time by default; both can be overridden.
pub struct TransactionBuilder {
    version: u16,
    kind: TransactionKind,
    inputs: Vec<Input>,
    outputs: Vec<Output>,
    fee: u64,
    timestamp: Option<u64>,
    payload: Option<Vec<u8>>,
}

impl TransactionBuilder {
    /// Creates a new builder for the given transaction kind.
    pub fn new(kind: TransactionKind) -> Self {
        Self {
            version: 1,
            kind,
            inputs: Vec::new(),
            outputs: Vec::new(),
            fee: 0,
            timestamp: None,
            payload: None,
        }
    }

    /// Sets the protocol version. Only needed for testing version upgrades.
    pub fn version(mut self, version: u16) -> Self {
        self.version = version;
        self
    }

    /// Appends an input spending a previous output.
    pub fn input(mut self, input: Input) -> Self {
        self.inputs.push(input);
        self
    }

    /// Replaces the full input list.
    pub fn inputs(mut self, inputs: Vec<Input>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Appends a newly created output.
    pub fn output(mut self, output: Output) -> Self {
        self.outputs.push(output);
        self
    }

    /// Replaces the full output list.
    pub fn outputs(mut self, outputs: Vec<Output>) -> Self {
        self.outputs = outputs;
        self
    }

    /// Sets the fee in photons.
    pub fn fee(mut self, fee: u64) -> Self {
        self.fee = fee;
        self
    }

    /// Sets the timestamp explicitly (Unix milliseconds).
    ///
    /// If not called, `build()` uses the current UTC time.
    pub fn timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Attaches an application-specific payload (contract bytecode or
    /// calldata).
    pub fn payload(mut self, data: Vec<u8>) -> Self {
        self.payload = Some(data);
        self
    }

    /// Consumes the builder and produces an unsigned [`Transaction`].
    pub fn build(self) -> Transaction {
        let timestamp = self
            .timestamp
            .unwrap_or_else(|| Utc::now().timestamp_millis() as u64);

        let mut tx = Transaction {
            id: String::new(),
            version: self.version,
            kind: self.kind,
            inputs: self.inputs,
            outputs: self.outputs,
            fee: self.fee,
            timestamp,
            payload: self.payload,
        };

        tx.id = tx.compute_id();
        tx
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::types::Address;

    fn sample_tx() -> Transaction {
        TransactionBuilder::new(TransactionKind::Regular)
            .input(Input::new("aa".repeat(32), 0))
            .output(Output::new(1_000_000, Address::new([0x11; 32])))
            .fee(100)
            .timestamp(1_700_000_000_000)
            .build()
    }

    #[test]
    fn builder_produces_deterministic_id() {
        let tx1 = sample_tx();
        let tx2 = sample_tx();
        assert_eq!(tx1.id, tx2.id, "same inputs must produce the same id");
        assert!(!tx1.id.is_empty());
    }

    #[test]
    fn id_is_hex_encoded_64_chars() {
        let tx = sample_tx();
        assert_eq!(tx.id.len(), 64);
        assert!(tx.id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn compute_id_matches_stored_id() {
        let tx = sample_tx();
        assert_eq!(tx.id, tx.compute_id());
    }

    #[test]
    fn different_fee_different_id() {
        let tx1 = TransactionBuilder::new(TransactionKind::Regular)
            .input(Input::new("bb".repeat(32), 0))
            .output(Output::new(1000, Address::new([0x22; 32])))
            .fee(10)
            .timestamp(1_700_000_000_000)
            .build();

        let tx2 = TransactionBuilder::new(TransactionKind::Regular)
            .input(Input::new("bb".repeat(32), 0))
            .output(Output::new(1000, Address::new([0x22; 32])))
            .fee(20)
            .timestamp(1_700_000_000_000)
            .build();

        assert_ne!(tx1.id, tx2.id);
    }

    #[test]
    fn unsigned_transaction_is_not_signed() {
        let tx = sample_tx();
        assert!(!tx.is_signed());
    }

    #[test]
    fn coinbase_with_no_inputs_is_vacuously_signed() {
        let tx = TransactionBuilder::new(TransactionKind::Coinbase)
            .output(Output::new(5_000_000, Address::new([0x33; 32])))
            .timestamp(1_700_000_000_000)
            .build();
        assert!(tx.is_signed());
    }

    #[test]
    fn size_bytes_is_positive() {
        assert!(sample_tx().size_bytes() > 0);
    }

    #[test]
    fn builder_uses_current_time_if_not_set() {
        let before = Utc::now().timestamp_millis() as u64;
        let tx = TransactionBuilder::new(TransactionKind::Regular)
            .input(Input::new("cc".repeat(32), 0))
            .output(Output::new(100, Address::new([0x44; 32])))
            .build();
        let after = Utc::now().timestamp_millis() as u64;

        assert!(tx.timestamp >= before);
        assert!(tx.timestamp <= after);
    }

    #[test]
    fn transaction_json_roundtrip() {
        let tx = sample_tx();
        let json = serde_json::to_string(&tx).unwrap();
        let recovered: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(tx, recovered);
    }

    #[test]
    fn signable_bytes_exclude_signature() {
        let mut tx = sample_tx();
        let bytes_before = tx.signable_bytes();

        tx.inputs[0].signature = Some("deadbeef".to_string());
        let bytes_after = tx.signable_bytes();

        assert_eq!(
            bytes_before, bytes_after,
            "signature must not affect signable bytes"
        );
    }

    #[test]
    fn signable_bytes_exclude_public_key() {
        let mut tx = sample_tx();
        let bytes_before = tx.signable_bytes();

        tx.inputs[0].public_key = Some("abcdef1234".to_string());
        let bytes_after = tx.signable_bytes();

        assert_eq!(
            bytes_before, bytes_after,
            "public_key must not affect signable bytes"
        );
    }

    #[test]
    fn payload_included_in_signable_bytes() {
        let tx_no_payload = TransactionBuilder::new(TransactionKind::ContractCall)
            .input(Input::new("dd".repeat(32), 0))
            .timestamp(1_700_000_000_000)
            .build();

        let tx_with_payload = TransactionBuilder::new(TransactionKind::ContractCall)
            .input(Input::new("dd".repeat(32), 0))
            .timestamp(1_700_000_000_000)
            .payload(b"call_data".to_vec())
            .build();

        assert_ne!(
            tx_no_payload.signable_bytes(),
            tx_with_payload.signable_bytes(),
            "payload must affect signable bytes"
        );
    }

    #[test]
    fn version_included_in_signable_bytes() {
        let tx_v1 = TransactionBuilder::new(TransactionKind::Regular)
            .version(1)
            .input(Input::new("ee".repeat(32), 0))
            .output(Output::new(100, Address::new([0x55; 32])))
            .timestamp(1_700_000_000_000)
            .build();

        let tx_v2 = TransactionBuilder::new(TransactionKind::Regular)
            .version(2)
            .input(Input::new("ee".repeat(32), 0))
            .output(Output::new(100, Address::new([0x55; 32])))
            .timestamp(1_700_000_000_000)
            .build();

        assert_ne!(tx_v1.id, tx_v2.id, "different version must produce different id");
    }

    #[test]
    fn default_version_is_one() {
        assert_eq!(sample_tx().version, 1);
    }

    #[test]
    fn fee_per_byte_calculation() {
        let tx = TransactionBuilder::new(TransactionKind::Regular)
            .input(Input::new("ff".repeat(32), 0))
            .output(Output::new(100, Address::new([0x66; 32])))
            .fee(10_000)
            .timestamp(1_700_000_000_000)
            .build();

        assert!(tx.fee_per_byte() > 0);
    }

    #[test]
    fn total_output_value_sums_outputs() {
        let tx = TransactionBuilder::new(TransactionKind::Regular)
            .input(Input::new("00".repeat(32), 0))
            .output(Output::new(100, Address::new([0x77; 32])))
            .output(Output::new(250, Address::new([0x88; 32])))
            .timestamp(1_700_000_000_000)
            .build();

        assert_eq!(tx.total_output_value(), 350);
    }

    #[test]
    fn contract_marker_detection_via_output() {
        let mut tx = TransactionBuilder::new(TransactionKind::ContractDeploy)
            .input(Input::new("11".repeat(32), 0))
            .timestamp(1_700_000_000_000)
            .build();
        assert!(!tx.carries_contract_marker());

        tx.outputs.push(Output {
            value: 0,
            recipient_address: Address::ZERO,
            script_pubkey: Some(b"CONTRACT".to_vec()),
        });
        assert!(tx.carries_contract_marker());
    }
}
