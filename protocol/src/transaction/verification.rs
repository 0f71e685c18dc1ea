//! Transaction verification: structural checks and cryptographic validation.
//!
//! Every transaction entering the mempool or proposed in a block must pass
//! [`verify_transaction`]. The checks are ordered from cheapest to most
//! expensive (string/length comparisons before signature verification) to
//! fail fast and waste minimal CPU on invalid transactions.

use chrono::Utc;
use thiserror::Error;

use super::builder::Transaction;
use super::types::TransactionKind;
use crate::crypto::keys::{NovaPublicKey, NovaSignature};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur during transaction verification.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// The transaction id does not match `double_sha256` of its signable bytes.
    #[error("transaction id mismatch: expected {expected}, got {actual}")]
    IdMismatch { expected: String, actual: String },

    /// A `Regular` transaction has no inputs.
    #[error("regular transaction must have at least one input")]
    MissingInputs,

    /// A `Regular` or `Coinbase` transaction has no outputs.
    #[error("transaction must have at least one output")]
    MissingOutputs,

    /// An input is not signed (`signature` or `public_key` is `None`).
    #[error("input {index} is unsigned")]
    MissingSignature { index: usize },

    /// A signature is malformed (cannot be decoded from hex or wrong length).
    #[error("malformed signature on input {index}: {reason}")]
    MalformedSignature { index: usize, reason: String },

    /// A public key is malformed (cannot be decoded from hex).
    #[error("malformed public key on input {index}: {reason}")]
    MalformedPublicKey { index: usize, reason: String },

    /// An Ed25519 signature does not verify against its input's public key.
    #[error("invalid signature on input {index}")]
    InvalidSignature { index: usize },

    /// An output carries a zero value.
    #[error("output {index} has zero value")]
    ZeroValueOutput { index: usize },

    /// The transaction timestamp is too far in the future.
    #[error("timestamp {timestamp_ms} is {delta_secs}s in the future (max allowed: {max_secs}s)")]
    TimestampTooFarInFuture {
        timestamp_ms: u64,
        delta_secs: i64,
        max_secs: i64,
    },

    /// A `ContractDeploy`/`ContractCall` transaction is missing its payload.
    #[error("contract transaction requires a non-empty payload")]
    MissingPayload,
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// Maximum allowed clock skew for transaction timestamps, in seconds.
const MAX_FUTURE_SECONDS: i64 = 300;

/// Verifies a signed transaction for structural correctness and cryptographic
/// validity.
///
/// The checks, in order:
///
/// 1. **Transaction id** -- must equal `double_sha256(signable_bytes)`.
/// 2. **Shape** -- `Regular` needs ≥1 input and ≥1 output; `Coinbase` needs
///    ≥1 output and no inputs required; `ContractDeploy`/`ContractCall`
///    need a non-empty payload.
/// 3. **Timestamp** -- must not be more than 5 minutes in the future.
/// 4. **Output values** -- none may be zero.
/// 5. **Input signatures** -- every input must carry a signature and public
///    key that verify against the transaction's signable bytes.
///
/// This function does not check whether referenced previous outputs exist
/// or are unspent -- that is the UTXO-set's responsibility (the state store
/// / VM harness), since it requires chain state this function does not have
/// access to.
pub fn verify_transaction(tx: &Transaction) -> Result<(), TransactionError> {
    // 1. Transaction id integrity check.
    let expected_id = tx.compute_id();
    if tx.id != expected_id {
        return Err(TransactionError::IdMismatch {
            expected: expected_id,
            actual: tx.id.clone(),
        });
    }

    // 2. Shape checks per kind.
    match tx.kind {
        TransactionKind::Regular => {
            if tx.inputs.is_empty() {
                return Err(TransactionError::MissingInputs);
            }
            if tx.outputs.is_empty() {
                return Err(TransactionError::MissingOutputs);
            }
        }
        TransactionKind::Coinbase => {
            if tx.outputs.is_empty() {
                return Err(TransactionError::MissingOutputs);
            }
        }
        TransactionKind::ContractDeploy | TransactionKind::ContractCall => {
            if tx.payload.as_ref().is_none_or(|p| p.is_empty()) {
                return Err(TransactionError::MissingPayload);
            }
        }
    }

    // 3. Timestamp must not be unreasonably far in the future.
    let now_ms = Utc::now().timestamp_millis() as u64;
    let max_future_ms = now_ms + (MAX_FUTURE_SECONDS as u64 * 1_000);
    if tx.timestamp > max_future_ms {
        let delta_secs = (tx.timestamp as i64 - now_ms as i64) / 1_000;
        return Err(TransactionError::TimestampTooFarInFuture {
            timestamp_ms: tx.timestamp,
            delta_secs,
            max_secs: MAX_FUTURE_SECONDS,
        });
    }

    // 4. Output values must be non-zero.
    for (index, output) in tx.outputs.iter().enumerate() {
        if output.value == 0 {
            return Err(TransactionError::ZeroValueOutput { index });
        }
    }

    // 5. Every input must be signed and verify against the signable bytes.
    let signable = tx.signable_bytes();
    for (index, input) in tx.inputs.iter().enumerate() {
        let sig_hex = input
            .signature
            .as_ref()
            .ok_or(TransactionError::MissingSignature { index })?;
        let pk_hex = input
            .public_key
            .as_ref()
            .ok_or(TransactionError::MissingSignature { index })?;

        let sig_bytes = hex::decode(sig_hex).map_err(|e| TransactionError::MalformedSignature {
            index,
            reason: e.to_string(),
        })?;
        if sig_bytes.len() != 64 {
            return Err(TransactionError::MalformedSignature {
                index,
                reason: format!("expected 64 bytes, got {}", sig_bytes.len()),
            });
        }
        let mut sig_arr = [0u8; 64];
        sig_arr.copy_from_slice(&sig_bytes);
        let signature = NovaSignature::from_bytes(sig_arr);

        let public_key =
            NovaPublicKey::from_hex(pk_hex).map_err(|e| TransactionError::MalformedPublicKey {
                index,
                reason: e.to_string(),
            })?;

        if !public_key.verify(&signable, &signature) {
            return Err(TransactionError::InvalidSignature { index });
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::NovaKeypair;
    use crate::transaction::builder::TransactionBuilder;
    use crate::transaction::signing::sign_transaction;
    use crate::transaction::types::{Address, Input, Output};

    fn valid_signed_tx() -> (Transaction, NovaKeypair) {
        let kp = NovaKeypair::generate();
        let mut tx = TransactionBuilder::new(TransactionKind::Regular)
            .input(Input::new("aa".repeat(32), 0))
            .output(Output::new(1_000, Address::new([0x09; 32])))
            .fee(100)
            .build();

        sign_transaction(&mut tx, &kp);
        (tx, kp)
    }

    #[test]
    fn valid_transaction_passes() {
        let (tx, _) = valid_signed_tx();
        assert!(verify_transaction(&tx).is_ok());
    }

    #[test]
    fn rejects_regular_with_no_inputs() {
        let mut tx = TransactionBuilder::new(TransactionKind::Regular)
            .output(Output::new(100, Address::new([0x01; 32])))
            .build();
        tx.id = tx.compute_id();

        match verify_transaction(&tx) {
            Err(TransactionError::MissingInputs) => {}
            other => panic!("expected MissingInputs, got {:?}", other),
        }
    }

    #[test]
    fn rejects_regular_with_no_outputs() {
        let mut tx = TransactionBuilder::new(TransactionKind::Regular)
            .input(Input::new("aa".repeat(32), 0))
            .build();
        tx.id = tx.compute_id();

        match verify_transaction(&tx) {
            Err(TransactionError::MissingOutputs) => {}
            other => panic!("expected MissingOutputs, got {:?}", other),
        }
    }

    #[test]
    fn rejects_zero_value_output() {
        let kp = NovaKeypair::generate();
        let mut tx = TransactionBuilder::new(TransactionKind::Regular)
            .input(Input::new("aa".repeat(32), 0))
            .output(Output::new(0, Address::new([0x02; 32])))
            .build();
        sign_transaction(&mut tx, &kp);

        match verify_transaction(&tx) {
            Err(TransactionError::ZeroValueOutput { index: 0 }) => {}
            other => panic!("expected ZeroValueOutput, got {:?}", other),
        }
    }

    #[test]
    fn rejects_future_timestamp() {
        let kp = NovaKeypair::generate();
        let far_future = Utc::now().timestamp_millis() as u64 + 600_000;

        let mut tx = TransactionBuilder::new(TransactionKind::Regular)
            .input(Input::new("aa".repeat(32), 0))
            .output(Output::new(100, Address::new([0x03; 32])))
            .timestamp(far_future)
            .build();
        sign_transaction(&mut tx, &kp);

        match verify_transaction(&tx) {
            Err(TransactionError::TimestampTooFarInFuture { .. }) => {}
            other => panic!("expected TimestampTooFarInFuture, got {:?}", other),
        }
    }

    #[test]
    fn rejects_tampered_id() {
        let (mut tx, _) = valid_signed_tx();
        tx.id = "0".repeat(64);

        match verify_transaction(&tx) {
            Err(TransactionError::IdMismatch { .. }) => {}
            other => panic!("expected IdMismatch, got {:?}", other),
        }
    }

    #[test]
    fn rejects_unsigned_transaction() {
        let mut tx = TransactionBuilder::new(TransactionKind::Regular)
            .input(Input::new("aa".repeat(32), 0))
            .output(Output::new(100, Address::new([0x04; 32])))
            .build();
        tx.id = tx.compute_id();

        match verify_transaction(&tx) {
            Err(TransactionError::MissingSignature { index: 0 }) => {}
            other => panic!("expected MissingSignature, got {:?}", other),
        }
    }

    #[test]
    fn rejects_wrong_keypair_signature() {
        let kp_real = NovaKeypair::generate();
        let kp_wrong = NovaKeypair::generate();

        let mut tx = TransactionBuilder::new(TransactionKind::Regular)
            .input(Input::new("aa".repeat(32), 0))
            .output(Output::new(100, Address::new([0x05; 32])))
            .build();

        // Sign with the wrong keypair, then substitute in the real public
        // key so only the signature/public-key pairing is mismatched.
        sign_transaction(&mut tx, &kp_wrong);
        tx.inputs[0].public_key = Some(kp_real.public_key().to_hex());

        match verify_transaction(&tx) {
            Err(TransactionError::InvalidSignature { index: 0 }) => {}
            other => panic!("expected InvalidSignature, got {:?}", other),
        }
    }

    #[test]
    fn coinbase_requires_no_inputs_but_needs_outputs() {
        let mut tx = TransactionBuilder::new(TransactionKind::Coinbase)
            .output(Output::new(5_000_000, Address::new([0x06; 32])))
            .build();
        tx.id = tx.compute_id();

        assert!(verify_transaction(&tx).is_ok());
    }

    #[test]
    fn contract_deploy_requires_payload() {
        let mut tx = TransactionBuilder::new(TransactionKind::ContractDeploy)
            .input(Input::new("aa".repeat(32), 0))
            .build();
        tx.id = tx.compute_id();

        match verify_transaction(&tx) {
            Err(TransactionError::MissingPayload) => {}
            other => panic!("expected MissingPayload, got {:?}", other),
        }
    }

    #[test]
    fn contract_call_with_payload_and_signed_input_passes() {
        let kp = NovaKeypair::generate();
        let mut tx = TransactionBuilder::new(TransactionKind::ContractCall)
            .input(Input::new("aa".repeat(32), 0))
            .payload(b"transfer(addr,100)".to_vec())
            .build();
        sign_transaction(&mut tx, &kp);

        assert!(verify_transaction(&tx).is_ok());
    }

    #[test]
    fn accepts_near_future_timestamp() {
        let kp = NovaKeypair::generate();
        let near_future = Utc::now().timestamp_millis() as u64 + 120_000;

        let mut tx = TransactionBuilder::new(TransactionKind::Regular)
            .input(Input::new("aa".repeat(32), 0))
            .output(Output::new(100, Address::new([0x07; 32])))
            .timestamp(near_future)
            .build();
        sign_transaction(&mut tx, &kp);

        assert!(verify_transaction(&tx).is_ok());
    }

    #[test]
    fn accepts_past_timestamp() {
        let kp = NovaKeypair::generate();
        let past = Utc::now().timestamp_millis() as u64 - 3_600_000;

        let mut tx = TransactionBuilder::new(TransactionKind::Regular)
            .input(Input::new("aa".repeat(32), 0))
            .output(Output::new(100, Address::new([0x08; 32])))
            .timestamp(past)
            .build();
        sign_transaction(&mut tx, &kp);

        assert!(verify_transaction(&tx).is_ok());
    }
}
