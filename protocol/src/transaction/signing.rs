//! Transaction signing with Ed25519 keypairs.
//!
//! Signing is a separate step from building because the keypair that owns a
//! given input's previous output may not be available at construction time
//! (e.g., a hardware wallet, a remote signer, or a transaction with inputs
//! owned by several different keys). The signing data is the canonical
//! [`Transaction::signable_bytes`] output, which deterministically excludes
//! every input's `signature`/`public_key`.

use super::builder::Transaction;
use crate::crypto::keys::NovaKeypair;

/// Signs every input of `tx` in place using the provided keypair.
///
/// A real multi-input transaction may need per-input keypairs if its inputs
/// are owned by different addresses; this helper covers the common case
/// where one keypair owns every input being spent. Callers needing
/// heterogeneous ownership can sign individual inputs directly with
/// [`sign_input`].
///
/// The signing procedure, run once per input:
/// 1. Compute `signable_bytes()` -- identical for every input since it
///    excludes per-input signature/public-key fields.
/// 2. Produce an Ed25519 signature over those bytes.
/// 3. Store the hex-encoded signature and public key on the input.
///
/// The transaction `id` is unaffected by signing.
pub fn sign_transaction<'a>(tx: &'a mut Transaction, keypair: &NovaKeypair) -> &'a Transaction {
    let signable = tx.signable_bytes();
    let signature = keypair.sign(&signable);
    let sig_hex = signature.to_hex();
    let pk_hex = keypair.public_key().to_hex();

    for input in tx.inputs.iter_mut() {
        input.signature = Some(sig_hex.clone());
        input.public_key = Some(pk_hex.clone());
    }

    tx
}

/// Signs a single input of `tx` by index, leaving the others untouched.
///
/// Used when a transaction's inputs are owned by different keypairs.
pub fn sign_input(tx: &mut Transaction, input_index: usize, keypair: &NovaKeypair) {
    let signable = tx.signable_bytes();
    let signature = keypair.sign(&signable);
    let input = &mut tx.inputs[input_index];
    input.signature = Some(signature.to_hex());
    input.public_key = Some(keypair.public_key().to_hex());
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
