//! # Transaction Module
//!
//! Construction, signing, verification, and type vocabulary for UTXO-style
//! transactions. Every value transfer, contract deployment, and contract
//! call on the network is represented as a [`Transaction`].
//!
//! ## Architecture
//!
//! ```text
//! types.rs        — Address, Input, Output, TransactionKind, TransactionStatus
//! builder.rs       — Transaction struct + fluent TransactionBuilder
//! signing.rs       — Ed25519 input signing
//! verification.rs  — Structural and cryptographic verification
//! ```
//!
//! ## Transaction Lifecycle
//!
//! 1. **Build** — Use [`TransactionBuilder`] to assemble inputs/outputs.
//! 2. **Sign** — Call [`sign_transaction`] with the spender's keypair.
//! 3. **Broadcast** — Submit the signed transaction to the mempool.
//! 4. **Verify** — Validators run [`verify_transaction`] before inclusion.
//! 5. **Execute** — The VM harness spends inputs, creates outputs, and emits
//!    a receipt once the containing block is accepted.
//!
//! ## Design Decisions
//!
//! - Transaction ids are `double_sha256` of the canonical byte representation
//!   (excluding each input's signature/public key), matching the approach
//!   used to defeat length-extension/malleability attacks on the hash.
//! - All values are `u64` in photons, the smallest NOVA unit. No floating
//!   point anywhere near monetary values.
//! - `Coinbase`/`ContractDeploy`/`ContractCall` share the same `Transaction`
//!   shape as `Regular`; the `kind` field and the frozen `CONTRACT`/`DEPLOY`
//!   marker scan together determine how the VM harness dispatches it.

pub mod builder;
pub mod signing;
pub mod types;
pub mod verification;

pub use builder::{Transaction, TransactionBuilder};
pub use signing::{sign_input, sign_transaction};
pub use types::{Address, Input, Output, TransactionKind, TransactionStatus};
pub use verification::{verify_transaction, TransactionError};
