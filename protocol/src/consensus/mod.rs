//! # Consensus Module
//!
//! Two independent consensus engines live here. A node picks one at startup
//! based on its [`crate::config::NodeConfig`] — they never run against the
//! same chain at once.
//!
//! ```text
//! pow.rs — Proof-of-work: nonce search against a leading-zero-bit target,
//!          plus the difficulty-retarget policy that keeps block time
//!          converging on the configured target.
//! pos.rs — Proof-of-stake: a validator registry, delegation, round-robin
//!          proposer rotation weighted by stake, slashing, and per-epoch
//!          reward distribution.
//! ```
//!
//! Neither engine does networking or gossip — they validate and produce
//! block *headers* given a view of state; wiring them to peers is the
//! node binary's job.

pub mod pos;
pub mod pow;

pub use pos::{DelegationRecord, ProofOfStake, SlashingEvent, ValidatorRecord};
pub use pow::ProofOfWork;
