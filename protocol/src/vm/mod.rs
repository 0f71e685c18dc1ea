//! # VM Execution Harness
//!
//! Applies a block's transactions against a [`crate::storage::StateTrie`],
//! dispatching on [`crate::transaction::types::TransactionKind`] and
//! delegating contract bytecode execution to a pluggable
//! [`harness::ContractRuntime`].
//!
//! Execution is whole-block atomic: the harness snapshots the trie before
//! the first transaction, and any single transaction failing rolls the
//! entire block back rather than dropping just that transaction. A block
//! either fully applies or has no effect at all.

pub mod harness;

pub use harness::{ContractRuntime, ExecutionHarness, RuntimeOutput, StubRuntime, VmError};
