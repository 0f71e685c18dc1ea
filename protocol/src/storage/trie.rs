//! # State Trie — Persistent, Snapshot-Friendly Account/Contract State
//!
//! Account balances, nonces, contract code, and per-contract storage all
//! live in one authenticated key/value trie. Unlike the block store or the
//! state store, this is not sled-backed: it's an in-memory arena of
//! immutable nodes addressed by stable ids, which is what makes
//! [`StateTrie::create_snapshot`]/[`StateTrie::restore_snapshot`] O(1) handle
//! swaps instead of O(n) copies.
//!
//! ## Persistence strategy
//!
//! Every write allocates fresh node ids along the path from the root to the
//! written key; nodes off that path are never touched and stay shared
//! between the old and new root. A snapshot is just "remember this root id"
//! -- restoring one is swapping back to an id whose subtree was never
//! mutated, because nothing in this structure is ever mutated in place.
//!
//! ## Key shapes
//!
//! - `account:<address>:balance`, `account:<address>:nonce`,
//!   `account:<address>:code_hash`
//! - `code:<contract address>`
//! - `storage:<contract address>:<key>`
//!
//! ## Node hash
//!
//! `H(key || value || is_leaf || left_child_hash || right_child_hash)`,
//! using the all-zero hash for an absent child. The trie root hash is the
//! hash of the root node, or the all-zero sentinel for an empty trie.

use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::crypto::hash::blake3_hash_multi;
use crate::transaction::types::Address;

type NodeId = usize;

const ZERO_HASH: [u8; 32] = [0u8; 32];

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct Node {
    key: Vec<u8>,
    value: Vec<u8>,
    left: Option<NodeId>,
    right: Option<NodeId>,
    hash: [u8; 32],
}

fn node_hash(key: &[u8], value: &[u8], is_leaf: bool, left: [u8; 32], right: [u8; 32]) -> [u8; 32] {
    blake3_hash_multi(&[key, value, &[is_leaf as u8], &left, &right])
}

/// Errors arising from trie operations.
#[derive(Debug, thiserror::Error)]
pub enum TrieError {
    #[error("snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("integrity check failed: {0}")]
    IntegrityViolation(String),
}

pub type TrieResult<T> = Result<T, TrieError>;

#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
struct Inner {
    arena: Vec<Node>,
    root: Option<NodeId>,
    snapshots: HashMap<String, Option<NodeId>>,
}

impl Inner {
    fn hash_of(&self, id: Option<NodeId>) -> [u8; 32] {
        id.map(|i| self.arena[i].hash).unwrap_or(ZERO_HASH)
    }

    fn find(&self, root: Option<NodeId>, key: &[u8]) -> Option<&Node> {
        let mut current = root;
        while let Some(id) = current {
            let node = &self.arena[id];
            current = match key.cmp(node.key.as_slice()) {
                Ordering::Equal => return Some(node),
                Ordering::Less => node.left,
                Ordering::Greater => node.right,
            };
        }
        None
    }

    /// Copy-on-write insert. Returns the new subtree root id.
    fn insert(&mut self, root: Option<NodeId>, key: &[u8], value: Vec<u8>) -> NodeId {
        match root {
            None => {
                let hash = node_hash(key, &value, true, ZERO_HASH, ZERO_HASH);
                self.arena.push(Node {
                    key: key.to_vec(),
                    value,
                    left: None,
                    right: None,
                    hash,
                });
                self.arena.len() - 1
            }
            Some(id) => {
                let existing = self.arena[id].clone();
                match key.cmp(existing.key.as_slice()) {
                    Ordering::Equal => {
                        let is_leaf = existing.left.is_none() && existing.right.is_none();
                        let hash = node_hash(
                            key,
                            &value,
                            is_leaf,
                            self.hash_of(existing.left),
                            self.hash_of(existing.right),
                        );
                        self.arena.push(Node {
                            key: key.to_vec(),
                            value,
                            left: existing.left,
                            right: existing.right,
                            hash,
                        });
                        self.arena.len() - 1
                    }
                    Ordering::Less => {
                        let new_left = self.insert(existing.left, key, value);
                        self.rebuild(&existing.key, &existing.value, Some(new_left), existing.right)
                    }
                    Ordering::Greater => {
                        let new_right = self.insert(existing.right, key, value);
                        self.rebuild(&existing.key, &existing.value, existing.left, Some(new_right))
                    }
                }
            }
        }
    }

    fn rebuild(
        &mut self,
        key: &[u8],
        value: &[u8],
        left: Option<NodeId>,
        right: Option<NodeId>,
    ) -> NodeId {
        let is_leaf = left.is_none() && right.is_none();
        let hash = node_hash(key, value, is_leaf, self.hash_of(left), self.hash_of(right));
        self.arena.push(Node {
            key: key.to_vec(),
            value: value.to_vec(),
            left,
            right,
            hash,
        });
        self.arena.len() - 1
    }

    fn min_node(&self, root: NodeId) -> &Node {
        let mut current = root;
        loop {
            match self.arena[current].left {
                Some(left) => current = left,
                None => return &self.arena[current],
            }
        }
    }

    /// Copy-on-write delete. Returns the new subtree root id, if any remains.
    fn delete(&mut self, root: Option<NodeId>, key: &[u8]) -> Option<NodeId> {
        let id = root?;
        let existing = self.arena[id].clone();
        match key.cmp(existing.key.as_slice()) {
            Ordering::Less => {
                let new_left = self.delete(existing.left, key);
                Some(self.rebuild(&existing.key, &existing.value, new_left, existing.right))
            }
            Ordering::Greater => {
                let new_right = self.delete(existing.right, key);
                Some(self.rebuild(&existing.key, &existing.value, existing.left, new_right))
            }
            Ordering::Equal => match (existing.left, existing.right) {
                (None, None) => None,
                (Some(l), None) => Some(l),
                (None, Some(r)) => Some(r),
                (Some(l), Some(r)) => {
                    let successor = self.min_node(r).clone();
                    let new_right = self.delete(Some(r), &successor.key);
                    Some(self.rebuild(&successor.key, &successor.value, Some(l), new_right))
                }
            },
        }
    }

    fn validate_subtree(&self, id: Option<NodeId>) -> TrieResult<()> {
        let Some(id) = id else { return Ok(()) };
        let node = &self.arena[id];
        self.validate_subtree(node.left)?;
        self.validate_subtree(node.right)?;

        let is_leaf = node.left.is_none() && node.right.is_none();
        let expected = node_hash(
            &node.key,
            &node.value,
            is_leaf,
            self.hash_of(node.left),
            self.hash_of(node.right),
        );
        if expected != node.hash {
            return Err(TrieError::IntegrityViolation(format!(
                "node at key {:?} has a stale hash",
                String::from_utf8_lossy(&node.key)
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StateTrie
// ---------------------------------------------------------------------------

/// Authenticated account/contract state, backed by the copy-on-write arena
/// described above. Thread-safe: reads take a shared lock, writes a unique
/// one, so the trie can be wrapped in a plain `Arc<StateTrie>`.
#[derive(Debug, Default)]
pub struct StateTrie {
    inner: RwLock<Inner>,
}

impl StateTrie {
    /// Creates an empty trie.
    pub fn new() -> Self {
        Self::default()
    }

    // -- Generic key/value ---------------------------------------------------

    /// Fetches the raw value stored at `key`, if any.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let inner = self.inner.read();
        inner.find(inner.root, key).map(|n| n.value.clone())
    }

    /// `true` if `key` has a stored value.
    pub fn has(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Sets `key` to `value`, allocating fresh nodes along the insertion
    /// path.
    pub fn set(&self, key: &[u8], value: Vec<u8>) {
        let mut inner = self.inner.write();
        let new_root = inner.insert(inner.root, key, value);
        inner.root = Some(new_root);
    }

    /// Removes `key`, if present.
    pub fn delete(&self, key: &[u8]) {
        let mut inner = self.inner.write();
        inner.root = inner.delete(inner.root, key);
    }

    // -- Accounts --------------------------------------------------------------

    fn balance_key(address: &Address) -> Vec<u8> {
        format!("account:{}:balance", address.to_hex()).into_bytes()
    }

    fn nonce_key(address: &Address) -> Vec<u8> {
        format!("account:{}:nonce", address.to_hex()).into_bytes()
    }

    fn code_hash_key(address: &Address) -> Vec<u8> {
        format!("account:{}:code_hash", address.to_hex()).into_bytes()
    }

    fn code_key(address: &Address) -> Vec<u8> {
        format!("code:{}", address.to_hex()).into_bytes()
    }

    fn storage_key(contract: &Address, slot: &[u8]) -> Vec<u8> {
        let mut key = format!("storage:{}:", contract.to_hex()).into_bytes();
        key.extend_from_slice(slot);
        key
    }

    /// Returns `address`'s balance in photons, `0` if the account doesn't
    /// exist yet.
    pub fn get_balance(&self, address: &Address) -> u128 {
        self.get(&Self::balance_key(address))
            .and_then(|bytes| <[u8; 16]>::try_from(bytes.as_slice()).ok())
            .map(u128::from_be_bytes)
            .unwrap_or(0)
    }

    /// Sets `address`'s balance.
    pub fn set_balance(&self, address: &Address, balance: u128) {
        self.set(&Self::balance_key(address), balance.to_be_bytes().to_vec());
    }

    /// Returns `address`'s nonce, `0` if the account doesn't exist yet.
    pub fn get_nonce(&self, address: &Address) -> u64 {
        self.get(&Self::nonce_key(address))
            .and_then(|bytes| <[u8; 8]>::try_from(bytes.as_slice()).ok())
            .map(u64::from_be_bytes)
            .unwrap_or(0)
    }

    /// Sets `address`'s nonce.
    pub fn set_nonce(&self, address: &Address, nonce: u64) {
        self.set(&Self::nonce_key(address), nonce.to_be_bytes().to_vec());
    }

    /// Increments `address`'s nonce by one and returns the new value.
    pub fn increment_nonce(&self, address: &Address) -> u64 {
        let next = self.get_nonce(address) + 1;
        self.set_nonce(address, next);
        next
    }

    /// Returns the BLAKE3 hash of `address`'s deployed code, if any.
    pub fn get_code_hash(&self, address: &Address) -> Option<[u8; 32]> {
        self.get(&Self::code_hash_key(address))
            .and_then(|bytes| <[u8; 32]>::try_from(bytes.as_slice()).ok())
    }

    /// Returns `contract`'s deployed bytecode, if any.
    pub fn get_code(&self, contract: &Address) -> Option<Vec<u8>> {
        self.get(&Self::code_key(contract))
    }

    /// Deploys `bytecode` at `contract`, recording both the code and its
    /// hash (the hash is what `account:<addr>:code_hash` actually holds, so
    /// checking "has this account got code" never requires loading the full
    /// bytecode).
    pub fn set_code(&self, contract: &Address, bytecode: Vec<u8>) {
        let hash = crate::crypto::hash::blake3_hash(&bytecode);
        self.set(&Self::code_key(contract), bytecode);
        self.set(&Self::code_hash_key(contract), hash.to_vec());
    }

    // -- Contract storage --------------------------------------------------

    /// Fetches a single storage slot for `contract`.
    pub fn get_storage(&self, contract: &Address, key: &[u8]) -> Option<Vec<u8>> {
        self.get(&Self::storage_key(contract, key))
    }

    /// Sets a single storage slot for `contract`.
    pub fn set_storage(&self, contract: &Address, key: &[u8], value: Vec<u8>) {
        self.set(&Self::storage_key(contract, key), value);
    }

    /// Removes a single storage slot for `contract`.
    pub fn delete_storage(&self, contract: &Address, key: &[u8]) {
        self.delete(&Self::storage_key(contract, key));
    }

    // -- Root, snapshots, integrity ------------------------------------------

    /// Returns the current trie root hash, or the all-zero sentinel for an
    /// empty trie.
    pub fn state_root(&self) -> [u8; 32] {
        let inner = self.inner.read();
        inner.hash_of(inner.root)
    }

    /// Records the current root under `name`. O(1): it stores a node id, not
    /// a copy of the tree.
    pub fn create_snapshot(&self, name: impl Into<String>) {
        let mut inner = self.inner.write();
        let root = inner.root;
        inner.snapshots.insert(name.into(), root);
    }

    /// Rewinds the trie to the root recorded under `name`.
    pub fn restore_snapshot(&self, name: &str) -> TrieResult<()> {
        let mut inner = self.inner.write();
        let root = *inner
            .snapshots
            .get(name)
            .ok_or_else(|| TrieError::SnapshotNotFound(name.to_string()))?;
        inner.root = root;
        Ok(())
    }

    /// Forgets a recorded snapshot. Does not affect the arena -- nodes that
    /// are still reachable from the live root (or other snapshots) are
    /// untouched; truly orphaned nodes are simply never visited again.
    pub fn delete_snapshot(&self, name: &str) -> TrieResult<()> {
        let mut inner = self.inner.write();
        inner
            .snapshots
            .remove(name)
            .ok_or_else(|| TrieError::SnapshotNotFound(name.to_string()))?;
        Ok(())
    }

    /// `true` if a snapshot named `name` has been recorded.
    pub fn has_snapshot(&self, name: &str) -> bool {
        self.inner.read().snapshots.contains_key(name)
    }

    /// Walks every reachable node and verifies its stored hash matches the
    /// recomputed hash of its key/value/children. Used after loading a trie
    /// from disk or after a restore to catch corruption early.
    pub fn validate(&self) -> TrieResult<()> {
        let inner = self.inner.read();
        inner.validate_subtree(inner.root)
    }

    /// Serializes the full arena (every node ever allocated, plus the
    /// current root and every recorded snapshot) to bytes.
    pub fn to_bytes(&self) -> TrieResult<Vec<u8>> {
        let inner = self.inner.read();
        bincode::serialize(&*inner).map_err(|e| TrieError::Serialization(e.to_string()))
    }

    /// Restores a trie previously serialized with [`Self::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> TrieResult<Self> {
        let inner: Inner =
            bincode::deserialize(bytes).map_err(|e| TrieError::Serialization(e.to_string()))?;
        Ok(Self {
            inner: RwLock::new(inner),
        })
    }

    /// Replaces this trie's entire arena, root, and snapshot table in place
    /// with a previously serialized image. Unlike [`Self::from_bytes`], this
    /// mutates an existing (possibly shared, `Arc`-wrapped) trie rather than
    /// constructing a new one.
    pub fn load_bytes(&self, bytes: &[u8]) -> TrieResult<()> {
        let inner: Inner =
            bincode::deserialize(bytes).map_err(|e| TrieError::Serialization(e.to_string()))?;
        *self.inner.write() = inner;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
