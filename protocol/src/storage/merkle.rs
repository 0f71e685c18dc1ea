//! Binary Merkle tree over 32-byte leaf hashes.
//!
//! Used for a block's transaction root (component D in the storage layer).
//! Odd levels duplicate the last node, matching Bitcoin's construction; the
//! empty tree's root is the all-zero sentinel so an empty block still has a
//! well-defined `merkle_root`.
//!
//! This is deliberately a plain binary tree, not a sparse Merkle tree or a
//! Merkle Mountain Range — a block's transaction set is small and fully known
//! up front, so there's no need for anything fancier.

use crate::crypto::hash::blake3_hash_multi;
use serde::{Deserialize, Serialize};

/// Root hash of the empty tree. Never the output of a hash function; callers
/// can distinguish "empty block" from "single transaction" by checking
/// against this constant directly.
pub const EMPTY_ROOT: [u8; 32] = [0u8; 32];

/// Computes the Merkle root of a set of leaf hashes.
///
/// Returns [`EMPTY_ROOT`] if `leaves` is empty. A single leaf is paired with
/// itself, which falls out of the general duplicate-last-on-odd-count rule
/// and ensures the root is always the output of a hash, never a raw leaf.
pub fn root(leaves: &[[u8; 32]]) -> [u8; 32] {
    if leaves.is_empty() {
        return EMPTY_ROOT;
    }

    let mut level: Vec<[u8; 32]> = leaves.to_vec();
    while level.len() > 1 {
        level = next_level(&level);
    }
    level[0]
}

fn next_level(level: &[[u8; 32]]) -> Vec<[u8; 32]> {
    let mut next = Vec::with_capacity(level.len().div_ceil(2));
    for chunk in level.chunks(2) {
        let left = &chunk[0];
        let right = chunk.get(1).unwrap_or(left);
        next.push(blake3_hash_multi(&[left.as_slice(), right.as_slice()]));
    }
    next
}

/// A proof that a single leaf is included in a tree with a given root.
///
/// `siblings[i]` is the sibling hash needed at level `i` of the climb from
/// leaf to root; `directions[i]` is `true` if the leaf-side node at that
/// level is the *right* child (so the sibling must be placed on the left when
/// re-folding).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf_index: usize,
    pub siblings: Vec<[u8; 32]>,
    pub directions: Vec<bool>,
}

/// Builds an inclusion proof for the leaf at `leaf_index`.
///
/// Returns `None` if `leaf_index` is out of bounds. The proof for a
/// single-leaf tree has exactly one sibling entry (the leaf paired with
/// itself), matching [`root`]'s handling of the degenerate case.
pub fn prove(leaves: &[[u8; 32]], leaf_index: usize) -> Option<MerkleProof> {
    if leaf_index >= leaves.len() {
        return None;
    }

    let mut siblings = Vec::new();
    let mut directions = Vec::new();

    let mut level: Vec<[u8; 32]> = leaves.to_vec();
    let mut index = leaf_index;

    while level.len() > 1 {
        let is_right = index % 2 == 1;
        let sibling_index = if is_right { index - 1 } else { index + 1 };
        let sibling = *level.get(sibling_index).unwrap_or(&level[index]);

        siblings.push(sibling);
        directions.push(is_right);

        level = next_level(&level);
        index /= 2;
    }

    Some(MerkleProof {
        leaf_index,
        siblings,
        directions,
    })
}

/// Verifies that `leaf` is included in the tree whose root is `expected_root`,
/// re-folding the proof from leaf to root.
pub fn verify(expected_root: [u8; 32], leaf: [u8; 32], proof: &MerkleProof) -> bool {
    let mut current = leaf;
    for (sibling, is_right) in proof.siblings.iter().zip(&proof.directions) {
        current = if *is_right {
            blake3_hash_multi(&[sibling.as_slice(), current.as_slice()])
        } else {
            blake3_hash_multi(&[current.as_slice(), sibling.as_slice()])
        };
    }
    current == expected_root
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::blake3_hash;

    fn leaves(n: usize) -> Vec<[u8; 32]> {
        (0..n).map(|i| blake3_hash(&[i as u8])).collect()
    }

    #[test]
    fn empty_tree_root_is_sentinel() {
        assert_eq!(root(&[]), EMPTY_ROOT);
    }

    #[test]
    fn single_leaf_root_pairs_with_itself() {
        let leaf = blake3_hash(b"only");
        let expected = blake3_hash_multi(&[leaf.as_slice(), leaf.as_slice()]);
        assert_eq!(root(&[leaf]), expected);
    }

    #[test]
    fn root_is_deterministic() {
        let l = leaves(7);
        assert_eq!(root(&l), root(&l));
    }

    #[test]
    fn root_is_order_sensitive() {
        let mut l = leaves(4);
        let r1 = root(&l);
        l.swap(0, 1);
        let r2 = root(&l);
        assert_ne!(r1, r2);
    }

    #[test]
    fn odd_leaf_count_duplicates_last() {
        let l = leaves(3);
        let manual = next_level(&[l[0], l[1], l[2]]);
        let manual_root = {
            let mut level = manual;
            while level.len() > 1 {
                level = next_level(&level);
            }
            level[0]
        };
        assert_eq!(root(&l), manual_root);
    }

    #[test]
    fn proof_out_of_bounds_is_none() {
        let l = leaves(4);
        assert!(prove(&l, 4).is_none());
    }

    #[test]
    fn proof_verifies_for_every_leaf() {
        let l = leaves(9);
        let r = root(&l);
        for (i, leaf) in l.iter().enumerate() {
            let proof = prove(&l, i).unwrap();
            assert!(verify(r, *leaf, &proof), "leaf {i} failed to verify");
        }
    }

    #[test]
    fn proof_for_single_leaf_tree() {
        let l = leaves(1);
        let r = root(&l);
        let proof = prove(&l, 0).unwrap();
        assert!(verify(r, l[0], &proof));
    }

    #[test]
    fn tampered_leaf_fails_verification() {
        let l = leaves(5);
        let r = root(&l);
        let proof = prove(&l, 2).unwrap();
        let wrong_leaf = blake3_hash(b"not the real leaf");
        assert!(!verify(r, wrong_leaf, &proof));
    }

    #[test]
    fn tampered_sibling_fails_verification() {
        let l = leaves(6);
        let r = root(&l);
        let mut proof = prove(&l, 3).unwrap();
        proof.siblings[0] = blake3_hash(b"wrong sibling");
        assert!(!verify(r, l[3], &proof));
    }

    #[test]
    fn wrong_root_fails_verification() {
        let l = leaves(4);
        let proof = prove(&l, 1).unwrap();
        assert!(!verify(EMPTY_ROOT, l[1], &proof));
    }
}
