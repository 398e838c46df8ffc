//! note commitment tree
//!
//! fixed-height append-only merkle tree of note commitments. empty subtrees
//! hash to precomputed zero nodes, and the root is maintained incrementally
//! from the frontier of filled left subtrees, so an insert costs one hash
//! per level. every insert batch pushes its root into a bounded history so
//! proofs built against a slightly older root still verify.

use std::collections::VecDeque;

use codec::{Decode, Encode};

use crate::error::{Error, Result};
use crate::note::NoteCommitment;
use crate::nullifier::Position;
use crate::{MERKLE_DOMAIN, ZERO_LEAF_DOMAIN};

/// deepest supported tree (2^32 leaves)
pub const MAX_TREE_HEIGHT: usize = 32;

/// most commitments a single transaction inserts
pub const MAX_INSERT_BATCH: usize = 2;

fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(MERKLE_DOMAIN);
    hasher.update(left);
    hasher.update(right);
    *hasher.finalize().as_bytes()
}

/// zero node per level, `zeros[height]` is the empty-tree root
fn zero_hashes(height: usize) -> Vec<[u8; 32]> {
    let mut zeros = Vec::with_capacity(height + 1);
    zeros.push(*blake3::hash(ZERO_LEAF_DOMAIN).as_bytes());
    for level in 0..height {
        let z = zeros[level];
        zeros.push(hash_pair(&z, &z));
    }
    zeros
}

/// merkle root of the commitment tree
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Encode, Decode)]
pub struct Root(pub [u8; 32]);

impl Root {
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl core::fmt::Display for Root {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// merkle inclusion proof
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerklePath {
    /// position of the leaf
    pub position: Position,
    /// sibling hashes from leaf to root
    pub siblings: Vec<[u8; 32]>,
}

impl MerklePath {
    /// all-zero path at position 0, used for padding inputs
    pub fn empty(height: usize) -> Self {
        let mut siblings = zero_hashes(height);
        siblings.truncate(height);
        Self {
            position: Position(0),
            siblings,
        }
    }

    /// root obtained by hashing `leaf` up along this path
    pub fn compute_root(&self, leaf: &NoteCommitment) -> Root {
        let mut current = leaf.0;
        let mut pos = self.position.0;

        for sibling in &self.siblings {
            current = if pos & 1 == 0 {
                hash_pair(&current, sibling)
            } else {
                hash_pair(sibling, &current)
            };
            pos >>= 1;
        }

        Root(current)
    }

    /// verify that commitment is in tree with given root
    pub fn verify(&self, leaf: &NoteCommitment, root: &Root) -> bool {
        self.compute_root(leaf) == *root
    }
}

/// ring buffer of recent roots, oldest evicted first
#[derive(Clone, Debug)]
pub struct RootHistory {
    roots: VecDeque<Root>,
    capacity: usize,
}

impl RootHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            roots: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, root: Root) {
        if self.roots.len() == self.capacity {
            self.roots.pop_front();
        }
        self.roots.push_back(root);
    }

    pub fn contains(&self, root: &Root) -> bool {
        self.roots.contains(root)
    }

    pub fn latest(&self) -> Option<&Root> {
        self.roots.back()
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// commitment tree with root history
#[derive(Clone, Debug)]
pub struct CommitmentTree {
    height: usize,
    /// all commitments (leaves), in insertion order
    leaves: Vec<NoteCommitment>,
    /// latest left node at each level
    filled_subtrees: Vec<[u8; 32]>,
    zeros: Vec<[u8; 32]>,
    root: Root,
    history: RootHistory,
}

impl CommitmentTree {
    /// empty tree of `height` levels remembering the last `history_size` roots
    pub fn new(height: usize, history_size: usize) -> Result<Self> {
        if height == 0 || height > MAX_TREE_HEIGHT {
            return Err(Error::InvalidConfig(format!(
                "tree height must be in 1..={MAX_TREE_HEIGHT}, got {height}"
            )));
        }
        if history_size == 0 {
            return Err(Error::InvalidConfig("root history must hold at least one root".into()));
        }

        let zeros = zero_hashes(height);
        let root = Root(zeros[height]);
        let mut history = RootHistory::new(history_size);
        history.push(root);

        Ok(Self {
            height,
            leaves: Vec::new(),
            filled_subtrees: zeros[..height].to_vec(),
            zeros,
            root,
            history,
        })
    }

    /// rebuild a replica from the ordered leaf sequence
    pub fn from_leaves(
        height: usize,
        history_size: usize,
        leaves: impl IntoIterator<Item = NoteCommitment>,
    ) -> Result<Self> {
        let mut tree = Self::new(height, history_size)?;
        for leaf in leaves {
            tree.check_capacity(1)?;
            tree.append_leaf(leaf);
        }
        if !tree.is_empty() {
            tree.history.push(tree.root);
        }
        Ok(tree)
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// maximum number of leaves
    pub fn capacity(&self) -> u64 {
        1u64 << self.height
    }

    /// number of notes in tree
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    pub fn leaves(&self) -> &[NoteCommitment] {
        &self.leaves
    }

    pub fn leaf(&self, position: Position) -> Option<&NoteCommitment> {
        usize::try_from(position.0)
            .ok()
            .and_then(|i| self.leaves.get(i))
    }

    /// current root
    pub fn root(&self) -> Root {
        self.root
    }

    /// whether `root` is one of the recent roots
    pub fn is_known_root(&self, root: &Root) -> bool {
        self.history.contains(root)
    }

    pub fn history(&self) -> &RootHistory {
        &self.history
    }

    /// fail if `count` more leaves would overflow the tree
    pub fn check_capacity(&self, count: usize) -> Result<()> {
        let leaves = self.leaves.len() as u64;
        if leaves + count as u64 > self.capacity() {
            return Err(Error::CapacityExceeded {
                leaves,
                capacity: self.capacity(),
                requested: count,
            });
        }
        Ok(())
    }

    /// append a batch of up to two commitments, returns the new root
    ///
    /// an empty batch leaves the root and its history untouched
    pub fn insert(&mut self, commitments: &[NoteCommitment]) -> Result<Root> {
        if commitments.is_empty() {
            return Ok(self.root);
        }
        if commitments.len() > MAX_INSERT_BATCH {
            return Err(Error::TooManyInputsOrOutputs {
                inputs: 0,
                outputs: commitments.len(),
            });
        }
        self.check_capacity(commitments.len())?;

        for commitment in commitments {
            self.append_leaf(*commitment);
        }
        self.history.push(self.root);
        Ok(self.root)
    }

    fn append_leaf(&mut self, leaf: NoteCommitment) {
        let mut index = self.leaves.len() as u64;
        let mut current = leaf.0;

        for level in 0..self.height {
            if index & 1 == 0 {
                self.filled_subtrees[level] = current;
                current = hash_pair(&current, &self.zeros[level]);
            } else {
                current = hash_pair(&self.filled_subtrees[level], &current);
            }
            index >>= 1;
        }

        self.leaves.push(leaf);
        self.root = Root(current);
    }

    /// get merkle proof for a position
    pub fn prove(&self, position: Position) -> Option<MerklePath> {
        let mut pos = usize::try_from(position.0).ok()?;
        if pos >= self.leaves.len() {
            return None;
        }

        let mut siblings = Vec::with_capacity(self.height);
        let mut level = self.leaves.iter().map(|c| c.0).collect::<Vec<_>>();

        for zero in &self.zeros[..self.height] {
            siblings.push(level.get(pos ^ 1).copied().unwrap_or(*zero));

            level = level
                .chunks(2)
                .map(|pair| hash_pair(&pair[0], pair.get(1).unwrap_or(zero)))
                .collect();
            pos >>= 1;
        }

        Some(MerklePath { position, siblings })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cm(seed: u8) -> NoteCommitment {
        NoteCommitment([seed; 32])
    }

    #[test]
    fn test_merkle_tree() {
        let mut tree = CommitmentTree::new(5, 10).unwrap();
        let empty_root = tree.root();
        assert!(tree.is_known_root(&empty_root));

        let root1 = tree.insert(&[cm(1), cm(2)]).unwrap();
        let root2 = tree.insert(&[cm(3)]).unwrap();

        // roots should change
        assert_ne!(empty_root, root1);
        assert_ne!(root1, root2);
        assert_eq!(tree.root(), root2);

        // proofs should verify
        for (i, c) in [cm(1), cm(2), cm(3)].iter().enumerate() {
            let proof = tree.prove(Position(i as u64)).unwrap();
            assert!(proof.verify(c, &root2));
        }

        // wrong commitment should fail
        let proof = tree.prove(Position(0)).unwrap();
        assert!(!proof.verify(&cm(2), &root2));

        // no proof for empty slot
        assert!(tree.prove(Position(3)).is_none());
    }

    #[test]
    fn test_capacity() {
        let mut tree = CommitmentTree::new(2, 10).unwrap();
        tree.insert(&[cm(1), cm(2)]).unwrap();
        tree.insert(&[cm(3)]).unwrap();
        let before = tree.root();

        assert_eq!(
            tree.insert(&[cm(4), cm(5)]),
            Err(Error::CapacityExceeded {
                leaves: 3,
                capacity: 4,
                requested: 2
            })
        );
        assert_eq!(tree.root(), before);
        assert_eq!(tree.len(), 3);

        tree.insert(&[cm(4)]).unwrap();
        assert!(tree.check_capacity(1).is_err());
    }

    #[test]
    fn test_batch_limit() {
        let mut tree = CommitmentTree::new(5, 10).unwrap();
        assert!(matches!(
            tree.insert(&[cm(1), cm(2), cm(3)]),
            Err(Error::TooManyInputsOrOutputs { .. })
        ));
        assert!(tree.is_empty());
    }

    #[test]
    fn test_root_history_window() {
        let mut tree = CommitmentTree::new(5, 3).unwrap();
        let r0 = tree.root();
        let r1 = tree.insert(&[cm(1)]).unwrap();
        let r2 = tree.insert(&[cm(2)]).unwrap();
        assert!(tree.is_known_root(&r0));

        let r3 = tree.insert(&[cm(3)]).unwrap();
        assert!(!tree.is_known_root(&r0));
        assert!(tree.is_known_root(&r1));
        assert!(tree.is_known_root(&r2));
        assert!(tree.is_known_root(&r3));
        assert_eq!(tree.history().len(), 3);
        assert_eq!(tree.history().latest(), Some(&r3));
    }

    #[test]
    fn test_empty_batch_keeps_history() {
        let mut tree = CommitmentTree::new(5, 2).unwrap();
        let r0 = tree.root();
        let r1 = tree.insert(&[cm(1)]).unwrap();

        assert_eq!(tree.insert(&[]).unwrap(), r1);
        assert_eq!(tree.insert(&[]).unwrap(), r1);
        assert_eq!(tree.history().len(), 2);
        assert!(tree.is_known_root(&r0));
        assert_eq!(tree.len(), 1);

        // an empty replica holds only the empty root once
        let replica = CommitmentTree::from_leaves(5, 2, Vec::<NoteCommitment>::new()).unwrap();
        assert_eq!(replica.history().len(), 1);
        assert_eq!(replica.root(), r0);
    }

    #[test]
    fn test_invalid_dimensions() {
        assert!(CommitmentTree::new(0, 10).is_err());
        assert!(CommitmentTree::new(33, 10).is_err());
        assert!(CommitmentTree::new(5, 0).is_err());
    }

    #[test]
    fn test_empty_path_matches_empty_tree() {
        let tree = CommitmentTree::new(4, 1).unwrap();
        let path = MerklePath::empty(4);
        let zero_leaf = NoteCommitment(*blake3::hash(ZERO_LEAF_DOMAIN).as_bytes());
        assert!(path.verify(&zero_leaf, &tree.root()));
    }

    proptest! {
        #[test]
        fn prop_append_only(batches in proptest::collection::vec(
            proptest::collection::vec(any::<[u8; 32]>(), 0..=2), 0..12)
        ) {
            let mut tree = CommitmentTree::new(5, 4).unwrap();
            for batch in &batches {
                let before = tree.leaves().to_vec();
                let batch: Vec<_> = batch.iter().map(|b| NoteCommitment(*b)).collect();
                if tree.insert(&batch).is_ok() {
                    prop_assert!(tree.leaves().starts_with(&before));
                    prop_assert_eq!(tree.len(), before.len() + batch.len());
                } else {
                    prop_assert_eq!(tree.leaves(), &before[..]);
                }
            }
        }

        #[test]
        fn prop_root_is_function_of_leaves(leaves in proptest::collection::vec(any::<[u8; 32]>(), 1..20)) {
            let leaves: Vec<_> = leaves.into_iter().map(NoteCommitment).collect();

            let mut incremental = CommitmentTree::new(5, 8).unwrap();
            for pair in leaves.chunks(2) {
                incremental.insert(pair).unwrap();
            }
            let replica = CommitmentTree::from_leaves(5, 8, leaves.iter().copied()).unwrap();
            prop_assert_eq!(incremental.root(), replica.root());

            for (i, leaf) in leaves.iter().enumerate() {
                let path = replica.prove(Position(i as u64)).unwrap();
                prop_assert!(path.verify(leaf, &incremental.root()));
            }
        }
    }
}
