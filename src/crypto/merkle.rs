//! Binary Merkle trees over Blake2b-256
//!
//! Headers commit to the output set, the range proof set and the kernel set
//! through three roots computed here. An odd node at any level is paired with
//! itself; the empty tree has the zero root.

use super::{hash_pair, Hash};

pub fn compute_merkle_root(leaves: &[Hash]) -> Hash {
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = parent_level(&level);
    }
    level.first().copied().unwrap_or_else(Hash::zero)
}

fn parent_level(level: &[Hash]) -> Vec<Hash> {
    level
        .chunks(2)
        .map(|pair| match pair {
            [left, right] => hash_pair(left, right),
            [last] => hash_pair(last, last),
            _ => Hash::zero(),
        })
        .collect()
}

/// Append-only Merkle tree whose root always equals `compute_merkle_root`
/// over the leaves pushed so far. Pushes and truncations touch one node per
/// level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MerkleAccumulator {
    /// `levels[i]` holds the roots of the complete `2^i`-leaf subtrees
    levels: Vec<Vec<Hash>>,
}

impl MerkleAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_leaves(leaves: impl IntoIterator<Item = Hash>) -> Self {
        let mut accumulator = Self::new();
        for leaf in leaves {
            accumulator.push(leaf);
        }
        accumulator
    }

    pub fn len(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&mut self, leaf: Hash) {
        let mut node = leaf;
        let mut level = 0;
        loop {
            if self.levels.len() == level {
                self.levels.push(Vec::new());
            }
            let nodes = &mut self.levels[level];
            nodes.push(node);
            if nodes.len() % 2 == 1 {
                return;
            }
            node = hash_pair(&nodes[nodes.len() - 2], &nodes[nodes.len() - 1]);
            level += 1;
        }
    }

    /// Drop leaves beyond `len`
    pub fn truncate(&mut self, len: usize) {
        for (level, nodes) in self.levels.iter_mut().enumerate() {
            nodes.truncate(len >> level);
        }
        while self.levels.last().is_some_and(Vec::is_empty) {
            self.levels.pop();
        }
    }

    pub fn root(&self) -> Hash {
        frontier_root(&self.frontier())
    }

    /// Root after pushing `extra`, leaving this accumulator untouched
    pub fn root_with(&self, extra: &[Hash]) -> Hash {
        let mut frontier = self.frontier();
        for leaf in extra {
            push_frontier(&mut frontier, *leaf);
        }
        frontier_root(&frontier)
    }

    /// Last complete subtree root of each level whose leaf-count bit is set
    fn frontier(&self) -> Vec<Option<Hash>> {
        self.levels
            .iter()
            .map(|nodes| match nodes.len() % 2 {
                1 => nodes.last().copied(),
                _ => None,
            })
            .collect()
    }
}

fn push_frontier(frontier: &mut Vec<Option<Hash>>, leaf: Hash) {
    let mut node = leaf;
    for slot in frontier.iter_mut() {
        match slot.take() {
            Some(left) => node = hash_pair(&left, &node),
            None => {
                *slot = Some(node);
                return;
            }
        }
    }
    frontier.push(Some(node));
}

/// Fold the frontier upwards, pairing an unmatched node with itself the way
/// `parent_level` does
fn frontier_root(frontier: &[Option<Hash>]) -> Hash {
    let top = match frontier.iter().rposition(Option::is_some) {
        Some(top) => top,
        None => return Hash::zero(),
    };
    let mut carry: Option<Hash> = None;
    for (level, slot) in frontier.iter().enumerate().take(top + 1) {
        carry = match (slot, carry) {
            (Some(left), Some(right)) => Some(hash_pair(left, &right)),
            (Some(node), None) if level == top => return *node,
            (Some(node), None) => Some(hash_pair(node, node)),
            (None, Some(node)) => Some(hash_pair(&node, &node)),
            (None, None) => None,
        };
    }
    carry.unwrap_or_else(Hash::zero)
}

/// Sibling met on the way from a leaf to the root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MerkleStep {
    /// Sibling sits to the left of the running node
    Left(Hash),
    /// Sibling sits to the right of the running node
    Right(Hash),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    pub leaf_index: usize,
    pub path: Vec<MerkleStep>,
}

impl MerkleProof {
    /// Root implied by `leaf` and this path
    pub fn root_for(&self, leaf: &Hash) -> Hash {
        self.path.iter().fold(*leaf, |node, step| match step {
            MerkleStep::Left(sibling) => hash_pair(sibling, &node),
            MerkleStep::Right(sibling) => hash_pair(&node, sibling),
        })
    }

    pub fn verify(&self, leaf: &Hash, root: &Hash) -> bool {
        self.root_for(leaf) == *root
    }
}

/// Inclusion proof for `leaves[leaf_index]`, or `None` when out of range
pub fn build_merkle_proof(leaves: &[Hash], leaf_index: usize) -> Option<MerkleProof> {
    leaves.get(leaf_index)?;
    let mut level = leaves.to_vec();
    let mut position = leaf_index;
    let mut path = Vec::new();
    while level.len() > 1 {
        let step = if position % 2 == 1 {
            MerkleStep::Left(level[position - 1])
        } else {
            // Odd tail pairs with itself
            MerkleStep::Right(level.get(position + 1).copied().unwrap_or(level[position]))
        };
        path.push(step);
        level = parent_level(&level);
        position /= 2;
    }
    Some(MerkleProof { leaf_index, path })
}
