//! Persistent Merkle trie over live outputs
//!
//! A compressed binary trie keyed by the hash of each output commitment.
//! Branches exist only where keys diverge, so the shape (and both roots) is
//! fixed by the set of live outputs. Nodes are shared between versions:
//! cloning is O(1) and an insert or removal rebuilds only the nodes on one
//! root-to-leaf path.

use std::sync::Arc;

use crate::crypto::{hash_bytes, Commitment, DomainHasher, Hash};

use super::UtxoEntry;

/// Root pair committed to by every node: outputs and range proofs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Roots {
    output: Hash,
    range_proof: Hash,
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        key: Hash,
        entry: UtxoEntry,
        roots: Roots,
    },
    Branch {
        /// First bit at which the two sides differ
        bit: usize,
        /// Smallest key below this branch
        key: Hash,
        left: Arc<Node>,
        right: Arc<Node>,
        roots: Roots,
    },
}

impl Node {
    fn leaf(key: Hash, entry: UtxoEntry) -> Self {
        let roots = Roots {
            output: DomainHasher::new("utxo_leaf")
                .chain(key.as_bytes())
                .chain(entry.output.hash().as_bytes())
                .finalize(),
            range_proof: DomainHasher::new("utxo_leaf")
                .chain(key.as_bytes())
                .chain(entry.output.range_proof.hash().as_bytes())
                .finalize(),
        };
        Node::Leaf { key, entry, roots }
    }

    fn branch(bit: usize, left: Arc<Node>, right: Arc<Node>) -> Self {
        let mut node = Node::Branch {
            bit,
            key: left.key(),
            roots: left.roots(),
            left,
            right,
        };
        node.rehash();
        node
    }

    fn key(&self) -> Hash {
        match self {
            Node::Leaf { key, .. } | Node::Branch { key, .. } => *key,
        }
    }

    fn roots(&self) -> Roots {
        match self {
            Node::Leaf { roots, .. } | Node::Branch { roots, .. } => *roots,
        }
    }

    fn rehash(&mut self) {
        if let Node::Branch {
            key,
            left,
            right,
            roots,
            ..
        } = self
        {
            let (l, r) = (left.roots(), right.roots());
            *key = left.key();
            *roots = Roots {
                output: branch_hash(&l.output, &r.output),
                range_proof: branch_hash(&l.range_proof, &r.range_proof),
            };
        }
    }
}

fn branch_hash(left: &Hash, right: &Hash) -> Hash {
    DomainHasher::new("utxo_branch")
        .chain(left.as_bytes())
        .chain(right.as_bytes())
        .finalize()
}

fn bit_at(key: &Hash, bit: usize) -> bool {
    key.as_bytes()[bit / 8] >> (7 - bit % 8) & 1 == 1
}

fn first_difference(a: &Hash, b: &Hash) -> Option<usize> {
    a.as_bytes()
        .iter()
        .zip(b.as_bytes())
        .position(|(x, y)| x != y)
        .map(|byte| byte * 8 + (a.as_bytes()[byte] ^ b.as_bytes()[byte]).leading_zeros() as usize)
}

/// Trie key of a commitment
pub fn trie_key(commitment: &Commitment) -> Hash {
    hash_bytes(&commitment.0)
}

fn insert_at(slot: &mut Arc<Node>, key: Hash, leaf: Arc<Node>) -> bool {
    let split = match slot.as_ref() {
        Node::Leaf { key: existing, .. } => match first_difference(existing, &key) {
            Some(bit) => bit,
            None => return false,
        },
        Node::Branch { bit, key: sample, .. } => match first_difference(sample, &key) {
            Some(split) if split < *bit => split,
            _ => {
                let node = Arc::make_mut(slot);
                let inserted = match node {
                    Node::Branch {
                        bit, left, right, ..
                    } => {
                        let child = if bit_at(&key, *bit) { right } else { left };
                        insert_at(child, key, leaf)
                    }
                    Node::Leaf { .. } => false,
                };
                if inserted {
                    node.rehash();
                }
                return inserted;
            }
        },
    };
    let existing = slot.clone();
    let (left, right) = if bit_at(&key, split) {
        (existing, leaf)
    } else {
        (leaf, existing)
    };
    *slot = Arc::new(Node::branch(split, left, right));
    true
}

enum Removal {
    Missing,
    /// Removed from below this node
    Removed(UtxoEntry),
    /// This node was the leaf; the caller drops it
    Emptied(UtxoEntry),
}

fn remove_at(slot: &mut Arc<Node>, key: &Hash) -> Removal {
    if let Node::Leaf { key: existing, entry, .. } = slot.as_ref() {
        return if existing == key {
            Removal::Emptied(entry.clone())
        } else {
            Removal::Missing
        };
    }
    let (outcome, sibling) = {
        let node = Arc::make_mut(slot);
        let (outcome, sibling) = match node {
            Node::Branch {
                bit, left, right, ..
            } => {
                let (child, other) = if bit_at(key, *bit) {
                    (right, left)
                } else {
                    (left, right)
                };
                match remove_at(child, key) {
                    Removal::Emptied(entry) => (Removal::Removed(entry), Some(other.clone())),
                    outcome => (outcome, None),
                }
            }
            Node::Leaf { .. } => (Removal::Missing, None),
        };
        if sibling.is_none() && matches!(outcome, Removal::Removed(_)) {
            node.rehash();
        }
        (outcome, sibling)
    };
    if let Some(sibling) = sibling {
        *slot = sibling;
    }
    outcome
}

#[derive(Debug, Clone, Default)]
pub struct UtxoTrie {
    root: Option<Arc<Node>>,
    len: usize,
}

impl UtxoTrie {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, commitment: &Commitment) -> Option<&UtxoEntry> {
        let key = trie_key(commitment);
        let mut node = self.root.as_deref()?;
        loop {
            match node {
                Node::Leaf { key: found, entry, .. } => {
                    return (*found == key).then_some(entry);
                }
                Node::Branch {
                    bit, left, right, ..
                } => {
                    node = if bit_at(&key, *bit) { &**right } else { &**left };
                }
            }
        }
    }

    pub fn contains(&self, commitment: &Commitment) -> bool {
        self.get(commitment).is_some()
    }

    /// Insert a new output; returns false and changes nothing if it is
    /// already present
    pub fn insert(&mut self, entry: UtxoEntry) -> bool {
        let key = trie_key(&entry.commitment());
        let leaf = Arc::new(Node::leaf(key, entry));
        let inserted = match &mut self.root {
            Some(root) => insert_at(root, key, leaf),
            None => {
                self.root = Some(leaf);
                true
            }
        };
        if inserted {
            self.len += 1;
        }
        inserted
    }

    pub fn remove(&mut self, commitment: &Commitment) -> Option<UtxoEntry> {
        if !self.contains(commitment) {
            return None;
        }
        let key = trie_key(commitment);
        let root = self.root.as_mut()?;
        let removed = match remove_at(root, &key) {
            Removal::Missing => None,
            Removal::Removed(entry) => Some(entry),
            Removal::Emptied(entry) => {
                self.root = None;
                Some(entry)
            }
        };
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    pub fn output_root(&self) -> Hash {
        self.root.as_ref().map_or(Hash::zero(), |n| n.roots().output)
    }

    pub fn range_proof_root(&self) -> Hash {
        self.root
            .as_ref()
            .map_or(Hash::zero(), |n| n.roots().range_proof)
    }

    /// Entries in key order
    pub fn iter(&self) -> impl Iterator<Item = &UtxoEntry> {
        let mut stack: Vec<&Node> = self.root.as_deref().into_iter().collect();
        std::iter::from_fn(move || loop {
            match stack.pop()? {
                Node::Leaf { entry, .. } => return Some(entry),
                Node::Branch { left, right, .. } => {
                    stack.push(right);
                    stack.push(left);
                }
            }
        })
    }
}
