use std::collections::{HashMap, VecDeque};

use crate::consensus::Block;
use crate::crypto::Hash;

/// Bounded buffer of blocks whose parent is unknown. The oldest block is
/// evicted when full.
#[derive(Debug, Clone)]
pub struct OrphanPool {
    blocks: HashMap<Hash, Block>,
    order: VecDeque<Hash>,
    capacity: usize,
}

impl OrphanPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            blocks: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.blocks.contains_key(hash)
    }

    pub fn insert(&mut self, block: Block) {
        if self.capacity == 0 {
            return;
        }
        let hash = block.hash();
        if self.blocks.insert(hash, block).is_some() {
            return;
        }
        self.order.push_back(hash);
        while self.blocks.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.blocks.remove(&oldest);
                }
                None => break,
            }
        }
    }

    /// Remove and return every buffered child of `parent`
    pub fn take_children(&mut self, parent: &Hash) -> Vec<Block> {
        let children: Vec<Hash> = self
            .blocks
            .iter()
            .filter(|(_, block)| block.header.prev_hash == *parent)
            .map(|(hash, _)| *hash)
            .collect();
        self.order.retain(|hash| !children.contains(hash));
        let mut blocks: Vec<Block> = children
            .iter()
            .filter_map(|hash| self.blocks.remove(hash))
            .collect();
        blocks.sort_by_key(|block| block.hash());
        blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::{BlockHeader, PowAlgorithm, ProofOfWork};
    use crate::crypto::SecretKey;
    use crate::transaction::AggregateBody;

    fn block(prev: Hash, nonce: u64) -> Block {
        let header = BlockHeader {
            version: 1,
            height: 5,
            prev_hash: prev,
            timestamp: 0,
            output_mr: Hash::zero(),
            range_proof_mr: Hash::zero(),
            kernel_mr: Hash::zero(),
            total_kernel_offset: SecretKey::zero(),
            nonce,
            pow: ProofOfWork::new(PowAlgorithm::Primary),
        };
        Block::new(header, AggregateBody::empty())
    }

    #[test]
    fn test_evicts_oldest() {
        let mut pool = OrphanPool::new(2);
        let a = block(Hash::zero(), 1);
        let b = block(Hash::zero(), 2);
        let c = block(Hash::zero(), 3);
        pool.insert(a.clone());
        pool.insert(b.clone());
        pool.insert(c.clone());
        assert_eq!(pool.len(), 2);
        assert!(!pool.contains(&a.hash()));
        assert!(pool.contains(&c.hash()));
    }

    #[test]
    fn test_take_children() {
        let mut pool = OrphanPool::new(8);
        let parent = crate::crypto::hash_bytes(b"parent");
        pool.insert(block(parent, 1));
        pool.insert(block(parent, 2));
        pool.insert(block(Hash::zero(), 3));
        assert_eq!(pool.take_children(&parent).len(), 2);
        assert_eq!(pool.len(), 1);
        assert!(pool.take_children(&parent).is_empty());
    }
}
