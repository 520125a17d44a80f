//! Header arena
//!
//! Every known header lives in one vector and links to its parent by index,
//! so walking a chain backwards never touches the hash map.

use std::collections::HashMap;

use crate::config::ConsensusConstants;
use crate::constants::{DIFFICULTY_WINDOW_LOOKBACK, MEDIAN_TIMESTAMP_COUNT};
use crate::consensus::{difficulty_target, AccumulatedDifficulty, BlockHeader, PowAlgorithm};
use crate::crypto::Hash;
use crate::validation::{BlockValidator, HeaderContext, ValidationError};

#[derive(Debug, Clone)]
pub struct HeaderNode {
    pub header: BlockHeader,
    pub hash: Hash,
    pub parent: Option<usize>,
    /// Target difficulty this header was mined against
    pub target_difficulty: u64,
}

impl HeaderNode {
    pub fn accumulated(&self) -> AccumulatedDifficulty {
        self.header.pow.accumulated()
    }

    pub fn total_work(&self) -> u128 {
        self.accumulated().total_work()
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }
}

#[derive(Debug, Clone)]
pub struct HeaderArena {
    nodes: Vec<HeaderNode>,
    index: HashMap<Hash, usize>,
}

impl HeaderArena {
    /// Arena rooted at the genesis header
    pub fn new(genesis: BlockHeader) -> Self {
        let hash = genesis.hash();
        Self {
            nodes: vec![HeaderNode {
                header: genesis,
                hash,
                parent: None,
                target_difficulty: 1,
            }],
            index: HashMap::from([(hash, 0)]),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.index.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash) -> Option<&HeaderNode> {
        self.index.get(hash).map(|i| &self.nodes[*i])
    }

    pub fn genesis(&self) -> &HeaderNode {
        &self.nodes[0]
    }

    /// Insert a header whose parent is already present. Returns `None` if the
    /// parent is unknown; inserting a known header is a no-op.
    pub fn insert(&mut self, header: BlockHeader, target_difficulty: u64) -> Option<&HeaderNode> {
        let hash = header.hash();
        if let Some(existing) = self.index.get(&hash) {
            return Some(&self.nodes[*existing]);
        }
        let parent = *self.index.get(&header.prev_hash)?;
        let position = self.nodes.len();
        self.nodes.push(HeaderNode {
            header,
            hash,
            parent: Some(parent),
            target_difficulty,
        });
        self.index.insert(hash, position);
        Some(&self.nodes[position])
    }

    /// Walk from `hash` towards genesis, starting with `hash` itself
    pub fn ancestors<'a>(&'a self, hash: &Hash) -> impl Iterator<Item = &'a HeaderNode> + 'a {
        let mut next = self.index.get(hash).copied();
        std::iter::from_fn(move || {
            let node = &self.nodes[next?];
            next = node.parent;
            Some(node)
        })
    }

    /// Ancestor of `hash` at `height`
    pub fn ancestor_at(&self, hash: &Hash, height: u64) -> Option<&HeaderNode> {
        self.ancestors(hash)
            .take_while(|node| node.height() >= height)
            .find(|node| node.height() == height)
    }

    /// Hashes from just after `ancestor` up to and including `tip`, oldest first
    pub fn path_from(&self, ancestor: &Hash, tip: &Hash) -> Option<Vec<Hash>> {
        let mut path = Vec::new();
        for node in self.ancestors(tip) {
            if node.hash == *ancestor {
                path.reverse();
                return Some(path);
            }
            path.push(node.hash);
        }
        None
    }

    /// Last common ancestor of two known headers
    pub fn fork_point(&self, a: &Hash, b: &Hash) -> Option<&HeaderNode> {
        let mut left = self.get(a)?;
        let mut right = self.get(b)?;
        while left.height() > right.height() {
            left = &self.nodes[left.parent?];
        }
        while right.height() > left.height() {
            right = &self.nodes[right.parent?];
        }
        while left.hash != right.hash {
            left = &self.nodes[left.parent?];
            right = &self.nodes[right.parent?];
        }
        Some(left)
    }

    /// Timestamps of up to `count` headers ending with `hash`, oldest first
    pub fn timestamps(&self, hash: &Hash, count: usize) -> Vec<u64> {
        let mut timestamps: Vec<u64> = self
            .ancestors(hash)
            .take(count)
            .map(|node| node.header.timestamp)
            .collect();
        timestamps.reverse();
        timestamps
    }

    /// `(timestamp, target_difficulty)` of the last `count` non-genesis blocks
    /// mined with `algorithm`, ending at or before `hash`, oldest first.
    /// Only the nearest `count * DIFFICULTY_WINDOW_LOOKBACK` ancestors are
    /// scanned, so a rarely used algorithm gets a shorter window.
    pub fn difficulty_window(
        &self,
        hash: &Hash,
        algorithm: PowAlgorithm,
        count: usize,
    ) -> Vec<(u64, u64)> {
        let mut window: Vec<(u64, u64)> = self
            .ancestors(hash)
            .take(count.saturating_mul(DIFFICULTY_WINDOW_LOOKBACK))
            .filter(|node| node.height() > 0 && node.header.pow.pow_algo == algorithm)
            .take(count)
            .map(|node| (node.header.timestamp, node.target_difficulty))
            .collect();
        window.reverse();
        window
    }

    /// Target difficulty for an `algorithm` block on top of `parent`
    pub fn next_target(
        &self,
        parent: &Hash,
        algorithm: PowAlgorithm,
        constants: &ConsensusConstants,
    ) -> u64 {
        let window = self.difficulty_window(parent, algorithm, constants.difficulty_window + 1);
        difficulty_target(algorithm, &window, constants)
    }

    /// Validate `header` against its parent in the arena. Returns the target
    /// difficulty it was checked against; the header is not inserted.
    pub fn check_header(
        &self,
        header: &BlockHeader,
        validator: &BlockValidator,
        now: u64,
    ) -> Result<u64, ValidationError> {
        let parent = self
            .get(&header.prev_hash)
            .ok_or(ValidationError::PrevHashMismatch)?;
        let target = self.next_target(&parent.hash, header.pow.pow_algo, validator.constants());
        let timestamps = self.timestamps(&parent.hash, MEDIAN_TIMESTAMP_COUNT);
        let context = HeaderContext {
            parent: &parent.header,
            timestamps: &timestamps,
            target_difficulty: target,
        };
        validator.validate_header(header, &context, now)?;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::ProofOfWork;
    use crate::crypto::SecretKey;

    fn genesis() -> BlockHeader {
        BlockHeader {
            version: 1,
            height: 0,
            prev_hash: Hash::zero(),
            timestamp: 1_000,
            output_mr: Hash::zero(),
            range_proof_mr: Hash::zero(),
            kernel_mr: Hash::zero(),
            total_kernel_offset: SecretKey::zero(),
            nonce: 0,
            pow: ProofOfWork::new(PowAlgorithm::Primary),
        }
    }

    fn child(parent: &BlockHeader, algorithm: PowAlgorithm, salt: u64) -> BlockHeader {
        let mut header = BlockHeader::from_previous(parent);
        header.timestamp = parent.timestamp + 100;
        header.nonce = salt;
        header.pow.pow_algo = algorithm;
        header
    }

    #[test]
    fn test_fork_point_and_path() {
        let g = genesis();
        let mut arena = HeaderArena::new(g.clone());
        let a1 = child(&g, PowAlgorithm::Primary, 1);
        let a2 = child(&a1, PowAlgorithm::Primary, 1);
        let b1 = child(&g, PowAlgorithm::Secondary, 2);
        for header in [&a1, &a2, &b1] {
            assert!(arena.insert(header.clone(), 1).is_some());
        }
        assert_eq!(arena.fork_point(&a2.hash(), &b1.hash()).unwrap().hash, g.hash());
        assert_eq!(
            arena.path_from(&g.hash(), &a2.hash()).unwrap(),
            vec![a1.hash(), a2.hash()]
        );
        assert_eq!(arena.ancestor_at(&a2.hash(), 1).unwrap().hash, a1.hash());
    }

    #[test]
    fn test_unknown_parent_rejected() {
        let g = genesis();
        let mut arena = HeaderArena::new(g.clone());
        let a1 = child(&g, PowAlgorithm::Primary, 1);
        let a2 = child(&a1, PowAlgorithm::Primary, 1);
        assert!(arena.insert(a2, 1).is_none());
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_difficulty_window_filters_algorithm() {
        let g = genesis();
        let mut arena = HeaderArena::new(g.clone());
        let mut prev = g;
        for i in 0..6u64 {
            let algorithm = if i % 2 == 0 {
                PowAlgorithm::Primary
            } else {
                PowAlgorithm::Secondary
            };
            let header = child(&prev, algorithm, i);
            arena.insert(header.clone(), 10 + i);
            prev = header;
        }
        let window = arena.difficulty_window(&prev.hash(), PowAlgorithm::Secondary, 2);
        assert_eq!(window.iter().map(|(_, d)| *d).collect::<Vec<_>>(), vec![13, 15]);
        assert_eq!(arena.timestamps(&prev.hash(), 3).len(), 3);
    }

    #[test]
    fn test_difficulty_window_scan_is_bounded() {
        let g = genesis();
        let mut arena = HeaderArena::new(g.clone());
        let secondary = child(&g, PowAlgorithm::Secondary, 0);
        arena.insert(secondary.clone(), 7);
        let mut prev = secondary;
        for i in 1..=40u64 {
            let header = child(&prev, PowAlgorithm::Primary, i);
            arena.insert(header.clone(), 10);
            prev = header;
        }
        // 41 ancestors back is out of reach for a window of 3
        assert!(arena
            .difficulty_window(&prev.hash(), PowAlgorithm::Secondary, 3)
            .is_empty());
        assert_eq!(
            arena.difficulty_window(&prev.hash(), PowAlgorithm::Secondary, 20),
            vec![(1_100, 7)]
        );
        assert_eq!(arena.difficulty_window(&prev.hash(), PowAlgorithm::Primary, 3).len(), 3);
    }
}
