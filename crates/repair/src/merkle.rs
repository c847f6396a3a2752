//! Merkle trees over token ranges and the difference computation that
//! drives reconciliation.
//!
//! Hashing rules:
//!
//! ```text
//! leaf_hash = H("leaf" || left || right || row_hashes...)
//! node_hash = H("node" || depth || left_child || right_child)
//! ```
//!
//! The zero hash marks a range that holds nothing on that side; it is a
//! definite statement, never "unknown".

use eyre::{bail, Result};
use sha2::{Digest, Sha256};
use tessera_primitives::{Hash, Token, TokenRange};

/// Summary of one token range on one side: the range and the hash of its
/// content.
#[derive(Clone, Copy, Debug, PartialEq, Eq, std::hash::Hash)]
pub struct RangeHash {
    pub range: TokenRange,
    pub hash: Hash,
}

impl RangeHash {
    #[must_use]
    pub const fn new(range: TokenRange, hash: Hash) -> Self {
        Self { range, hash }
    }

    /// Whether this side has nothing in the range.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hash.is_zero()
    }
}

/// Hash the sorted row hashes of one leaf range.
#[must_use]
pub fn leaf_hash(range: TokenRange, row_hashes: &[Hash]) -> Hash {
    if row_hashes.is_empty() {
        return Hash::ZERO;
    }
    let mut hasher = Sha256::new();
    hasher.update(b"leaf");
    hasher.update(range.left.0.to_le_bytes());
    hasher.update(range.right.0.to_le_bytes());
    for row in row_hashes {
        hasher.update(row.as_bytes());
    }
    Hash::from_bytes(hasher.finalize().into())
}

fn node_hash(depth: u32, left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(b"node");
    hasher.update(depth.to_le_bytes());
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    Hash::from_bytes(hasher.finalize().into())
}

/// An immutable binary hash tree over a contiguous, ascending set of
/// leaf ranges.
#[derive(Clone, Debug)]
pub struct MerkleTree {
    leaves: Vec<RangeHash>,
    root: Hash,
}

impl MerkleTree {
    /// Build from leaf summaries. Leaves must be non-empty as a set,
    /// ascending and contiguous; each leaf's hash may be the zero marker.
    pub fn from_leaves(leaves: Vec<RangeHash>) -> Result<Self> {
        if leaves.is_empty() {
            bail!("a tree needs at least one leaf range");
        }
        for pair in leaves.windows(2) {
            if pair[1].range.left != pair[0].range.right {
                bail!(
                    "leaf ranges must be contiguous and ascending: {} then {}",
                    pair[0].range,
                    pair[1].range
                );
            }
        }
        let root = compute_root(&leaves);
        Ok(Self { leaves, root })
    }

    /// Build from per-range sorted row hashes. Ranges with no rows get
    /// the zero marker.
    pub fn from_row_hashes(ranges: Vec<(TokenRange, Vec<Hash>)>) -> Result<Self> {
        let leaves = ranges
            .into_iter()
            .map(|(range, rows)| RangeHash::new(range, leaf_hash(range, &rows)))
            .collect();
        Self::from_leaves(leaves)
    }

    #[must_use]
    pub fn root_hash(&self) -> Hash {
        self.root
    }

    #[must_use]
    pub fn leaves(&self) -> &[RangeHash] {
        &self.leaves
    }

    /// The full token range the tree covers.
    #[must_use]
    pub fn span(&self) -> TokenRange {
        let first = self.leaves[0].range.left;
        let last = self.leaves[self.leaves.len() - 1].range.right;
        TokenRange::new(first, last)
    }

    fn leaf_for(&self, range: TokenRange) -> Option<&RangeHash> {
        self.leaves
            .binary_search_by(|leaf| leaf.range.cmp(&range))
            .ok()
            .map(|i| &self.leaves[i])
    }
}

fn compute_root(leaves: &[RangeHash]) -> Hash {
    let mut level: Vec<Hash> = leaves.iter().map(|leaf| leaf.hash).collect();
    let mut depth = 1_u32;
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            match pair {
                [left, right] => next.push(node_hash(depth, left, right)),
                // Odd node carries up unchanged.
                [single] => next.push(*single),
                _ => unreachable!("chunks(2) yields one or two items"),
            }
        }
        level = next;
        depth += 1;
    }
    level[0]
}

/// One range where the two sides disagree. Either hash may be the zero
/// marker: "nothing here" disagreeing with "something here" is a real
/// difference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TreeDifference {
    pub range: TokenRange,
    pub left: Hash,
    pub right: Hash,
}

/// Compute the ranges where two trees disagree, ascending by range.
///
/// Ranges where both sides are empty agree: neither has data there.
/// A leaf present in only one tree compares against the zero marker.
/// Swapping the arguments swaps the hashes but covers the same ranges.
#[must_use]
pub fn diff(left: &MerkleTree, right: &MerkleTree) -> Vec<TreeDifference> {
    if left.root_hash() == right.root_hash() {
        return Vec::new();
    }

    let mut ranges: Vec<TokenRange> = left
        .leaves()
        .iter()
        .chain(right.leaves())
        .map(|leaf| leaf.range)
        .collect();
    ranges.sort_unstable();
    ranges.dedup();

    let mut differences = Vec::new();
    for range in ranges {
        let l = left.leaf_for(range).map_or(Hash::ZERO, |leaf| leaf.hash);
        let r = right.leaf_for(range).map_or(Hash::ZERO, |leaf| leaf.hash);
        if l.is_zero() && r.is_zero() {
            continue;
        }
        if l != r {
            differences.push(TreeDifference {
                range,
                left: l,
                right: r,
            });
        }
    }
    differences
}

/// Split a span into `count` equal-width leaf ranges.
#[must_use]
pub fn split_span(span: TokenRange, count: u32) -> Vec<TokenRange> {
    let count = i64::from(count.max(1));
    let width = (span.right.0 - span.left.0) / count;
    let mut ranges = Vec::with_capacity(count as usize);
    let mut left = span.left;
    for i in 0..count {
        let right = if i == count - 1 {
            span.right
        } else {
            Token(left.0 + width)
        };
        ranges.push(TokenRange::new(left, right));
        left = right;
    }
    ranges
}
