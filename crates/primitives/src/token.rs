use std::fmt;

use borsh::{BorshDeserialize, BorshSerialize};

/// A position on the partitioner ring.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    BorshSerialize,
    BorshDeserialize,
)]
pub struct Token(pub i64);

impl Token {
    pub const MIN: Self = Self(i64::MIN);
    pub const MAX: Self = Self(i64::MAX);
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A half-open token range `(left, right]`.
///
/// Repair and diffing only ever see non-wrapping ranges; the coordinator
/// splits wrapped ranges before handing them down. Ordering is ascending
/// by `(left, right)`, which is the order differences are reported in.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    BorshSerialize,
    BorshDeserialize,
)]
pub struct TokenRange {
    pub left: Token,
    pub right: Token,
}

impl TokenRange {
    #[must_use]
    pub const fn new(left: Token, right: Token) -> Self {
        Self { left, right }
    }

    /// Whether `token` falls within `(left, right]`.
    #[must_use]
    pub fn contains(&self, token: Token) -> bool {
        token > self.left && token <= self.right
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.left >= self.right
    }
}

impl fmt::Display for TokenRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{}]", self.left, self.right)
    }
}
