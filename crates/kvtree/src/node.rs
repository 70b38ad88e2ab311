//! Volatile routing nodes.
//!
//! The routing tree is never persisted — it is rebuilt from the leaf
//! list on every open — so inner nodes and leaf descriptors are plain
//! owned values. Ownership flows strictly downward (children are owned
//! by their parent); split propagation returns promotions up the
//! recursion instead of chasing parent pointers.

use crate::format::Leaf;

/// Slots per persistent leaf. Must stay even: a split hands the upper
/// half of the sorted key union to the new sibling.
pub(crate) const LEAF_KEYS: usize = 48;
pub(crate) const LEAF_KEYS_MIDPOINT: usize = LEAF_KEYS / 2;

/// Separator keys per inner node.
pub(crate) const INNER_KEYS: usize = 4;
/// Keys (and one extra child) that move to the new sibling when an
/// inner node overflows.
pub(crate) const INNER_KEYS_UPPER: usize = (INNER_KEYS + 2) / 2;
/// Keys remaining on each side after an inner split; the key at this
/// index is promoted, not retained.
pub(crate) const INNER_KEYS_MIDPOINT: usize = INNER_KEYS - INNER_KEYS_UPPER + 1;

// The inner-split arithmetic (keep MIDPOINT keys, promote the next one,
// move UPPER onward) only balances for an even key count.
const _: () = assert!(LEAF_KEYS % 2 == 0);
const _: () = assert!(INNER_KEYS % 2 == 0);
const _: () = assert!(INNER_KEYS_MIDPOINT + 1 == INNER_KEYS_UPPER);

/// A node of the volatile routing tree.
pub(crate) enum Node {
    Inner(Box<InnerNode>),
    Leaf(Box<LeafNode>),
}

/// Routing node: `keys.len() + 1` children, separators strictly
/// ascending. Keys reachable under `children[i]` sort `<= keys[i]`;
/// the last child holds everything greater.
pub(crate) struct InnerNode {
    pub keys: Vec<Vec<u8>>,
    pub children: Vec<Node>,
}

/// In-memory descriptor of one persistent leaf: a cache of its slot
/// hashes and keys plus the leaf's pool offset. The persistent leaf is
/// the ground truth; the descriptor only accelerates lookups.
pub(crate) struct LeafNode {
    /// Pearson hash per slot; 0 means the slot is empty.
    pub hashes: [u8; LEAF_KEYS],
    /// Key per slot; empty in empty slots.
    pub keys: [Vec<u8>; LEAF_KEYS],
    pub leaf: Leaf,
}

impl LeafNode {
    pub fn new(leaf: Leaf) -> Self {
        Self {
            hashes: [0; LEAF_KEYS],
            keys: std::array::from_fn(|_| Vec::new()),
            leaf,
        }
    }
}

impl InnerNode {
    /// Index of the child responsible for `key`: the first separator
    /// `>=` the key wins, so equal keys route left. No match falls
    /// through to the last child.
    pub fn route(&self, key: &[u8]) -> usize {
        #[cfg(debug_assertions)]
        self.assert_invariants();
        for (idx, sep) in self.keys.iter().enumerate() {
            if key <= sep.as_slice() {
                return idx;
            }
        }
        self.keys.len()
    }

    /// Inserts `split_key` and the right-hand `sibling` produced by a
    /// child split. Returns the promotion for the caller to install when
    /// this node overflows and splits in turn.
    pub fn insert_after_split(
        &mut self,
        split_key: Vec<u8>,
        sibling: Node,
    ) -> Option<(Vec<u8>, Node)> {
        let mut idx = 0;
        while idx < self.keys.len() && self.keys[idx].as_slice() <= split_key.as_slice() {
            idx += 1;
        }
        self.keys.insert(idx, split_key);
        self.children.insert(idx + 1, sibling);

        if self.keys.len() <= INNER_KEYS {
            #[cfg(debug_assertions)]
            self.assert_invariants();
            return None;
        }

        // Overflow: hand the upper keys and children to a new sibling,
        // promote the key left at the midpoint.
        let right = InnerNode {
            keys: self.keys.split_off(INNER_KEYS_UPPER),
            children: self.children.split_off(INNER_KEYS_UPPER),
        };
        let promoted = self
            .keys
            .pop()
            .expect("inner split always leaves the promoted separator");

        #[cfg(debug_assertions)]
        {
            self.assert_invariants();
            right.assert_invariants();
        }

        Some((promoted, Node::Inner(Box::new(right))))
    }

    #[cfg(debug_assertions)]
    fn assert_invariants(&self) {
        assert!(self.keys.len() <= INNER_KEYS);
        assert_eq!(self.children.len(), self.keys.len() + 1);
        for pair in self.keys.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }
}

/// Descends from `node` to the leaf descriptor responsible for `key`.
pub(crate) fn leaf_search<'a>(mut node: &'a Node, key: &[u8]) -> &'a LeafNode {
    loop {
        match node {
            Node::Leaf(ln) => return ln,
            Node::Inner(inner) => node = &inner.children[inner.route(key)],
        }
    }
}
