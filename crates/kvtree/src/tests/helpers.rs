use std::path::Path;

use crate::node::{Node, LEAF_KEYS};
use crate::KvTree;

pub const LAYOUT: &str = "kvtree-test";
pub const POOL_SIZE: u64 = 8 * 1024 * 1024;

pub fn open_tree(path: &Path) -> KvTree {
    KvTree::open(path, LAYOUT, POOL_SIZE).unwrap()
}

/// Keys `k00 .. k48` used by the split scenarios.
pub fn seq_key(i: usize) -> Vec<u8> {
    format!("k{:02}", i).into_bytes()
}

/// Height of the routing tree (a bare leaf counts 1, empty tree 0).
/// Panics if any two root-to-leaf paths differ in length.
pub fn tree_height(tree: &KvTree) -> usize {
    let guard = tree.inner.read();
    match &guard.top {
        None => 0,
        Some(top) => node_height(top),
    }
}

fn node_height(node: &Node) -> usize {
    match node {
        Node::Leaf(_) => 1,
        Node::Inner(inner) => {
            let height = node_height(&inner.children[0]);
            for child in &inner.children[1..] {
                assert_eq!(node_height(child), height, "uneven tree height");
            }
            height + 1
        }
    }
}

/// Verifies the routing invariants over the whole tree: separators
/// strictly ascending, child counts consistent, and every mirrored key
/// inside the `(lo, hi]` window its ancestors imply.
pub fn check_tree(tree: &KvTree) {
    let guard = tree.inner.read();
    if let Some(top) = &guard.top {
        check_node(top, None, None);
    }
}

fn check_node(node: &Node, lo: Option<&[u8]>, hi: Option<&[u8]>) {
    match node {
        Node::Leaf(ln) => {
            for slot in 0..LEAF_KEYS {
                if ln.hashes[slot] == 0 {
                    assert!(ln.keys[slot].is_empty(), "stale key mirror in empty slot");
                    continue;
                }
                let key = ln.keys[slot].as_slice();
                if let Some(lo) = lo {
                    assert!(key > lo, "key below its subtree window");
                }
                if let Some(hi) = hi {
                    assert!(key <= hi, "key above its subtree window");
                }
            }
        }
        Node::Inner(inner) => {
            assert_eq!(inner.children.len(), inner.keys.len() + 1);
            for pair in inner.keys.windows(2) {
                assert!(pair[0] < pair[1], "separators not strictly ascending");
            }
            let last = inner.keys.len();
            for (i, child) in inner.children.iter().enumerate() {
                let child_lo = if i == 0 {
                    lo
                } else {
                    Some(inner.keys[i - 1].as_slice())
                };
                let child_hi = if i == last {
                    hi
                } else {
                    Some(inner.keys[i].as_slice())
                };
                check_node(child, child_lo, child_hi);
            }
        }
    }
}
