//! Rebuild of the volatile routing tree from the persistent leaf list.
//!
//! The list is in allocation order (new leaves are prepended), so the
//! walk first recovers one descriptor per leaf and its largest live
//! key, then sorts the descriptors by that key and folds them into the
//! tree left to right. Each fold installs the previous descriptor's max
//! key as the separator — the same routine a live split uses — so the
//! rebuilt tree satisfies the separator invariants by construction.
//! Leaves found completely empty are withheld from the tree and queued
//! for reuse instead.

use pmem::{Pool, PoolError};

use crate::format::{list_head, Leaf, Record};
use crate::node::{InnerNode, LeafNode, Node, LEAF_KEYS};

/// Scans the leaf list of `root` and produces the routing tree plus the
/// reuse queue of empty leaves. The caller holds the engine exclusively.
pub(crate) fn recover(pool: &Pool, root: u64) -> Result<(Option<Node>, Vec<u64>), PoolError> {
    let mut recovered: Vec<(Box<LeafNode>, Vec<u8>)> = Vec::new();
    let mut prealloc = Vec::new();

    let mut leaf_off = list_head(pool, root)?;
    while leaf_off != 0 {
        let leaf = Leaf(leaf_off);
        let mut ln = Box::new(LeafNode::new(leaf));
        let mut max_key: Option<Vec<u8>> = None;

        for slot in (0..LEAF_KEYS).rev() {
            let rec_off = leaf.record(pool, slot)?;
            if rec_off == 0 {
                continue;
            }
            let rec = Record(rec_off);
            ln.hashes[slot] = rec.hash(pool)?;
            let key = rec.key(pool)?;
            if max_key.as_deref().map_or(true, |m| key > m) {
                max_key = Some(key.to_vec());
            }
            ln.keys[slot] = key.to_vec();
        }

        match max_key {
            None => prealloc.push(leaf_off),
            Some(mk) => recovered.push((ln, mk)),
        }
        leaf_off = leaf.next(pool)?;
    }

    recovered.sort_by(|a, b| a.1.cmp(&b.1));

    let mut leaves = recovered.into_iter();
    let Some((first, first_max)) = leaves.next() else {
        return Ok((None, prealloc));
    };

    let mut top = Node::Leaf(first);
    let mut prev_max = first_max;
    for (ln, max_key) in leaves {
        let separator = std::mem::replace(&mut prev_max, max_key);
        top = append_leaf(top, separator, ln);
    }

    Ok((Some(top), prealloc))
}

/// Adds the next recovered leaf to the right edge of the tree, growing
/// a new root when the promotion escapes the current one.
fn append_leaf(mut top: Node, split_key: Vec<u8>, ln: Box<LeafNode>) -> Node {
    match append_rightmost(&mut top, split_key, Node::Leaf(ln)) {
        None => top,
        Some((split_key, sibling)) => Node::Inner(Box::new(InnerNode {
            keys: vec![split_key],
            children: vec![top, sibling],
        })),
    }
}

/// Attaches `new_node` to the right of the tree's rightmost leaf with
/// `split_key` as the separator, splitting inner nodes upward as they
/// overflow. Returns the promotion when it escapes `node` and the
/// caller must grow the tree.
fn append_rightmost(
    node: &mut Node,
    split_key: Vec<u8>,
    new_node: Node,
) -> Option<(Vec<u8>, Node)> {
    match node {
        Node::Leaf(_) => Some((split_key, new_node)),
        Node::Inner(inner) => {
            let last = inner.children.len() - 1;
            let (split_key, new_node) =
                append_rightmost(&mut inner.children[last], split_key, new_node)?;
            inner.insert_after_split(split_key, new_node)
        }
    }
}
