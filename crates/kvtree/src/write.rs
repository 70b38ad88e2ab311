//! Write path: `put()`, `remove()`, the leaf split, and `destroy()`.
//!
//! Every persistent mutation is a single pool transaction; descriptor
//! mirrors and routing nodes are only touched after the commit returns,
//! so a failed write leaves the engine exactly as it was.

use pearson::pearson_hash;
use pmem::Pool;

use crate::format::{list_head, Leaf};
use crate::node::{InnerNode, LeafNode, Node, LEAF_KEYS, LEAF_KEYS_MIDPOINT};
use crate::{KvError, KvTree, TreeInner};

impl KvTree {
    /// Inserts or overwrites a key.
    ///
    /// On the first insert the engine obtains a persistent leaf
    /// (recycling a preallocated empty one when available) and installs
    /// it as the tree top. Later inserts fill a slot of the responsible
    /// leaf, splitting it when full.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::Pool`] when the pool transaction fails; the
    /// mapping is unchanged in that case.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        self.inner.write().put(key, value)
    }

    /// Removes a key. Removing an absent key is a successful no-op.
    pub fn remove(&self, key: &[u8]) -> Result<(), KvError> {
        self.inner.write().remove(key)
    }

    /// Destroys all persistent state belonging to this engine's root:
    /// every record, every leaf, and the root object itself. Consumes
    /// the engine and hands the pool back for reuse.
    pub fn destroy(self) -> Result<Pool, KvError> {
        let mut inner = self.inner.into_inner();
        let root = inner.root;
        let pool = &mut inner.pool;

        let mut leaf_off = list_head(pool, root)?;
        while leaf_off != 0 {
            let leaf = Leaf(leaf_off);
            let next = leaf.next(pool)?;
            pool.transaction(|tx| {
                for slot in 0..LEAF_KEYS {
                    let rec = leaf.record(tx.pool(), slot)?;
                    if rec != 0 {
                        tx.free(rec)?;
                    }
                }
                tx.free(leaf_off)
            })?;
            leaf_off = next;
        }

        pool.transaction(|tx| tx.free(root))?;
        if inner.pool.root() == root {
            inner.pool.clear_root()?;
        }
        Ok(inner.pool)
    }
}

impl TreeInner {
    pub(crate) fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        let hash = pearson_hash(key);
        let TreeInner {
            pool,
            root,
            top,
            prealloc,
            ..
        } = self;

        match top.take() {
            None => {
                // First insert: obtain a leaf, fill slot 0, install it
                // as the tree top.
                let recycled = prealloc.last().copied();
                let leaf_off = pool.transaction(|tx| {
                    let leaf = match recycled {
                        Some(off) => Leaf(off),
                        None => Leaf::prepend_new(tx, *root)?,
                    };
                    leaf.set_record(tx, 0, hash, key, value)?;
                    Ok(leaf.0)
                })?;
                if recycled.is_some() {
                    prealloc.pop();
                }

                let mut ln = Box::new(LeafNode::new(Leaf(leaf_off)));
                ln.hashes[0] = hash;
                ln.keys[0] = key.to_vec();
                *top = Some(Node::Leaf(ln));
                Ok(())
            }
            Some(mut node) => {
                match put_rec(pool, *root, prealloc, &mut node, hash, key, value) {
                    Ok(None) => {
                        *top = Some(node);
                        Ok(())
                    }
                    Ok(Some((split_key, sibling))) => {
                        // The split escaped the old top: grow the tree by
                        // one level.
                        *top = Some(Node::Inner(Box::new(InnerNode {
                            keys: vec![split_key],
                            children: vec![node, sibling],
                        })));
                        Ok(())
                    }
                    Err(e) => {
                        *top = Some(node);
                        Err(e)
                    }
                }
            }
        }
    }

    fn remove(&mut self, key: &[u8]) -> Result<(), KvError> {
        let TreeInner { pool, top, .. } = self;
        let Some(node) = top.as_mut() else {
            return Ok(());
        };
        let hash = pearson_hash(key);
        remove_rec(pool, node, hash, key)
    }
}

/// Recursive insert. Returns the `(split_key, new_sibling)` promotion
/// when the child handled here split and the caller must install it.
fn put_rec(
    pool: &mut Pool,
    root: u64,
    prealloc: &mut Vec<u64>,
    node: &mut Node,
    hash: u8,
    key: &[u8],
    value: &[u8],
) -> Result<Option<(Vec<u8>, Node)>, KvError> {
    match node {
        Node::Inner(inner) => {
            let idx = inner.route(key);
            let promo = put_rec(pool, root, prealloc, &mut inner.children[idx], hash, key, value)?;
            Ok(promo.and_then(|(split_key, sibling)| inner.insert_after_split(split_key, sibling)))
        }
        Node::Leaf(ln) => {
            if fill_slot_for_key(pool, ln, hash, key, value)? {
                Ok(None)
            } else {
                split_full(pool, root, prealloc, ln, hash, key, value).map(Some)
            }
        }
    }
}

fn remove_rec(pool: &mut Pool, node: &mut Node, hash: u8, key: &[u8]) -> Result<(), KvError> {
    match node {
        Node::Inner(inner) => {
            let idx = inner.route(key);
            remove_rec(pool, &mut inner.children[idx], hash, key)
        }
        Node::Leaf(ln) => {
            for slot in (0..LEAF_KEYS).rev() {
                if ln.hashes[slot] == hash && ln.keys[slot].as_slice() == key {
                    ln.hashes[slot] = 0;
                    ln.keys[slot].clear();
                    let leaf = ln.leaf;
                    pool.transaction(|tx| leaf.clear_record(tx, slot))?;
                    break; // no duplicate keys exist
                }
            }
            Ok(())
        }
    }
}

/// Tries to absorb `(hash, key, value)` into an existing slot of `ln`:
/// a slot already holding the key wins, otherwise the last empty slot
/// seen by the descending scan. Returns `false` when the leaf is full
/// of other keys and the caller must split.
fn fill_slot_for_key(
    pool: &mut Pool,
    ln: &mut LeafNode,
    hash: u8,
    key: &[u8],
    value: &[u8],
) -> Result<bool, KvError> {
    let mut last_empty = None;
    let mut matched = None;
    for slot in (0..LEAF_KEYS).rev() {
        let slot_hash = ln.hashes[slot];
        if slot_hash == 0 {
            last_empty = Some(slot);
        } else if slot_hash == hash && ln.keys[slot].as_slice() == key {
            matched = Some(slot);
            break; // no duplicate keys exist
        }
    }

    let Some(slot) = matched.or(last_empty) else {
        return Ok(false);
    };

    let leaf = ln.leaf;
    pool.transaction(|tx| leaf.set_record(tx, slot, hash, key, value))?;

    // Mirror the slot only once the record is durable.
    if ln.hashes[slot] == 0 {
        ln.hashes[slot] = hash;
        ln.keys[slot] = key.to_vec();
    }
    Ok(true)
}

/// Splits a full leaf around the midpoint of the sorted union of its
/// keys and the incoming key. Slots whose keys sort strictly above the
/// split key move to the new leaf at the same slot index; the incoming
/// key lands on whichever side owns it. All persistent effects — the
/// leaf obtainment, the slot moves, the incoming store — are one
/// transaction; the descriptor for the new leaf is built afterwards and
/// returned for routing installation.
fn split_full(
    pool: &mut Pool,
    root: u64,
    prealloc: &mut Vec<u64>,
    ln: &mut LeafNode,
    hash: u8,
    key: &[u8],
    value: &[u8],
) -> Result<(Vec<u8>, Node), KvError> {
    let split_key: Vec<u8> = {
        let mut all: Vec<&[u8]> = ln.keys.iter().map(Vec::as_slice).collect();
        all.push(key);
        all.sort_unstable();
        all[LEAF_KEYS_MIDPOINT].to_vec()
    };

    let mut moves = [false; LEAF_KEYS];
    for slot in 0..LEAF_KEYS {
        moves[slot] = ln.keys[slot].as_slice() > split_key.as_slice();
    }

    // The split key itself stays left, so only strictly greater keys go
    // right. Full leaf plus distinct keys means both sides keep at least
    // one empty slot for the incoming record.
    let goes_right = key > split_key.as_slice();
    let incoming_slot = if goes_right {
        (0..LEAF_KEYS).rev().find(|&s| !moves[s])
    } else {
        (0..LEAF_KEYS).rev().find(|&s| moves[s])
    }
    .expect("a split leaf has an empty slot on each side");

    let recycled = prealloc.last().copied();
    let src = ln.leaf;
    let new_off = pool.transaction(|tx| {
        let dst = match recycled {
            Some(off) => Leaf(off), // already linked into the list
            None => Leaf::prepend_new(tx, root)?,
        };
        for slot in (0..LEAF_KEYS).rev() {
            if moves[slot] {
                src.swap_record(tx, dst, slot)?;
            }
        }
        let target = if goes_right { dst } else { src };
        target.set_record(tx, incoming_slot, hash, key, value)?;
        Ok(dst.0)
    })?;
    if recycled.is_some() {
        prealloc.pop();
    }

    // Commit succeeded: rebuild the mirrors to match.
    let mut new_ln = Box::new(LeafNode::new(Leaf(new_off)));
    for slot in 0..LEAF_KEYS {
        if moves[slot] {
            new_ln.hashes[slot] = ln.hashes[slot];
            new_ln.keys[slot] = std::mem::take(&mut ln.keys[slot]);
            ln.hashes[slot] = 0;
        }
    }
    let target_ln: &mut LeafNode = if goes_right { &mut new_ln } else { ln };
    target_ln.hashes[incoming_slot] = hash;
    target_ln.keys[incoming_slot] = key.to_vec();

    Ok((split_key, Node::Leaf(new_ln)))
}
