//! Read path: point lookups, enumeration, and pool statistics.
//!
//! Lookups descend the volatile routing tree and use the descriptor's
//! hash mirror as a filter before touching the pool. Enumeration walks
//! the persistent leaf list instead — its contract is "every live key
//! exactly once", in list order, not key order.

use pearson::pearson_hash;

use crate::format::{list_head, Leaf, Record};
use crate::node::{leaf_search, LEAF_KEYS};
use crate::{Analysis, KvError, KvTree};

impl KvTree {
    /// Looks up a key, returning its value when present.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        let inner = self.inner.read();
        let Some(top) = &inner.top else {
            return Ok(None);
        };
        let ln = leaf_search(top, key);
        let hash = pearson_hash(key);
        for slot in (0..LEAF_KEYS).rev() {
            if ln.hashes[slot] == hash && ln.keys[slot].as_slice() == key {
                let rec = Record(ln.leaf.record(&inner.pool, slot)?);
                return Ok(Some(rec.value(&inner.pool)?.to_vec()));
            }
        }
        Ok(None)
    }

    /// Copies a key's value into `buf`, returning the value size.
    ///
    /// `Ok(None)` means the key is absent. When the value exists but
    /// exceeds `buf`, the call fails with [`KvError::BufferTooSmall`]
    /// carrying the size, and `buf` is left untouched.
    pub fn get_into(&self, key: &[u8], buf: &mut [u8]) -> Result<Option<usize>, KvError> {
        let inner = self.inner.read();
        let Some(top) = &inner.top else {
            return Ok(None);
        };
        let ln = leaf_search(top, key);
        let hash = pearson_hash(key);
        for slot in (0..LEAF_KEYS).rev() {
            if ln.hashes[slot] == hash && ln.keys[slot].as_slice() == key {
                let rec = Record(ln.leaf.record(&inner.pool, slot)?);
                let value = rec.value(&inner.pool)?;
                if value.len() > buf.len() {
                    return Err(KvError::BufferTooSmall { size: value.len() });
                }
                buf[..value.len()].copy_from_slice(value);
                return Ok(Some(value.len()));
            }
        }
        Ok(None)
    }

    /// Collects every live key, each exactly once, in persistent-list
    /// order.
    pub fn keys(&self) -> Result<Vec<Vec<u8>>, KvError> {
        let inner = self.inner.read();
        let pool = &inner.pool;
        let mut out = Vec::new();
        let mut leaf_off = list_head(pool, inner.root)?;
        while leaf_off != 0 {
            let leaf = Leaf(leaf_off);
            for slot in (0..LEAF_KEYS).rev() {
                let rec = leaf.record(pool, slot)?;
                if rec != 0 {
                    out.push(Record(rec).key(pool)?.to_vec());
                }
            }
            leaf_off = leaf.next(pool)?;
        }
        Ok(out)
    }

    /// Collects every live key-value pair, in persistent-list order.
    pub fn key_value_pairs(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        let inner = self.inner.read();
        let pool = &inner.pool;
        let mut out = Vec::new();
        let mut leaf_off = list_head(pool, inner.root)?;
        while leaf_off != 0 {
            let leaf = Leaf(leaf_off);
            for slot in (0..LEAF_KEYS).rev() {
                let rec = leaf.record(pool, slot)?;
                if rec != 0 {
                    let rec = Record(rec);
                    out.push((rec.key(pool)?.to_vec(), rec.value(pool)?.to_vec()));
                }
            }
            leaf_off = leaf.next(pool)?;
        }
        Ok(out)
    }

    /// Number of live keys.
    pub fn total_keys(&self) -> Result<u64, KvError> {
        let inner = self.inner.read();
        let pool = &inner.pool;
        let mut count = 0u64;
        let mut leaf_off = list_head(pool, inner.root)?;
        while leaf_off != 0 {
            let leaf = Leaf(leaf_off);
            for slot in (0..LEAF_KEYS).rev() {
                if leaf.record(pool, slot)? != 0 {
                    count += 1;
                }
            }
            leaf_off = leaf.next(pool)?;
        }
        Ok(count)
    }

    /// Gathers leaf statistics by walking the persistent list.
    pub fn analyze(&self) -> Result<Analysis, KvError> {
        let inner = self.inner.read();
        let pool = &inner.pool;
        let mut analysis = Analysis {
            leaf_total: 0,
            leaf_empty: 0,
            leaf_prealloc: inner.prealloc.len() as u64,
            path: pool.path().to_path_buf(),
        };
        let mut leaf_off = list_head(pool, inner.root)?;
        while leaf_off != 0 {
            let leaf = Leaf(leaf_off);
            let mut empty = true;
            for slot in (0..LEAF_KEYS).rev() {
                if leaf.record(pool, slot)? != 0 {
                    empty = false;
                    break;
                }
            }
            if empty {
                analysis.leaf_empty += 1;
            }
            analysis.leaf_total += 1;
            leaf_off = leaf.next(pool)?;
        }
        Ok(analysis)
    }
}
