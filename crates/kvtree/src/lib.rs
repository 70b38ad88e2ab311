//! # KvTree - EmberKV Storage Engine
//!
//! A hybrid volatile/persistent B+-tree over a [`pmem`] pool: the
//! persistent half is a singly-linked list of fixed-fanout leaves whose
//! slots own the key/value records; the volatile half is a routing tree
//! of inner nodes and leaf descriptors rebuilt from the list on every
//! open.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ┌───────────────────────────────────────────────────┐
//! │                    KVTREE                         │
//! │                                                   │
//! │      RwLock (shared: reads, exclusive: writes)    │
//! │                        |                          │
//! │         volatile routing tree (inner nodes)       │
//! │                        |                          │
//! │        leaf descriptors (hash + key mirrors)      │
//! │                        |                          │
//! ├────────────────────────┼──────────────────────────┤
//! │                        v              pmem pool   │
//! │   root ──> leaf ──> leaf ──> leaf   (linked list) │
//! │             |        |        |                   │
//! │           records  records  records               │
//! └───────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module       | Purpose                                             |
//! |--------------|-----------------------------------------------------|
//! | [`lib.rs`]   | `KvTree` struct, constructors, teardown, `Debug`    |
//! | [`format`]   | Persisted root/leaf/record layout over pool offsets |
//! | [`node`]     | Volatile inner nodes and leaf descriptors           |
//! | [`write`]    | `put()`, `remove()`, leaf split, `destroy()`        |
//! | [`read`]     | `get()`, `get_into()`, enumeration, `analyze()`     |
//! | [`recovery`] | Rebuild of the routing tree from the leaf list      |
//!
//! ## Crash Safety
//!
//! Only slot mutations and leaf-list prepends are persistent, and every
//! one of them runs inside a single pool transaction. Routing updates
//! are volatile and happen **after** the commit, so a crash can never
//! expose a half-applied write: on reopen, recovery rebuilds the routing
//! tree purely from the committed leaves.

mod format;
mod node;
mod read;
mod recovery;
mod write;

use parking_lot::RwLock;
use pmem::{Pool, PoolError};
use std::path::{Path, PathBuf};
use thiserror::Error;

use format::ROOT_BYTES;
use node::Node;

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
pub enum KvError {
    /// The pool transaction or allocation behind a mutation failed; the
    /// engine state (persistent and volatile) is unchanged.
    #[error("pool error: {0}")]
    Pool(#[from] PoolError),

    /// `get_into` found the key but the caller's buffer is smaller than
    /// the stored value. Carries the value size so the caller can retry.
    #[error("value of {size} bytes exceeds the caller's buffer")]
    BufferTooSmall { size: usize },
}

/// Pool statistics gathered by [`KvTree::analyze`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analysis {
    /// Leaves in the persistent list.
    pub leaf_total: u64,
    /// Leaves whose slots are all empty.
    pub leaf_empty: u64,
    /// Empty leaves currently queued for reuse.
    pub leaf_prealloc: u64,
    /// The pool file backing this engine.
    pub path: PathBuf,
}

/// The storage engine. One instance per pool root object.
///
/// `KvTree` is `Sync`: a single reader/writer lock serializes writers
/// and lets readers share. Construction recovers the volatile routing
/// tree from the persistent leaf list before the engine is handed out,
/// so a freshly opened engine always reflects every committed write.
pub struct KvTree {
    inner: RwLock<TreeInner>,
}

/// Everything behind the gate.
struct TreeInner {
    pool: Pool,
    /// Offset of this engine's root object in the pool.
    root: u64,
    /// Top of the volatile routing tree; `None` until the first insert.
    top: Option<Node>,
    /// Empty persistent leaves eligible for reuse, discovered during
    /// recovery. Splits and first inserts consume from here before
    /// touching the allocator.
    prealloc: Vec<u64>,
}

impl KvTree {
    /// Opens an engine backed by a pool file, creating the file (of
    /// `size` bytes) when it does not exist and `size > 0`.
    pub fn open<P: AsRef<Path>>(path: P, layout: &str, size: u64) -> Result<Self, KvError> {
        let path = path.as_ref();
        let mut pool = if !path.exists() && size > 0 {
            Pool::create(path, layout, size)?
        } else {
            Pool::open(path, layout)?
        };
        let root = pool.root_or_create(ROOT_BYTES)?;
        Self::build(pool, root)
    }

    /// Adopts an already-open pool, using its registered root object
    /// (created atomically on first use).
    pub fn with_pool(mut pool: Pool) -> Result<Self, KvError> {
        let root = pool.root_or_create(ROOT_BYTES)?;
        Self::build(pool, root)
    }

    /// Adopts an already-open pool plus an explicit root-object offset,
    /// so several engines can share one pool under different roots.
    /// Passing `0` allocates a fresh root atomically.
    pub fn with_root(mut pool: Pool, root: u64) -> Result<Self, KvError> {
        let root = if root == 0 {
            pool.alloc_atomic(ROOT_BYTES)?
        } else {
            root
        };
        Self::build(pool, root)
    }

    fn build(pool: Pool, root: u64) -> Result<Self, KvError> {
        let (top, prealloc) = recovery::recover(&pool, root)?;
        Ok(Self {
            inner: RwLock::new(TreeInner {
                pool,
                root,
                top,
                prealloc,
            }),
        })
    }

    /// Offset of this engine's root object — the handle another engine
    /// instance would pass to [`KvTree::with_root`].
    #[must_use]
    pub fn root_offset(&self) -> u64 {
        self.inner.read().root
    }

    /// Tears down the volatile state and hands the still-open pool back
    /// to the caller. Persistent state is untouched; reopening the same
    /// root recovers every committed write.
    #[must_use]
    pub fn into_pool(self) -> Pool {
        self.inner.into_inner().pool
    }
}

impl std::fmt::Debug for KvTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.inner.try_read() {
            Some(guard) => f
                .debug_struct("KvTree")
                .field("path", &guard.pool.path())
                .field("root", &guard.root)
                .field("prealloc", &guard.prealloc.len())
                .finish(),
            None => f.write_str("KvTree { <locked> }"),
        }
    }
}

#[cfg(test)]
mod tests;
