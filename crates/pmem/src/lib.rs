//! # Pmem — emulated persistent-memory pool
//!
//! A file-backed, byte-addressable heap with crash-safe transactions,
//! backing the EmberKV engine the way a persistent-memory object pool
//! would: callers allocate blocks, receive stable offsets, and mutate
//! them inside undo-log transactions that either commit completely or
//! leave no trace.
//!
//! ## Pool file layout
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ HEADER (4 KiB)                                                │
//! │                                                               │
//! │ magic (u32) | version (u32) | layout_name (32 bytes, padded)  │
//! │ pool_size (u64) | header_crc32 (u32)                          │
//! │ root_off (u64) | heap_next (u64) | free_head (u64)            │
//! │                                                               │
//! │ The CRC covers the identity fields (magic through pool_size)  │
//! │ so `open` rejects foreign or damaged files. The three fields  │
//! │ after it are mutable state and change only inside             │
//! │ transactions.                                                 │
//! ├───────────────────────────────────────────────────────────────┤
//! │ UNDO LOG (512 KiB)                                            │
//! │                                                               │
//! │ state (u32: idle/active) | record_count (u32)                 │
//! │ records: [off (u64) | len (u64) | old bytes] ...              │
//! ├───────────────────────────────────────────────────────────────┤
//! │ HEAP (rest of the file, 8-byte-aligned blocks)                │
//! │                                                               │
//! │ block: [block_len (u64) | payload ...]                        │
//! │ free block payload starts with: next_free (u64)               │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian.
//!
//! ## Transactions
//!
//! Every in-place write inside a transaction is preceded by a durable
//! undo record holding the bytes it overwrites. Commit flushes the data
//! and retires the log; an error from the transaction body (or a crash
//! before commit) rolls every write back, newest first. `open` replays
//! this rollback if it finds an interrupted transaction, so a reopened
//! pool always reflects a whole number of committed transactions.
//!
//! A single transaction can shadow at most the log capacity of old
//! bytes; exceeding it fails the transaction with [`PoolError::TxOverflow`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use pmem::Pool;
//!
//! let mut pool = Pool::create("kv.pool", "example", 8 * 1024 * 1024).unwrap();
//! let off = pool
//!     .transaction(|tx| {
//!         let off = tx.alloc(64)?;
//!         tx.write(off, b"hello")?;
//!         Ok(off)
//!     })
//!     .unwrap();
//! assert_eq!(&pool.bytes(off, 5).unwrap(), b"hello");
//! ```

mod alloc;
mod tx;

pub use tx::Tx;

use byteorder::{ByteOrder, LittleEndian};
use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Identifies an EmberKV pool file.
const POOL_MAGIC: u32 = 0x454D_4252; // "EMBR"
const POOL_VERSION: u32 = 1;

/// Size of the layout-name field in the header.
const LAYOUT_BYTES: usize = 32;

pub(crate) const HEADER_BYTES: u64 = 4096;
pub(crate) const LOG_BYTES: u64 = 512 * 1024;
/// First heap byte. Allocations never sit below this offset.
pub(crate) const HEAP_OFF: u64 = HEADER_BYTES + LOG_BYTES;

/// Smallest pool worth creating: header + log + one page of heap.
pub const MIN_POOL_BYTES: u64 = HEAP_OFF + 4096;

// Header field offsets.
const HDR_MAGIC: u64 = 0;
const HDR_VERSION: u64 = 4;
const HDR_LAYOUT: u64 = 8;
const HDR_POOL_SIZE: u64 = 40;
const HDR_CRC: u64 = 48;
/// First mutable header byte; everything below is identity, covered by the CRC.
pub(crate) const HDR_ROOT: u64 = 56;
pub(crate) const HDR_HEAP_NEXT: u64 = 64;
pub(crate) const HDR_FREE_HEAD: u64 = 72;
const HDR_MUT_END: u64 = 80;

/// Errors that can occur during pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// An underlying I/O error (create, open, mmap, flush).
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The pool file failed validation, or an offset points outside it.
    #[error("corrupt pool: {0}")]
    Corrupt(&'static str),

    /// The allocator cannot satisfy the request.
    #[error("pool out of memory")]
    OutOfMemory,

    /// A single transaction shadowed more old data than the undo log holds.
    #[error("transaction exceeds undo log capacity")]
    TxOverflow,
}

/// An open persistent-memory pool.
///
/// Offsets handed out by the allocator are stable for the life of the
/// file and remain valid across close/reopen. `0` is the null offset.
///
/// All mutation goes through [`Pool::transaction`] (or the `_atomic`
/// single-step helpers); reads are plain shared borrows of the mapping.
pub struct Pool {
    file: File,
    mmap: MmapMut,
    path: PathBuf,
    size: u64,
}

impl Pool {
    /// Creates a new pool file of `size` bytes and initializes its header.
    ///
    /// Fails if the file already exists, if `size` is below
    /// [`MIN_POOL_BYTES`], or if `layout` does not fit the 32-byte
    /// layout-name field.
    pub fn create<P: AsRef<Path>>(path: P, layout: &str, size: u64) -> Result<Self, PoolError> {
        let path = path.as_ref().to_path_buf();
        if layout.len() > LAYOUT_BYTES {
            return Err(PoolError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("layout name too long: {} bytes (max {})", layout.len(), LAYOUT_BYTES),
            )));
        }
        if size < MIN_POOL_BYTES {
            return Err(PoolError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("pool size {} below minimum {}", size, MIN_POOL_BYTES),
            )));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        file.set_len(size)?;

        // SAFETY: MmapMut::map_mut is unsafe because the file could be
        // modified externally. This is safe because:
        // 1. The file was just created with create_new (exclusive).
        // 2. Pool files are not meant to be touched by other processes.
        // 3. The mmap lifetime is tied to Pool, preventing use-after-unmap.
        // 4. All access goes through bounds-checked accessors.
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        let mut pool = Self { file, mmap, path, size };
        pool.write_header(layout);
        pool.mmap.flush()?;
        Ok(pool)
    }

    /// Opens an existing pool file, verifying its identity and rolling
    /// back any transaction that was interrupted by a crash.
    pub fn open<P: AsRef<Path>>(path: P, layout: &str) -> Result<Self, PoolError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let size = file.metadata()?.len();
        if size < MIN_POOL_BYTES {
            return Err(PoolError::Corrupt("pool file truncated"));
        }

        // SAFETY: see `create`. The file is opened read-write and owned by
        // this Pool for the life of the mapping; access is bounds-checked.
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        let mut pool = Self { file, mmap, path, size };
        pool.verify_header(layout)?;
        pool.recover_log()?;
        Ok(pool)
    }

    fn write_header(&mut self, layout: &str) {
        let m = &mut self.mmap;
        LittleEndian::write_u32(&mut m[HDR_MAGIC as usize..], POOL_MAGIC);
        LittleEndian::write_u32(&mut m[HDR_VERSION as usize..], POOL_VERSION);
        let mut name = [0u8; LAYOUT_BYTES];
        name[..layout.len()].copy_from_slice(layout.as_bytes());
        m[HDR_LAYOUT as usize..HDR_LAYOUT as usize + LAYOUT_BYTES].copy_from_slice(&name);
        LittleEndian::write_u64(&mut m[HDR_POOL_SIZE as usize..], self.size);
        let crc = crc32fast::hash(&m[..HDR_CRC as usize]);
        LittleEndian::write_u32(&mut m[HDR_CRC as usize..], crc);
        LittleEndian::write_u64(&mut m[HDR_ROOT as usize..], 0);
        LittleEndian::write_u64(&mut m[HDR_HEAP_NEXT as usize..], HEAP_OFF);
        LittleEndian::write_u64(&mut m[HDR_FREE_HEAD as usize..], 0);
        tx::init_log(m);
    }

    fn verify_header(&self, layout: &str) -> Result<(), PoolError> {
        let m = &self.mmap;
        if LittleEndian::read_u32(&m[HDR_MAGIC as usize..]) != POOL_MAGIC {
            return Err(PoolError::Corrupt("bad magic"));
        }
        if LittleEndian::read_u32(&m[HDR_VERSION as usize..]) != POOL_VERSION {
            return Err(PoolError::Corrupt("unsupported pool version"));
        }
        let crc = crc32fast::hash(&m[..HDR_CRC as usize]);
        if LittleEndian::read_u32(&m[HDR_CRC as usize..]) != crc {
            return Err(PoolError::Corrupt("header checksum mismatch"));
        }
        let mut name = [0u8; LAYOUT_BYTES];
        name[..layout.len().min(LAYOUT_BYTES)].copy_from_slice(layout.as_bytes());
        if m[HDR_LAYOUT as usize..HDR_LAYOUT as usize + LAYOUT_BYTES] != name {
            return Err(PoolError::Corrupt("layout name mismatch"));
        }
        if LittleEndian::read_u64(&m[HDR_POOL_SIZE as usize..]) != self.size {
            return Err(PoolError::Corrupt("pool size mismatch"));
        }
        Ok(())
    }

    /// Path this pool was created from or opened at.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total pool size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    // ---- Root object ----

    /// Offset of the registered root object, or `0` if none exists yet.
    #[must_use]
    pub fn root(&self) -> u64 {
        LittleEndian::read_u64(&self.mmap[HDR_ROOT as usize..])
    }

    /// Returns the registered root object, allocating a zeroed one of
    /// `len` bytes atomically on first use.
    pub fn root_or_create(&mut self, len: usize) -> Result<u64, PoolError> {
        let existing = self.root();
        if existing != 0 {
            return Ok(existing);
        }
        self.transaction(|tx| {
            let off = tx.alloc(len)?;
            tx.write_u64(HDR_ROOT, off)?;
            Ok(off)
        })
    }

    /// Unregisters the root object (the allocation itself is the
    /// caller's to free).
    pub fn clear_root(&mut self) -> Result<(), PoolError> {
        self.transaction(|tx| tx.write_u64(HDR_ROOT, 0))
    }

    // ---- Atomic single-step allocation ----

    /// Allocates a zeroed block outside any caller transaction.
    pub fn alloc_atomic(&mut self, len: usize) -> Result<u64, PoolError> {
        self.transaction(|tx| tx.alloc(len))
    }

    /// Frees a block outside any caller transaction.
    pub fn free_atomic(&mut self, off: u64) -> Result<(), PoolError> {
        self.transaction(|tx| tx.free(off))
    }

    // ---- Reads ----

    /// Borrows `len` bytes starting at `off`.
    pub fn bytes(&self, off: u64, len: usize) -> Result<&[u8], PoolError> {
        let end = off
            .checked_add(len as u64)
            .ok_or(PoolError::Corrupt("offset overflow"))?;
        if end > self.size {
            return Err(PoolError::Corrupt("offset out of bounds"));
        }
        Ok(&self.mmap[off as usize..end as usize])
    }

    pub fn read_u8(&self, off: u64) -> Result<u8, PoolError> {
        Ok(self.bytes(off, 1)?[0])
    }

    pub fn read_u32(&self, off: u64) -> Result<u32, PoolError> {
        Ok(LittleEndian::read_u32(self.bytes(off, 4)?))
    }

    pub fn read_u64(&self, off: u64) -> Result<u64, PoolError> {
        Ok(LittleEndian::read_u64(self.bytes(off, 8)?))
    }

    /// Flushes the whole mapping to stable storage.
    pub fn flush(&self) -> Result<(), PoolError> {
        self.mmap.flush()?;
        Ok(())
    }

    // ---- Internal write plumbing (bypasses the undo log; used by the
    // log itself and by header initialization) ----

    pub(crate) fn raw_write(&mut self, off: u64, data: &[u8]) {
        let off = off as usize;
        self.mmap[off..off + data.len()].copy_from_slice(data);
    }

    pub(crate) fn raw_write_u32(&mut self, off: u64, v: u32) {
        LittleEndian::write_u32(&mut self.mmap[off as usize..], v);
    }

    pub(crate) fn raw_write_u64(&mut self, off: u64, v: u64) {
        LittleEndian::write_u64(&mut self.mmap[off as usize..], v);
    }

    /// Flushes a byte range, widened to page boundaries for msync.
    pub(crate) fn flush_range(&self, off: u64, len: usize) -> Result<(), PoolError> {
        const PAGE: usize = 4096;
        let start = (off as usize) & !(PAGE - 1);
        let end = off as usize + len;
        self.mmap.flush_range(start, end - start)?;
        Ok(())
    }

    /// True when a write to `[off, off + len)` lands in mutable territory:
    /// the mutable header fields or the heap. The identity header and the
    /// undo log are off limits.
    pub(crate) fn writable(&self, off: u64, len: usize) -> bool {
        let Some(end) = off.checked_add(len as u64) else {
            return false;
        };
        let header = off >= HDR_ROOT && end <= HDR_MUT_END;
        let heap = off >= HEAP_OFF && end <= self.size;
        header || heap
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("path", &self.path)
            .field("size", &self.size)
            .field("root", &self.root())
            .finish()
    }
}

/// Best-effort flush on drop. Errors are ignored because Drop cannot
/// propagate them; committed transactions were already flushed.
impl Drop for Pool {
    fn drop(&mut self) {
        let _ = self.mmap.flush();
        let _ = self.file.sync_all();
    }
}
