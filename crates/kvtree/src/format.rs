//! Persisted layout inside the pool.
//!
//! ```text
//! ROOT OBJECT (8 bytes)
//!   head (u64) — offset of the first leaf, 0 when the list is empty
//!
//! LEAF ((LEAF_KEYS + 1) * 8 bytes)
//!   slot_0 .. slot_47 (u64 each) — record offset, 0 = empty slot
//!   next (u64) — offset of the following leaf, 0 = end of list
//!
//! RECORD (one allocation per live key)
//!   hash (u8) | key_len (u32) | val_len (u32)
//!   key bytes | 0x00 | value bytes | 0x00
//! ```
//!
//! All integers little-endian. New leaves are prepended to the list, so
//! list order is allocation order, not key order. The two 0x00 bytes are
//! reserved sentinels: written on every store, read by nothing.

use byteorder::{LittleEndian, WriteBytesExt};
use pmem::{Pool, PoolError, Tx};

use crate::node::LEAF_KEYS;

/// Size of the root object: a single list-head pointer.
pub(crate) const ROOT_BYTES: usize = 8;

/// Offsets of the record header fields.
const REC_HASH: u64 = 0;
const REC_KEY_LEN: u64 = 1;
const REC_VAL_LEN: u64 = 5;
const REC_KEY: u64 = 9;

/// Reads the list head out of the root object.
pub(crate) fn list_head(pool: &Pool, root: u64) -> Result<u64, PoolError> {
    pool.read_u64(root)
}

/// A persistent leaf, addressed by its pool offset.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct Leaf(pub u64);

impl Leaf {
    pub const BYTES: usize = (LEAF_KEYS + 1) * 8;

    fn slot_off(self, slot: usize) -> u64 {
        self.0 + (slot as u64) * 8
    }

    fn next_off(self) -> u64 {
        self.0 + (LEAF_KEYS as u64) * 8
    }

    /// Record offset stored in `slot`, 0 when the slot is empty.
    pub fn record(self, pool: &Pool, slot: usize) -> Result<u64, PoolError> {
        pool.read_u64(self.slot_off(slot))
    }

    pub fn next(self, pool: &Pool) -> Result<u64, PoolError> {
        pool.read_u64(self.next_off())
    }

    /// Allocates a fresh leaf and prepends it to the list anchored at
    /// the root object.
    pub fn prepend_new(tx: &mut Tx<'_>, root: u64) -> Result<Leaf, PoolError> {
        let off = tx.alloc(Self::BYTES)?;
        let leaf = Leaf(off);
        let old_head = tx.read_u64(root)?;
        tx.write_u64(leaf.next_off(), old_head)?;
        tx.write_u64(root, off)?;
        Ok(leaf)
    }

    /// Stores `(hash, key, value)` into `slot`: frees any prior record,
    /// allocates a new one, and points the slot at it.
    pub fn set_record(
        self,
        tx: &mut Tx<'_>,
        slot: usize,
        hash: u8,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), PoolError> {
        let old = tx.read_u64(self.slot_off(slot))?;
        if old != 0 {
            tx.free(old)?;
        }
        let rec = write_record(tx, hash, key, value)?;
        tx.write_u64(self.slot_off(slot), rec)
    }

    /// Empties `slot`: zeroes the record header, frees the record block,
    /// and nulls the slot.
    pub fn clear_record(self, tx: &mut Tx<'_>, slot: usize) -> Result<(), PoolError> {
        let old = tx.read_u64(self.slot_off(slot))?;
        if old != 0 {
            tx.zero(old, REC_KEY as usize)?;
            tx.free(old)?;
            tx.write_u64(self.slot_off(slot), 0)?;
        }
        Ok(())
    }

    /// Exchanges the records at the same slot index of two leaves. Used
    /// by the leaf split, where the destination slot is known empty, so
    /// the swap moves the record and empties the source in one step.
    pub fn swap_record(self, tx: &mut Tx<'_>, other: Leaf, slot: usize) -> Result<(), PoolError> {
        let mine = tx.read_u64(self.slot_off(slot))?;
        let theirs = tx.read_u64(other.slot_off(slot))?;
        tx.write_u64(self.slot_off(slot), theirs)?;
        tx.write_u64(other.slot_off(slot), mine)
    }
}

/// A record block, addressed by its pool offset (never 0).
#[derive(Clone, Copy, Debug)]
pub(crate) struct Record(pub u64);

impl Record {
    pub fn hash(self, pool: &Pool) -> Result<u8, PoolError> {
        pool.read_u8(self.0 + REC_HASH)
    }

    pub fn key_len(self, pool: &Pool) -> Result<usize, PoolError> {
        Ok(pool.read_u32(self.0 + REC_KEY_LEN)? as usize)
    }

    pub fn value_len(self, pool: &Pool) -> Result<usize, PoolError> {
        Ok(pool.read_u32(self.0 + REC_VAL_LEN)? as usize)
    }

    pub fn key(self, pool: &Pool) -> Result<&[u8], PoolError> {
        pool.bytes(self.0 + REC_KEY, self.key_len(pool)?)
    }

    pub fn value(self, pool: &Pool) -> Result<&[u8], PoolError> {
        let key_len = self.key_len(pool)? as u64;
        let val_off = self.0 + REC_KEY + key_len + 1;
        pool.bytes(val_off, self.value_len(pool)?)
    }
}

/// Writes a record block and returns its offset.
fn write_record(tx: &mut Tx<'_>, hash: u8, key: &[u8], value: &[u8]) -> Result<u64, PoolError> {
    let len = 1 + 4 + 4 + key.len() + 1 + value.len() + 1;
    let off = tx.alloc(len)?;

    let mut buf = Vec::with_capacity(len);
    buf.write_u8(hash)?;
    buf.write_u32::<LittleEndian>(key.len() as u32)?;
    buf.write_u32::<LittleEndian>(value.len() as u32)?;
    buf.extend_from_slice(key);
    buf.write_u8(0)?;
    buf.extend_from_slice(value);
    buf.write_u8(0)?;

    tx.write(off, &buf)?;
    Ok(off)
}
