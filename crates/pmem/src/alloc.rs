//! Transactional heap allocator.
//!
//! First-fit over a singly-linked free list, falling back to a bump
//! pointer into virgin space. Every block is `[block_len (u64) | payload]`
//! with the whole block 8-byte aligned; a free block reuses its first
//! payload word as the next-free link. There is no coalescing — the
//! engine above recycles its large, uniform blocks (leaves) itself, and
//! record blocks churn through the free list at matching sizes.
//!
//! All metadata mutations go through the enclosing transaction's undo
//! log, so an aborted transaction restores the allocator exactly.

use crate::{PoolError, Tx, HDR_FREE_HEAD, HDR_HEAP_NEXT, HEAP_OFF};

/// Bytes of the `block_len` header ahead of each payload.
const BLOCK_HEADER: u64 = 8;

/// Smallest whole block: header plus room for the free-list link.
const MIN_BLOCK: u64 = BLOCK_HEADER + 8;

fn align8(len: usize) -> u64 {
    ((len as u64) + 7) & !7
}

impl Tx<'_> {
    /// Allocates a zeroed block of at least `len` bytes, returning the
    /// payload offset.
    ///
    /// The new block and the allocator state only survive if the
    /// enclosing transaction commits.
    pub fn alloc(&mut self, len: usize) -> Result<u64, PoolError> {
        if len == 0 {
            return Err(PoolError::Corrupt("zero-length allocation"));
        }
        let need = (BLOCK_HEADER + align8(len)).max(MIN_BLOCK);

        // First fit over the free list.
        let mut prev: u64 = 0;
        let mut cur = self.read_u64(HDR_FREE_HEAD)?;
        while cur != 0 {
            let block_len = self.read_u64(cur)?;
            let next = self.read_u64(cur + BLOCK_HEADER)?;
            if block_len >= need {
                let leftover = block_len - need;
                let replacement = if leftover >= MIN_BLOCK {
                    // Split: the tail becomes a free block in our place.
                    let rest = cur + need;
                    self.write_u64(rest, leftover)?;
                    self.write_u64(rest + BLOCK_HEADER, next)?;
                    self.write_u64(cur, need)?;
                    rest
                } else {
                    next
                };
                self.set_free_link(prev, replacement)?;
                let payload = cur + BLOCK_HEADER;
                let payload_len = (self.read_u64(cur)? - BLOCK_HEADER) as usize;
                self.zero(payload, payload_len)?;
                return Ok(payload);
            }
            prev = cur;
            cur = next;
        }

        // Bump into virgin space.
        let heap_next = self.read_u64(HDR_HEAP_NEXT)?;
        let end = heap_next
            .checked_add(need)
            .ok_or(PoolError::Corrupt("heap pointer overflow"))?;
        if end > self.pool.size() {
            return Err(PoolError::OutOfMemory);
        }
        self.write_u64(HDR_HEAP_NEXT, end)?;
        self.write_u64(heap_next, need)?;
        let payload = heap_next + BLOCK_HEADER;
        self.zero(payload, (need - BLOCK_HEADER) as usize)?;
        Ok(payload)
    }

    /// Returns the block owning `payload_off` to the free list.
    pub fn free(&mut self, payload_off: u64) -> Result<(), PoolError> {
        if payload_off < HEAP_OFF + BLOCK_HEADER {
            return Err(PoolError::Corrupt("free of non-heap offset"));
        }
        let block = payload_off - BLOCK_HEADER;
        let head = self.read_u64(HDR_FREE_HEAD)?;
        self.write_u64(block + BLOCK_HEADER, head)?;
        self.write_u64(HDR_FREE_HEAD, block)?;
        Ok(())
    }

    fn set_free_link(&mut self, prev: u64, target: u64) -> Result<(), PoolError> {
        if prev == 0 {
            self.write_u64(HDR_FREE_HEAD, target)
        } else {
            self.write_u64(prev + BLOCK_HEADER, target)
        }
    }
}
