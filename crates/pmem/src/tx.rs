//! Undo-log transactions.
//!
//! Protocol, in write order:
//!
//! 1. `begin` marks the log active and durable.
//! 2. Every `Tx` write first appends an undo record (offset, length, old
//!    bytes) and flushes it, then mutates the heap in place. The record
//!    count is bumped only after the record is durable, so a torn record
//!    is never replayed.
//! 3. Commit flushes the mapping, then retires the log (state idle,
//!    count zero).
//! 4. Abort — a body error now, or a crash discovered at `open` — walks
//!    the records newest-first and copies the old bytes back.

use byteorder::{ByteOrder, LittleEndian};
use memmap2::MmapMut;

use crate::{Pool, PoolError, HEADER_BYTES, LOG_BYTES};

const LOG_OFF: u64 = HEADER_BYTES;
const LOG_STATE: u64 = LOG_OFF;
const LOG_COUNT: u64 = LOG_OFF + 4;
const LOG_RECORDS: u64 = LOG_OFF + 8;
const LOG_END: u64 = LOG_OFF + LOG_BYTES;

const STATE_IDLE: u32 = 0;
const STATE_ACTIVE: u32 = 1;

/// Per-record framing ahead of the old bytes: offset (u64) + length (u64).
const RECORD_HEADER: u64 = 16;

pub(crate) fn init_log(m: &mut MmapMut) {
    LittleEndian::write_u32(&mut m[LOG_STATE as usize..], STATE_IDLE);
    LittleEndian::write_u32(&mut m[LOG_COUNT as usize..], 0);
}

/// An in-flight transaction over a [`Pool`].
///
/// All writes go through this handle so their undo records hit the log
/// first. Offsets are the same stable offsets the allocator hands out.
pub struct Tx<'p> {
    pub(crate) pool: &'p mut Pool,
    /// Absolute offset of the next free log byte.
    log_end: u64,
}

impl Pool {
    /// Runs `body` inside a transaction.
    ///
    /// On `Ok` the transaction commits: every write becomes durable
    /// atomically. On `Err` every write is rolled back and the error is
    /// returned unchanged.
    pub fn transaction<T>(
        &mut self,
        body: impl FnOnce(&mut Tx<'_>) -> Result<T, PoolError>,
    ) -> Result<T, PoolError> {
        self.log_begin()?;
        let mut tx = Tx { pool: self, log_end: LOG_RECORDS };
        let result = body(&mut tx);
        match result {
            Ok(value) => {
                self.log_commit()?;
                Ok(value)
            }
            Err(e) => {
                self.log_rollback()?;
                Err(e)
            }
        }
    }

    fn log_begin(&mut self) -> Result<(), PoolError> {
        self.raw_write_u32(LOG_COUNT, 0);
        self.raw_write_u32(LOG_STATE, STATE_ACTIVE);
        self.flush_range(LOG_OFF, 8)
    }

    fn log_commit(&mut self) -> Result<(), PoolError> {
        // Data first, then retire the log; a crash between the two just
        // replays a rollback over already-identical bytes.
        self.flush()?;
        self.raw_write_u32(LOG_COUNT, 0);
        self.raw_write_u32(LOG_STATE, STATE_IDLE);
        self.flush_range(LOG_OFF, 8)
    }

    fn log_rollback(&mut self) -> Result<(), PoolError> {
        let count = self.read_u32(LOG_COUNT)?;

        // Walk forward to find each record, then apply newest-first.
        let mut records = Vec::with_capacity(count as usize);
        let mut pos = LOG_RECORDS;
        for _ in 0..count {
            let off = self.read_u64(pos)?;
            let len = self.read_u64(pos + 8)?;
            records.push((off, len, pos + RECORD_HEADER));
            pos += RECORD_HEADER + len;
        }
        for &(off, len, old_pos) in records.iter().rev() {
            let old = self.bytes(old_pos, len as usize)?.to_vec();
            self.raw_write(off, &old);
        }

        self.flush()?;
        self.raw_write_u32(LOG_COUNT, 0);
        self.raw_write_u32(LOG_STATE, STATE_IDLE);
        self.flush_range(LOG_OFF, 8)
    }

    /// Rolls back a transaction interrupted by a crash. Called by `open`.
    pub(crate) fn recover_log(&mut self) -> Result<(), PoolError> {
        if self.read_u32(LOG_STATE)? == STATE_ACTIVE {
            self.log_rollback()?;
        }
        Ok(())
    }
}

impl Tx<'_> {
    /// Writes `data` at `off`, shadowing the overwritten bytes in the
    /// undo log first.
    pub fn write(&mut self, off: u64, data: &[u8]) -> Result<(), PoolError> {
        if data.is_empty() {
            return Ok(());
        }
        if !self.pool.writable(off, data.len()) {
            return Err(PoolError::Corrupt("write outside data region"));
        }
        self.shadow(off, data.len() as u64)?;
        self.pool.raw_write(off, data);
        Ok(())
    }

    pub fn write_u64(&mut self, off: u64, v: u64) -> Result<(), PoolError> {
        self.write(off, &v.to_le_bytes())
    }

    pub fn write_u32(&mut self, off: u64, v: u32) -> Result<(), PoolError> {
        self.write(off, &v.to_le_bytes())
    }

    pub fn write_u8(&mut self, off: u64, v: u8) -> Result<(), PoolError> {
        self.write(off, &[v])
    }

    /// Zeroes `len` bytes at `off` (logged like any other write).
    pub fn zero(&mut self, off: u64, len: usize) -> Result<(), PoolError> {
        self.write(off, &vec![0u8; len])
    }

    // Reads inside a transaction observe the writes made so far.

    pub fn read_u8(&self, off: u64) -> Result<u8, PoolError> {
        self.pool.read_u8(off)
    }

    pub fn read_u32(&self, off: u64) -> Result<u32, PoolError> {
        self.pool.read_u32(off)
    }

    pub fn read_u64(&self, off: u64) -> Result<u64, PoolError> {
        self.pool.read_u64(off)
    }

    pub fn bytes(&self, off: u64, len: usize) -> Result<&[u8], PoolError> {
        self.pool.bytes(off, len)
    }

    /// Read-only view of the underlying pool, for accessors written
    /// against `&Pool`.
    pub fn pool(&self) -> &Pool {
        &*self.pool
    }

    /// Appends an undo record for `[off, off + len)` and makes it durable
    /// before the caller mutates those bytes.
    fn shadow(&mut self, off: u64, len: u64) -> Result<(), PoolError> {
        let need = RECORD_HEADER + len;
        if self.log_end + need > LOG_END {
            return Err(PoolError::TxOverflow);
        }

        let record = self.log_end;
        let old = self.pool.bytes(off, len as usize)?.to_vec();
        self.pool.raw_write_u64(record, off);
        self.pool.raw_write_u64(record + 8, len);
        self.pool.raw_write(record + RECORD_HEADER, &old);
        self.pool.flush_range(record, need as usize)?;

        // Only now does the record exist as far as rollback is concerned.
        let count = self.pool.read_u32(LOG_COUNT)?;
        self.pool.raw_write_u32(LOG_COUNT, count + 1);
        self.pool.flush_range(LOG_OFF, 8)?;

        self.log_end += need;
        Ok(())
    }
}
