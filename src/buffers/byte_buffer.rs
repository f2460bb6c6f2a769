//! Fixed-capacity byte containers with explicit cursor state, for reuse across many
//!  messages without per-message allocation.
//!
//! A buffer is always in one of two informal modes:
//!
//! * *write mode*: `position` is the append index, `limit` is the capacity. Socket reads
//!   and `put_*` calls advance `position`.
//! * *read mode*: entered via `flip()`. `limit` marks the end of the written content and
//!   `position` the read index. `take`/`get_*` calls advance `position`.
//!
//! `clear()` and `compact()` return to write mode.

use std::fmt::{Debug, Formatter};
use bytes::buf::UninitSlice;

pub struct ByteBuffer {
    data: Vec<u8>,
    position: usize,
    limit: usize,
    mark: Option<usize>,
    id: u32,
    /// pool accounting - set while the buffer is handed out by its owning pool
    pub(crate) claimed: bool,
}

impl ByteBuffer {
    pub fn new(capacity: usize) -> ByteBuffer {
        Self::with_id(capacity, 0)
    }

    pub fn with_id(capacity: usize, id: u32) -> ByteBuffer {
        ByteBuffer {
            // buffers are reused aggressively, so we trade the one-time cost of zero
            //  initialization for simplicity
            data: vec![0; capacity],
            position: 0,
            limit: capacity,
            mark: None,
            id,
            claimed: false,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    pub fn has_remaining(&self) -> bool {
        self.position < self.limit
    }

    /// back to write mode with all content discarded
    pub fn clear(&mut self) {
        self.position = 0;
        self.limit = self.capacity();
        self.mark = None;
    }

    /// write mode -> read mode: what was written becomes the readable content
    pub fn flip(&mut self) {
        self.limit = self.position;
        self.position = 0;
        self.mark = None;
    }

    /// re-read the content from the start without touching the limit
    pub fn rewind(&mut self) {
        self.position = 0;
        self.mark = None;
    }

    /// read mode -> write mode, retaining unread content at the front of the buffer
    pub fn compact(&mut self) {
        let len = self.remaining();
        self.data.copy_within(self.position..self.limit, 0);
        self.position = len;
        self.limit = self.capacity();
        self.mark = None;
    }

    pub fn mark_position(&mut self) {
        self.mark = Some(self.position);
    }

    pub fn reset_to_mark(&mut self) {
        self.position = self.mark
            .expect("this is a bug: reset without a previous mark");
    }

    pub fn advance(&mut self, n: usize) {
        assert!(self.position + n <= self.limit, "this is a bug: cursor advanced past the limit");
        self.position += n;
    }

    pub fn put_slice(&mut self, src: &[u8]) {
        assert!(src.len() <= self.remaining(), "this is a bug: write past the buffer limit");
        self.data[self.position..self.position + src.len()].copy_from_slice(src);
        self.position += src.len();
    }

    pub fn put_u8(&mut self, value: u8) {
        assert!(self.has_remaining(), "this is a bug: write past the buffer limit");
        self.data[self.position] = value;
        self.position += 1;
    }

    pub fn get_u8(&mut self) -> u8 {
        assert!(self.has_remaining(), "this is a bug: read past the buffer limit");
        let value = self.data[self.position];
        self.position += 1;
        value
    }

    /// consume the next `len` readable bytes
    pub fn take(&mut self, len: usize) -> &[u8] {
        assert!(len <= self.remaining(), "this is a bug: read past the buffer limit");
        let slice = &self.data[self.position..self.position + len];
        self.position += len;
        slice
    }

    /// the readable content between position and limit, without consuming it
    pub fn content(&self) -> &[u8] {
        &self.data[self.position..self.limit]
    }

    /// the writable region for direct socket reads; pair with `advance()`
    pub fn writable(&mut self) -> &mut [u8] {
        &mut self.data[self.position..self.limit]
    }

    /// grow the backing store so at least `n` more bytes fit. Only scratch buffers
    ///  (not pooled ones) may grow, which is the caller's responsibility.
    pub fn ensure_writable(&mut self, n: usize) {
        if self.remaining() < n {
            let new_capacity = (self.position + n).max(self.capacity() * 2);
            self.data.resize(new_capacity, 0);
            self.limit = new_capacity;
        }
    }
}

impl Debug for ByteBuffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ByteBuffer(#{}, pos={}, lim={}, cap={})", self.id, self.position, self.limit, self.capacity())
    }
}

unsafe impl bytes::BufMut for ByteBuffer {
    fn remaining_mut(&self) -> usize {
        self.remaining()
    }

    unsafe fn advance_mut(&mut self, cnt: usize) {
        self.advance(cnt);
    }

    fn chunk_mut(&mut self) -> &mut UninitSlice {
        let writable = self.writable();
        UninitSlice::new(writable)
    }
}
