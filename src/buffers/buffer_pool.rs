use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tracing::{debug, trace};
use crate::buffers::byte_buffer::ByteBuffer;
use crate::safe_converter::PrecheckedCast;

/// An elastic pool of reusable [ByteBuffer]s.
///
/// Buffers are created lazily up to `max_buffers` and recycled through a free list, so
///  steady-state operation allocates nothing per message. When the pool is saturated,
///  [BufferPool::acquire] waits (bounded) for a release instead of handing out a buffer
///  that is still claimed elsewhere.
///
/// Claim accounting is strict: every buffer handed out is flagged as claimed, and
///  releasing a buffer that is not claimed panics. Silently tolerating that would let a
///  double-release corrupt the free list invisibly.
pub struct BufferPool {
    buf_size: usize,
    max_buffers: usize,
    state: Mutex<PoolState>,
    released: Condvar,
}

struct PoolState {
    free: Vec<ByteBuffer>,
    created: usize,
}

/// One wait slice while saturated; acquire gives up (and panics) after
///  `SATURATION_PATIENCE` of total waiting since that points to a leak or a pool that is
///  sized far too small for its load.
const SATURATION_WAIT_SLICE: Duration = Duration::from_millis(100);
const SATURATION_PATIENCE: Duration = Duration::from_secs(5);

impl BufferPool {
    pub fn new(buf_size: usize, max_buffers: usize) -> BufferPool {
        assert!(max_buffers > 0, "a pool must allow at least one buffer");
        BufferPool {
            buf_size,
            max_buffers,
            state: Mutex::new(PoolState {
                free: Vec::with_capacity(max_buffers),
                created: 0,
            }),
            released: Condvar::new(),
        }
    }

    pub fn buf_size(&self) -> usize {
        self.buf_size
    }

    /// Hand out a cleared buffer, always. Pops the free list, creates a new buffer while
    ///  under `max_buffers`, and at saturation waits for a release (bounded by
    ///  `SATURATION_PATIENCE`, then panics).
    pub fn acquire(self: &Arc<Self>) -> PooledBuffer {
        let mut state = self.state.lock().unwrap();
        let mut waited = Duration::ZERO;

        loop {
            if let Some(mut buffer) = state.free.pop() {
                trace!("handing out buffer #{} from the free list", buffer.id());
                buffer.claimed = true;
                return PooledBuffer {
                    buffer: Some(buffer),
                    pool: self.clone(),
                };
            }

            if state.created < self.max_buffers {
                let id: u32 = state.created.prechecked_cast();
                state.created += 1;
                debug!("free list empty: creating buffer #{} of at most {}", id, self.max_buffers);

                let mut buffer = ByteBuffer::with_id(self.buf_size, id);
                buffer.claimed = true;
                return PooledBuffer {
                    buffer: Some(buffer),
                    pool: self.clone(),
                };
            }

            trace!("pool saturated: waiting for a release");
            let (guard, timeout) = self.released
                .wait_timeout(state, SATURATION_WAIT_SLICE)
                .unwrap();
            state = guard;

            if timeout.timed_out() {
                waited += SATURATION_WAIT_SLICE;
                assert!(waited < SATURATION_PATIENCE,
                        "all {} buffers stayed claimed for {:?} - a buffer is leaking or the pool is sized too small",
                        self.max_buffers, SATURATION_PATIENCE);
            }
        }
    }

    /// Return a buffer to the free list. Panics if the buffer is not currently claimed:
    ///  a release without a matching acquire would corrupt pool accounting.
    pub fn release(&self, mut buffer: ByteBuffer) {
        assert!(buffer.claimed,
                "released buffer #{} which is not claimed - this is a double release or the buffer does not belong to this pool",
                buffer.id());
        assert_eq!(buffer.capacity(), self.buf_size,
                   "released buffer #{} has capacity {} instead of the pool's {} - it does not belong to this pool",
                   buffer.id(), buffer.capacity(), self.buf_size);

        buffer.claimed = false;
        // cleared on the way in so no residual data crosses message boundaries
        buffer.clear();

        let mut state = self.state.lock().unwrap();
        trace!("buffer #{} returned to the free list", buffer.id());
        state.free.push(buffer);
        drop(state);

        self.released.notify_one();
    }

    #[cfg(test)]
    pub fn num_created(&self) -> usize {
        self.state.lock().unwrap().created
    }
}

/// RAII lease for a pooled buffer: the pool registers itself in the lease, so dropping
///  it releases the buffer without any bookkeeping by the caller.
pub struct PooledBuffer {
    buffer: Option<ByteBuffer>,
    pool: Arc<BufferPool>,
}

impl PooledBuffer {
    /// explicit release for call sites where the handback should be visible
    pub fn release(mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.release(buffer);
        }
    }
}

impl Deref for PooledBuffer {
    type Target = ByteBuffer;

    fn deref(&self) -> &ByteBuffer {
        self.buffer.as_ref().expect("buffer is present until drop")
    }
}
impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut ByteBuffer {
        self.buffer.as_mut().expect("buffer is present until drop")
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.release(buffer);
        }
    }
}
