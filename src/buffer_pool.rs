use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, Ordering};

use crossbeam_queue::ArrayQueue;
use triomphe::Arc;

use crate::Result;
use crate::errors::Error;

static NEXT_POOL_ID: AtomicU32 = AtomicU32::new(1);

/// Fixed-size packet buffers owned by one device.
///
/// Buffers are handed out as [`PoolBuffer`]s, which return their memory to
/// the pool on [`PoolBuffer::release`] or, failing that, when dropped. Every pool carries a process-unique id so a packet
/// can tell whether it belongs to a given device.
#[derive(Debug)]
pub struct BufferPool {
    id: u32,
    slot_size: usize,
    nslots: usize,
    free: ArrayQueue<Box<[u8]>>,
}

impl BufferPool {
    pub fn new(nslots: usize, slot_size: usize) -> Arc<Self> {
        let free = ArrayQueue::new(nslots.max(1));
        for _ in 0..nslots {
            // Cannot overflow, the queue is sized for every slot.
            let _ = free.push(vec![0u8; slot_size].into_boxed_slice());
        }
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(pool = id, nslots, slot_size, "buffer pool created");
        Arc::new(Self {
            id,
            slot_size,
            nslots,
            free,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    pub fn len(&self) -> usize {
        self.nslots
    }

    /// Number of buffers currently free.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Takes a free buffer, or `None` when every slot is in use.
    pub fn alloc(pool: &Arc<Self>) -> Option<PoolBuffer> {
        let data = pool.free.pop()?;
        Some(PoolBuffer {
            data,
            len: 0,
            pool: Arc::clone(pool),
            returned: false,
        })
    }

    fn dealloc(&self, data: Box<[u8]>) {
        if self.free.push(data).is_err() {
            tracing::warn!(pool = self.id, "buffer returned to a full pool");
        }
    }
}

/// A buffer borrowed from a [`BufferPool`], holding `len` bytes of packet
/// data.
pub struct PoolBuffer {
    data: Box<[u8]>,
    len: usize,
    pool: Arc<BufferPool>,
    returned: bool,
}

impl PoolBuffer {
    pub fn pool_id(&self) -> u32 {
        self.pool.id
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn set_len(&mut self, len: usize) -> Result<()> {
        if len > self.data.len() {
            return Err(Error::TooBigPacket(len));
        }
        self.len = len;
        Ok(())
    }

    /// Hands the slot back to its pool.
    pub fn release(mut self) {
        self.give_back();
    }

    fn give_back(&mut self) {
        if self.returned {
            return;
        }
        self.returned = true;
        self.pool.dealloc(std::mem::take(&mut self.data));
    }

    /// Replaces the contents with `bytes`.
    pub fn fill(&mut self, bytes: &[u8]) -> Result<()> {
        self.set_len(bytes.len())?;
        self.data[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

impl Deref for PoolBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.data[..self.len]
    }
}

impl DerefMut for PoolBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data[..self.len]
    }
}

impl Drop for PoolBuffer {
    fn drop(&mut self) {
        self.give_back();
    }
}

impl std::fmt::Debug for PoolBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolBuffer")
            .field("pool", &self.pool.id)
            .field("len", &self.len)
            .finish()
    }
}
