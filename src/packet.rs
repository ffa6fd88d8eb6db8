//! Packets, their buffer ownership and the per-packet processing context.

use std::time::{SystemTime, UNIX_EPOCH};

use arrayvec::ArrayVec;

use crate::buffer_pool::PoolBuffer;
use crate::port::PortId;

/// Longest pipeline-defined match key, in bytes.
pub const MAX_KEY_LEN: usize = 64;

pub type Key = ArrayVec<u8, MAX_KEY_LEN>;

/// Who must reclaim a packet's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOwner {
    /// Plain heap allocation, freed by dropping it.
    Heap,
    /// Slot of the device buffer pool with the given id.
    Pool(u32),
}

#[derive(Debug)]
pub enum PacketBuffer {
    Heap(Vec<u8>),
    Pooled(PoolBuffer),
}

/// Raw packet bytes plus the arrival timestamp (nanoseconds since the Unix
/// epoch).
#[derive(Debug)]
pub struct Packet {
    buffer: PacketBuffer,
    timestamp: u64,
}

pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

impl Packet {
    pub fn new(buffer: PacketBuffer, timestamp: u64) -> Self {
        Self { buffer, timestamp }
    }

    pub fn from_heap(data: Vec<u8>) -> Self {
        Self::new(PacketBuffer::Heap(data), now_ns())
    }

    pub fn from_pool(buf: PoolBuffer) -> Self {
        Self::new(PacketBuffer::Pooled(buf), now_ns())
    }

    pub fn owner(&self) -> BufferOwner {
        match &self.buffer {
            PacketBuffer::Heap(_) => BufferOwner::Heap,
            PacketBuffer::Pooled(buf) => BufferOwner::Pool(buf.pool_id()),
        }
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn data(&self) -> &[u8] {
        match &self.buffer {
            PacketBuffer::Heap(v) => v.as_slice(),
            PacketBuffer::Pooled(buf) => &buf[..],
        }
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        match &mut self.buffer {
            PacketBuffer::Heap(v) => v.as_mut_slice(),
            PacketBuffer::Pooled(buf) => &mut buf[..],
        }
    }

    pub fn len(&self) -> usize {
        self.data().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }

    /// Heap copy of this packet; the only way a packet is ever duplicated.
    pub fn deep_copy(&self) -> Packet {
        Packet::new(PacketBuffer::Heap(self.data().to_vec()), self.timestamp)
    }

    pub fn into_buffer(self) -> PacketBuffer {
        self.buffer
    }

    /// Reclaims the buffer through its owner.
    pub fn release(self) {
        match self.buffer {
            PacketBuffer::Heap(v) => drop(v),
            PacketBuffer::Pooled(buf) => {
                tracing::trace!(pool = buf.pool_id(), "releasing pooled buffer");
                buf.release()
            }
        }
    }
}

/// Where a packet came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Arrival {
    pub in_port: PortId,
    pub in_phy_port: PortId,
    pub tunnel_id: u64,
}

impl Arrival {
    pub fn on(port: PortId) -> Self {
        Self {
            in_port: port,
            in_phy_port: port,
            tunnel_id: 0,
        }
    }
}

/// The base key every pipeline starts from: ingress port then physical
/// ingress port, little-endian.
pub fn base_key(arrival: &Arrival) -> Key {
    let mut key = Key::new();
    key.extend(arrival.in_port.raw().to_le_bytes());
    key.extend(arrival.in_phy_port.raw().to_le_bytes());
    key
}

pub const BASE_KEY_LEN: usize = 8;

/// Per-packet processing state, alive for one pipeline traversal.
#[derive(Debug)]
pub struct Context {
    pub packet: Packet,
    pub in_port: PortId,
    pub in_phy_port: PortId,
    pub tunnel_id: u64,
    /// Output decision; `None` until the pipeline decides.
    pub out_port: Option<PortId>,
    pub table_index: u32,
    pub key: Key,
}

impl Context {
    pub fn new(packet: Packet, arrival: Arrival) -> Self {
        Self {
            packet,
            in_port: arrival.in_port,
            in_phy_port: arrival.in_phy_port,
            tunnel_id: arrival.tunnel_id,
            out_port: None,
            table_index: 0,
            key: base_key(&arrival),
        }
    }

    pub fn arrival(&self) -> Arrival {
        Arrival {
            in_port: self.in_port,
            in_phy_port: self.in_phy_port,
            tunnel_id: self.tunnel_id,
        }
    }
}
