//! Memory ring device.
//!
//! Ring devices come in connected pairs, like the two ends of a patch cable.
//! Each end owns a buffer pool and stages traffic in local RX/TX rings that
//! are exchanged with the shared link in bursts. A packet whose buffer
//! belongs to the sending end's pool crosses the link without a copy; any
//! other packet is copied into a pool slot and its original buffer
//! released.

use std::cell::RefCell;
use std::io;
use std::rc::Rc;

use triomphe::Arc;

use super::{Device, DeviceOptions};
use crate::Result;
use crate::buffer_pool::BufferPool;
use crate::errors::Error;
use crate::packet::{BufferOwner, Packet};
use crate::util::ring::Ring;

/// Packets moved per burst.
pub const BURST: usize = 16;
/// Capacity of the per-end staging rings.
pub const STAGING_RING_SIZE: usize = 2 * BURST;

pub const MAX_SLOTS: usize = 1 << 16;
pub const MAX_SLOT_SIZE: usize = 1 << 16;
pub const MAX_LINK_SIZE: usize = 1 << 16;
/// Upper bound on `slots * slot_size` for one end's pool.
pub const MAX_POOL_BYTES: usize = 64 << 20;

#[derive(Debug, Clone, Copy)]
pub struct RingConfig {
    pub slots: usize,
    pub slot_size: usize,
    pub link_size: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            slots: 256,
            slot_size: 2048,
            link_size: 512,
        }
    }
}

impl RingConfig {
    pub fn from_options(options: &DeviceOptions) -> Result<Self> {
        let mut config = Self::default();
        let parse = |key: &str, dst: &mut usize| -> Result<()> {
            if let Some(v) = options.get(key) {
                *dst = v
                    .parse()
                    .map_err(|_| Error::InvalidArgument(format!("{key}={v}")))?;
            }
            Ok(())
        };
        parse("slots", &mut config.slots)?;
        parse("slot_size", &mut config.slot_size)?;
        parse("link", &mut config.link_size)?;
        if config.link_size < 2 || config.slots == 0 || config.slot_size == 0 {
            return Err(Error::InvalidArgument("ring too small".into()));
        }
        let pool_bytes = config.slots.checked_mul(config.slot_size);
        if config.slots > MAX_SLOTS
            || config.slot_size > MAX_SLOT_SIZE
            || config.link_size > MAX_LINK_SIZE
            || pool_bytes.is_none_or(|n| n > MAX_POOL_BYTES)
        {
            return Err(Error::InvalidArgument("ring too large".into()));
        }
        Ok(config)
    }
}

/// The two directions of a pair; lane `i` carries frames sent by end `i`.
struct Link {
    lanes: [Ring<Packet>; 2],
    closed: [bool; 2],
}

pub struct RingDevice {
    name: String,
    side: usize,
    link: Rc<RefCell<Link>>,
    pool: Arc<BufferPool>,
    rx: Ring<Packet>,
    tx: Ring<Packet>,
    closed: bool,
}

impl RingDevice {
    /// Creates both ends of a ring named `name`.
    pub fn pair(name: &str, config: RingConfig) -> (RingDevice, RingDevice) {
        let link = Rc::new(RefCell::new(Link {
            lanes: [Ring::new(config.link_size), Ring::new(config.link_size)],
            closed: [false; 2],
        }));
        let end = |side| RingDevice {
            name: name.to_string(),
            side,
            link: Rc::clone(&link),
            pool: BufferPool::new(config.slots, config.slot_size),
            rx: Ring::new(STAGING_RING_SIZE),
            tx: Ring::new(STAGING_RING_SIZE),
            closed: false,
        };
        (end(0), end(1))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Packet in a fresh slot of this end's pool holding `bytes`.
    pub fn alloc_packet(&self, bytes: &[u8]) -> Result<Packet> {
        let mut buf = BufferPool::alloc(&self.pool).ok_or(Error::NoMemory)?;
        buf.fill(bytes)?;
        Ok(Packet::from_pool(buf))
    }

    /// True once the other end has been closed or dropped.
    pub fn peer_closed(&self) -> bool {
        self.link.borrow().closed[1 - self.side]
    }

    fn owns(&self, packet: &Packet) -> bool {
        packet.owner() == BufferOwner::Pool(self.pool.id())
    }

    fn refill(&mut self) {
        let mut link = self.link.borrow_mut();
        let lane = &mut link.lanes[1 - self.side];
        while !self.rx.is_full() {
            let Some(p) = lane.pop() else { break };
            if let Err(p) = self.rx.push(p) {
                // Unreachable while rx has room; keep ordering anyway.
                p.release();
                break;
            }
        }
    }
}

impl Device for RingDevice {
    fn kind(&self) -> &'static str {
        "ring"
    }

    fn describe(&self) -> String {
        format!("ring {}[{}]", self.name, self.side)
    }

    fn recv(&mut self) -> Result<Option<Packet>> {
        if self.closed {
            return Ok(None);
        }
        if self.rx.count() < BURST {
            self.refill();
        }
        Ok(self.rx.pop())
    }

    fn send(&mut self, packet: Packet) -> Result<usize> {
        if self.closed {
            packet.release();
            return Err(io::Error::from(io::ErrorKind::NotConnected).into());
        }
        let packet = if self.owns(&packet) {
            packet
        } else {
            let copy = self.alloc_packet(packet.data());
            packet.release();
            copy?
        };
        let len = packet.len();
        let packet = match self.tx.push(packet) {
            Ok(()) => None,
            Err(p) => Some(p),
        };
        if let Some(p) = packet {
            self.flush()?;
            if let Err(p) = self.tx.push(p) {
                p.release();
                return Err(io::Error::from(io::ErrorKind::WouldBlock).into());
            }
        }
        if self.tx.count() >= BURST {
            self.flush()?;
        }
        Ok(len)
    }

    fn drop_packet(&mut self, packet: Packet) {
        if !self.owns(&packet) {
            tracing::trace!(ring = %self.name, "dropping foreign packet");
        }
        packet.release();
    }

    /// Moves staged frames onto the link. Frames that do not fit stay
    /// staged.
    fn flush(&mut self) -> Result<()> {
        let mut link = self.link.borrow_mut();
        let lane = &mut link.lanes[self.side];
        while !lane.is_full() {
            let Some(p) = self.tx.pop() else { break };
            if let Err(p) = lane.push(p) {
                p.release();
                break;
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.link.borrow_mut().closed[self.side] = true;
        let mut pending = Vec::new();
        self.rx.pop_n(&mut pending, usize::MAX);
        self.tx.pop_n(&mut pending, usize::MAX);
        tracing::debug!(ring = %self.name, discarded = pending.len(), "ring device closed");
        pending.into_iter().for_each(Packet::release);
    }
}

impl Drop for RingDevice {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (RingDevice, RingDevice) {
        RingDevice::pair("t", RingConfig::default())
    }

    #[test]
    fn frames_cross_after_flush() {
        let (mut a, mut b) = pair();
        a.send(Packet::from_heap(b"one".to_vec())).unwrap();
        assert!(b.recv().unwrap().is_none());
        a.flush().unwrap();
        assert_eq!(b.recv().unwrap().unwrap().data(), b"one");
        assert!(b.recv().unwrap().is_none());
    }

    #[test]
    fn a_full_burst_flushes_itself() {
        let (mut a, mut b) = pair();
        for i in 0..BURST as u8 {
            a.send(Packet::from_heap(vec![i])).unwrap();
        }
        for i in 0..BURST as u8 {
            assert_eq!(b.recv().unwrap().unwrap().data(), &[i]);
        }
    }

    #[test]
    fn own_buffers_cross_without_copy() {
        let (mut a, mut b) = pair();
        let p = a.alloc_packet(b"zero-copy").unwrap();
        let owner = p.owner();
        assert_eq!(a.pool().available(), a.pool().len() - 1);
        a.send(p).unwrap();
        a.flush().unwrap();
        let got = b.recv().unwrap().unwrap();
        assert_eq!(got.owner(), owner);
        // Still one slot of a's pool in flight.
        assert_eq!(a.pool().available(), a.pool().len() - 1);
        b.drop_packet(got);
        assert_eq!(a.pool().available(), a.pool().len());
    }

    #[test]
    fn foreign_buffers_are_copied_and_released() {
        let (mut a, _b) = pair();
        let (other, _) = pair();
        let p = other.alloc_packet(b"foreign").unwrap();
        assert_eq!(other.pool().available(), other.pool().len() - 1);
        a.send(p).unwrap();
        assert_eq!(other.pool().available(), other.pool().len());
        assert_eq!(a.pool().available(), a.pool().len() - 1);
    }

    #[test]
    fn exhausted_pool_reports_no_memory() {
        let config = RingConfig {
            slots: 1,
            ..RingConfig::default()
        };
        let (mut a, _b) = RingDevice::pair("small", config);
        a.send(Packet::from_heap(vec![1])).unwrap();
        assert!(matches!(
            a.send(Packet::from_heap(vec![2])),
            Err(Error::NoMemory)
        ));
    }

    #[test]
    fn closing_discards_staged_frames() {
        let (mut a, mut b) = pair();
        a.send(Packet::from_heap(vec![7])).unwrap();
        a.close();
        assert_eq!(a.pool().available(), a.pool().len());
        assert!(a.send(Packet::from_heap(vec![8])).is_err());
        assert!(b.recv().unwrap().is_none());
    }

    #[test]
    fn options_override_defaults() {
        let opts = DeviceOptions::parse("slots=8,link=4").unwrap();
        let c = RingConfig::from_options(&opts).unwrap();
        assert_eq!((c.slots, c.link_size, c.slot_size), (8, 4, 2048));
        let bad = DeviceOptions::parse("slots=x").unwrap();
        assert!(RingConfig::from_options(&bad).is_err());
    }

    #[test]
    fn oversized_options_are_rejected() {
        for opts in [
            "slots=4000000000",
            "slot_size=1048576",
            "link=100000000",
            "slots=65536,slot_size=65536",
            "slot_size=0",
        ] {
            let opts = DeviceOptions::parse(opts).unwrap();
            assert!(matches!(
                RingConfig::from_options(&opts),
                Err(Error::InvalidArgument(_))
            ));
        }
        let opts = DeviceOptions::parse("slots=65536,slot_size=1024,link=65536").unwrap();
        assert!(RingConfig::from_options(&opts).is_ok());
    }

    #[test]
    fn each_end_sees_its_peer_close() {
        let (mut a, b) = pair();
        assert!(!a.peer_closed() && !b.peer_closed());
        a.close();
        assert!(b.peer_closed());
        assert!(!a.peer_closed());

        let (a, b) = pair();
        drop(b);
        assert!(a.peer_closed());
    }
}
