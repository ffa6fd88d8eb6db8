//! Ports: named attachment points of a dataplane, each backed by a device.

use std::fmt;

use eui48::MacAddress;

use crate::Result;
use crate::device::Device;
use crate::errors::Error;
use crate::util::hash::{ChainedHashTable, uint_eq, uint_hash};

/// Largest assignable port id; anything above it is a reserved sentinel.
pub const PORT_MAX_ID: u32 = 0xffff_ff00;

const PORT_TABLE_BUCKETS: usize = 17;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PortId(u32);

impl PortId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn is_reserved(self) -> bool {
        self.0 > PORT_MAX_ID
    }

    pub fn reserved(self) -> Option<ReservedPort> {
        ReservedPort::try_from(self.0).ok()
    }
}

impl From<u32> for PortId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reserved() {
            Some(r) => write!(f, "{r:?}"),
            None => write!(f, "{}", self.0),
        }
    }
}

/// Reserved pseudo-ports used as forwarding decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ReservedPort {
    Drop = 0xffff_fff7,
    Local = 0xffff_fff8,
    InPort = 0xffff_fff9,
    Normal = 0xffff_fffa,
    Flood = 0xffff_fffb,
    All = 0xffff_fffc,
    Controller = 0xffff_fffd,
    Table = 0xffff_fffe,
    Any = 0xffff_ffff,
}

impl ReservedPort {
    pub const fn id(self) -> PortId {
        PortId(self as u32)
    }
}

impl From<ReservedPort> for PortId {
    fn from(r: ReservedPort) -> Self {
        r.id()
    }
}

impl TryFrom<u32> for ReservedPort {
    type Error = u32;

    fn try_from(raw: u32) -> std::result::Result<Self, u32> {
        Ok(match raw {
            0xffff_fff7 => ReservedPort::Drop,
            0xffff_fff8 => ReservedPort::Local,
            0xffff_fff9 => ReservedPort::InPort,
            0xffff_fffa => ReservedPort::Normal,
            0xffff_fffb => ReservedPort::Flood,
            0xffff_fffc => ReservedPort::All,
            0xffff_fffd => ReservedPort::Controller,
            0xffff_fffe => ReservedPort::Table,
            0xffff_ffff => ReservedPort::Any,
            other => return Err(other),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortFlags {
    pub no_recv: bool,
    pub no_forward: bool,
    pub no_packet_in: bool,
    pub link_down: bool,
    pub live: bool,
}

impl PortFlags {
    pub fn bits(&self) -> u8 {
        (self.no_recv as u8)
            | (self.no_forward as u8) << 1
            | (self.no_packet_in as u8) << 2
            | (self.link_down as u8) << 3
            | (self.live as u8) << 4
    }

    pub fn from_bits(bits: u8) -> Self {
        Self {
            no_recv: bits & 1 != 0,
            no_forward: bits & 1 << 1 != 0,
            no_packet_in: bits & 1 << 2 != 0,
            link_down: bits & 1 << 3 != 0,
            live: bits & 1 << 4 != 0,
        }
    }

    pub fn receives(&self) -> bool {
        !self.no_recv && !self.link_down
    }

    pub fn forwards(&self) -> bool {
        !self.no_forward && !self.link_down
    }
}

/// Port attribute selectors accepted by the port-set request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortProperty {
    NoRecv = 1,
    NoForward = 2,
    NoPacketIn = 3,
    LinkDown = 4,
}

impl TryFrom<u8> for PortProperty {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            1 => Ok(PortProperty::NoRecv),
            2 => Ok(PortProperty::NoForward),
            3 => Ok(PortProperty::NoPacketIn),
            4 => Ok(PortProperty::LinkDown),
            other => Err(Error::InvalidArgument(format!("port property {other}"))),
        }
    }
}

impl PortFlags {
    pub fn set(&mut self, property: PortProperty, on: bool) {
        match property {
            PortProperty::NoRecv => self.no_recv = on,
            PortProperty::NoForward => self.no_forward = on,
            PortProperty::NoPacketIn => self.no_packet_in = on,
            PortProperty::LinkDown => self.link_down = on,
        }
    }
}

pub struct Port {
    id: PortId,
    name: String,
    address: MacAddress,
    pub flags: PortFlags,
    device: Box<dyn Device>,
}

impl Port {
    pub fn new(id: PortId, name: impl Into<String>, device: Box<dyn Device>) -> Self {
        let raw = id.raw().to_be_bytes();
        // Locally administered unicast address derived from the id.
        let address = MacAddress::new([0x02, 0x00, raw[0], raw[1], raw[2], raw[3]]);
        Self {
            id,
            name: name.into(),
            address,
            flags: PortFlags {
                live: true,
                ..PortFlags::default()
            },
            device,
        }
    }

    pub fn id(&self) -> PortId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> MacAddress {
        self.address
    }

    pub fn device(&self) -> &dyn Device {
        self.device.as_ref()
    }

    pub fn device_mut(&mut self) -> &mut dyn Device {
        self.device.as_mut()
    }

    /// Releases the device.
    pub fn close(mut self) {
        tracing::debug!(port = %self.id, name = %self.name, "closing port");
        self.device.close();
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("address", &self.address.to_hex_string())
            .field("flags", &self.flags)
            .field("device", &self.device.kind())
            .finish()
    }
}

/// Hands out port ids. The cursor starts at 1; each request returns the
/// first id at or after the cursor that is not in use, wrapping back to 1
/// before reaching [`PORT_MAX_ID`].
#[derive(Debug, Clone)]
pub struct PortIdAllocator {
    cursor: u32,
}

impl Default for PortIdAllocator {
    fn default() -> Self {
        Self { cursor: 1 }
    }
}

impl PortIdAllocator {
    const SPACE: u64 = PORT_MAX_ID as u64 - 1;

    pub fn allocate(&mut self, in_use: impl Fn(PortId) -> bool, used: usize) -> Result<PortId> {
        if used as u64 >= Self::SPACE {
            return Err(Error::PortLimitExceeded);
        }
        loop {
            let candidate = PortId(self.cursor);
            if !in_use(candidate) {
                return Ok(candidate);
            }
            self.cursor = if self.cursor + 1 >= PORT_MAX_ID {
                1
            } else {
                self.cursor + 1
            };
        }
    }
}

/// The ports of one dataplane, indexed by id.
pub struct PortTable {
    ports: ChainedHashTable<u32, Port>,
    ids: PortIdAllocator,
}

impl Default for PortTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PortTable {
    pub fn new() -> Self {
        Self {
            ports: ChainedHashTable::new(PORT_TABLE_BUCKETS, uint_hash, uint_eq),
            ids: PortIdAllocator::default(),
        }
    }

    /// Next free id. The id stays free until a port using it is inserted.
    pub fn allocate_id(&mut self) -> Result<PortId> {
        let ports = &self.ports;
        self.ids
            .allocate(|id| ports.contains(&id.raw()), ports.len())
    }

    pub fn insert(&mut self, port: Port) {
        self.ports.insert(port.id().raw(), port);
    }

    pub fn remove(&mut self, id: PortId) -> Option<Port> {
        self.ports.remove(&id.raw()).map(|(_, port)| port)
    }

    pub fn get(&self, id: PortId) -> Option<&Port> {
        self.ports.find(&id.raw())
    }

    pub fn get_mut(&mut self, id: PortId) -> Option<&mut Port> {
        self.ports.find_mut(&id.raw())
    }

    pub fn contains(&self, id: PortId) -> bool {
        self.ports.contains(&id.raw())
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Port ids in ascending order.
    pub fn ids(&self) -> Vec<PortId> {
        let mut ids: Vec<PortId> = self.ports.iter().map(|(&raw, _)| PortId(raw)).collect();
        ids.sort_unstable();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &Port> {
        self.ports.iter().map(|(_, port)| port)
    }

    pub fn drain(&mut self) -> Vec<Port> {
        self.ports.drain().into_iter().map(|(_, port)| port).collect()
    }
}
