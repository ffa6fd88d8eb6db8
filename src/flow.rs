//! Flow tables: per-dataplane match state consulted by pipelines.

use crate::Result;
use crate::errors::Error;
use crate::packet::{Context, Key};
use crate::port::PortId;
use crate::util::hash::{ChainedHashTable, bytes_hash, uint_eq, uint_hash};

pub const MAX_TABLES: usize = 32;
/// Largest accepted size hint for a new table.
pub const MAX_TABLE_SIZE: usize = 1 << 20;

const TABLE_SET_BUCKETS: usize = 17;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MatchKind {
    Exact = 1,
    Prefix = 2,
    Wildcard = 3,
}

impl TryFrom<u8> for MatchKind {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            1 => Ok(MatchKind::Exact),
            2 => Ok(MatchKind::Prefix),
            3 => Ok(MatchKind::Wildcard),
            other => Err(Error::InvalidArgument(format!("match kind {other}"))),
        }
    }
}

/// What a matching entry decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flow {
    pub priority: u16,
    pub out_port: PortId,
}

pub trait FlowTable {
    fn match_kind(&self) -> MatchKind;

    /// Adds `flow` under `key`, replacing any flow with the same key.
    fn insert(&mut self, key: Key, flow: Flow);

    fn remove(&mut self, key: &Key) -> Option<Flow>;

    /// Flow matching the context's current key.
    fn lookup(&self, cx: &Context) -> Option<&Flow>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn key_hash(key: &Key) -> usize {
    bytes_hash(key)
}

fn key_eq(a: &Key, b: &Key) -> bool {
    a == b
}

pub struct ExactMatchTable {
    flows: ChainedHashTable<Key, Flow>,
}

impl ExactMatchTable {
    /// `size_hint` is clamped to `MAX_TABLE_SIZE`.
    pub fn new(size_hint: usize) -> Self {
        Self {
            flows: ChainedHashTable::new(size_hint.min(MAX_TABLE_SIZE), key_hash, key_eq),
        }
    }
}

impl FlowTable for ExactMatchTable {
    fn match_kind(&self) -> MatchKind {
        MatchKind::Exact
    }

    fn insert(&mut self, key: Key, flow: Flow) {
        if let Err(flow) = self.flows.update(&key, flow) {
            self.flows.insert(key, flow);
        }
    }

    fn remove(&mut self, key: &Key) -> Option<Flow> {
        self.flows.remove(key).map(|(_, flow)| flow)
    }

    fn lookup(&self, cx: &Context) -> Option<&Flow> {
        self.flows.find(&cx.key)
    }

    fn len(&self) -> usize {
        self.flows.len()
    }
}

/// The flow tables of one dataplane, indexed by table number.
pub struct FlowTables {
    tables: ChainedHashTable<u32, Box<dyn FlowTable>>,
}

impl Default for FlowTables {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowTables {
    pub fn new() -> Self {
        Self {
            tables: ChainedHashTable::new(TABLE_SET_BUCKETS, uint_hash, uint_eq),
        }
    }

    pub fn add(&mut self, index: u32, kind: MatchKind, size_hint: usize) -> Result<()> {
        if index as usize >= MAX_TABLES {
            return Err(Error::TableLimitExceeded(MAX_TABLES));
        }
        if self.tables.contains(&index) {
            return Err(Error::TableExists(index));
        }
        if size_hint > MAX_TABLE_SIZE {
            return Err(Error::InvalidArgument(format!(
                "table size {size_hint} exceeds {MAX_TABLE_SIZE}"
            )));
        }
        let table: Box<dyn FlowTable> = match kind {
            MatchKind::Exact => Box::new(ExactMatchTable::new(size_hint)),
            MatchKind::Prefix => return Err(Error::Unsupported("prefix match tables")),
            MatchKind::Wildcard => return Err(Error::Unsupported("wildcard match tables")),
        };
        self.tables.insert(index, table);
        tracing::debug!(table = index, ?kind, "flow table added");
        Ok(())
    }

    pub fn remove(&mut self, index: u32) -> Result<Box<dyn FlowTable>> {
        self.tables
            .remove(&index)
            .map(|(_, table)| table)
            .ok_or(Error::NoSuchTable(index))
    }

    pub fn get(&self, index: u32) -> Option<&dyn FlowTable> {
        self.tables.find(&index).map(|t| t.as_ref())
    }

    pub fn get_mut(&mut self, index: u32) -> Option<&mut (dyn FlowTable + 'static)> {
        self.tables.find_mut(&index).map(|t| t.as_mut())
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn clear(&mut self) {
        self.tables.drain();
    }
}
