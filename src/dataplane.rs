//! Dataplanes (virtual switch instances) and their manager.

use std::os::fd::BorrowedFd;

use crate::Result;
use crate::errors::Error;
use crate::flow::FlowTables;
use crate::packet::{Arrival, BASE_KEY_LEN};
use crate::pipeline::{DataplaneInfo, Pipeline, PipelineLoader};
use crate::port::{Port, PortId, PortTable};

pub const DEFAULT_MAX_DATAPLANES: usize = 64;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DataplaneStats {
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub dropped: u64,
    pub tx_errors: u64,
}

/// Everything a pipeline may touch while forwarding.
#[derive(Default)]
pub struct Resources {
    pub ports: PortTable,
    pub tables: FlowTables,
    pub stats: DataplaneStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataplaneState {
    Down,
    Up,
}

/// Slot index of a dataplane in its manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataplaneId(usize);

impl DataplaneId {
    pub fn index(self) -> usize {
        self.0
    }
}

pub struct Dataplane {
    id: DataplaneId,
    name: String,
    kind: String,
    state: DataplaneState,
    key_size: usize,
    pipeline: Box<dyn Pipeline>,
    loaded: bool,
    resources: Resources,
}

impl Dataplane {
    pub fn id(&self) -> DataplaneId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pipeline type this dataplane was created with.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn state(&self) -> DataplaneState {
        self.state
    }

    pub fn is_up(&self) -> bool {
        self.state == DataplaneState::Up
    }

    pub fn key_size(&self) -> usize {
        self.key_size
    }

    pub fn stats(&self) -> DataplaneStats {
        self.resources.stats
    }

    pub fn ports(&self) -> &PortTable {
        &self.resources.ports
    }

    pub fn tables(&self) -> &FlowTables {
        &self.resources.tables
    }

    pub fn tables_mut(&mut self) -> &mut FlowTables {
        &mut self.resources.tables
    }

    pub fn allocate_port_id(&mut self) -> Result<PortId> {
        self.resources.ports.allocate_id()
    }

    /// Attaches `port` if the pipeline accepts it. On refusal the port is
    /// closed and the table is left as it was.
    pub fn add_port(&mut self, port: Port) -> Result<PortId> {
        let id = port.id();
        if id.is_reserved() || self.resources.ports.contains(id) {
            port.close();
            return Err(Error::InvalidArgument(format!("port id {id} unavailable")));
        }
        if let Err(e) = self.pipeline.add_port(&port) {
            tracing::warn!(dataplane = %self.name, port = %id, error = %e, "pipeline refused port");
            port.close();
            return Err(e);
        }
        tracing::info!(dataplane = %self.name, port = %id, name = port.name(), "port added");
        self.resources.ports.insert(port);
        Ok(id)
    }

    /// Detaches port `id` if the pipeline agrees and hands it back.
    pub fn remove_port(&mut self, id: PortId) -> Result<Port> {
        let port = self
            .resources
            .ports
            .get(id)
            .ok_or(Error::NoSuchPort(id.raw()))?;
        self.pipeline.del_port(port)?;
        let port = self
            .resources
            .ports
            .remove(id)
            .ok_or(Error::NoSuchPort(id.raw()))?;
        tracing::info!(dataplane = %self.name, port = %id, "port removed");
        Ok(port)
    }

    pub fn get_port(&self, id: PortId) -> Option<&Port> {
        self.resources.ports.get(id)
    }

    pub fn get_port_mut(&mut self, id: PortId) -> Option<&mut Port> {
        self.resources.ports.get_mut(id)
    }

    pub fn list_ports(&self) -> Vec<PortId> {
        self.resources.ports.ids()
    }

    pub fn start(&mut self) -> Result<()> {
        if self.is_up() {
            return Ok(());
        }
        self.pipeline.start()?;
        self.state = DataplaneState::Up;
        tracing::info!(dataplane = %self.name, "started");
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        if !self.is_up() {
            return Ok(());
        }
        self.pipeline.stop()?;
        self.state = DataplaneState::Down;
        tracing::info!(dataplane = %self.name, "stopped");
        Ok(())
    }

    /// Receives up to `burst` packets per receiving port, runs each through
    /// the pipeline, then flushes every device. Returns the number of
    /// packets received.
    pub fn poll(&mut self, burst: usize) -> usize {
        if !self.is_up() {
            return 0;
        }
        let mut received = 0;
        for id in self.resources.ports.ids() {
            for _ in 0..burst {
                let res = match self.resources.ports.get_mut(id) {
                    Some(port) if port.flags.receives() => port.device_mut().recv(),
                    _ => break,
                };
                match res {
                    Ok(Some(packet)) => {
                        received += 1;
                        self.resources.stats.rx_packets += 1;
                        self.pipeline
                            .insert(&mut self.resources, packet, Arrival::on(id));
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!(dataplane = %self.name, port = %id, error = %e, "recv failed");
                        break;
                    }
                }
            }
        }
        for id in self.resources.ports.ids() {
            if let Some(port) = self.resources.ports.get_mut(id) {
                if let Err(e) = port.device_mut().flush() {
                    tracing::debug!(dataplane = %self.name, port = %id, error = %e, "flush failed");
                }
            }
        }
        received
    }

    /// Stops, unloads the pipeline (once) and closes every port.
    fn teardown(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(dataplane = %self.name, error = %e, "stop failed during delete");
            self.state = DataplaneState::Down;
        }
        if self.loaded {
            self.loaded = false;
            if let Err(e) = self.pipeline.unload() {
                tracing::warn!(dataplane = %self.name, error = %e, "pipeline unload failed");
            }
        }
        for port in self.resources.ports.drain() {
            port.close();
        }
        self.resources.tables.clear();
    }
}

/// Owns every dataplane, in a fixed number of slots.
pub struct DataplaneManager {
    slots: Vec<Option<Dataplane>>,
    loader: PipelineLoader,
}

impl DataplaneManager {
    pub fn new(capacity: usize, loader: PipelineLoader) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots, loader }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn loader(&self) -> &PipelineLoader {
        &self.loader
    }

    pub fn loader_mut(&mut self) -> &mut PipelineLoader {
        &mut self.loader
    }

    /// Creates a dataplane named `name` running the pipeline `kind`.
    pub fn create(&mut self, name: &str, kind: &str) -> Result<DataplaneId> {
        if self.lookup(name).is_some() {
            return Err(Error::DataplaneExists(name.to_string()));
        }
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(Error::DataplaneLimitExceeded(self.slots.len()))?;
        let info = DataplaneInfo {
            name,
            kind,
            key_size: BASE_KEY_LEN,
        };
        let pipeline = self.loader.load(&info)?;
        let id = DataplaneId(slot);
        self.slots[slot] = Some(Dataplane {
            id,
            name: name.to_string(),
            kind: kind.to_string(),
            state: DataplaneState::Down,
            key_size: BASE_KEY_LEN,
            pipeline,
            loaded: true,
            resources: Resources::default(),
        });
        tracing::info!(dataplane = name, pipeline = kind, slot, "dataplane created");
        Ok(id)
    }

    pub fn delete(&mut self, id: DataplaneId) -> Result<()> {
        let mut dp = self
            .slots
            .get_mut(id.0)
            .and_then(Option::take)
            .ok_or(Error::BadDataplane)?;
        dp.teardown();
        tracing::info!(dataplane = %dp.name, "dataplane deleted");
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<DataplaneId> {
        self.iter().find(|dp| dp.name == name).map(|dp| dp.id)
    }

    pub fn get(&self, id: DataplaneId) -> Result<&Dataplane> {
        self.slots
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(Error::BadDataplane)
    }

    pub fn get_mut(&mut self, id: DataplaneId) -> Result<&mut Dataplane> {
        self.slots
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(Error::BadDataplane)
    }

    /// Live dataplanes in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Dataplane> {
        self.slots.iter().flatten()
    }

    pub fn names(&self) -> Vec<&str> {
        self.iter().map(Dataplane::name).collect()
    }

    pub fn start(&mut self, id: DataplaneId) -> Result<()> {
        self.get_mut(id)?.start()
    }

    pub fn stop(&mut self, id: DataplaneId) -> Result<()> {
        self.get_mut(id)?.stop()
    }

    pub fn add_port(&mut self, id: DataplaneId, port: Port) -> Result<PortId> {
        match self.get_mut(id) {
            Ok(dp) => dp.add_port(port),
            Err(e) => {
                port.close();
                Err(e)
            }
        }
    }

    /// Removes port `pid` from dataplane `id` and closes its device.
    pub fn remove_port(&mut self, id: DataplaneId, pid: PortId) -> Result<()> {
        self.get_mut(id)?.remove_port(pid)?.close();
        Ok(())
    }

    pub fn list_ports(&self, id: DataplaneId) -> Result<Vec<PortId>> {
        Ok(self.get(id)?.list_ports())
    }

    pub fn get_port(&self, id: DataplaneId, pid: PortId) -> Result<&Port> {
        self.get(id)?
            .get_port(pid)
            .ok_or(Error::NoSuchPort(pid.raw()))
    }

    /// Polls every running dataplane once.
    pub fn poll(&mut self, burst: usize) -> usize {
        self.slots
            .iter_mut()
            .flatten()
            .map(|dp| dp.poll(burst))
            .sum()
    }

    /// Descriptors of running dataplanes' devices, and whether any running
    /// device has none (and so must be polled without waiting).
    pub fn device_fds(&self) -> (Vec<BorrowedFd<'_>>, bool) {
        let mut fds = Vec::new();
        let mut fdless = false;
        for dp in self.iter().filter(|dp| dp.is_up()) {
            for port in dp.ports().iter() {
                match port.device().as_fd() {
                    Some(fd) => fds.push(fd),
                    None => fdless = true,
                }
            }
        }
        (fds, fdless)
    }

    /// Deletes every dataplane.
    pub fn shutdown(&mut self) {
        for slot in 0..self.slots.len() {
            if self.slots[slot].is_none() {
                continue;
            }
            if let Err(e) = self.delete(DataplaneId(slot)) {
                tracing::warn!(slot, error = %e, "dataplane delete failed during shutdown");
            }
        }
    }
}

impl Drop for DataplaneManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
