//! Pipelines: the pluggable forwarding logic of a dataplane.
//!
//! A pipeline is chosen by type name when a dataplane is created. The
//! [`PipelineLoader`] resolves the name to a built-in constructor or to a
//! shared object exporting the C entry point described in [`abi`].

use std::path::{Path, PathBuf};

use crate::Result;
use crate::dataplane::Resources;
use crate::errors::Error;
use crate::packet::{Arrival, Context, Packet};
use crate::port::{Port, PortId, ReservedPort};
use crate::util::hash::{ChainedHashTable, string_eq, string_hash};

pub mod abi;
pub mod library;
pub mod wire;

pub use abi::{ModulePipeline, PipelineInitFn};
pub use library::Library;

/// Dataplane attributes visible to a pipeline while loading.
#[derive(Debug, Clone, Copy)]
pub struct DataplaneInfo<'a> {
    pub name: &'a str,
    pub kind: &'a str,
    pub key_size: usize,
}

/// Forwarding logic attached to one dataplane.
///
/// `add_port`/`del_port` are consulted before the port table changes; an
/// error vetoes the change. `insert` owns the packet from then on: it must
/// end in exactly one send or drop, normally through [`egress`].
pub trait Pipeline {
    fn load(&mut self, dp: &DataplaneInfo<'_>) -> Result<()>;
    fn unload(&mut self) -> Result<()>;
    fn add_port(&mut self, port: &Port) -> Result<()>;
    fn del_port(&mut self, port: &Port) -> Result<()>;
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    fn insert(&mut self, res: &mut Resources, packet: Packet, arrival: Arrival);
}

/// Hands a decided context to its output port(s) or drops it.
pub fn egress(res: &mut Resources, cx: Context) {
    let in_port = cx.in_port;
    let Some(out) = cx.out_port else {
        drop_at(res, in_port, cx.packet);
        return;
    };
    if !out.is_reserved() {
        send_to(res, in_port, out, cx.packet);
        return;
    }
    match out.reserved() {
        Some(ReservedPort::InPort) => send_to(res, in_port, in_port, cx.packet),
        Some(ReservedPort::Flood) => flood(res, in_port, cx.packet, true),
        Some(ReservedPort::All) => flood(res, in_port, cx.packet, false),
        _ => drop_at(res, in_port, cx.packet),
    }
}

fn send_to(res: &mut Resources, in_port: PortId, out: PortId, packet: Packet) {
    let forwards = res.ports.get(out).is_some_and(|p| p.flags.forwards());
    if !forwards {
        drop_at(res, in_port, packet);
        return;
    }
    transmit(res, in_port, out, packet);
}

/// Sends on `out` without consulting its flags.
fn transmit(res: &mut Resources, in_port: PortId, out: PortId, packet: Packet) {
    if !res.ports.contains(out) {
        drop_at(res, in_port, packet);
        return;
    }
    let Resources { ports, stats, .. } = res;
    let Some(port) = ports.get_mut(out) else {
        return;
    };
    match port.device_mut().send(packet) {
        Ok(n) => {
            stats.tx_packets += 1;
            stats.tx_bytes += n as u64;
        }
        Err(e) => {
            stats.tx_errors += 1;
            tracing::debug!(port = %out, error = %e, "send failed");
        }
    }
}

/// Copies `packet` to every port but the ingress one, skipping ports whose
/// link is down. FLOOD (`honor_no_forward`) also skips `no_forward` ports;
/// ALL delivers to them.
fn flood(res: &mut Resources, in_port: PortId, packet: Packet, honor_no_forward: bool) {
    let targets: Vec<PortId> = res
        .ports
        .iter()
        .filter(|p| p.id() != in_port && !p.flags.link_down)
        .filter(|p| !honor_no_forward || !p.flags.no_forward)
        .map(|p| p.id())
        .collect();
    let Some((&last, rest)) = targets.split_last() else {
        drop_at(res, in_port, packet);
        return;
    };
    for &id in rest {
        let copy = packet.deep_copy();
        transmit(res, in_port, id, copy);
    }
    transmit(res, in_port, last, packet);
}

fn drop_at(res: &mut Resources, in_port: PortId, packet: Packet) {
    res.stats.dropped += 1;
    match res.ports.get_mut(in_port) {
        Some(port) => port.device_mut().drop_packet(packet),
        None => packet.release(),
    }
}

pub type NativeConstructor = Box<dyn Fn() -> Box<dyn Pipeline>>;

pub enum Constructor {
    /// Rust pipeline.
    Native(NativeConstructor),
    /// Statically linked module using the C entry point.
    Abi(PipelineInitFn),
}

/// Resolves pipeline type names and instantiates pipelines.
pub struct PipelineLoader {
    builtins: ChainedHashTable<String, Constructor>,
    module_dir: PathBuf,
}

impl PipelineLoader {
    /// Loader with no built-ins; every type resolves to a shared object.
    pub fn empty(module_dir: impl Into<PathBuf>) -> Self {
        Self {
            builtins: ChainedHashTable::new(17, string_hash, string_eq),
            module_dir: module_dir.into(),
        }
    }

    /// Loader with the built-in pipelines registered.
    pub fn new(module_dir: impl Into<PathBuf>) -> Self {
        let mut loader = Self::empty(module_dir);
        loader.register(
            wire::NAME,
            Constructor::Native(Box::new(|| -> Box<dyn Pipeline> {
                Box::new(wire::Wire::default())
            })),
        );
        loader
    }

    /// Registers `name`, shadowing any earlier registration.
    pub fn register(&mut self, name: &str, ctor: Constructor) {
        self.builtins.insert(name.to_string(), ctor);
    }

    pub fn module_dir(&self) -> &Path {
        &self.module_dir
    }

    /// Shared object consulted for a type that is not built in.
    pub fn module_path(&self, kind: &str) -> PathBuf {
        if kind.contains('/') || kind.contains(".so") {
            PathBuf::from(kind)
        } else {
            self.module_dir.join(format!("lib{kind}.so"))
        }
    }

    /// Instantiates the pipeline named by `info.kind` and runs its `load`.
    pub fn load(&self, info: &DataplaneInfo<'_>) -> Result<Box<dyn Pipeline>> {
        let kind = info.kind;
        let mut pipeline: Box<dyn Pipeline> = match self.builtins.find(&kind.to_string()) {
            Some(Constructor::Native(ctor)) => ctor(),
            Some(Constructor::Abi(init)) => Box::new(ModulePipeline::from_init(kind, *init, None)?),
            None => {
                let path = self.module_path(kind);
                let lib = Library::open(&path).map_err(|reason| Error::BadPipeline {
                    name: kind.to_string(),
                    reason,
                })?;
                let init = lib.init_symbol().map_err(|reason| Error::BadPipelineModule {
                    name: kind.to_string(),
                    reason,
                })?;
                Box::new(ModulePipeline::from_init(kind, init, Some(lib))?)
            }
        };
        pipeline.load(info)?;
        tracing::info!(dataplane = info.name, pipeline = kind, "pipeline loaded");
        Ok(pipeline)
    }
}
