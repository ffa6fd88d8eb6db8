//! C entry points for pipeline modules.
//!
//! A module exports [`INIT_SYMBOL`] with the [`PipelineInitFn`] signature.
//! The host passes a zeroed [`PipelineVtable`]; the constructor sets
//! `abi_version` and every entry point, then returns 0. Entry points return
//! 0 on success and anything else to refuse the operation.
//!
//! `load` stores the module's private state through its first argument; the
//! host hands that pointer back to every later call and never looks inside.
//! For each packet the host calls `process` with a [`RawContext`] whose
//! `out_port` is 0 (undecided); the module writes a port id or one of the
//! reserved ids, and the host performs the send or drop.

use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::ptr;

use crate::Result;
use crate::dataplane::Resources;
use crate::errors::Error;
use crate::packet::{Arrival, Context, Packet};
use crate::pipeline::{DataplaneInfo, Pipeline, egress};
use crate::port::{Port, PortId, ReservedPort};

pub const ABI_VERSION: u32 = 1;
pub const INIT_SYMBOL: &CStr = c"softswitch_pipeline_init";

pub type PipelineInitFn = unsafe extern "C" fn(vtable: *mut PipelineVtable) -> c_int;

type LoadFn = unsafe extern "C" fn(state: *mut *mut c_void, dp: *const RawDataplane) -> c_int;
type StateFn = unsafe extern "C" fn(state: *mut c_void) -> c_int;
type PortFn = unsafe extern "C" fn(state: *mut c_void, port: *const RawPort) -> c_int;
type ProcessFn = unsafe extern "C" fn(state: *mut c_void, cx: *mut RawContext) -> c_int;

#[repr(C)]
pub struct RawDataplane {
    pub name: *const c_char,
    pub kind: *const c_char,
    pub key_size: usize,
}

#[repr(C)]
pub struct RawPort {
    pub id: u32,
    pub name: *const c_char,
}

#[repr(C)]
pub struct RawContext {
    pub data: *mut u8,
    pub len: usize,
    pub timestamp: u64,
    pub tunnel_id: u64,
    pub in_port: u32,
    pub in_phy_port: u32,
    pub out_port: u32,
    pub table_index: u32,
}

#[repr(C)]
#[derive(Default)]
pub struct PipelineVtable {
    pub abi_version: u32,
    pub load: Option<LoadFn>,
    pub unload: Option<StateFn>,
    pub add_port: Option<PortFn>,
    pub del_port: Option<PortFn>,
    pub start: Option<StateFn>,
    pub stop: Option<StateFn>,
    pub process: Option<ProcessFn>,
}

struct Entries {
    load: LoadFn,
    unload: StateFn,
    add_port: PortFn,
    del_port: PortFn,
    start: StateFn,
    stop: StateFn,
    process: ProcessFn,
}

/// A pipeline implemented by a C-ABI module.
pub struct ModulePipeline {
    name: String,
    entries: Entries,
    state: *mut c_void,
    loaded: bool,
    // Declared last: the code behind `entries` must outlive every call.
    _library: Option<super::Library>,
}

fn cstring(s: &str) -> Result<CString> {
    CString::new(s).map_err(|_| Error::InvalidArgument(format!("'{s}' contains a NUL byte")))
}

fn check(op: &'static str, rc: c_int) -> Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(Error::Rejected { op, code: rc })
    }
}

impl ModulePipeline {
    /// Runs the constructor and validates what it filled in.
    pub fn from_init(
        name: &str,
        init: PipelineInitFn,
        library: Option<super::Library>,
    ) -> Result<Self> {
        let bad = |reason: String| Error::BadPipelineModule {
            name: name.to_string(),
            reason,
        };
        let mut vt = PipelineVtable::default();
        let rc = unsafe { init(&mut vt) };
        if rc != 0 {
            return Err(bad(format!("constructor returned {rc}")));
        }
        if vt.abi_version != ABI_VERSION {
            return Err(bad(format!(
                "abi version {} (expected {ABI_VERSION})",
                vt.abi_version
            )));
        }
        let missing = |what: &str| bad(format!("missing entry point '{what}'"));
        let entries = Entries {
            load: vt.load.ok_or_else(|| missing("load"))?,
            unload: vt.unload.ok_or_else(|| missing("unload"))?,
            add_port: vt.add_port.ok_or_else(|| missing("add_port"))?,
            del_port: vt.del_port.ok_or_else(|| missing("del_port"))?,
            start: vt.start.ok_or_else(|| missing("start"))?,
            stop: vt.stop.ok_or_else(|| missing("stop"))?,
            process: vt.process.ok_or_else(|| missing("process"))?,
        };
        Ok(Self {
            name: name.to_string(),
            entries,
            state: ptr::null_mut(),
            loaded: false,
            _library: library,
        })
    }

    fn port_call(&self, op: &'static str, f: PortFn, port: &Port) -> Result<()> {
        let name = cstring(port.name())?;
        let raw = RawPort {
            id: port.id().raw(),
            name: name.as_ptr(),
        };
        check(op, unsafe { f(self.state, &raw) })
    }
}

impl Pipeline for ModulePipeline {
    fn load(&mut self, dp: &DataplaneInfo<'_>) -> Result<()> {
        let name = cstring(dp.name)?;
        let kind = cstring(dp.kind)?;
        let raw = RawDataplane {
            name: name.as_ptr(),
            kind: kind.as_ptr(),
            key_size: dp.key_size,
        };
        let mut state: *mut c_void = ptr::null_mut();
        check("load", unsafe { (self.entries.load)(&mut state, &raw) })?;
        self.state = state;
        self.loaded = true;
        Ok(())
    }

    fn unload(&mut self) -> Result<()> {
        if !self.loaded {
            return Ok(());
        }
        self.loaded = false;
        let state = std::mem::replace(&mut self.state, ptr::null_mut());
        check("unload", unsafe { (self.entries.unload)(state) })
    }

    fn add_port(&mut self, port: &Port) -> Result<()> {
        self.port_call("add_port", self.entries.add_port, port)
    }

    fn del_port(&mut self, port: &Port) -> Result<()> {
        self.port_call("del_port", self.entries.del_port, port)
    }

    fn start(&mut self) -> Result<()> {
        check("start", unsafe { (self.entries.start)(self.state) })
    }

    fn stop(&mut self) -> Result<()> {
        check("stop", unsafe { (self.entries.stop)(self.state) })
    }

    fn insert(&mut self, res: &mut Resources, packet: Packet, arrival: Arrival) {
        let mut cx = Context::new(packet, arrival);
        let timestamp = cx.packet.timestamp();
        let data = cx.packet.data_mut();
        let mut raw = RawContext {
            data: data.as_mut_ptr(),
            len: data.len(),
            timestamp,
            tunnel_id: cx.tunnel_id,
            in_port: cx.in_port.raw(),
            in_phy_port: cx.in_phy_port.raw(),
            out_port: 0,
            table_index: cx.table_index,
        };
        let rc = unsafe { (self.entries.process)(self.state, &mut raw) };
        if rc != 0 {
            tracing::trace!(pipeline = %self.name, rc, "module refused packet");
            cx.out_port = Some(ReservedPort::Drop.id());
        } else {
            cx.out_port = (raw.out_port != 0).then(|| PortId::new(raw.out_port));
            cx.table_index = raw.table_index;
        }
        egress(res, cx);
    }
}

impl Drop for ModulePipeline {
    fn drop(&mut self) {
        if let Err(e) = self.unload() {
            tracing::warn!(pipeline = %self.name, error = %e, "unload failed");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    pub static LOADS: AtomicUsize = AtomicUsize::new(0);
    pub static UNLOADS: AtomicUsize = AtomicUsize::new(0);

    /// Module that reflects every packet out of its ingress port and
    /// refuses a port named "reject".
    pub unsafe extern "C" fn reflect_init(vt: *mut PipelineVtable) -> c_int {
        unsafe extern "C" fn load(state: *mut *mut c_void, dp: *const RawDataplane) -> c_int {
            let key_size = unsafe { (*dp).key_size };
            let boxed = Box::new(key_size);
            unsafe { *state = Box::into_raw(boxed).cast() };
            LOADS.fetch_add(1, Ordering::SeqCst);
            0
        }
        unsafe extern "C" fn unload(state: *mut c_void) -> c_int {
            drop(unsafe { Box::from_raw(state.cast::<usize>()) });
            UNLOADS.fetch_add(1, Ordering::SeqCst);
            0
        }
        unsafe extern "C" fn add_port(_state: *mut c_void, port: *const RawPort) -> c_int {
            let name = unsafe { CStr::from_ptr((*port).name) };
            if name.to_bytes() == b"reject" { -libc::EPERM } else { 0 }
        }
        unsafe extern "C" fn ok_port(_state: *mut c_void, _port: *const RawPort) -> c_int {
            0
        }
        unsafe extern "C" fn ok(_state: *mut c_void) -> c_int {
            0
        }
        unsafe extern "C" fn process(_state: *mut c_void, cx: *mut RawContext) -> c_int {
            unsafe { (*cx).out_port = ReservedPort::InPort as u32 };
            0
        }
        let vt = unsafe { &mut *vt };
        vt.abi_version = ABI_VERSION;
        vt.load = Some(load);
        vt.unload = Some(unload);
        vt.add_port = Some(add_port);
        vt.del_port = Some(ok_port);
        vt.start = Some(ok);
        vt.stop = Some(ok);
        vt.process = Some(process);
        0
    }

    unsafe extern "C" fn incomplete_init(vt: *mut PipelineVtable) -> c_int {
        unsafe { (*vt).abi_version = ABI_VERSION };
        0
    }

    unsafe extern "C" fn failing_init(_vt: *mut PipelineVtable) -> c_int {
        -1
    }

    unsafe extern "C" fn future_init(vt: *mut PipelineVtable) -> c_int {
        unsafe { (*vt).abi_version = ABI_VERSION + 1 };
        0
    }

    #[test]
    fn constructor_problems_are_bad_module() {
        for init in [
            incomplete_init as PipelineInitFn,
            failing_init,
            future_init,
        ] {
            assert!(matches!(
                ModulePipeline::from_init("m", init, None),
                Err(Error::BadPipelineModule { .. })
            ));
        }
    }

    #[test]
    fn load_and_unload_are_paired() {
        let mut p = ModulePipeline::from_init("reflect", reflect_init, None).unwrap();
        let before = (LOADS.load(Ordering::SeqCst), UNLOADS.load(Ordering::SeqCst));
        let info = DataplaneInfo {
            name: "sw0",
            kind: "reflect",
            key_size: 8,
        };
        p.load(&info).unwrap();
        p.unload().unwrap();
        // A second unload, and the one in Drop, are no-ops.
        p.unload().unwrap();
        drop(p);
        let after = (LOADS.load(Ordering::SeqCst), UNLOADS.load(Ordering::SeqCst));
        assert!(after.0 > before.0);
        assert!(after.1 > before.1);
    }
}
