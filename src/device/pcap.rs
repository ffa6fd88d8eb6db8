//! libpcap device: live interfaces or capture files.

use pcap::{Active, Capture, Offline};

use super::{Device, DeviceOptions};
use crate::Result;
use crate::errors::Error;
use crate::packet::{Packet, PacketBuffer};

#[derive(Clone, Debug)]
pub struct PcapFlags {
    pub snaplen: i32,
    pub promiscuous: bool,
    /// Read timeout in milliseconds (live captures).
    pub timeout_ms: i32,
    pub immediate: bool,
    /// BPF filter, tcpdump syntax.
    pub filter: Option<String>,
}

impl Default for PcapFlags {
    fn default() -> Self {
        Self {
            snaplen: 65535,
            promiscuous: true,
            timeout_ms: 1,
            immediate: true,
            filter: None,
        }
    }
}

impl PcapFlags {
    fn from_options(options: &DeviceOptions) -> Result<Self> {
        let mut flags = Self::default();
        if let Some(v) = options.get("snaplen") {
            flags.snaplen = v
                .parse()
                .map_err(|_| Error::InvalidArgument(format!("snaplen={v}")))?;
        }
        if let Some(v) = options.get("promisc") {
            flags.promiscuous = v != "0" && v != "false";
        }
        flags.filter = options.get("filter").map(str::to_string);
        Ok(flags)
    }
}

enum Inner {
    Live(Capture<Active>),
    Offline(Capture<Offline>),
}

pub struct PcapDevice {
    source: String,
    inner: Option<Inner>,
}

fn is_capture_file(spec: &str) -> bool {
    spec.starts_with("file:") || spec.ends_with(".pcap") || spec.ends_with(".pcapng")
}

impl PcapDevice {
    /// Opens `file:<path>` (or a `*.pcap` path) offline, anything else as a
    /// live interface name.
    pub fn open(spec: &str, options: &DeviceOptions) -> Result<Self> {
        let flags = PcapFlags::from_options(options)?;
        let inner = if is_capture_file(spec) {
            let path = spec.strip_prefix("file:").unwrap_or(spec);
            Inner::Offline(Capture::from_file(path)?)
        } else {
            let mut inactive = Capture::from_device(spec)?
                .promisc(flags.promiscuous)
                .snaplen(flags.snaplen)
                .timeout(flags.timeout_ms);
            if flags.immediate {
                inactive = inactive.immediate_mode(true);
            }
            let mut cap = inactive.open()?.setnonblock()?;
            if let Some(expr) = flags.filter.as_deref() {
                cap.filter(expr, true)?;
            }
            Inner::Live(cap)
        };
        Ok(Self {
            source: spec.to_string(),
            inner: Some(inner),
        })
    }
}

fn to_packet(pkt: pcap::Packet<'_>) -> Packet {
    let ts = pkt.header.ts;
    let ns = (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_usec as u64) * 1_000;
    Packet::new(PacketBuffer::Heap(pkt.data.to_vec()), ns)
}

impl Device for PcapDevice {
    fn kind(&self) -> &'static str {
        "pcap"
    }

    fn describe(&self) -> String {
        format!("pcap {}", self.source)
    }

    fn recv(&mut self) -> Result<Option<Packet>> {
        let res = match self.inner.as_mut() {
            None => return Ok(None),
            Some(Inner::Live(cap)) => cap.next_packet().map(to_packet),
            Some(Inner::Offline(cap)) => cap.next_packet().map(to_packet),
        };
        match res {
            Ok(p) => Ok(Some(p)),
            Err(pcap::Error::TimeoutExpired | pcap::Error::NoMorePackets) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn send(&mut self, packet: Packet) -> Result<usize> {
        let len = packet.len();
        let res = match self.inner.as_mut() {
            Some(Inner::Live(cap)) => cap.sendpacket(packet.data()).map_err(Error::from),
            Some(Inner::Offline(_)) => Err(Error::Unsupported("send on a capture file")),
            None => Err(Error::Unsupported("send on a closed capture")),
        };
        packet.release();
        res.map(|()| len)
    }

    fn close(&mut self) {
        self.inner = None;
    }
}
