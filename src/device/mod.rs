//! Packet I/O devices behind a uniform interface.
//!
//! Every port owns exactly one [`Device`]. The dataplane only ever talks to
//! devices through this trait; the concrete transport is chosen by the
//! port's type string when the port is added (see [`DeviceFactory::open`]).

use std::collections::HashMap;
use std::os::fd::BorrowedFd;

use crate::Result;
use crate::errors::Error;
use crate::packet::Packet;

#[cfg(feature = "pcap")]
pub mod pcap;
pub mod ring;
pub mod udp;

pub use ring::RingDevice;
pub use udp::UdpDevice;

/// A source and sink of packets.
///
/// All calls are non-blocking. `send` and `drop_packet` take ownership of the
/// packet; whichever is called, the packet's buffer is reclaimed through its
/// owner exactly once.
pub trait Device {
    /// Short transport name, e.g. `"udp"`.
    fn kind(&self) -> &'static str;

    /// Human-readable endpoint description.
    fn describe(&self) -> String {
        self.kind().to_string()
    }

    /// Next received packet, or `None` when nothing is pending.
    fn recv(&mut self) -> Result<Option<Packet>>;

    /// Transmits `packet`, returning the number of bytes handed to the
    /// transport.
    fn send(&mut self, packet: Packet) -> Result<usize>;

    fn drop_packet(&mut self, packet: Packet) {
        packet.release();
    }

    /// Pushes out anything staged by `send`.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {}

    /// Descriptor that becomes readable when packets arrive, if any.
    fn as_fd(&self) -> Option<BorrowedFd<'_>> {
        None
    }
}

/// `key=value` pairs separated by commas or whitespace.
#[derive(Debug, Default, Clone)]
pub struct DeviceOptions {
    values: HashMap<String, String>,
}

impl DeviceOptions {
    pub fn parse(s: &str) -> Result<Self> {
        let mut values = HashMap::new();
        for item in s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
        {
            let (k, v) = item
                .split_once('=')
                .ok_or_else(|| Error::InvalidArgument(format!("device option '{item}'")))?;
            values.insert(k.to_string(), v.to_string());
        }
        Ok(Self { values })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

/// Opens devices by type string.
///
/// Memory ring devices are created in connected pairs: the first open of a
/// given ring name returns one end and parks the other until a second port
/// opens the same name. A parked end whose partner has since been closed is
/// discarded, so the next open of that name starts a fresh pair.
#[derive(Default)]
pub struct DeviceFactory {
    parked_rings: HashMap<String, RingDevice>,
}

impl DeviceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, kind: &str, device: &str, options: &str) -> Result<Box<dyn Device>> {
        let options = DeviceOptions::parse(options)?;
        let dev: Box<dyn Device> = match kind {
            "udp" => Box::new(UdpDevice::open(device, &options)?),
            "ring" => Box::new(self.open_ring(device, &options)?),
            #[cfg(feature = "pcap")]
            "pcap" => Box::new(pcap::PcapDevice::open(device, &options)?),
            other => {
                return Err(Error::InvalidArgument(format!(
                    "unknown device type '{other}'"
                )));
            }
        };
        tracing::info!(kind, device, "device opened");
        Ok(dev)
    }

    fn open_ring(&mut self, name: &str, options: &DeviceOptions) -> Result<RingDevice> {
        if let Some(end) = self.parked_rings.remove(name) {
            if !end.peer_closed() {
                return Ok(end);
            }
            tracing::debug!(ring = name, "discarding parked end of a closed ring");
        }
        let config = ring::RingConfig::from_options(options)?;
        let (a, b) = RingDevice::pair(name, config);
        self.parked_rings.insert(name.to_string(), b);
        Ok(a)
    }

    /// Ring names with one end still unclaimed.
    pub fn parked(&self) -> impl Iterator<Item = &str> {
        self.parked_rings
            .iter()
            .filter(|(_, end)| !end.peer_closed())
            .map(|(name, _)| name.as_str())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_options() {
        let opts = DeviceOptions::parse("peer=127.0.0.1:9000, slots=64").unwrap();
        assert_eq!(opts.get("peer"), Some("127.0.0.1:9000"));
        assert_eq!(opts.get("slots"), Some("64"));
        assert_eq!(opts.get("missing"), None);
        assert!(DeviceOptions::parse("").unwrap().get("x").is_none());
        assert!(DeviceOptions::parse("novalue").is_err());
    }

    #[test]
    fn unknown_type_is_rejected() {
        let mut f = DeviceFactory::new();
        assert!(matches!(
            f.open("nadk", "eth0", ""),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn ring_names_pair_up() {
        let mut f = DeviceFactory::new();
        let mut a = f.open("ring", "patch0", "").unwrap();
        assert_eq!(f.parked().collect::<Vec<_>>(), vec!["patch0"]);
        let mut b = f.open("ring", "patch0", "").unwrap();
        assert_eq!(f.parked().count(), 0);

        a.send(Packet::from_heap(b"hello".to_vec())).unwrap();
        a.flush().unwrap();
        let got = b.recv().unwrap().unwrap();
        assert_eq!(got.data(), b"hello");
    }

    #[test]
    fn closed_ring_reopens_as_a_fresh_pair() {
        let mut f = DeviceFactory::new();
        let mut stale = f.open("ring", "host", "").unwrap();
        stale.close();
        drop(stale);
        assert_eq!(f.parked().count(), 0);

        let mut a = f.open("ring", "host", "").unwrap();
        assert_eq!(f.parked().collect::<Vec<_>>(), vec!["host"]);
        let mut b = f.open("ring", "host", "").unwrap();
        assert_eq!(f.parked().count(), 0);
        a.send(Packet::from_heap(b"fresh".to_vec())).unwrap();
        a.flush().unwrap();
        assert_eq!(b.recv().unwrap().unwrap().data(), b"fresh");
    }
}
