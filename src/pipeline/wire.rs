//! Two-port cable: whatever enters one port leaves through the other.

use super::{DataplaneInfo, Pipeline, egress};
use crate::Result;
use crate::dataplane::Resources;
use crate::errors::Error;
use crate::packet::{Arrival, Context, Packet};
use crate::port::{Port, PortId, ReservedPort};

pub const NAME: &str = "wire";

#[derive(Debug, Default)]
pub struct Wire {
    ends: [Option<PortId>; 2],
}

impl Wire {
    fn peer_of(&self, port: PortId) -> PortId {
        match self.ends {
            [Some(a), Some(b)] if port == a => b,
            [Some(a), Some(b)] if port == b => a,
            _ => ReservedPort::Drop.id(),
        }
    }
}

impl Pipeline for Wire {
    fn load(&mut self, dp: &DataplaneInfo<'_>) -> Result<()> {
        tracing::debug!(dataplane = dp.name, "wire ready");
        self.ends = [None, None];
        Ok(())
    }

    fn unload(&mut self) -> Result<()> {
        self.ends = [None, None];
        Ok(())
    }

    fn add_port(&mut self, port: &Port) -> Result<()> {
        let slot = self
            .ends
            .iter_mut()
            .find(|end| end.is_none())
            .ok_or(Error::Rejected {
                op: "add_port",
                code: -libc::ENOSPC,
            })?;
        *slot = Some(port.id());
        Ok(())
    }

    fn del_port(&mut self, port: &Port) -> Result<()> {
        let slot = self
            .ends
            .iter_mut()
            .find(|end| **end == Some(port.id()))
            .ok_or(Error::Rejected {
                op: "del_port",
                code: -libc::ENOENT,
            })?;
        *slot = None;
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.ends.iter().any(Option::is_none) {
            return Err(Error::Rejected {
                op: "start",
                code: -libc::ENOTCONN,
            });
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn insert(&mut self, res: &mut Resources, packet: Packet, arrival: Arrival) {
        let mut cx = Context::new(packet, arrival);
        cx.out_port = Some(self.peer_of(cx.in_port));
        egress(res, cx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testing::NullDevice;

    fn port(id: u32) -> Port {
        Port::new(PortId::new(id), format!("p{id}"), Box::new(NullDevice::default()))
    }

    #[test]
    fn holds_exactly_two_ports() {
        let mut w = Wire::default();
        w.add_port(&port(1)).unwrap();
        assert!(w.start().is_err());
        w.add_port(&port(2)).unwrap();
        assert!(matches!(
            w.add_port(&port(3)),
            Err(Error::Rejected { op: "add_port", .. })
        ));
        w.start().unwrap();
        assert!(w.del_port(&port(3)).is_err());
        w.del_port(&port(1)).unwrap();
        assert_eq!(w.peer_of(PortId::new(2)), ReservedPort::Drop.id());
        w.add_port(&port(4)).unwrap();
        assert_eq!(w.peer_of(PortId::new(2)), PortId::new(4));
        assert_eq!(w.peer_of(PortId::new(4)), PortId::new(2));
    }

    #[test]
    fn forwards_between_ends() {
        let a = NullDevice::default();
        let b = NullDevice::default();
        let mut res = Resources::default();
        let pa = Port::new(PortId::new(1), "a", Box::new(a.clone()));
        let pb = Port::new(PortId::new(2), "b", Box::new(b.clone()));
        let mut w = Wire::default();
        w.add_port(&pa).unwrap();
        w.add_port(&pb).unwrap();
        res.ports.insert(pa);
        res.ports.insert(pb);

        w.insert(&mut res, Packet::from_heap(b"ab".to_vec()), Arrival::on(PortId::new(1)));
        w.insert(&mut res, Packet::from_heap(b"ba".to_vec()), Arrival::on(PortId::new(2)));
        assert_eq!(b.sent.borrow().as_slice(), &[b"ab".to_vec()]);
        assert_eq!(a.sent.borrow().as_slice(), &[b"ba".to_vec()]);

        // A packet from a port the wire does not know is dropped.
        w.insert(&mut res, Packet::from_heap(vec![0]), Arrival::on(PortId::new(9)));
        assert_eq!(res.stats.dropped, 1);
    }
}
