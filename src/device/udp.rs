use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::os::fd::{AsFd, BorrowedFd};

use super::{Device, DeviceOptions};
use crate::Result;
use crate::errors::Error;
use crate::packet::Packet;

/// Largest datagram accepted by `recv`.
pub const RECV_BUFFER_SIZE: usize = 4096;

/// Datagram socket device.
///
/// The device string is `[addr:]port`; a bare port binds every IPv4
/// address. Frames go to the `peer=<addr:port>` option when given, else to
/// the source of the most recently received datagram.
pub struct UdpDevice {
    socket: Option<UdpSocket>,
    local: SocketAddr,
    peer: Option<SocketAddr>,
    fixed_peer: bool,
    buf: Box<[u8]>,
}

fn resolve(spec: &str) -> Result<SocketAddr> {
    spec.to_socket_addrs()?
        .next()
        .ok_or_else(|| Error::InvalidArgument(format!("cannot resolve '{spec}'")))
}

impl UdpDevice {
    pub fn open(spec: &str, options: &DeviceOptions) -> Result<Self> {
        let bind_addr = match spec.parse::<u16>() {
            Ok(port) => SocketAddr::from(([0, 0, 0, 0], port)),
            Err(_) if spec.contains(':') => resolve(spec)?,
            Err(_) => return Err(Error::InvalidArgument(format!("udp port '{spec}'"))),
        };
        let socket = UdpSocket::bind(bind_addr)?;
        socket.set_nonblocking(true)?;
        let local = socket.local_addr()?;
        let peer = options.get("peer").map(resolve).transpose()?;
        tracing::debug!(%local, ?peer, "udp device bound");
        Ok(Self {
            socket: Some(socket),
            local,
            peer,
            fixed_peer: peer.is_some(),
            buf: vec![0u8; RECV_BUFFER_SIZE].into_boxed_slice(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn set_peer(&mut self, peer: SocketAddr) {
        self.peer = Some(peer);
        self.fixed_peer = true;
    }

    fn socket(&self) -> Result<&UdpSocket> {
        self.socket
            .as_ref()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected).into())
    }
}

impl Device for UdpDevice {
    fn kind(&self) -> &'static str {
        "udp"
    }

    fn describe(&self) -> String {
        match self.peer {
            Some(peer) => format!("udp {} -> {}", self.local, peer),
            None => format!("udp {}", self.local),
        }
    }

    fn recv(&mut self) -> Result<Option<Packet>> {
        let Some(socket) = self.socket.as_ref() else {
            return Ok(None);
        };
        match socket.recv_from(&mut self.buf) {
            Ok((n, src)) => {
                if !self.fixed_peer {
                    self.peer = Some(src);
                }
                Ok(Some(Packet::from_heap(self.buf[..n].to_vec())))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn send(&mut self, packet: Packet) -> Result<usize> {
        let res = match self.peer {
            Some(peer) => self
                .socket()
                .and_then(|s| s.send_to(packet.data(), peer).map_err(Error::from)),
            None => Err(io::Error::from(io::ErrorKind::NotConnected).into()),
        };
        packet.release();
        res
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            tracing::debug!(local = %self.local, "udp device closed");
        }
    }

    fn as_fd(&self) -> Option<BorrowedFd<'_>> {
        self.socket.as_ref().map(|s| s.as_fd())
    }
}
