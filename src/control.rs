//! Management channel: request dispatch and the Unix-socket server.

use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::Result;
use crate::dataplane::{DataplaneId, DataplaneManager};
use crate::device::DeviceFactory;
use crate::errors::Error;
use crate::flow::MatchKind;
use crate::port::{Port, PortId, PortProperty};
use crate::proto::{
    self, DATAPLANE_STATE, DATAPLANE_STATE_DOWN, DATAPLANE_STATE_UP, DataplaneSummary,
    MESSAGE_LEN, PortSummary, Reply, ReplyBody, Request,
};

fn dataplane(mgr: &DataplaneManager, name: &str) -> Result<DataplaneId> {
    mgr.lookup(name).ok_or(Error::BadDataplane)
}

fn port_id(s: &str) -> Result<PortId> {
    s.trim()
        .parse::<u32>()
        .map(PortId::new)
        .map_err(|_| Error::InvalidArgument(format!("bad port id '{s}'")))
}

/// Answers one request frame.
///
/// Errors are reported in the reply. `Err` is returned only when the frame
/// itself cannot be trusted, in which case the connection must be closed.
pub fn dispatch(
    mgr: &mut DataplaneManager,
    factory: &mut DeviceFactory,
    frame: &[u8],
) -> Result<Reply> {
    let (_, kind) = proto::header(frame)?;
    let req = match Request::decode(frame) {
        Ok(req) => req,
        Err(e @ Error::Malformed(_)) => return Err(e),
        Err(e) => {
            tracing::debug!(kind, error = %e, "request refused");
            return Ok(Reply::error(kind, &e));
        }
    };
    let op = req.kind();
    tracing::debug!(?op, "request");
    Ok(match execute(mgr, factory, req) {
        Ok(body) => Reply::ok(op, body),
        Err(e) => {
            tracing::warn!(?op, error = %e, "request failed");
            Reply::error(kind, &e)
        }
    })
}

fn execute(
    mgr: &mut DataplaneManager,
    factory: &mut DeviceFactory,
    req: Request,
) -> Result<ReplyBody> {
    match req {
        Request::DataplaneAdd { name, kind } => {
            let id = mgr.create(&name, &kind)?;
            Ok(ReplyBody::DataplaneId(id.index() as u32))
        }
        Request::DataplaneDel { name } => {
            let id = dataplane(mgr, &name)?;
            mgr.delete(id)?;
            Ok(ReplyBody::Empty)
        }
        Request::DataplaneSet {
            name,
            property,
            value,
        } => {
            let id = dataplane(mgr, &name)?;
            if property != DATAPLANE_STATE {
                return Err(Error::InvalidArgument(format!(
                    "dataplane property {property}"
                )));
            }
            match value {
                DATAPLANE_STATE_UP => mgr.start(id)?,
                DATAPLANE_STATE_DOWN => mgr.stop(id)?,
                other => {
                    return Err(Error::InvalidArgument(format!("dataplane state {other}")));
                }
            }
            Ok(ReplyBody::Empty)
        }
        Request::DataplaneShow { name } => {
            let dp = mgr.get(dataplane(mgr, &name)?)?;
            Ok(ReplyBody::DataplaneShow(DataplaneSummary {
                id: dp.id().index() as u32,
                up: dp.is_up(),
                ports: dp.ports().len() as u32,
                tables: dp.tables().len() as u32,
                name: dp.name().to_string(),
                kind: dp.kind().to_string(),
            }))
        }
        Request::DataplaneStat { name } => {
            let dp = mgr.get(dataplane(mgr, &name)?)?;
            Ok(ReplyBody::DataplaneStat(dp.stats()))
        }
        Request::DataplaneList => Ok(ReplyBody::DataplaneList(
            mgr.names().into_iter().map(str::to_string).collect(),
        )),
        Request::DecoderGet | Request::DecoderSet => {
            Err(Error::Unsupported("decoder configuration"))
        }
        Request::TableSet => Err(Error::Unsupported("flow table properties")),
        Request::PortAdd {
            dataplane: dp_name,
            kind,
            device,
            options,
        } => {
            let id = dataplane(mgr, &dp_name)?;
            let pid = mgr.get_mut(id)?.allocate_port_id()?;
            let dev = factory.open(&kind, &device, &options)?;
            let pid = mgr.add_port(id, Port::new(pid, device, dev))?;
            Ok(ReplyBody::PortId(pid.raw()))
        }
        Request::PortDel {
            dataplane: dp_name,
            port,
        } => {
            let id = dataplane(mgr, &dp_name)?;
            let pid = port_id(&port)?;
            mgr.remove_port(id, pid)?;
            Ok(ReplyBody::PortId(pid.raw()))
        }
        Request::PortGet {
            dataplane: dp_name,
            port,
        } => {
            let id = dataplane(mgr, &dp_name)?;
            let port = mgr.get_port(id, port_id(&port)?)?;
            Ok(ReplyBody::PortGet(PortSummary {
                id: port.id().raw(),
                flags: port.flags.bits(),
                mac: port.address().to_array(),
                name: port.name().to_string(),
                device: port.device().kind().to_string(),
            }))
        }
        Request::PortSet {
            dataplane: dp_name,
            port,
            property,
            value,
        } => {
            let id = dataplane(mgr, &dp_name)?;
            let pid = port_id(&port)?;
            let property = PortProperty::try_from(property)?;
            let port = mgr
                .get_mut(id)?
                .get_port_mut(pid)
                .ok_or(Error::NoSuchPort(pid.raw()))?;
            port.flags.set(property, value != 0);
            tracing::info!(port = %pid, ?property, on = value != 0, "port flag changed");
            Ok(ReplyBody::Empty)
        }
        Request::PortList { dataplane: dp_name } => {
            let id = dataplane(mgr, &dp_name)?;
            let ids = mgr.list_ports(id)?;
            Ok(ReplyBody::PortList(ids.into_iter().map(PortId::raw).collect()))
        }
        Request::TableAdd {
            dataplane: dp_name,
            table,
            match_kind,
            size,
        } => {
            let id = dataplane(mgr, &dp_name)?;
            let kind = MatchKind::try_from(match_kind)?;
            mgr.get_mut(id)?
                .tables_mut()
                .add(table, kind, size as usize)?;
            Ok(ReplyBody::Empty)
        }
        Request::TableDel {
            dataplane: dp_name,
            table,
        } => {
            let id = dataplane(mgr, &dp_name)?;
            mgr.get_mut(id)?.tables_mut().remove(table)?;
            Ok(ReplyBody::Empty)
        }
        Request::TableGet {
            dataplane: dp_name,
            table,
        } => {
            let id = dataplane(mgr, &dp_name)?;
            let dp = mgr.get(id)?;
            let t = dp.tables().get(table).ok_or(Error::NoSuchTable(table))?;
            Ok(ReplyBody::TableGet {
                match_kind: t.match_kind() as u8,
                flows: t.len() as u32,
            })
        }
    }
}

/// Listens for management connections and serves one at a time.
pub struct ControlServer {
    listener: UnixListener,
    path: PathBuf,
    conn: Option<UnixStream>,
    frame_timeout: Duration,
}

impl ControlServer {
    /// Binds `path`, replacing a stale socket file.
    pub fn bind(path: &Path, frame_timeout: Duration) -> Result<Self> {
        match std::fs::remove_file(path) {
            Ok(()) => tracing::debug!(path = %path.display(), "removed stale socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let listener = UnixListener::bind(path)?;
        listener.set_nonblocking(true)?;
        tracing::info!(path = %path.display(), "control socket listening");
        Ok(Self {
            listener,
            path: path.to_path_buf(),
            conn: None,
            frame_timeout,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn listener_fd(&self) -> BorrowedFd<'_> {
        self.listener.as_fd()
    }

    pub fn connection_fd(&self) -> Option<BorrowedFd<'_>> {
        self.conn.as_ref().map(AsFd::as_fd)
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Accepts pending connections. While one is being served, newcomers
    /// are closed straight away.
    pub fn accept(&mut self) -> Result<()> {
        loop {
            let stream = match self.listener.accept() {
                Ok((stream, _)) => stream,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if self.conn.is_some() {
                tracing::warn!("management connection already open; refusing another");
                continue;
            }
            stream.set_nonblocking(false)?;
            stream.set_read_timeout(Some(self.frame_timeout))?;
            tracing::info!("management connection opened");
            self.conn = Some(stream);
        }
    }

    /// Reads one frame from the open connection and answers it. Any read,
    /// decode or write failure closes the connection.
    pub fn service(&mut self, mgr: &mut DataplaneManager, factory: &mut DeviceFactory) {
        let Some(stream) = self.conn.as_mut() else {
            return;
        };
        let mut frame = [0u8; MESSAGE_LEN];
        let outcome = match stream.read_exact(&mut frame) {
            Ok(()) => dispatch(mgr, factory, &frame).and_then(|reply| {
                stream.write_all(&reply.encode())?;
                Ok(())
            }),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = outcome {
            match &e {
                Error::Io(io) if io.kind() == io::ErrorKind::UnexpectedEof => {
                    tracing::info!("management connection closed");
                }
                _ => tracing::warn!(error = %e, "closing management connection"),
            }
            self.conn = None;
        }
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Blocking management client.
pub struct ControlClient {
    stream: UnixStream,
}

impl ControlClient {
    pub fn connect(path: &Path) -> Result<Self> {
        Ok(Self {
            stream: UnixStream::connect(path)?,
        })
    }

    pub fn send(&mut self, req: &Request) -> Result<()> {
        self.stream.write_all(&req.encode())?;
        Ok(())
    }

    pub fn recv(&mut self) -> Result<Reply> {
        let mut frame = [0u8; MESSAGE_LEN];
        self.stream.read_exact(&mut frame)?;
        Reply::decode(&frame)
    }

    pub fn stream(&mut self) -> &mut UnixStream {
        &mut self.stream
    }
}

#[cfg(test)]
mod tests {
    use std::net::UdpSocket;
    use std::time::Instant;

    use super::*;
    use crate::pipeline::PipelineLoader;
    use crate::proto::{MessageKind, REPLY, ResultCode};

    fn manager() -> (DataplaneManager, DeviceFactory) {
        (
            DataplaneManager::new(64, PipelineLoader::new("/nonexistent")),
            DeviceFactory::new(),
        )
    }

    fn call(mgr: &mut DataplaneManager, factory: &mut DeviceFactory, req: Request) -> Reply {
        dispatch(mgr, factory, &req.encode()).unwrap()
    }

    fn add(name: &str, kind: &str) -> Request {
        Request::DataplaneAdd {
            name: name.into(),
            kind: kind.into(),
        }
    }

    fn ring_port(dp: &str, ring: &str) -> Request {
        Request::PortAdd {
            dataplane: dp.into(),
            kind: "ring".into(),
            device: ring.into(),
            options: String::new(),
        }
    }

    #[test]
    fn dataplane_lifecycle() {
        let (mut mgr, mut f) = manager();
        let r = call(&mut mgr, &mut f, add("sw0", "wire"));
        assert_eq!(r.body, ReplyBody::DataplaneId(0));
        assert_eq!(r.kind, MessageKind::DataplaneAdd as u8);

        let r = call(&mut mgr, &mut f, add("sw0", "wire"));
        assert_eq!(r.result, ResultCode::DataplaneExists as i32);

        let r = call(&mut mgr, &mut f, add("sw1", "nope"));
        assert_eq!(r.result, ResultCode::BadPipeline as i32);

        let r = call(&mut mgr, &mut f, Request::DataplaneList);
        assert_eq!(r.body, ReplyBody::DataplaneList(vec!["sw0".into()]));

        let r = call(
            &mut mgr,
            &mut f,
            Request::DataplaneShow { name: "sw0".into() },
        );
        match r.body {
            ReplyBody::DataplaneShow(s) => {
                assert_eq!((s.id, s.up, s.ports), (0, false, 0));
                assert_eq!(s.kind, "wire");
            }
            other => panic!("unexpected {other:?}"),
        }

        let r = call(&mut mgr, &mut f, Request::DataplaneDel { name: "sw0".into() });
        assert!(r.is_success());
        let r = call(&mut mgr, &mut f, Request::DataplaneDel { name: "sw0".into() });
        assert_eq!(r.result, ResultCode::BadDataplane as i32);
    }

    #[test]
    fn bad_type_and_unknown_kind_get_replies() {
        let (mut mgr, mut f) = manager();
        let mut frame = Request::DataplaneList.encode();
        frame[0] = REPLY;
        let r = dispatch(&mut mgr, &mut f, &frame).unwrap();
        assert_eq!(r.result, ResultCode::BadRequest as i32);

        frame[0] = 0;
        frame[1] = 77;
        let r = dispatch(&mut mgr, &mut f, &frame).unwrap();
        assert_eq!(r.result, ResultCode::BadOperation as i32);
        assert_eq!(r.kind, 77);

        assert!(dispatch(&mut mgr, &mut f, &frame[..10]).is_err());
    }

    #[test]
    fn unsupported_kinds_fail() {
        let (mut mgr, mut f) = manager();
        for req in [Request::DecoderGet, Request::DecoderSet, Request::TableSet] {
            let r = call(&mut mgr, &mut f, req);
            assert_eq!(r.result, ResultCode::Failure as i32);
        }
    }

    #[test]
    fn half_connected_wire_reports_errno() {
        let (mut mgr, mut f) = manager();
        call(&mut mgr, &mut f, add("sw0", "wire"));
        let r = call(
            &mut mgr,
            &mut f,
            Request::DataplaneSet {
                name: "sw0".into(),
                property: DATAPLANE_STATE,
                value: DATAPLANE_STATE_UP,
            },
        );
        assert_eq!(r.result, -libc::ENOTCONN);
    }

    #[test]
    fn port_requests() {
        let (mut mgr, mut f) = manager();
        call(&mut mgr, &mut f, add("sw0", "wire"));
        let r = call(&mut mgr, &mut f, ring_port("sw0", "patch"));
        assert_eq!(r.body, ReplyBody::PortId(1));
        let r = call(&mut mgr, &mut f, ring_port("sw0", "patch"));
        assert_eq!(r.body, ReplyBody::PortId(2));
        // The wire is full: the pipeline refuses a third port.
        let r = call(&mut mgr, &mut f, ring_port("sw0", "extra"));
        assert_eq!(r.result, -libc::ENOSPC);
        // Unknown dataplane.
        let r = call(&mut mgr, &mut f, ring_port("sw9", "x"));
        assert_eq!(r.result, ResultCode::BadDataplane as i32);

        let r = call(
            &mut mgr,
            &mut f,
            Request::PortList {
                dataplane: "sw0".into(),
            },
        );
        assert_eq!(r.body, ReplyBody::PortList(vec![1, 2]));

        let r = call(
            &mut mgr,
            &mut f,
            Request::PortSet {
                dataplane: "sw0".into(),
                port: "2".into(),
                property: PortProperty::LinkDown as u8,
                value: 1,
            },
        );
        assert!(r.is_success());
        let r = call(
            &mut mgr,
            &mut f,
            Request::PortGet {
                dataplane: "sw0".into(),
                port: "2".into(),
            },
        );
        match r.body {
            ReplyBody::PortGet(p) => {
                assert_eq!(p.id, 2);
                assert_eq!(p.device, "ring");
                assert_eq!(p.name, "patch");
                assert_eq!(p.mac, [2, 0, 0, 0, 0, 2]);
                let flags = crate::port::PortFlags::from_bits(p.flags);
                assert!(flags.link_down);
            }
            other => panic!("unexpected {other:?}"),
        }

        let r = call(
            &mut mgr,
            &mut f,
            Request::PortDel {
                dataplane: "sw0".into(),
                port: "1".into(),
            },
        );
        assert_eq!(r.body, ReplyBody::PortId(1));
        let r = call(
            &mut mgr,
            &mut f,
            Request::PortDel {
                dataplane: "sw0".into(),
                port: "one".into(),
            },
        );
        assert_eq!(r.result, ResultCode::BadRequest as i32);
        let r = call(
            &mut mgr,
            &mut f,
            Request::PortGet {
                dataplane: "sw0".into(),
                port: "1".into(),
            },
        );
        assert_eq!(r.result, ResultCode::Failure as i32);
    }

    #[test]
    fn table_requests() {
        let (mut mgr, mut f) = manager();
        call(&mut mgr, &mut f, add("sw0", "wire"));
        let table_add = |table, match_kind| Request::TableAdd {
            dataplane: "sw0".into(),
            table,
            match_kind,
            size: 64,
        };
        assert!(call(&mut mgr, &mut f, table_add(0, 1)).is_success());
        assert!(!call(&mut mgr, &mut f, table_add(0, 1)).is_success());
        assert!(!call(&mut mgr, &mut f, table_add(1, 3)).is_success());
        assert!(!call(&mut mgr, &mut f, table_add(2, 9)).is_success());

        let r = call(
            &mut mgr,
            &mut f,
            Request::TableGet {
                dataplane: "sw0".into(),
                table: 0,
            },
        );
        assert_eq!(
            r.body,
            ReplyBody::TableGet {
                match_kind: 1,
                flows: 0
            }
        );
        let del = || Request::TableDel {
            dataplane: "sw0".into(),
            table: 0,
        };
        assert!(call(&mut mgr, &mut f, del()).is_success());
        assert!(!call(&mut mgr, &mut f, del()).is_success());
    }

    #[test]
    fn oversized_requests_are_refused() {
        let (mut mgr, mut f) = manager();
        call(&mut mgr, &mut f, add("sw0", "wire"));
        let r = call(
            &mut mgr,
            &mut f,
            Request::TableAdd {
                dataplane: "sw0".into(),
                table: 0,
                match_kind: MatchKind::Exact as u8,
                size: u32::MAX,
            },
        );
        assert_eq!(r.result, ResultCode::BadRequest as i32);

        let r = call(
            &mut mgr,
            &mut f,
            Request::PortAdd {
                dataplane: "sw0".into(),
                kind: "ring".into(),
                device: "huge".into(),
                options: "slots=4000000000".into(),
            },
        );
        assert_eq!(r.result, ResultCode::BadRequest as i32);

        let dp = mgr.get(mgr.lookup("sw0").unwrap()).unwrap();
        assert!(dp.ports().is_empty());
        assert!(dp.tables().is_empty());
        assert_eq!(f.parked().count(), 0);
    }

    #[test]
    fn refused_ring_port_does_not_leave_a_dead_partner() {
        let (mut mgr, mut f) = manager();
        call(&mut mgr, &mut f, add("sw0", "wire"));
        call(&mut mgr, &mut f, ring_port("sw0", "patch"));
        call(&mut mgr, &mut f, ring_port("sw0", "patch"));
        let r = call(&mut mgr, &mut f, ring_port("sw0", "host"));
        assert_eq!(r.result, -libc::ENOSPC);
        assert_eq!(f.parked().count(), 0);

        // Reopening the name starts a fresh pair.
        call(&mut mgr, &mut f, add("sw1", "wire"));
        let r = call(&mut mgr, &mut f, ring_port("sw1", "host"));
        assert_eq!(r.body, ReplyBody::PortId(1));
        assert_eq!(f.parked().collect::<Vec<_>>(), vec!["host"]);
        let mut far = f.open("ring", "host", "").unwrap();
        assert_eq!(f.parked().count(), 0);

        far.send(crate::packet::Packet::from_heap(b"ping".to_vec()))
            .unwrap();
        far.flush().unwrap();
        let id = mgr.lookup("sw1").unwrap();
        let port = mgr.get_mut(id).unwrap().get_port_mut(PortId::new(1)).unwrap();
        assert_eq!(port.device_mut().recv().unwrap().unwrap().data(), b"ping");
    }

    fn socket_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("ctl.sock")
    }

    #[test]
    fn serves_one_connection_at_a_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = socket_path(&dir);
        let (mut mgr, mut f) = manager();
        let mut server = ControlServer::bind(&path, Duration::from_secs(1)).unwrap();

        let mut first = ControlClient::connect(&path).unwrap();
        let mut second = ControlClient::connect(&path).unwrap();
        server.accept().unwrap();
        assert!(server.is_connected());

        // The second connection was closed by the server.
        let mut buf = [0u8; 1];
        assert_eq!(second.stream().read(&mut buf).unwrap(), 0);

        first.send(&add("sw0", "wire")).unwrap();
        server.service(&mut mgr, &mut f);
        let reply = first.recv().unwrap();
        assert_eq!(reply.body, ReplyBody::DataplaneId(0));

        drop(first);
        server.service(&mut mgr, &mut f);
        assert!(!server.is_connected());

        // A new client can now connect.
        let mut third = ControlClient::connect(&path).unwrap();
        server.accept().unwrap();
        third.send(&Request::DataplaneList).unwrap();
        server.service(&mut mgr, &mut f);
        assert_eq!(
            third.recv().unwrap().body,
            ReplyBody::DataplaneList(vec!["sw0".into()])
        );
    }

    #[test]
    fn truncated_frame_closes_the_connection() {
        let dir = tempfile::tempdir().unwrap();
        let path = socket_path(&dir);
        let (mut mgr, mut f) = manager();
        let mut server = ControlServer::bind(&path, Duration::from_millis(100)).unwrap();

        let mut client = ControlClient::connect(&path).unwrap();
        server.accept().unwrap();
        client.stream().write_all(&[0, 1, 2, 3]).unwrap();
        server.service(&mut mgr, &mut f);
        assert!(!server.is_connected());
        let mut buf = [0u8; 1];
        assert_eq!(client.stream().read(&mut buf).unwrap(), 0);
        assert!(mgr.is_empty());
    }

    #[test]
    fn rebinding_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = socket_path(&dir);
        let first = ControlServer::bind(&path, Duration::from_secs(1)).unwrap();
        std::mem::forget(first);
        let server = ControlServer::bind(&path, Duration::from_secs(1)).unwrap();
        assert_eq!(server.path(), path);
        drop(server);
        assert!(!path.exists());
    }

    fn free_udp_port() -> u16 {
        UdpSocket::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    #[test]
    fn wire_over_udp_through_the_control_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = socket_path(&dir);
        let (mut mgr, mut f) = manager();
        let mut server = ControlServer::bind(&path, Duration::from_secs(1)).unwrap();
        let mut client = ControlClient::connect(&path).unwrap();
        server.accept().unwrap();
        let mut request = |req: Request| {
            client.send(&req).unwrap();
            server.service(&mut mgr, &mut f);
            client.recv().unwrap()
        };

        let hosts = [
            UdpSocket::bind("127.0.0.1:0").unwrap(),
            UdpSocket::bind("127.0.0.1:0").unwrap(),
        ];
        let ports = [free_udp_port(), free_udp_port()];

        assert!(request(add("sw0", "wire")).is_success());
        for (host, port) in hosts.iter().zip(ports) {
            let r = request(Request::PortAdd {
                dataplane: "sw0".into(),
                kind: "udp".into(),
                device: format!("127.0.0.1:{port}"),
                options: format!("peer={}", host.local_addr().unwrap()),
            });
            assert!(r.is_success(), "port add failed: {}", r.result);
        }
        let r = request(Request::DataplaneSet {
            name: "sw0".into(),
            property: DATAPLANE_STATE,
            value: DATAPLANE_STATE_UP,
        });
        assert!(r.is_success());
        drop(request);

        hosts[0].send_to(b"hello", ("127.0.0.1", ports[0])).unwrap();
        hosts[1].set_nonblocking(true).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut buf = [0u8; 64];
        let n = loop {
            mgr.poll(32);
            match hosts[1].recv_from(&mut buf) {
                Ok((n, _)) => break n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    assert!(Instant::now() < deadline, "packet never arrived");
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(e) => panic!("recv failed: {e}"),
            }
        };
        assert_eq!(&buf[..n], b"hello");

        client.send(&Request::DataplaneStat { name: "sw0".into() }).unwrap();
        server.service(&mut mgr, &mut f);
        match client.recv().unwrap().body {
            ReplyBody::DataplaneStat(s) => {
                assert_eq!(s.rx_packets, 1);
                assert_eq!(s.tx_packets, 1);
                assert_eq!(s.tx_bytes, 5);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
