//! Management protocol frames.
//!
//! Every message is exactly [`MESSAGE_LEN`] bytes. A request carries its
//! type (always [`REQUEST`]) and kind in the first two bytes, followed by
//! the kind's arguments. A reply echoes the kind, carries a signed result at
//! offset 4 and the kind's result data from offset 8. Integers are
//! little-endian; strings are fixed `char[128]` fields, NUL-padded.

use bytes::{Buf, BufMut, BytesMut};

use crate::Result;
use crate::dataplane::DataplaneStats;
use crate::errors::Error;

pub const MESSAGE_LEN: usize = 1024;
pub const STRING_MAX_LEN: usize = 128;

pub const REQUEST: u8 = 0;
pub const REPLY: u8 = 1;

pub const REQUEST_HEADER_LEN: usize = 2;
pub const REPLY_HEADER_LEN: usize = 8;

/// Data plane property: administrative state.
pub const DATAPLANE_STATE: u8 = 1;
pub const DATAPLANE_STATE_DOWN: i32 = 0;
pub const DATAPLANE_STATE_UP: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    DataplaneAdd = 1,
    DataplaneDel = 2,
    DataplaneSet = 3,
    DataplaneShow = 4,
    DataplaneStat = 5,
    DataplaneList = 6,
    DecoderGet = 10,
    DecoderSet = 11,
    PortAdd = 20,
    PortDel = 21,
    PortGet = 22,
    PortSet = 23,
    PortList = 24,
    TableAdd = 31,
    TableDel = 32,
    TableGet = 33,
    TableSet = 34,
}

impl TryFrom<u8> for MessageKind {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self> {
        use MessageKind::*;
        Ok(match v {
            1 => DataplaneAdd,
            2 => DataplaneDel,
            3 => DataplaneSet,
            4 => DataplaneShow,
            5 => DataplaneStat,
            6 => DataplaneList,
            10 => DecoderGet,
            11 => DecoderSet,
            20 => PortAdd,
            21 => PortDel,
            22 => PortGet,
            23 => PortSet,
            24 => PortList,
            31 => TableAdd,
            32 => TableDel,
            33 => TableGet,
            34 => TableSet,
            other => return Err(Error::BadOperation(other)),
        })
    }
}

/// Non-negative reply results. Negative results are `-errno`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ResultCode {
    Success = 0,
    Failure = 1,
    BadRequest = 2,
    BadReply = 3,
    BadOperation = 4,
    BadDataplane = 5,
    DataplaneExists = 6,
    DataplaneLimitExceeded = 7,
    BadPipeline = 8,
    BadPipelineModule = 9,
}

impl ResultCode {
    pub fn description(self) -> &'static str {
        match self {
            ResultCode::Success => "Success",
            ResultCode::Failure => "Unknown error",
            ResultCode::BadRequest => "Bad request type",
            ResultCode::BadReply => "Bad reply type",
            ResultCode::BadOperation => "Bad operation",
            ResultCode::BadDataplane => "Bad data plane",
            ResultCode::DataplaneExists => "Data plane already exists",
            ResultCode::DataplaneLimitExceeded => "Too many data planes",
            ResultCode::BadPipeline => "Cannot load pipeline",
            ResultCode::BadPipelineModule => "Cannot load pipeline symbols",
        }
    }
}

impl TryFrom<i32> for ResultCode {
    type Error = i32;

    fn try_from(v: i32) -> std::result::Result<Self, i32> {
        use ResultCode::*;
        Ok(match v {
            0 => Success,
            1 => Failure,
            2 => BadRequest,
            3 => BadReply,
            4 => BadOperation,
            5 => BadDataplane,
            6 => DataplaneExists,
            7 => DataplaneLimitExceeded,
            8 => BadPipeline,
            9 => BadPipelineModule,
            other => return Err(other),
        })
    }
}

fn put_str(buf: &mut BytesMut, s: &str) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(STRING_MAX_LEN - 1);
    buf.put_slice(&bytes[..n]);
    buf.put_bytes(0, STRING_MAX_LEN - n);
}

fn get_str(buf: &mut &[u8]) -> Result<String> {
    if buf.remaining() < STRING_MAX_LEN {
        return Err(Error::Malformed("string field"));
    }
    let field = &buf[..STRING_MAX_LEN];
    let end = field.iter().position(|&b| b == 0).unwrap_or(STRING_MAX_LEN);
    let s = std::str::from_utf8(&field[..end])
        .map_err(|_| Error::InvalidArgument("string field is not UTF-8".into()))?
        .to_string();
    buf.advance(STRING_MAX_LEN);
    Ok(s)
}

fn need(buf: &[u8], n: usize, what: &'static str) -> Result<()> {
    if buf.len() < n {
        Err(Error::Malformed(what))
    } else {
        Ok(())
    }
}

/// Type and kind bytes of a frame, without interpreting the rest.
pub fn header(frame: &[u8]) -> Result<(u8, u8)> {
    if frame.len() != MESSAGE_LEN {
        return Err(Error::Malformed("frame length"));
    }
    Ok((frame[0], frame[1]))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    DataplaneAdd { name: String, kind: String },
    DataplaneDel { name: String },
    DataplaneSet { name: String, property: u8, value: i32 },
    DataplaneShow { name: String },
    DataplaneStat { name: String },
    DataplaneList,
    DecoderGet,
    DecoderSet,
    PortAdd {
        dataplane: String,
        kind: String,
        device: String,
        options: String,
    },
    PortDel { dataplane: String, port: String },
    PortGet { dataplane: String, port: String },
    PortSet {
        dataplane: String,
        port: String,
        property: u8,
        value: i32,
    },
    PortList { dataplane: String },
    TableAdd {
        dataplane: String,
        table: u32,
        match_kind: u8,
        size: u32,
    },
    TableDel { dataplane: String, table: u32 },
    TableGet { dataplane: String, table: u32 },
    TableSet,
}

impl Request {
    pub fn kind(&self) -> MessageKind {
        match self {
            Request::DataplaneAdd { .. } => MessageKind::DataplaneAdd,
            Request::DataplaneDel { .. } => MessageKind::DataplaneDel,
            Request::DataplaneSet { .. } => MessageKind::DataplaneSet,
            Request::DataplaneShow { .. } => MessageKind::DataplaneShow,
            Request::DataplaneStat { .. } => MessageKind::DataplaneStat,
            Request::DataplaneList => MessageKind::DataplaneList,
            Request::DecoderGet => MessageKind::DecoderGet,
            Request::DecoderSet => MessageKind::DecoderSet,
            Request::PortAdd { .. } => MessageKind::PortAdd,
            Request::PortDel { .. } => MessageKind::PortDel,
            Request::PortGet { .. } => MessageKind::PortGet,
            Request::PortSet { .. } => MessageKind::PortSet,
            Request::PortList { .. } => MessageKind::PortList,
            Request::TableAdd { .. } => MessageKind::TableAdd,
            Request::TableDel { .. } => MessageKind::TableDel,
            Request::TableGet { .. } => MessageKind::TableGet,
            Request::TableSet => MessageKind::TableSet,
        }
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(MESSAGE_LEN);
        buf.put_u8(REQUEST);
        buf.put_u8(self.kind() as u8);
        match self {
            Request::DataplaneAdd { name, kind } => {
                put_str(&mut buf, name);
                put_str(&mut buf, kind);
            }
            Request::DataplaneDel { name }
            | Request::DataplaneShow { name }
            | Request::DataplaneStat { name }
            | Request::PortList { dataplane: name } => put_str(&mut buf, name),
            Request::DataplaneSet {
                name,
                property,
                value,
            } => {
                put_str(&mut buf, name);
                buf.put_u8(*property);
                buf.put_bytes(0, 3);
                buf.put_i32_le(*value);
            }
            Request::PortAdd {
                dataplane,
                kind,
                device,
                options,
            } => {
                for s in [dataplane, kind, device, options] {
                    put_str(&mut buf, s);
                }
            }
            Request::PortDel { dataplane, port } | Request::PortGet { dataplane, port } => {
                put_str(&mut buf, dataplane);
                put_str(&mut buf, port);
            }
            Request::PortSet {
                dataplane,
                port,
                property,
                value,
            } => {
                put_str(&mut buf, dataplane);
                put_str(&mut buf, port);
                buf.put_u8(*property);
                buf.put_bytes(0, 3);
                buf.put_i32_le(*value);
            }
            Request::TableAdd {
                dataplane,
                table,
                match_kind,
                size,
            } => {
                put_str(&mut buf, dataplane);
                buf.put_u32_le(*table);
                buf.put_u8(*match_kind);
                buf.put_bytes(0, 3);
                buf.put_u32_le(*size);
            }
            Request::TableDel { dataplane, table } | Request::TableGet { dataplane, table } => {
                put_str(&mut buf, dataplane);
                buf.put_u32_le(*table);
            }
            Request::DataplaneList
            | Request::DecoderGet
            | Request::DecoderSet
            | Request::TableSet => {}
        }
        buf.resize(MESSAGE_LEN, 0);
        buf
    }

    /// Decodes a full frame. A wrong type yields `BadRequest`, an unknown
    /// kind `BadOperation` and a frame of the wrong size `Malformed`.
    pub fn decode(frame: &[u8]) -> Result<Self> {
        let (ty, kind) = header(frame)?;
        if ty != REQUEST {
            return Err(Error::BadRequest(ty));
        }
        let kind = MessageKind::try_from(kind)?;
        let mut buf = &frame[REQUEST_HEADER_LEN..];
        let b = &mut buf;
        Ok(match kind {
            MessageKind::DataplaneAdd => Request::DataplaneAdd {
                name: get_str(b)?,
                kind: get_str(b)?,
            },
            MessageKind::DataplaneDel => Request::DataplaneDel { name: get_str(b)? },
            MessageKind::DataplaneSet => {
                let name = get_str(b)?;
                need(b, 8, "dataplane property")?;
                let property = b.get_u8();
                b.advance(3);
                Request::DataplaneSet {
                    name,
                    property,
                    value: b.get_i32_le(),
                }
            }
            MessageKind::DataplaneShow => Request::DataplaneShow { name: get_str(b)? },
            MessageKind::DataplaneStat => Request::DataplaneStat { name: get_str(b)? },
            MessageKind::DataplaneList => Request::DataplaneList,
            MessageKind::DecoderGet => Request::DecoderGet,
            MessageKind::DecoderSet => Request::DecoderSet,
            MessageKind::PortAdd => Request::PortAdd {
                dataplane: get_str(b)?,
                kind: get_str(b)?,
                device: get_str(b)?,
                options: get_str(b)?,
            },
            MessageKind::PortDel => Request::PortDel {
                dataplane: get_str(b)?,
                port: get_str(b)?,
            },
            MessageKind::PortGet => Request::PortGet {
                dataplane: get_str(b)?,
                port: get_str(b)?,
            },
            MessageKind::PortSet => {
                let dataplane = get_str(b)?;
                let port = get_str(b)?;
                need(b, 8, "port property")?;
                let property = b.get_u8();
                b.advance(3);
                Request::PortSet {
                    dataplane,
                    port,
                    property,
                    value: b.get_i32_le(),
                }
            }
            MessageKind::PortList => Request::PortList {
                dataplane: get_str(b)?,
            },
            MessageKind::TableAdd => {
                let dataplane = get_str(b)?;
                need(b, 12, "table arguments")?;
                let table = b.get_u32_le();
                let match_kind = b.get_u8();
                b.advance(3);
                Request::TableAdd {
                    dataplane,
                    table,
                    match_kind,
                    size: b.get_u32_le(),
                }
            }
            MessageKind::TableDel => {
                let dataplane = get_str(b)?;
                need(b, 4, "table index")?;
                Request::TableDel {
                    dataplane,
                    table: b.get_u32_le(),
                }
            }
            MessageKind::TableGet => {
                let dataplane = get_str(b)?;
                need(b, 4, "table index")?;
                Request::TableGet {
                    dataplane,
                    table: b.get_u32_le(),
                }
            }
            MessageKind::TableSet => Request::TableSet,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataplaneSummary {
    pub id: u32,
    pub up: bool,
    pub ports: u32,
    pub tables: u32,
    pub name: String,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSummary {
    pub id: u32,
    pub flags: u8,
    pub mac: [u8; 6],
    pub name: String,
    pub device: String,
}

/// Result data of a successful reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyBody {
    Empty,
    DataplaneId(u32),
    DataplaneShow(DataplaneSummary),
    DataplaneStat(DataplaneStats),
    DataplaneList(Vec<String>),
    PortId(u32),
    PortGet(PortSummary),
    PortList(Vec<u32>),
    TableGet { match_kind: u8, flows: u32 },
}

const REPLY_DATA_LEN: usize = MESSAGE_LEN - REPLY_HEADER_LEN;

impl ReplyBody {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            ReplyBody::Empty => {}
            ReplyBody::DataplaneId(id) | ReplyBody::PortId(id) => buf.put_u32_le(*id),
            ReplyBody::DataplaneShow(s) => {
                buf.put_u32_le(s.id);
                buf.put_u8(s.up as u8);
                buf.put_bytes(0, 3);
                buf.put_u32_le(s.ports);
                buf.put_u32_le(s.tables);
                put_str(buf, &s.name);
                put_str(buf, &s.kind);
            }
            ReplyBody::DataplaneStat(s) => {
                for v in [s.rx_packets, s.tx_packets, s.tx_bytes, s.dropped, s.tx_errors] {
                    buf.put_u64_le(v);
                }
            }
            ReplyBody::DataplaneList(names) => {
                // Names that do not fit are left out of the count.
                let mut packed = BytesMut::new();
                let mut count = 0u32;
                for name in names {
                    let n = name.len().min(STRING_MAX_LEN - 1);
                    if 4 + packed.len() + n + 1 > REPLY_DATA_LEN {
                        break;
                    }
                    packed.put_slice(&name.as_bytes()[..n]);
                    packed.put_u8(0);
                    count += 1;
                }
                buf.put_u32_le(count);
                buf.put_slice(&packed);
            }
            ReplyBody::PortGet(p) => {
                buf.put_u32_le(p.id);
                buf.put_u8(p.flags);
                buf.put_u8(0);
                buf.put_slice(&p.mac);
                buf.put_bytes(0, 4);
                put_str(buf, &p.name);
                put_str(buf, &p.device);
            }
            ReplyBody::PortList(ids) => {
                let fit = ids.len().min((REPLY_DATA_LEN - 4) / 4);
                buf.put_u32_le(fit as u32);
                for id in &ids[..fit] {
                    buf.put_u32_le(*id);
                }
            }
            ReplyBody::TableGet { match_kind, flows } => {
                buf.put_u8(*match_kind);
                buf.put_bytes(0, 3);
                buf.put_u32_le(*flows);
            }
        }
    }

    fn decode(kind: MessageKind, b: &mut &[u8]) -> Result<Self> {
        Ok(match kind {
            MessageKind::DataplaneAdd => ReplyBody::DataplaneId(b.get_u32_le()),
            MessageKind::PortAdd | MessageKind::PortDel => ReplyBody::PortId(b.get_u32_le()),
            MessageKind::DataplaneShow => {
                let id = b.get_u32_le();
                let up = b.get_u8() != 0;
                b.advance(3);
                let ports = b.get_u32_le();
                let tables = b.get_u32_le();
                ReplyBody::DataplaneShow(DataplaneSummary {
                    id,
                    up,
                    ports,
                    tables,
                    name: get_str(b)?,
                    kind: get_str(b)?,
                })
            }
            MessageKind::DataplaneStat => ReplyBody::DataplaneStat(DataplaneStats {
                rx_packets: b.get_u64_le(),
                tx_packets: b.get_u64_le(),
                tx_bytes: b.get_u64_le(),
                dropped: b.get_u64_le(),
                tx_errors: b.get_u64_le(),
            }),
            MessageKind::DataplaneList => {
                let count = b.get_u32_le();
                let mut names = Vec::new();
                for _ in 0..count {
                    let end = b
                        .iter()
                        .position(|&c| c == 0)
                        .ok_or(Error::Malformed("unterminated name"))?;
                    let name = std::str::from_utf8(&b[..end])
                        .map_err(|_| Error::Malformed("name is not UTF-8"))?;
                    names.push(name.to_string());
                    b.advance(end + 1);
                }
                ReplyBody::DataplaneList(names)
            }
            MessageKind::PortGet => {
                let id = b.get_u32_le();
                let flags = b.get_u8();
                b.advance(1);
                let mut mac = [0u8; 6];
                b.copy_to_slice(&mut mac);
                b.advance(4);
                ReplyBody::PortGet(PortSummary {
                    id,
                    flags,
                    mac,
                    name: get_str(b)?,
                    device: get_str(b)?,
                })
            }
            MessageKind::PortList => {
                let count = b.get_u32_le() as usize;
                need(b, count * 4, "port list")?;
                ReplyBody::PortList((0..count).map(|_| b.get_u32_le()).collect())
            }
            MessageKind::TableGet => {
                let match_kind = b.get_u8();
                b.advance(3);
                ReplyBody::TableGet {
                    match_kind,
                    flows: b.get_u32_le(),
                }
            }
            _ => ReplyBody::Empty,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Raw kind byte of the request being answered.
    pub kind: u8,
    pub result: i32,
    pub body: ReplyBody,
}

impl Reply {
    pub fn ok(kind: MessageKind, body: ReplyBody) -> Self {
        Self {
            kind: kind as u8,
            result: ResultCode::Success as i32,
            body,
        }
    }

    pub fn error(kind: u8, err: &Error) -> Self {
        Self {
            kind,
            result: err.result_code(),
            body: ReplyBody::Empty,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result == ResultCode::Success as i32
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(MESSAGE_LEN);
        buf.put_u8(REPLY);
        buf.put_u8(self.kind);
        buf.put_bytes(0, 2);
        buf.put_i32_le(self.result);
        self.body.encode(&mut buf);
        buf.resize(MESSAGE_LEN, 0);
        buf
    }

    /// Decodes a full reply frame; result data is only read on success.
    pub fn decode(frame: &[u8]) -> Result<Self> {
        let (ty, kind) = header(frame)?;
        if ty != REPLY {
            return Err(Error::Malformed("not a reply"));
        }
        let mut b = &frame[4..];
        let result = b.get_i32_le();
        let body = match MessageKind::try_from(kind) {
            Ok(k) if result == ResultCode::Success as i32 => ReplyBody::decode(k, &mut b)?,
            _ => ReplyBody::Empty,
        };
        Ok(Self { kind, result, body })
    }
}
