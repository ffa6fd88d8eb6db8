use std::io;

use thiserror::Error;

use crate::proto::ResultCode;

#[derive(Error, Debug)]
pub enum Error {
    #[error("data plane '{0}' already exists")]
    DataplaneExists(String),
    #[error("too many data planes (limit {0})")]
    DataplaneLimitExceeded(usize),
    #[error("no such data plane")]
    BadDataplane,
    #[error("cannot load pipeline '{name}': {reason}")]
    BadPipeline { name: String, reason: String },
    #[error("cannot load pipeline symbols from '{name}': {reason}")]
    BadPipelineModule { name: String, reason: String },
    #[error("no such port {0}")]
    NoSuchPort(u32),
    #[error("port id space exhausted")]
    PortLimitExceeded,
    #[error("flow table {0} already exists")]
    TableExists(u32),
    #[error("no such flow table {0}")]
    NoSuchTable(u32),
    #[error("too many flow tables (limit {0})")]
    TableLimitExceeded(usize),
    #[error("pipeline rejected {op} (code {code})")]
    Rejected { op: &'static str, code: i32 },
    #[error("bad request type {0}")]
    BadRequest(u8),
    #[error("bad operation {0}")]
    BadOperation(u8),
    #[error("malformed message: {0}")]
    Malformed(&'static str),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    #[error("Can't allocate memory")]
    NoMemory,
    #[error("Too big packet: {0}")]
    TooBigPacket(usize),
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    #[cfg(feature = "pcap")]
    Pcap(#[from] pcap::Error),
}

impl Error {
    /// Wire result code reported to the management client.
    pub fn result_code(&self) -> i32 {
        let code = match self {
            Error::DataplaneExists(_) => ResultCode::DataplaneExists,
            Error::DataplaneLimitExceeded(_) => ResultCode::DataplaneLimitExceeded,
            Error::BadDataplane => ResultCode::BadDataplane,
            Error::BadPipeline { .. } => ResultCode::BadPipeline,
            Error::BadPipelineModule { .. } => ResultCode::BadPipelineModule,
            Error::BadRequest(_) | Error::Malformed(_) | Error::InvalidArgument(_) => {
                ResultCode::BadRequest
            }
            Error::BadOperation(_) => ResultCode::BadOperation,
            Error::Rejected { code, .. } if *code < 0 => return *code,
            Error::Io(e) => return e.raw_os_error().map_or(ResultCode::Failure as i32, |n| -n),
            _ => ResultCode::Failure,
        };
        code as i32
    }
}

/// Renders a result code: non-negative values come from the protocol table,
/// negative values are negated `errno` numbers.
pub fn strerror(code: i32) -> String {
    if code < 0 {
        return io::Error::from_raw_os_error(-code).to_string();
    }
    match ResultCode::try_from(code) {
        Ok(rc) => rc.description().to_string(),
        Err(_) => ResultCode::Failure.description().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_errors_to_result_codes() {
        assert_eq!(Error::DataplaneExists("sw0".into()).result_code(), 6);
        assert_eq!(Error::DataplaneLimitExceeded(64).result_code(), 7);
        assert_eq!(Error::BadDataplane.result_code(), 5);
        let e = Error::BadPipeline {
            name: "x".into(),
            reason: "nope".into(),
        };
        assert_eq!(e.result_code(), 8);
        let e = Error::BadPipelineModule {
            name: "x".into(),
            reason: "nope".into(),
        };
        assert_eq!(e.result_code(), 9);
        assert_eq!(Error::NoSuchPort(3).result_code(), 1);
        assert_eq!(Error::BadOperation(99).result_code(), 4);
        let e = Error::Rejected {
            op: "start",
            code: -libc::ENOTCONN,
        };
        assert_eq!(e.result_code(), -libc::ENOTCONN);
        let e = Error::Rejected { op: "load", code: 3 };
        assert_eq!(e.result_code(), 1);
    }

    #[test]
    fn io_errors_become_negative_errno() {
        let e = Error::Io(io::Error::from_raw_os_error(libc::EADDRINUSE));
        assert_eq!(e.result_code(), -libc::EADDRINUSE);
        let e = Error::Io(io::Error::other("no errno"));
        assert_eq!(e.result_code(), 1);
    }

    #[test]
    fn strerror_covers_both_ranges() {
        assert_eq!(strerror(0), "Success");
        assert_eq!(strerror(6), "Data plane already exists");
        assert_eq!(strerror(42), "Unknown error");
        assert!(!strerror(-libc::ENOENT).is_empty());
    }
}
