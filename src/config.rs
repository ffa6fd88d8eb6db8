//! Daemon settings.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::dataplane::DEFAULT_MAX_DATAPLANES;

pub const DEFAULT_SOCKET: &str = "/tmp/softswitch.sock";
pub const DEFAULT_MODULE_DIR: &str = "/usr/local/lib/softswitch";

/// Command line options.
#[derive(Parser, Debug)]
#[clap(author, version, about = "Software switch dataplane daemon", long_about = None)]
pub struct Args {
    /// Path of the management socket.
    #[clap(short, long, default_value = DEFAULT_SOCKET)]
    pub socket: PathBuf,

    /// Number of dataplane slots.
    #[clap(short, long, default_value_t = DEFAULT_MAX_DATAPLANES)]
    pub max_dataplanes: usize,

    /// Directory searched for `lib<type>.so` pipeline modules.
    #[clap(short = 'M', long, default_value = DEFAULT_MODULE_DIR)]
    pub module_dir: PathBuf,

    /// Longest wait for I/O readiness, in milliseconds.
    #[clap(long, default_value_t = 100)]
    pub poll_timeout_ms: u64,

    /// Packets received per port on each pass.
    #[clap(short, long, default_value_t = 32)]
    pub burst: usize,

    /// Time allowed for a management frame to arrive in full, in milliseconds.
    #[clap(long, default_value_t = 1000)]
    pub frame_timeout_ms: u64,

    /// Log filter (overrides RUST_LOG), e.g. "debug" or "softswitch=trace".
    #[clap(short, long)]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub socket: PathBuf,
    pub max_dataplanes: usize,
    pub module_dir: PathBuf,
    pub poll_timeout: Duration,
    pub burst: usize,
    pub frame_timeout: Duration,
    pub log_level: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket: PathBuf::from(DEFAULT_SOCKET),
            max_dataplanes: DEFAULT_MAX_DATAPLANES,
            module_dir: PathBuf::from(DEFAULT_MODULE_DIR),
            poll_timeout: Duration::from_millis(100),
            burst: 32,
            frame_timeout: Duration::from_millis(1000),
            log_level: None,
        }
    }
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            socket: args.socket,
            max_dataplanes: args.max_dataplanes.max(1),
            module_dir: args.module_dir,
            poll_timeout: Duration::from_millis(args.poll_timeout_ms),
            burst: args.burst.max(1),
            frame_timeout: Duration::from_millis(args.frame_timeout_ms.max(1)),
            log_level: args.log_level,
        }
    }
}
