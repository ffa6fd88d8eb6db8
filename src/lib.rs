pub mod buffer_pool;
pub mod config;
pub mod control;
pub mod dataplane;
pub mod device;
pub mod errors;
pub mod event_loop;
pub mod flow;
pub mod packet;
pub mod pipeline;
pub mod port;
pub mod proto;
pub mod util;

pub type Result<T> = std::result::Result<T, errors::Error>;
