//! The daemon's single thread: management I/O and packet forwarding.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

use crate::Result;
use crate::config::Config;
use crate::control::ControlServer;
use crate::dataplane::DataplaneManager;
use crate::device::DeviceFactory;
use crate::pipeline::PipelineLoader;

fn timeout(d: Duration) -> PollTimeout {
    PollTimeout::from(d.as_millis().min(u16::MAX as u128) as u16)
}

pub struct EventLoop {
    config: Config,
    manager: DataplaneManager,
    factory: DeviceFactory,
    server: ControlServer,
}

impl EventLoop {
    /// Binds the management socket. Failing to bind is fatal for the daemon.
    pub fn new(config: Config) -> Result<Self> {
        let server = ControlServer::bind(&config.socket, config.frame_timeout)?;
        let manager = DataplaneManager::new(
            config.max_dataplanes,
            PipelineLoader::new(&config.module_dir),
        );
        Ok(Self {
            config,
            manager,
            factory: DeviceFactory::new(),
            server,
        })
    }

    pub fn manager(&self) -> &DataplaneManager {
        &self.manager
    }

    /// Runs until `stop` is set, then deletes every dataplane.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<()> {
        tracing::info!(
            socket = %self.config.socket.display(),
            slots = self.manager.capacity(),
            "event loop running"
        );
        while !stop.load(Ordering::SeqCst) {
            self.turn()?;
        }
        tracing::info!("shutting down");
        self.manager.shutdown();
        Ok(())
    }

    /// One pass: wait for readiness, serve management traffic, forward.
    pub fn turn(&mut self) -> Result<usize> {
        let (accept, service) = {
            let (device_fds, fdless) = self.manager.device_fds();
            let conn = self.server.connection_fd();
            let mut fds = vec![PollFd::new(self.server.listener_fd(), PollFlags::POLLIN)];
            if let Some(fd) = conn {
                fds.push(PollFd::new(fd, PollFlags::POLLIN));
            }
            fds.extend(
                device_fds
                    .into_iter()
                    .map(|fd| PollFd::new(fd, PollFlags::POLLIN)),
            );
            let wait = if fdless {
                PollTimeout::ZERO
            } else {
                timeout(self.config.poll_timeout)
            };
            match poll(&mut fds, wait) {
                Ok(_) => {}
                Err(Errno::EINTR) => return Ok(0),
                Err(e) => return Err(std::io::Error::from(e).into()),
            }
            let ready = |fd: &PollFd<'_>| {
                fd.revents().is_some_and(|r| {
                    r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
                })
            };
            (ready(&fds[0]), conn.is_some() && ready(&fds[1]))
        };
        if accept {
            self.server.accept()?;
        }
        if service {
            self.server.service(&mut self.manager, &mut self.factory);
        }
        Ok(self.manager.poll(self.config.burst))
    }
}
