use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use softswitch::config::{Args, Config};
use softswitch::event_loop::EventLoop;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let config = Config::from(Args::parse());

    let filter = match &config.log_level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Setup a termination flag (triggered on Ctrl+C).
    let term = Arc::new(AtomicBool::new(false));
    {
        let term = term.clone();
        ctrlc::set_handler(move || {
            term.store(true, Ordering::SeqCst);
        })
        .context("Error setting Ctrl-C handler")?;
    }

    let socket = config.socket.clone();
    let mut ev = EventLoop::new(config)
        .with_context(|| format!("cannot listen on {}", socket.display()))?;
    ev.run(&term)?;
    Ok(())
}
