//! The core service thread and its owning handle.
//!
//! [`Core::spawn`] starts one service thread that owns a
//! [`CoreState`](crate::core) outright. Federate handles talk to it
//! over a bounded request channel; an optional upstream [`Link`] ties
//! the core into a broker hierarchy. The thread loops over requests,
//! upstream frames, and a timeout tick until shutdown.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, never, select, Receiver, Sender};

use concord_broker::transport::Link;

use crate::config::{ConfigError, CoreConfig, FederateConfig};
use crate::core::{CoreRequest, CoreState};
use crate::federate::Federate;
use crate::metrics::CoreMetrics;

/// Idle wakeup interval; bounds how late a grant timeout can fire.
const TICK: Duration = Duration::from_millis(10);

/// Owning handle for a running core.
///
/// Dropping the handle shuts the service thread down; federates still
/// holding channel clones observe `ConnectionLost`.
pub struct Core {
    tx: Sender<CoreRequest>,
    thread: Option<JoinHandle<()>>,
    name: String,
}

impl Core {
    /// Spawn a standalone core with no broker above it.
    pub fn spawn(config: CoreConfig) -> Result<Self, ConfigError> {
        Self::start(config, None)
    }

    /// Spawn a core attached to a broker through `link`.
    pub fn spawn_with_upstream(config: CoreConfig, link: Link) -> Result<Self, ConfigError> {
        Self::start(config, Some(link))
    }

    fn start(config: CoreConfig, link: Option<Link>) -> Result<Self, ConfigError> {
        config.validate()?;
        let name = config.name.clone();
        let (tx, rx) = bounded(config.request_capacity);
        let thread = thread::Builder::new()
            .name(format!("concord-core-{name}"))
            .spawn(move || run(config, link, rx))
            .map_err(|_| ConfigError::CoreUnavailable)?;
        Ok(Self {
            tx,
            thread: Some(thread),
            name,
        })
    }

    /// Register a federate with this core and return its handle.
    pub fn federate(&self, config: FederateConfig) -> Result<Federate, ConfigError> {
        config.validate()?;
        let name = config.name.clone();
        let (reply, rx) = bounded(1);
        self.tx
            .send(CoreRequest::RegisterFederate { config, reply })
            .map_err(|_| ConfigError::CoreUnavailable)?;
        let id = rx.recv().map_err(|_| ConfigError::CoreUnavailable)??;
        Ok(Federate::new(id, name, self.tx.clone()))
    }

    /// Snapshot of the core's counters, or `None` if the service thread
    /// is gone.
    pub fn metrics(&self) -> Option<CoreMetrics> {
        let (reply, rx) = bounded(1);
        self.tx.send(CoreRequest::Metrics { reply }).ok()?;
        rx.recv().ok()
    }

    /// The core's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop the service thread and wait for it to exit.
    pub fn shutdown(&mut self) {
        let _ = self.tx.send(CoreRequest::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(config: CoreConfig, link: Option<Link>, rx: Receiver<CoreRequest>) {
    let (upstream_tx, mut upstream_rx) = match link {
        Some(link) => (Some(link.tx), link.rx),
        None => (None, never()),
    };
    let mut state = CoreState::new(config, upstream_tx);
    state.send_hello();
    let mut upstream_dead = false;
    loop {
        if upstream_dead {
            // Stop selecting on the dead link.
            upstream_rx = never();
            upstream_dead = false;
        }
        select! {
            recv(rx) -> req => match req {
                Ok(CoreRequest::Shutdown) | Err(_) => {
                    state.shutdown();
                    break;
                }
                Ok(req) => state.handle_request(req),
            },
            recv(upstream_rx) -> frame => match frame {
                Ok(bytes) => state.handle_frame(&bytes),
                Err(_) => {
                    state.upstream_lost();
                    upstream_dead = true;
                }
            },
            default(TICK) => {}
        }
        state.check_timeouts(Instant::now());
    }
}
