//! Start/stop lifecycle of the client worker
//!
//! The control thread owns a [`LifecycleController`]. Each start spawns one
//! worker thread that builds a client from the current configuration, runs
//! its event loop and tears everything down again. At most one worker
//! exists at a time; a new one can only be started once the previous one
//! has finished.
//!
//! Synchronization:
//! - `should_run` is an atomic flag, set before spawning and polled by the
//!   worker's event loop
//! - the worker's liveness lives under a mutex with a condition variable,
//!   which [`LifecycleController::await_stop`] waits on
//! - the client handle is published and revoked under its own mutex

mod worker;

use crate::config::ClientConfig;
use crate::config::settings::Capabilities;
use crate::engine::{Client, ClientEngine, CredentialVault};
use crate::objects::ObjectCatalog;
use crate::scheduler::MaintenanceTask;
use chrono::{DateTime, Local};
use log::{debug, info, warn};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    /// Spawned, not yet confirmed by the worker
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// How the last worker ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// Stopped before a client was made visible
    Cancelled,
    Stopped,
    Failed(String),
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("The client is still stopping")]
    StopInProgress,

    #[error("Failed to spawn client thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Everything a worker needs to build and run a client
pub struct WorkerContext {
    pub config: Arc<ClientConfig>,
    pub engine: Arc<dyn ClientEngine>,
    pub vault: Option<Arc<dyn CredentialVault>>,
    pub catalog: ObjectCatalog,
    /// Extra maintenance tasks added to every run
    pub plugins: Vec<Arc<dyn MaintenanceTask>>,
    pub capabilities: Capabilities,
    pub poll_interval: Duration,
    pub maintenance_interval: Duration,
    pub periodic_divisor: u64,
}

/// Client handle visible to the control thread
#[derive(Default)]
pub struct ClientSlot {
    client: Mutex<Option<Arc<dyn Client>>>,
}

impl ClientSlot {
    pub fn get(&self) -> Option<Arc<dyn Client>> {
        self.client.lock().unwrap().clone()
    }

    /// Publish `client` if `allowed` still holds while the slot is locked
    fn publish_if(&self, client: &Arc<dyn Client>, allowed: impl FnOnce() -> bool) -> bool {
        let mut slot = self.client.lock().unwrap();
        if !allowed() {
            return false;
        }
        *slot = Some(client.clone());
        true
    }

    fn revoke(&self) -> Option<Arc<dyn Client>> {
        self.client.lock().unwrap().take()
    }
}

#[derive(Debug)]
struct WorkerStatus {
    alive: bool,
    state: LifecycleState,
    last_exit: Option<WorkerExit>,
    started_at: Option<DateTime<Local>>,
}

struct Shared {
    should_run: AtomicBool,
    status: Mutex<WorkerStatus>,
    status_changed: Condvar,
    client: ClientSlot,
    ctx: WorkerContext,
}

impl Shared {
    fn should_run(&self) -> bool {
        self.should_run.load(Ordering::SeqCst)
    }

    /// Confirm the start; false if a stop already came in
    fn confirm_running(&self) -> bool {
        let mut status = self.status.lock().unwrap();
        if status.state != LifecycleState::Starting || !self.should_run() {
            return false;
        }
        status.state = LifecycleState::Running;
        info!("Client running");
        true
    }

    fn finish(&self, exit: WorkerExit) {
        self.should_run.store(false, Ordering::SeqCst);
        let mut status = self.status.lock().unwrap();
        status.alive = false;
        status.state = LifecycleState::Stopped;
        status.started_at = None;
        status.last_exit = Some(exit);
        self.status_changed.notify_all();
    }
}

/// Snapshot for `status` displays
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub state: LifecycleState,
    pub started_at: Option<DateTime<Local>>,
    pub last_exit: Option<WorkerExit>,
    pub endpoint: Option<String>,
}

pub struct LifecycleController {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl LifecycleController {
    pub fn new(ctx: WorkerContext) -> Self {
        Self {
            shared: Arc::new(Shared {
                should_run: AtomicBool::new(false),
                status: Mutex::new(WorkerStatus {
                    alive: false,
                    state: LifecycleState::Stopped,
                    last_exit: None,
                    started_at: None,
                }),
                status_changed: Condvar::new(),
                client: ClientSlot::default(),
                ctx,
            }),
            thread: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &Arc<ClientConfig> {
        &self.shared.ctx.config
    }

    /// Spawn a worker unless one is already starting or running
    ///
    /// Returns `Ok(false)` when there was nothing to do.
    pub fn request_start(&self) -> Result<bool, LifecycleError> {
        let mut thread_slot = self.thread.lock().unwrap();
        let mut status = self.shared.status.lock().unwrap();

        match status.state {
            LifecycleState::Starting | LifecycleState::Running => {
                debug!("Start requested while {}", status.state);
                return Ok(false);
            }
            LifecycleState::Stopping => return Err(LifecycleError::StopInProgress),
            LifecycleState::Stopped => {}
        }

        // A worker that ended on its own is reaped here
        if let Some(finished) = thread_slot.take() {
            if let Err(e) = finished.join() {
                warn!("Client thread panicked: {:?}", e);
            }
        }

        status.state = LifecycleState::Starting;
        status.alive = true;
        status.started_at = Some(Local::now());
        self.shared.should_run.store(true, Ordering::SeqCst);
        drop(status);

        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name("lwm2m-client".to_string())
            .spawn(move || worker::run(shared));

        match spawned {
            Ok(handle) => {
                *thread_slot = Some(handle);
                info!("Client starting");
                Ok(true)
            }
            Err(e) => {
                self.shared.should_run.store(false, Ordering::SeqCst);
                let mut status = self.shared.status.lock().unwrap();
                status.state = LifecycleState::Stopped;
                status.alive = false;
                status.started_at = None;
                Err(LifecycleError::Spawn(e))
            }
        }
    }

    /// Ask the worker to stop; does not wait for it
    ///
    /// Returns `false` when no worker was starting or running.
    pub fn request_stop(&self) -> bool {
        let mut status = self.shared.status.lock().unwrap();
        if !matches!(
            status.state,
            LifecycleState::Starting | LifecycleState::Running
        ) {
            return false;
        }
        self.shared.should_run.store(false, Ordering::SeqCst);
        status.state = LifecycleState::Stopping;
        drop(status);

        if let Some(client) = self.shared.client.get() {
            client.interrupt();
        }
        info!("Client stop requested");
        true
    }

    /// Block until the current worker has finished, then join it
    pub fn await_stop(&self) {
        let mut thread_slot = self.thread.lock().unwrap();
        {
            let status = self.shared.status.lock().unwrap();
            let _status = self
                .shared
                .status_changed
                .wait_while(status, |status| status.alive)
                .unwrap();
        }

        if let Some(handle) = thread_slot.take() {
            if let Err(e) = handle.join() {
                warn!("Client thread panicked: {:?}", e);
            }
            debug!("Client thread joined");
        }
    }

    /// Request a stop and wait for it
    pub fn stop(&self) {
        self.request_stop();
        self.await_stop();
    }

    /// The live client, if one is currently published
    pub fn get_client_handle(&self) -> Option<Arc<dyn Client>> {
        self.shared.client.get()
    }

    pub fn state(&self) -> LifecycleState {
        self.shared.status.lock().unwrap().state
    }

    pub fn last_exit(&self) -> Option<WorkerExit> {
        self.shared.status.lock().unwrap().last_exit.clone()
    }

    pub fn status(&self) -> StatusReport {
        let status = self.shared.status.lock().unwrap();
        StatusReport {
            state: status.state,
            started_at: status.started_at,
            last_exit: status.last_exit.clone(),
            endpoint: self
                .shared
                .client
                .get()
                .map(|client| client.endpoint_name().to_string()),
        }
    }
}

impl Drop for LifecycleController {
    fn drop(&mut self) {
        self.stop();
    }
}
