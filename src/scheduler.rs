//! Recurring maintenance inside the worker
//!
//! [`RecurringTask`] re-arms a body on the client's own scheduler, so every
//! run happens on the worker thread inside the event loop. [`PeriodicJob`]
//! is the body: on each cycle it runs the frequent task group, every n-th
//! cycle the periodic group too, then flushes engine state when asked to.

use crate::engine::{Client, JobId, Scheduler};
use crate::objects::DataObject;
use crate::persistence::StatePersistence;
use anyhow::Result;
use log::{debug, error, trace, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

/// How often a maintenance task runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Every cycle
    Frequent,
    /// Every n-th cycle, starting with the first
    Periodic,
}

/// A unit of work run by the [`PeriodicJob`]
pub trait MaintenanceTask: Send + Sync {
    fn name(&self) -> &str;

    fn cadence(&self) -> Cadence;

    fn run(&self, client: &dyn Client) -> Result<()>;
}

/// Refreshes a group of data objects
pub struct ObjectUpdateTask {
    name: String,
    cadence: Cadence,
    objects: Vec<Arc<dyn DataObject>>,
}

impl ObjectUpdateTask {
    pub fn new(cadence: Cadence, objects: &[Arc<dyn DataObject>]) -> Self {
        let name = match cadence {
            Cadence::Frequent => "frequent object updates",
            Cadence::Periodic => "periodic object updates",
        };
        Self {
            name: name.to_string(),
            cadence,
            objects: objects.to_vec(),
        }
    }
}

impl MaintenanceTask for ObjectUpdateTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn cadence(&self) -> Cadence {
        self.cadence
    }

    fn run(&self, client: &dyn Client) -> Result<()> {
        // One broken object must not starve the others
        for object in &self.objects {
            if let Err(e) = object.update(client) {
                warn!("Failed to update /{}: {:#}", object.oid(), e);
            }
        }
        Ok(())
    }
}

/// Indicator showing the client is alive
pub trait StatusLed: Send + Sync {
    fn set(&self, on: bool);
}

/// LED that only logs its state
#[derive(Default)]
pub struct LoggedLed;

impl StatusLed for LoggedLed {
    fn set(&self, on: bool) {
        trace!("Status LED {}", if on { "on" } else { "off" });
    }
}

/// Blinks the status LED once per cycle
pub struct StatusLedTask {
    led: Arc<dyn StatusLed>,
    on: AtomicBool,
}

impl StatusLedTask {
    pub fn new(led: Arc<dyn StatusLed>) -> Self {
        Self {
            led,
            on: AtomicBool::new(false),
        }
    }
}

impl MaintenanceTask for StatusLedTask {
    fn name(&self) -> &str {
        "status LED"
    }

    fn cadence(&self) -> Cadence {
        Cadence::Frequent
    }

    fn run(&self, _client: &dyn Client) -> Result<()> {
        let on = !self.on.fetch_xor(true, Ordering::SeqCst);
        self.led.set(on);
        Ok(())
    }
}

/// Requests positioning assistance data from the server
pub struct LocationAssistTask {
    request_mask: u32,
}

impl LocationAssistTask {
    /// Almanac, ephemeris and approximate location
    pub const DEFAULT_REQUEST_MASK: u32 = 0b111;

    pub fn new(request_mask: u32) -> Self {
        Self { request_mask }
    }
}

impl Default for LocationAssistTask {
    fn default() -> Self {
        Self::new(Self::DEFAULT_REQUEST_MASK)
    }
}

impl MaintenanceTask for LocationAssistTask {
    fn name(&self) -> &str {
        "location assistance"
    }

    fn cadence(&self) -> Cadence {
        Cadence::Periodic
    }

    fn run(&self, client: &dyn Client) -> Result<()> {
        client.send_assistance_request(self.request_mask)
    }
}

/// The maintenance job of one client run
pub struct PeriodicJob {
    cycle: AtomicU64,
    divisor: u64,
    tasks: Vec<Arc<dyn MaintenanceTask>>,
    persistence: Option<StatePersistence>,
}

impl PeriodicJob {
    /// Run the periodic group on every `divisor`-th cycle
    pub fn new(divisor: u64) -> Self {
        Self {
            cycle: AtomicU64::new(0),
            divisor: divisor.max(1),
            tasks: Vec::new(),
            persistence: None,
        }
    }

    pub fn with_task(mut self, task: Arc<dyn MaintenanceTask>) -> Self {
        self.tasks.push(task);
        self
    }

    /// Flush engine state after every cycle in which it changed
    pub fn with_persistence(mut self, persistence: StatePersistence) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Number of completed cycles
    pub fn cycle(&self) -> u64 {
        self.cycle.load(Ordering::SeqCst)
    }

    pub fn tick(&self, client: &dyn Client) {
        let cycle = self.cycle.load(Ordering::SeqCst);
        let periodic = cycle % self.divisor == 0;
        trace!("Maintenance cycle {} (periodic: {})", cycle, periodic);

        self.run_group(client, Cadence::Frequent);
        if periodic {
            self.run_group(client, Cadence::Periodic);
        }

        if let Some(persistence) = &self.persistence {
            if let Err(e) = persistence.persist_if_required(client) {
                error!("Couldn't persist engine state: {:#}", e);
            }
        }

        self.cycle.fetch_add(1, Ordering::SeqCst);
    }

    fn run_group(&self, client: &dyn Client, cadence: Cadence) {
        for task in self.tasks.iter().filter(|t| t.cadence() == cadence) {
            if let Err(e) = task.run(client) {
                warn!("Maintenance task '{}' failed: {:#}", task.name(), e);
            }
        }
    }

    /// Arm this job on `client`'s scheduler
    ///
    /// The first cycle runs as soon as the event loop starts.
    pub fn arm(self: Arc<Self>, client: &Arc<dyn Client>, interval: Duration) -> RecurringTask {
        let weak: Weak<dyn Client> = Arc::downgrade(client);
        RecurringTask::start(client.scheduler(), interval, move || {
            if let Some(client) = weak.upgrade() {
                self.tick(client.as_ref());
            }
        })
    }
}

struct RecurringInner {
    scheduler: Arc<dyn Scheduler>,
    interval: Duration,
    pending: Mutex<Option<JobId>>,
    cancelled: AtomicBool,
    body: Box<dyn Fn() + Send + Sync>,
}

impl RecurringInner {
    fn arm(self: &Arc<Self>, delay: Duration) {
        let mut pending = self.pending.lock().unwrap();
        if self.cancelled.load(Ordering::SeqCst) {
            return;
        }
        let weak = Arc::downgrade(self);
        let id = self.scheduler.schedule(
            delay,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.fire();
                }
            }),
        );
        *pending = Some(id);
    }

    fn fire(self: &Arc<Self>) {
        if self.cancelled.load(Ordering::SeqCst) {
            return;
        }
        self.pending.lock().unwrap().take();
        (self.body)();
        self.arm(self.interval);
    }
}

/// Body re-armed every `interval` until cancelled or dropped
pub struct RecurringTask {
    inner: Arc<RecurringInner>,
}

impl RecurringTask {
    /// Schedule `body` to run immediately and then every `interval`
    pub fn start(
        scheduler: Arc<dyn Scheduler>,
        interval: Duration,
        body: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        let inner = Arc::new(RecurringInner {
            scheduler,
            interval,
            pending: Mutex::new(None),
            cancelled: AtomicBool::new(false),
            body: Box::new(body),
        });
        inner.arm(Duration::ZERO);
        Self { inner }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Stop re-arming and drop the pending run, if any
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(id) = self.inner.pending.lock().unwrap().take() {
            self.inner.scheduler.cancel(id);
        }
        debug!("Recurring task cancelled");
    }
}

impl Drop for RecurringTask {
    fn drop(&mut self) {
        self.cancel();
    }
}
