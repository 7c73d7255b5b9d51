//! Loopback engine used by the binary and by tests
//!
//! Nothing goes on the wire. The simulated client keeps registered objects
//! and instances in memory, runs scheduled jobs from its event loop and can
//! be told to fail at each construction step.

use super::{
    Client, ClientEngine, CredentialVault, EngineConfig, Job, JobId, Scheduler, SecurityInstance,
    ServerInstance,
};
use crate::objects::DataObject;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};

/// Counters shared by an engine and all clients it created
#[derive(Debug, Default)]
pub struct EngineStats {
    creation_attempts: AtomicUsize,
    clients_created: AtomicUsize,
    clients_dropped: AtomicUsize,
    notifications: AtomicUsize,
    assistance_requests: AtomicUsize,
}

impl EngineStats {
    pub fn creation_attempts(&self) -> usize {
        self.creation_attempts.load(Ordering::SeqCst)
    }

    pub fn clients_created(&self) -> usize {
        self.clients_created.load(Ordering::SeqCst)
    }

    pub fn clients_dropped(&self) -> usize {
        self.clients_dropped.load(Ordering::SeqCst)
    }

    /// Clients created and not yet dropped
    pub fn live_clients(&self) -> usize {
        self.clients_created() - self.clients_dropped()
    }

    pub fn notifications(&self) -> usize {
        self.notifications.load(Ordering::SeqCst)
    }

    pub fn assistance_requests(&self) -> usize {
        self.assistance_requests.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct FailurePlan {
    create: bool,
    install: bool,
    security_instance: bool,
    /// Registration of this object id fails
    object: Option<u16>,
}

/// Engine handing out [`SimulatedClient`]s
#[derive(Default)]
pub struct SimulatedEngine {
    stats: Arc<EngineStats>,
    failures: Mutex<FailurePlan>,
    creation_gate: Mutex<Option<Receiver<()>>>,
    last_client: Mutex<Weak<SimulatedClient>>,
}

impl SimulatedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> Arc<EngineStats> {
        self.stats.clone()
    }

    pub fn fail_create(&self, fail: bool) {
        self.failures.lock().unwrap().create = fail;
    }

    pub fn fail_install(&self, fail: bool) {
        self.failures.lock().unwrap().install = fail;
    }

    pub fn fail_security_instance(&self, fail: bool) {
        self.failures.lock().unwrap().security_instance = fail;
    }

    pub fn fail_object(&self, oid: Option<u16>) {
        self.failures.lock().unwrap().object = oid;
    }

    /// Block the next `create_client` call until the returned sender is
    /// signalled or dropped
    pub fn hold_creation(&self) -> Sender<()> {
        let (tx, rx) = mpsc::channel();
        *self.creation_gate.lock().unwrap() = Some(rx);
        tx
    }

    /// Most recently created client, if it is still alive
    pub fn last_client(&self) -> Option<Arc<SimulatedClient>> {
        self.last_client.lock().unwrap().upgrade()
    }
}

impl ClientEngine for SimulatedEngine {
    fn create_client(&self, config: &EngineConfig) -> Result<Arc<dyn Client>> {
        self.stats.creation_attempts.fetch_add(1, Ordering::SeqCst);

        let gate = self.creation_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            debug!("Client creation held");
            // A dropped sender releases the gate as well
            let _ = gate.recv();
        }

        let failures = *self.failures.lock().unwrap();
        if failures.create {
            anyhow::bail!("Could not create client instance");
        }

        let client = Arc::new(SimulatedClient::new(config, failures, self.stats.clone()));
        *self.last_client.lock().unwrap() = Arc::downgrade(&client);
        self.stats.clients_created.fetch_add(1, Ordering::SeqCst);
        info!("Created client '{}'", config.endpoint_name);
        Ok(client)
    }
}

struct PendingJob {
    id: JobId,
    due: Instant,
    job: Job,
}

#[derive(Default)]
struct SchedulerState {
    jobs: Vec<PendingJob>,
    interrupted: bool,
}

/// Job queue drained by [`SimulatedClient::run_event_loop`]
#[derive(Default)]
pub struct SimScheduler {
    state: Mutex<SchedulerState>,
    wakeup: Condvar,
    next_id: AtomicU64,
}

impl SimScheduler {
    pub fn pending(&self) -> usize {
        self.state.lock().unwrap().jobs.len()
    }

    fn interrupt(&self) {
        self.state.lock().unwrap().interrupted = true;
        self.wakeup.notify_all();
    }

    fn take_interrupt(&self) -> bool {
        std::mem::take(&mut self.state.lock().unwrap().interrupted)
    }

    /// Remove and return due jobs, oldest deadline first
    fn take_due(&self) -> Vec<Job> {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();
        let (mut due, pending): (Vec<_>, Vec<_>) =
            state.jobs.drain(..).partition(|job| job.due <= now);
        state.jobs = pending;
        drop(state);

        due.sort_by_key(|job| (job.due, job.id));
        due.into_iter().map(|job| job.job).collect()
    }

    /// Sleep until the next deadline, an interrupt, a new job or `max_wait`
    fn wait(&self, max_wait: Duration) {
        let state = self.state.lock().unwrap();
        if state.interrupted {
            return;
        }
        let now = Instant::now();
        let timeout = state
            .jobs
            .iter()
            .map(|job| job.due.saturating_duration_since(now))
            .min()
            .map_or(max_wait, |next| next.min(max_wait));
        if timeout.is_zero() {
            return;
        }
        let _ = self.wakeup.wait_timeout(state, timeout).unwrap();
    }
}

impl Scheduler for SimScheduler {
    fn schedule(&self, delay: Duration, job: Job) -> JobId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.lock().unwrap().jobs.push(PendingJob {
            id,
            due: Instant::now() + delay,
            job,
        });
        self.wakeup.notify_all();
        id
    }

    fn cancel(&self, id: JobId) -> bool {
        let mut state = self.state.lock().unwrap();
        let before = state.jobs.len();
        state.jobs.retain(|job| job.id != id);
        state.jobs.len() != before
    }
}

/// Persistent part of the client
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineState {
    pub security: Vec<SecurityInstance>,
    pub servers: Vec<ServerInstance>,
}

pub struct SimulatedClient {
    endpoint: String,
    failures: FailurePlan,
    stats: Arc<EngineStats>,
    access_control: Mutex<Option<bool>>,
    objects: Mutex<Vec<Arc<dyn DataObject>>>,
    state: Mutex<EngineState>,
    changed: AtomicBool,
    scheduler: Arc<SimScheduler>,
}

impl SimulatedClient {
    fn new(config: &EngineConfig, failures: FailurePlan, stats: Arc<EngineStats>) -> Self {
        Self {
            endpoint: config.endpoint_name.clone(),
            failures,
            stats,
            access_control: Mutex::new(None),
            objects: Mutex::new(Vec::new()),
            state: Mutex::new(EngineState::default()),
            changed: AtomicBool::new(false),
            scheduler: Arc::new(SimScheduler::default()),
        }
    }

    /// Object ids in registration order
    pub fn object_ids(&self) -> Vec<u16> {
        self.objects.lock().unwrap().iter().map(|o| o.oid()).collect()
    }

    pub fn has_access_control(&self) -> bool {
        self.access_control.lock().unwrap().unwrap_or(false)
    }

    pub fn engine_state(&self) -> EngineState {
        self.state.lock().unwrap().clone()
    }

    pub fn pending_jobs(&self) -> usize {
        self.scheduler.pending()
    }

    /// Pretend the server rewrote part of the persistent state
    pub fn mark_changed(&self) {
        self.changed.store(true, Ordering::SeqCst);
    }

    fn core_installed(&self) -> Result<()> {
        if self.access_control.lock().unwrap().is_none() {
            anyhow::bail!("Security and Server objects are not installed");
        }
        Ok(())
    }
}

impl Client for SimulatedClient {
    fn endpoint_name(&self) -> &str {
        &self.endpoint
    }

    fn install_core_objects(&self, access_control: bool) -> Result<()> {
        if self.failures.install {
            anyhow::bail!("Could not install Security and Server objects");
        }
        *self.access_control.lock().unwrap() = Some(access_control);
        debug!(
            "Installed core objects (access control: {})",
            access_control
        );
        Ok(())
    }

    fn register_object(&self, object: Arc<dyn DataObject>) -> Result<()> {
        if self.failures.object == Some(object.oid()) {
            anyhow::bail!("Object /{} rejected by engine", object.oid());
        }
        let mut objects = self.objects.lock().unwrap();
        if objects.iter().any(|o| o.oid() == object.oid()) {
            anyhow::bail!("Object /{} is already registered", object.oid());
        }
        debug!("Registered object /{} ({})", object.oid(), object.name());
        objects.push(object);
        Ok(())
    }

    fn add_security_instance(&self, instance: &SecurityInstance) -> Result<u16> {
        self.core_installed()?;
        if self.failures.security_instance {
            anyhow::bail!("Security instance rejected");
        }
        let mut state = self.state.lock().unwrap();
        state.security.push(instance.clone());
        self.changed.store(true, Ordering::SeqCst);
        Ok((state.security.len() - 1) as u16)
    }

    fn add_server_instance(&self, instance: &ServerInstance) -> Result<u16> {
        self.core_installed()?;
        let mut state = self.state.lock().unwrap();
        state.servers.push(instance.clone());
        self.changed.store(true, Ordering::SeqCst);
        Ok((state.servers.len() - 1) as u16)
    }

    fn notify_changed(&self, oid: u16, rid: u16) {
        self.stats.notifications.fetch_add(1, Ordering::Relaxed);
        log::trace!("Resource /{}/0/{} changed", oid, rid);
    }

    fn send_assistance_request(&self, request_mask: u32) -> Result<()> {
        self.stats.assistance_requests.fetch_add(1, Ordering::Relaxed);
        debug!("Sent assistance request (mask {:#x})", request_mask);
        Ok(())
    }

    fn scheduler(&self) -> Arc<dyn Scheduler> {
        self.scheduler.clone()
    }

    fn run_event_loop(&self, max_wait: Duration, keep_running: &dyn Fn() -> bool) -> Result<()> {
        debug!("Event loop running for '{}'", self.endpoint);
        while keep_running() {
            if self.scheduler.take_interrupt() {
                debug!("Event loop interrupted");
                return Ok(());
            }
            for job in self.scheduler.take_due() {
                job();
            }
            self.scheduler.wait(max_wait);
        }
        // An interrupt aimed at this run must not end the next one
        self.scheduler.take_interrupt();
        Ok(())
    }

    fn interrupt(&self) {
        self.scheduler.interrupt();
    }

    fn state_changed(&self) -> bool {
        self.changed.load(Ordering::SeqCst)
    }

    fn save_state(&self) -> Result<Vec<u8>> {
        let state = self.state.lock().unwrap();
        let blob = serde_json::to_vec(&*state).context("Failed to serialize engine state")?;
        self.changed.store(false, Ordering::SeqCst);
        Ok(blob)
    }

    fn restore_state(&self, blob: &[u8]) -> Result<()> {
        self.core_installed()?;
        let restored: EngineState =
            serde_json::from_slice(blob).context("Persisted engine state is malformed")?;
        *self.state.lock().unwrap() = restored;
        self.changed.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for SimulatedClient {
    fn drop(&mut self) {
        self.stats.clients_dropped.fetch_add(1, Ordering::SeqCst);
        debug!("Deleted client '{}'", self.endpoint);
    }
}

/// In-memory credential vault
#[derive(Default)]
pub struct SimulatedVault {
    entries: Mutex<BTreeMap<String, (Vec<u8>, Vec<u8>)>>,
    fail_store: AtomicBool,
}

impl SimulatedVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_store(&self, fail: bool) {
        self.fail_store.store(fail, Ordering::SeqCst);
    }

    pub fn contains(&self, query: &str) -> bool {
        self.entries.lock().unwrap().contains_key(query)
    }

    /// Identity stored under `query`
    pub fn identity(&self, query: &str) -> Option<Vec<u8>> {
        self.entries
            .lock()
            .unwrap()
            .get(query)
            .map(|(identity, _)| identity.clone())
    }
}

impl CredentialVault for SimulatedVault {
    fn store_psk(&self, query: &str, identity: &[u8], key: &[u8]) -> Result<()> {
        if self.fail_store.load(Ordering::SeqCst) {
            anyhow::bail!("Credential storage rejected '{}'", query);
        }
        self.entries
            .lock()
            .unwrap()
            .insert(query.to_string(), (identity.to_vec(), key.to_vec()));
        Ok(())
    }

    fn remove_psk(&self, query: &str) -> Result<()> {
        if self.entries.lock().unwrap().remove(query).is_none() {
            warn!("No credentials stored under '{}'", query);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{DEFAULT_SSID, PskCredentials};
    use std::thread;

    fn client() -> Arc<dyn Client> {
        SimulatedEngine::new()
            .create_client(&EngineConfig::new("test-ep"))
            .unwrap()
    }

    #[test]
    fn test_jobs_run_in_deadline_order() {
        let client = client();
        let order = Arc::new(Mutex::new(Vec::new()));
        let scheduler = client.scheduler();

        for (delay, tag) in [(20, "late"), (0, "early")] {
            let order = order.clone();
            scheduler.schedule(
                Duration::from_millis(delay),
                Box::new(move || order.lock().unwrap().push(tag)),
            );
        }

        let deadline = Instant::now() + Duration::from_millis(200);
        client
            .run_event_loop(Duration::from_millis(5), &|| Instant::now() < deadline)
            .unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["early", "late"]);
    }

    #[test]
    fn test_cancelled_job_never_runs() {
        let client = client();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let id = client.scheduler().schedule(
            Duration::ZERO,
            Box::new(move || flag.store(true, Ordering::SeqCst)),
        );

        assert!(client.scheduler().cancel(id));
        assert!(!client.scheduler().cancel(id));

        let deadline = Instant::now() + Duration::from_millis(30);
        client
            .run_event_loop(Duration::from_millis(5), &|| Instant::now() < deadline)
            .unwrap();
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_interrupt_ends_event_loop() {
        let client = client();
        let remote = client.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.interrupt();
        });

        let started = Instant::now();
        client
            .run_event_loop(Duration::from_secs(10), &|| true)
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_state_roundtrip_clears_changed() {
        let client = client();
        client.install_core_objects(false).unwrap();
        client
            .add_security_instance(&SecurityInstance {
                ssid: DEFAULT_SSID,
                bootstrap_server: false,
                server_uri: "coap://localhost".to_string(),
                credentials: PskCredentials::Vault {
                    query: "1".to_string(),
                },
            })
            .unwrap();
        assert!(client.state_changed());

        let blob = client.save_state().unwrap();
        assert!(!client.state_changed());

        let other = self::client();
        other.install_core_objects(false).unwrap();
        other.restore_state(&blob).unwrap();
        assert_eq!(other.save_state().unwrap(), blob);
    }

    #[test]
    fn test_instances_need_core_objects() {
        let client = client();
        let result = client.add_server_instance(&ServerInstance {
            ssid: DEFAULT_SSID,
            lifetime: 50,
            binding: "U".to_string(),
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_creation_failure_and_stats() {
        let engine = SimulatedEngine::new();
        engine.fail_create(true);
        assert!(engine.create_client(&EngineConfig::new("ep")).is_err());

        engine.fail_create(false);
        let client = engine.create_client(&EngineConfig::new("ep")).unwrap();
        let stats = engine.stats();
        assert_eq!(stats.creation_attempts(), 2);
        assert_eq!(stats.live_clients(), 1);

        drop(client);
        assert_eq!(stats.live_clients(), 0);
        assert!(engine.last_client().is_none());
    }

    #[test]
    fn test_vault_store_and_remove() {
        let vault = SimulatedVault::new();
        vault.store_psk("1", b"ep", b"key").unwrap();
        assert_eq!(vault.identity("1").as_deref(), Some(&b"ep"[..]));

        vault.remove_psk("1").unwrap();
        assert!(!vault.contains("1"));

        vault.fail_store(true);
        assert!(vault.store_psk("1", b"ep", b"key").is_err());
    }
}
