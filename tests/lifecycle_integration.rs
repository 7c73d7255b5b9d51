use anyhow::Result;
use lwm2m_agent::config::options::keys;
use lwm2m_agent::config::settings::AppSettings;
use lwm2m_agent::config::store::{MemoryStore, SettingsStore};
use lwm2m_agent::engine::simulated::{SimulatedEngine, SimulatedVault};
use lwm2m_agent::engine::{Client, PSK_QUERY, PskCredentials};
use lwm2m_agent::scheduler::{Cadence, MaintenanceTask};
use lwm2m_agent::{AppContext, LifecycleError, LifecycleState, WorkerExit};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    context: AppContext,
    engine: Arc<SimulatedEngine>,
    vault: Arc<SimulatedVault>,
    store: Arc<MemoryStore>,
}

fn fast_settings() -> AppSettings {
    AppSettings {
        poll_interval_ms: 20,
        maintenance_interval_ms: 10,
        ..AppSettings::default()
    }
}

fn harness_with(plugins: Vec<Arc<dyn MaintenanceTask>>) -> Harness {
    let engine = Arc::new(SimulatedEngine::new());
    let vault = Arc::new(SimulatedVault::new());
    let store = Arc::new(MemoryStore::new());

    let mut builder = AppContext::builder(fast_settings())
        .store(store.clone())
        .engine(engine.clone())
        .vault(vault.clone())
        .device_id("test");
    for plugin in plugins {
        builder = builder.plugin(plugin);
    }

    Harness {
        context: builder.build().unwrap(),
        engine,
        vault,
        store,
    }
}

fn harness() -> Harness {
    harness_with(Vec::new())
}

fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

struct CountingTask {
    cadence: Cadence,
    runs: AtomicUsize,
}

impl CountingTask {
    fn new(cadence: Cadence) -> Arc<Self> {
        Arc::new(Self {
            cadence,
            runs: AtomicUsize::new(0),
        })
    }

    fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl MaintenanceTask for CountingTask {
    fn name(&self) -> &str {
        "counting"
    }

    fn cadence(&self) -> Cadence {
        self.cadence
    }

    fn run(&self, _client: &dyn Client) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct PanickingTask;

impl MaintenanceTask for PanickingTask {
    fn name(&self) -> &str {
        "panicking"
    }

    fn cadence(&self) -> Cadence {
        Cadence::Frequent
    }

    fn run(&self, _client: &dyn Client) -> Result<()> {
        panic!("sensor driver fault");
    }
}

#[test]
fn test_start_and_stop() {
    let h = harness();
    let lifecycle = h.context.lifecycle();

    assert!(lifecycle.request_start().unwrap());
    assert!(wait_until(|| lifecycle.get_client_handle().is_some()));
    assert_eq!(lifecycle.state(), LifecycleState::Running);

    let client = lifecycle.get_client_handle().unwrap();
    assert_eq!(client.endpoint_name(), "lwm2m-agent-test");
    drop(client);

    assert!(lifecycle.request_stop());
    lifecycle.await_stop();

    assert_eq!(lifecycle.state(), LifecycleState::Stopped);
    assert!(lifecycle.get_client_handle().is_none());
    assert_eq!(lifecycle.last_exit(), Some(WorkerExit::Stopped));
    assert_eq!(h.engine.stats().live_clients(), 0);
    // Credentials are removed at teardown
    assert!(!h.vault.contains(PSK_QUERY));
}

#[test]
fn test_second_start_is_noop() {
    let h = harness();
    let lifecycle = h.context.lifecycle();

    assert!(lifecycle.request_start().unwrap());
    assert!(!lifecycle.request_start().unwrap());
    assert!(wait_until(|| lifecycle.get_client_handle().is_some()));
    assert!(!lifecycle.request_start().unwrap());

    lifecycle.stop();
    assert_eq!(h.engine.stats().creation_attempts(), 1);
}

#[test]
fn test_stop_without_start() {
    let h = harness();
    assert!(!h.context.lifecycle().request_stop());
    h.context.lifecycle().await_stop();
    assert_eq!(h.context.lifecycle().state(), LifecycleState::Stopped);
}

#[test]
fn test_immediate_stop_never_publishes_client() {
    let h = harness();
    let lifecycle = h.context.lifecycle();
    let gate = h.engine.hold_creation();

    lifecycle.request_start().unwrap();
    assert!(lifecycle.request_stop());
    assert!(lifecycle.get_client_handle().is_none());

    drop(gate);
    lifecycle.await_stop();

    assert!(lifecycle.get_client_handle().is_none());
    assert_eq!(lifecycle.last_exit(), Some(WorkerExit::Cancelled));
    assert_eq!(h.engine.stats().live_clients(), 0);
}

#[test]
fn test_restart_blocked_until_reaped() {
    let h = harness();
    let lifecycle = h.context.lifecycle();
    let gate = h.engine.hold_creation();

    lifecycle.request_start().unwrap();
    assert!(wait_until(|| h.engine.stats().creation_attempts() == 1));
    lifecycle.request_stop();

    assert_eq!(lifecycle.state(), LifecycleState::Stopping);
    assert!(matches!(
        lifecycle.request_start(),
        Err(LifecycleError::StopInProgress)
    ));

    gate.send(()).unwrap();
    lifecycle.await_stop();

    assert!(lifecycle.request_start().unwrap());
    assert!(wait_until(|| lifecycle.get_client_handle().is_some()));
    lifecycle.stop();
    assert_eq!(h.engine.stats().live_clients(), 0);
}

#[test]
fn test_construction_failure_reported_and_recoverable() {
    let h = harness();
    let lifecycle = h.context.lifecycle();
    h.engine.fail_security_instance(true);

    lifecycle.request_start().unwrap();
    assert!(wait_until(|| lifecycle.state() == LifecycleState::Stopped));
    lifecycle.await_stop();

    match lifecycle.last_exit() {
        Some(WorkerExit::Failed(reason)) => assert!(reason.contains("Security object")),
        other => panic!("unexpected exit: {:?}", other),
    }
    assert!(lifecycle.get_client_handle().is_none());
    assert!(!h.vault.contains(PSK_QUERY));
    assert_eq!(h.engine.stats().live_clients(), 0);

    h.engine.fail_security_instance(false);
    assert!(lifecycle.request_start().unwrap());
    assert!(wait_until(|| lifecycle.get_client_handle().is_some()));
    assert!(h.vault.contains(PSK_QUERY));
    lifecycle.stop();
}

#[test]
fn test_worker_panic_tears_down_client() {
    let h = harness_with(vec![Arc::new(PanickingTask)]);
    let lifecycle = h.context.lifecycle();

    lifecycle.request_start().unwrap();
    assert!(wait_until(|| lifecycle.state() == LifecycleState::Stopped));
    lifecycle.await_stop();

    assert_eq!(
        lifecycle.last_exit(),
        Some(WorkerExit::Failed("Client thread panicked".to_string()))
    );
    assert!(lifecycle.get_client_handle().is_none());
    assert_eq!(h.engine.stats().live_clients(), 0);
    assert!(!h.vault.contains(PSK_QUERY));
}

#[test]
fn test_handle_during_stop_is_live_or_none() {
    let h = harness();
    let lifecycle = h.context.lifecycle();
    lifecycle.request_start().unwrap();
    assert!(wait_until(|| lifecycle.get_client_handle().is_some()));

    let done = AtomicBool::new(false);
    thread::scope(|scope| {
        let reader = scope.spawn(|| {
            let mut seen_none = false;
            while !done.load(Ordering::SeqCst) {
                match lifecycle.get_client_handle() {
                    Some(client) => {
                        assert!(!seen_none, "handle reappeared after revocation");
                        assert_eq!(client.endpoint_name(), "lwm2m-agent-test");
                    }
                    None => seen_none = true,
                }
            }
        });

        lifecycle.request_stop();
        lifecycle.await_stop();
        done.store(true, Ordering::SeqCst);
        reader.join().unwrap();
    });

    assert!(lifecycle.get_client_handle().is_none());
}

#[test]
fn test_periodic_group_runs_every_fifth_cycle() {
    let frequent = CountingTask::new(Cadence::Frequent);
    let periodic = CountingTask::new(Cadence::Periodic);
    let h = harness_with(vec![frequent.clone(), periodic.clone()]);
    let lifecycle = h.context.lifecycle();

    lifecycle.request_start().unwrap();
    assert!(wait_until(|| frequent.runs() >= 12));
    lifecycle.stop();

    let cycles = frequent.runs();
    assert_eq!(periodic.runs(), cycles.div_ceil(5));

    // Nothing runs after the job was cancelled
    thread::sleep(Duration::from_millis(50));
    assert_eq!(frequent.runs(), cycles);
}

#[test]
fn test_server_instance_from_config() {
    let h = harness();
    let config = h.context.config();
    config.set(keys::LIFETIME, "120").unwrap();
    config.set(keys::URI, "coaps://example.org:5684").unwrap();

    let lifecycle = h.context.lifecycle();
    lifecycle.request_start().unwrap();
    assert!(wait_until(|| lifecycle.get_client_handle().is_some()));

    let state = h.engine.last_client().unwrap().engine_state();
    lifecycle.stop();

    assert_eq!(state.security.len(), 1);
    assert_eq!(state.security[0].server_uri, "coaps://example.org:5684");
    assert!(!state.security[0].bootstrap_server);
    assert_eq!(
        state.security[0].credentials,
        PskCredentials::Vault {
            query: PSK_QUERY.to_string()
        }
    );
    assert_eq!(state.servers.len(), 1);
    assert_eq!(state.servers[0].lifetime, 120);
    assert_eq!(state.servers[0].binding, "U");
}

#[test]
fn test_bootstrap_skips_server_instance() {
    let h = harness();
    h.context.config().set(keys::BOOTSTRAP, "y").unwrap();

    let lifecycle = h.context.lifecycle();
    lifecycle.request_start().unwrap();
    assert!(wait_until(|| lifecycle.get_client_handle().is_some()));

    let state = h.engine.last_client().unwrap().engine_state();
    lifecycle.stop();

    assert!(state.security[0].bootstrap_server);
    assert!(state.servers.is_empty());
}

#[test]
fn test_state_persisted_on_stop_and_restored() {
    let h = harness();
    h.context.config().set(keys::USE_PERSISTENCE, "y").unwrap();
    let lifecycle = h.context.lifecycle();

    lifecycle.request_start().unwrap();
    assert!(wait_until(|| lifecycle.get_client_handle().is_some()));
    lifecycle.stop();
    assert!(h.store.entries().contains_key("lwm2m-state/engine"));

    // A restored run does not add instances on top of the restored ones
    lifecycle.request_start().unwrap();
    assert!(wait_until(|| lifecycle.get_client_handle().is_some()));
    let client = h.engine.last_client().unwrap();
    assert!(client.has_access_control());
    let state = client.engine_state();
    drop(client);
    lifecycle.stop();

    assert_eq!(state.security.len(), 1);
    assert_eq!(state.servers.len(), 1);
}

#[test]
fn test_changed_state_flushed_by_periodic_job() {
    let h = harness();
    h.context.config().set(keys::USE_PERSISTENCE, "y").unwrap();
    let lifecycle = h.context.lifecycle();

    lifecycle.request_start().unwrap();
    assert!(wait_until(|| h.store.entries().contains_key("lwm2m-state/engine")));

    h.store.delete("lwm2m-state/engine").unwrap();
    h.engine.last_client().unwrap().mark_changed();
    assert!(wait_until(|| h.store.entries().contains_key("lwm2m-state/engine")));
    lifecycle.stop();
}

#[test]
fn test_persistence_choice_fixed_at_start() {
    let h = harness();
    h.context.config().set(keys::USE_PERSISTENCE, "y").unwrap();
    let lifecycle = h.context.lifecycle();
    let gate = h.engine.hold_creation();

    lifecycle.request_start().unwrap();
    assert!(wait_until(|| h.engine.stats().creation_attempts() == 1));
    h.context.config().set(keys::USE_PERSISTENCE, "n").unwrap();
    gate.send(()).unwrap();

    assert!(wait_until(|| lifecycle.get_client_handle().is_some()));
    lifecycle.stop();
    assert!(h.store.entries().contains_key("lwm2m-state/engine"));
}

#[test]
fn test_drop_stops_worker() {
    let h = harness();
    h.context.lifecycle().request_start().unwrap();
    assert!(wait_until(|| h.context.lifecycle().get_client_handle().is_some()));

    let stats = h.engine.stats();
    drop(h);
    assert_eq!(stats.live_clients(), 0);
}
