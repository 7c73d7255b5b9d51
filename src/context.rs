//! Application context wiring configuration, engine and lifecycle together

use crate::config::options::{OptionsRegistry, registrations};
use crate::config::settings::AppSettings;
use crate::config::store::{MemoryStore, SettingsStore};
use crate::config::{BootOutcome, ClientConfig};
use crate::engine::simulated::SimulatedEngine;
use crate::engine::{ClientEngine, CredentialVault};
use crate::lifecycle::{LifecycleController, WorkerContext};
use crate::objects::{DeviceInfo, ObjectCatalog};
use crate::scheduler::{LocationAssistTask, LoggedLed, MaintenanceTask, StatusLed, StatusLedTask};
use crate::transport::{self, Transport};
use anyhow::{Context, Result};
use log::{debug, info};
use std::fs;
use std::sync::Arc;

const MACHINE_ID_PATH: &str = "/etc/machine-id";

/// Length of the device id taken from the machine id
const DEVICE_ID_LEN: usize = 16;

/// Everything the control thread operates on
pub struct AppContext {
    settings: AppSettings,
    config: Arc<ClientConfig>,
    lifecycle: LifecycleController,
    transport: Box<dyn Transport>,
}

impl AppContext {
    pub fn builder(settings: AppSettings) -> AppContextBuilder {
        AppContextBuilder::new(settings)
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn config(&self) -> &Arc<ClientConfig> {
        &self.config
    }

    pub fn lifecycle(&self) -> &LifecycleController {
        &self.lifecycle
    }

    /// Restore the configuration, then bring the network up
    pub fn boot(&self) -> Result<BootOutcome> {
        let outcome = self.config.boot();
        debug!("Configuration boot outcome: {:?}", outcome);

        self.transport
            .connect(&self.config)
            .with_context(|| format!("Failed to bring up {} network", self.transport.name()))?;
        info!("Connected to network");
        Ok(outcome)
    }
}

pub struct AppContextBuilder {
    settings: AppSettings,
    store: Option<Arc<dyn SettingsStore>>,
    engine: Option<Arc<dyn ClientEngine>>,
    vault: Option<Arc<dyn CredentialVault>>,
    catalog: Option<ObjectCatalog>,
    status_led: Option<Arc<dyn StatusLed>>,
    plugins: Vec<Arc<dyn MaintenanceTask>>,
    transport: Option<Box<dyn Transport>>,
    device_id: Option<String>,
}

impl AppContextBuilder {
    pub fn new(settings: AppSettings) -> Self {
        Self {
            settings,
            store: None,
            engine: None,
            vault: None,
            catalog: None,
            status_led: None,
            plugins: Vec::new(),
            transport: None,
            device_id: None,
        }
    }

    pub fn store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn engine(mut self, engine: Arc<dyn ClientEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Keep PSK credentials in `vault` instead of the Security object
    pub fn vault(mut self, vault: Arc<dyn CredentialVault>) -> Self {
        self.vault = Some(vault);
        self
    }

    pub fn catalog(mut self, catalog: ObjectCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn status_led(mut self, led: Arc<dyn StatusLed>) -> Self {
        self.status_led = Some(led);
        self
    }

    pub fn plugin(mut self, task: Arc<dyn MaintenanceTask>) -> Self {
        self.plugins.push(task);
        self
    }

    pub fn transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Override the detected hardware id
    pub fn device_id(mut self, id: &str) -> Self {
        self.device_id = Some(id.to_string());
        self
    }

    pub fn build(self) -> Result<AppContext> {
        let settings = self.settings;
        let caps = settings.capabilities;

        let device_id = self
            .device_id
            .or_else(|| settings.device_id.clone())
            .or_else(detect_device_id);
        debug!("Device id: {:?}", device_id);

        let registry = Arc::new(OptionsRegistry::new());
        registrations::register_all(&registry, &settings, device_id.as_deref())
            .context("Failed to register options")?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let config = Arc::new(ClientConfig::new(&settings.namespace, registry, store));

        let serial = device_id.unwrap_or_else(|| settings.endpoint_prefix.clone());
        let catalog = self
            .catalog
            .unwrap_or_else(|| ObjectCatalog::simulated(DeviceInfo::new(&serial)));

        let led = self.status_led.unwrap_or_else(|| Arc::new(LoggedLed));
        let mut plugins: Vec<Arc<dyn MaintenanceTask>> = vec![Arc::new(StatusLedTask::new(led))];
        if caps.location_services {
            plugins.push(Arc::new(LocationAssistTask::default()));
        }
        plugins.extend(self.plugins);

        let lifecycle = LifecycleController::new(WorkerContext {
            config: config.clone(),
            engine: self
                .engine
                .unwrap_or_else(|| Arc::new(SimulatedEngine::new())),
            vault: self.vault,
            catalog,
            plugins,
            capabilities: caps,
            poll_interval: settings.poll_interval(),
            maintenance_interval: settings.maintenance_interval(),
            periodic_divisor: settings.periodic_divisor,
        });

        let transport = self
            .transport
            .unwrap_or_else(|| transport::for_kind(caps.transport));

        Ok(AppContext {
            settings,
            config,
            lifecycle,
            transport,
        })
    }
}

/// Hardware id of this machine, if one can be found
pub fn detect_device_id() -> Option<String> {
    let content = fs::read_to_string(MACHINE_ID_PATH).ok()?;
    let id: String = content.trim().chars().take(DEVICE_ID_LEN).collect();
    (!id.is_empty()).then_some(id)
}
