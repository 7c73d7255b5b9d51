//! Body of the client worker thread

use super::{Shared, WorkerContext, WorkerExit};
use crate::engine::{
    Client, DEFAULT_SSID, EngineConfig, PSK_QUERY, PskCredentials, SecurityInstance,
    ServerInstance,
};
use crate::objects::ObjectSet;
use crate::persistence::StatePersistence;
use crate::scheduler::{Cadence, ObjectUpdateTask, PeriodicJob};
use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::sync::Arc;

/// Releases the worker's resources and marks it finished when dropped
///
/// Also runs while unwinding from a panic, in which case the client handle
/// is revoked here since the normal teardown never ran.
struct ExitGuard<'a> {
    shared: &'a Shared,
    resources: Resources,
    exit: Option<WorkerExit>,
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        let exit = match self.exit.take() {
            Some(exit) => exit,
            None => {
                self.shared.client.revoke();
                WorkerExit::Failed("Client thread panicked".to_string())
            }
        };
        self.resources.release(&self.shared.ctx);
        self.shared.finish(exit);
    }
}

pub(super) fn run(shared: Arc<Shared>) {
    let mut guard = ExitGuard {
        shared: &shared,
        resources: Resources::default(),
        exit: None,
    };

    let exit = run_client(&shared, &mut guard.resources);
    match &exit {
        WorkerExit::Cancelled => info!("Client start cancelled"),
        WorkerExit::Stopped => info!("Client stopped"),
        WorkerExit::Failed(reason) => error!("Client failed: {}", reason),
    }
    guard.exit = Some(exit);
}

/// Resources acquired while building a client, released after it is gone
#[derive(Default)]
struct Resources {
    objects: Option<ObjectSet>,
    credentials_provisioned: bool,
}

impl Resources {
    fn release(&mut self, ctx: &WorkerContext) {
        if let Some(objects) = self.objects.take() {
            debug!("Releasing {} data objects", objects.len());
        }
        if std::mem::take(&mut self.credentials_provisioned) {
            if let Some(vault) = &ctx.vault {
                if let Err(e) = vault.remove_psk(PSK_QUERY) {
                    warn!("Removing PSK credentials failed: {:#}", e);
                }
            }
        }
    }
}

/// Build and run one client; the caller's guard releases `resources`
fn run_client(shared: &Shared, resources: &mut Resources) -> WorkerExit {
    // Stop may have been requested right after start
    if !shared.confirm_running() {
        return WorkerExit::Cancelled;
    }

    let ctx = &shared.ctx;
    // Read once so restore and flush agree for the whole run
    let persistence = ctx
        .config
        .use_persistence()
        .then(|| StatePersistence::new(ctx.config.store(), ctx.config.namespace()));

    let client = match build_client(ctx, resources, persistence.as_ref()) {
        Ok(client) => client,
        Err(e) => return WorkerExit::Failed(format!("{:#}", e)),
    };
    info!("Successfully created client '{}'", client.endpoint_name());

    let exit = if shared.client.publish_if(&client, || shared.should_run()) {
        let objects = resources.objects.as_ref();
        let job = Arc::new(maintenance_job(ctx, objects, persistence.clone()));
        let task = job.arm(&client, ctx.maintenance_interval);

        let result = client.run_event_loop(ctx.poll_interval, &|| shared.should_run());
        task.cancel();

        match result {
            Ok(()) => WorkerExit::Stopped,
            Err(e) => WorkerExit::Failed(format!("Event loop failed: {:#}", e)),
        }
    } else {
        WorkerExit::Cancelled
    };

    if let Some(persistence) = &persistence {
        if let Err(e) = persistence.persist_if_required(client.as_ref()) {
            error!("Couldn't persist engine state: {:#}", e);
        }
    }

    shared.client.revoke();
    drop(client);
    exit
}

fn maintenance_job(
    ctx: &WorkerContext,
    objects: Option<&ObjectSet>,
    persistence: Option<StatePersistence>,
) -> PeriodicJob {
    let mut job = PeriodicJob::new(ctx.periodic_divisor);
    if let Some(objects) = objects {
        job = job
            .with_task(Arc::new(ObjectUpdateTask::new(
                Cadence::Frequent,
                objects.frequent(),
            )))
            .with_task(Arc::new(ObjectUpdateTask::new(
                Cadence::Periodic,
                objects.periodic(),
            )));
    }
    for plugin in &ctx.plugins {
        job = job.with_task(plugin.clone());
    }
    if let Some(persistence) = persistence {
        job = job.with_persistence(persistence);
    }
    job
}

fn build_client(
    ctx: &WorkerContext,
    resources: &mut Resources,
    persistence: Option<&StatePersistence>,
) -> Result<Arc<dyn Client>> {
    let config = &ctx.config;
    let endpoint = config.endpoint_name()?;

    let client = ctx
        .engine
        .create_client(&EngineConfig::new(&endpoint))
        .context("Could not create client")?;

    // Access Control is needed once a restored Server object holds many servers
    client
        .install_core_objects(ctx.capabilities.persistence)
        .context("Failed to install necessary modules")?;

    resources.objects = Some(
        ctx.catalog
            .install(client.as_ref())
            .context("Failed to initialize objects")?,
    );

    let psk = config.psk()?;
    if let Some(vault) = &ctx.vault {
        resources.credentials_provisioned = true;
        vault
            .store_psk(PSK_QUERY, endpoint.as_bytes(), psk.as_bytes())
            .context("Storing PSK credentials failed")?;
    }

    if let Some(persistence) = persistence {
        match persistence.restore(client.as_ref()) {
            Ok(true) => return Ok(client),
            Ok(false) => {}
            Err(e) => warn!("Ignoring persisted engine state: {:#}", e),
        }
    }

    let bootstrap = config.is_bootstrap()?;
    let credentials = match &ctx.vault {
        Some(_) => PskCredentials::Vault {
            query: PSK_QUERY.to_string(),
        },
        None => PskCredentials::Inline {
            identity: endpoint.clone(),
            key: psk,
        },
    };

    client
        .add_security_instance(&SecurityInstance {
            ssid: DEFAULT_SSID,
            bootstrap_server: bootstrap,
            server_uri: config.server_uri()?,
            credentials,
        })
        .context("Failed to instantiate Security object")?;

    if !bootstrap {
        client
            .add_server_instance(&ServerInstance {
                ssid: DEFAULT_SSID,
                lifetime: config.lifetime()?,
                binding: "U".to_string(),
            })
            .context("Failed to instantiate Server object")?;
    }

    Ok(client)
}
