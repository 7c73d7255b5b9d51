//! Seams to the external LwM2M client engine
//!
//! The protocol runtime itself is not part of this crate. These traits
//! describe what the lifecycle core needs from it: creating a client,
//! registering objects and instances, running the event loop, scheduling
//! delayed jobs and snapshotting state for persistence.

pub mod simulated;

use crate::objects::DataObject;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Query addressing the PSK credentials provisioned into a [`CredentialVault`]
///
/// Credentials are addressed by type and security tag; the type is implied
/// by the call, so the query is only the tag.
pub const PSK_QUERY: &str = "1";

/// Short server id used for the single configured server
pub const DEFAULT_SSID: u16 = 1;

/// Bounds of the DTLS handshake retransmission backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeTimeouts {
    pub min: Duration,
    pub max: Duration,
}

/// Parameters for creating a client instance
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub endpoint_name: String,
    pub in_buffer_size: usize,
    pub out_buffer_size: usize,
    pub handshake_timeouts: HandshakeTimeouts,
    pub disable_legacy_server_initiated_bootstrap: bool,
}

impl EngineConfig {
    pub fn new(endpoint_name: &str) -> Self {
        Self {
            endpoint_name: endpoint_name.to_string(),
            in_buffer_size: 4000,
            out_buffer_size: 4000,
            // Short handshake backoff keeps `stop` responsive; with
            // exponential backoff an 8 s cap adds up to about 15 s
            handshake_timeouts: HandshakeTimeouts {
                min: Duration::from_secs(1),
                max: Duration::from_secs(8),
            },
            disable_legacy_server_initiated_bootstrap: true,
        }
    }
}

/// Where the PSK of a security instance comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PskCredentials {
    Inline { identity: String, key: String },
    /// Stored in a [`CredentialVault`] under the given query
    Vault { query: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityInstance {
    pub ssid: u16,
    pub bootstrap_server: bool,
    pub server_uri: String,
    pub credentials: PskCredentials,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInstance {
    pub ssid: u16,
    pub lifetime: u32,
    pub binding: String,
}

pub type JobId = u64;

/// A delayed job; runs on the thread driving the event loop
pub type Job = Box<dyn FnOnce() + Send>;

/// Delayed-job scheduler owned by a client
pub trait Scheduler: Send + Sync {
    /// Run `job` once, no earlier than `delay` from now
    fn schedule(&self, delay: Duration, job: Job) -> JobId;

    /// Drop a pending job; returns whether it was still pending
    fn cancel(&self, id: JobId) -> bool;
}

/// A live client instance
///
/// Dropping the last reference deletes the instance.
pub trait Client: Send + Sync {
    fn endpoint_name(&self) -> &str;

    /// Install the Security and Server objects, plus Access Control when asked
    fn install_core_objects(&self, access_control: bool) -> Result<()>;

    fn register_object(&self, object: Arc<dyn DataObject>) -> Result<()>;

    /// Returns the new instance id
    fn add_security_instance(&self, instance: &SecurityInstance) -> Result<u16>;

    /// Returns the new instance id
    fn add_server_instance(&self, instance: &ServerInstance) -> Result<u16>;

    /// Report that a resource value changed, for observations
    fn notify_changed(&self, oid: u16, rid: u16);

    /// Ask the server for positioning assistance data
    fn send_assistance_request(&self, request_mask: u32) -> Result<()>;

    fn scheduler(&self) -> Arc<dyn Scheduler>;

    /// Serve the protocol until interrupted or until `keep_running` is false
    ///
    /// `keep_running` is consulted at least once per `max_wait`. Jobs from
    /// [`Client::scheduler`] run inside this call.
    fn run_event_loop(&self, max_wait: Duration, keep_running: &dyn Fn() -> bool) -> Result<()>;

    /// Make a running (or the next) `run_event_loop` return promptly
    fn interrupt(&self);

    /// Whether state changed since the last [`Client::save_state`]
    fn state_changed(&self) -> bool;

    /// Serialize persistent state and clear the changed mark
    fn save_state(&self) -> Result<Vec<u8>>;

    fn restore_state(&self, blob: &[u8]) -> Result<()>;
}

/// Factory of client instances
pub trait ClientEngine: Send + Sync {
    fn create_client(&self, config: &EngineConfig) -> Result<Arc<dyn Client>>;
}

/// Secure credential storage outside the client (e.g. a modem key store)
pub trait CredentialVault: Send + Sync {
    fn store_psk(&self, query: &str, identity: &[u8], key: &[u8]) -> Result<()>;

    fn remove_psk(&self, query: &str) -> Result<()>;
}
