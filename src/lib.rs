//! Configuration and lifecycle core of an LwM2M client agent
//!
//! - [`config`]: typed, validated, persisted client options
//! - [`lifecycle`]: start/stop of the worker thread running the client
//! - [`scheduler`]: the recurring maintenance job inside the worker
//! - [`engine`]: seams to the protocol engine, with a simulated one
//! - [`context`]: the application context tying these together

pub mod cli;
pub mod config;
pub mod context;
pub mod engine;
pub mod lifecycle;
pub mod objects;
pub mod persistence;
pub mod scheduler;
pub mod transport;

pub use config::{BootOutcome, ClientConfig, ConfigError};
pub use context::{AppContext, AppContextBuilder};
pub use lifecycle::{LifecycleController, LifecycleError, LifecycleState, WorkerExit};
