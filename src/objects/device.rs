//! Device object (OID 3)

use super::DataObject;
use crate::engine::Client;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use std::time::Instant;

pub const OID_DEVICE: u16 = 3;
pub const RID_CURRENT_TIME: u16 = 13;

/// Static identity reported by the device object
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    pub firmware_version: String,
}

impl DeviceInfo {
    pub fn new(serial_number: &str) -> Self {
        Self {
            manufacturer: "lwm2m-agent".to_string(),
            model: std::env::consts::ARCH.to_string(),
            serial_number: serial_number.to_string(),
            firmware_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

pub struct DeviceObject {
    info: DeviceInfo,
    created: Instant,
    current_time: Mutex<Option<DateTime<Utc>>>,
}

impl DeviceObject {
    pub fn new(info: DeviceInfo) -> Self {
        Self {
            info,
            created: Instant::now(),
            current_time: Mutex::new(None),
        }
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn uptime_secs(&self) -> u64 {
        self.created.elapsed().as_secs()
    }

    pub fn current_time(&self) -> Option<DateTime<Utc>> {
        *self.current_time.lock().unwrap()
    }
}

impl DataObject for DeviceObject {
    fn oid(&self) -> u16 {
        OID_DEVICE
    }

    fn name(&self) -> &str {
        "Device"
    }

    fn update(&self, client: &dyn Client) -> Result<()> {
        let now = Utc::now();
        let previous = self.current_time.lock().unwrap().replace(now);

        // Current time is reported with one-second resolution
        if previous.is_none_or(|prev| prev.timestamp() != now.timestamp()) {
            client.notify_changed(OID_DEVICE, RID_CURRENT_TIME);
        }
        Ok(())
    }
}
