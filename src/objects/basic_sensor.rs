//! Generic single-value sensor object (IPSO 33xx family)

use super::DataObject;
use super::sensor::Sensor;
use crate::engine::Client;
use anyhow::{Context, Result};
use std::sync::{Arc, Mutex};

pub const RID_MIN_MEASURED_VALUE: u16 = 5601;
pub const RID_MAX_MEASURED_VALUE: u16 = 5602;
pub const RID_SENSOR_VALUE: u16 = 5700;
pub const RID_SENSOR_UNITS: u16 = 5701;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Readings {
    value: f64,
    min: f64,
    max: f64,
}

pub struct BasicSensorObject {
    oid: u16,
    name: String,
    unit: String,
    sensor: Arc<dyn Sensor>,
    readings: Mutex<Option<Readings>>,
}

impl BasicSensorObject {
    pub fn new(oid: u16, name: &str, unit: &str, sensor: Arc<dyn Sensor>) -> Self {
        Self {
            oid,
            name: name.to_string(),
            unit: unit.to_string(),
            sensor,
            readings: Mutex::new(None),
        }
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Last sampled value
    pub fn value(&self) -> Option<f64> {
        self.readings.lock().unwrap().map(|r| r.value)
    }
}

impl DataObject for BasicSensorObject {
    fn oid(&self) -> u16 {
        self.oid
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn update(&self, client: &dyn Client) -> Result<()> {
        let value = self
            .sensor
            .read()
            .with_context(|| format!("Failed to read {} sensor", self.name))?;

        let mut readings = self.readings.lock().unwrap();
        let previous = *readings;
        let next = match previous {
            Some(prev) => Readings {
                value,
                min: prev.min.min(value),
                max: prev.max.max(value),
            },
            None => Readings {
                value,
                min: value,
                max: value,
            },
        };
        *readings = Some(next);
        drop(readings);

        let prev = previous.unwrap_or_default();
        if previous.is_none() || prev.value != next.value {
            client.notify_changed(self.oid, RID_SENSOR_VALUE);
        }
        if previous.is_none() || prev.min != next.min {
            client.notify_changed(self.oid, RID_MIN_MEASURED_VALUE);
        }
        if previous.is_none() || prev.max != next.max {
            client.notify_changed(self.oid, RID_MAX_MEASURED_VALUE);
        }
        Ok(())
    }
}
