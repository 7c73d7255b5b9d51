//! Three-axis sensor object (accelerometer, magnetometer, gyrometer)

use super::DataObject;
use super::sensor::ThreeAxisSensor;
use crate::engine::Client;
use anyhow::{Context, Result};
use std::sync::{Arc, Mutex};

pub const RID_X_VALUE: u16 = 5702;
pub const RID_Y_VALUE: u16 = 5703;
pub const RID_Z_VALUE: u16 = 5704;

pub struct ThreeAxisObject {
    oid: u16,
    name: String,
    unit: String,
    sensor: Arc<dyn ThreeAxisSensor>,
    value: Mutex<Option<[f64; 3]>>,
}

impl ThreeAxisObject {
    pub fn new(oid: u16, name: &str, unit: &str, sensor: Arc<dyn ThreeAxisSensor>) -> Self {
        Self {
            oid,
            name: name.to_string(),
            unit: unit.to_string(),
            sensor,
            value: Mutex::new(None),
        }
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn value(&self) -> Option<[f64; 3]> {
        *self.value.lock().unwrap()
    }
}

impl DataObject for ThreeAxisObject {
    fn oid(&self) -> u16 {
        self.oid
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn update(&self, client: &dyn Client) -> Result<()> {
        let next = self
            .sensor
            .read()
            .with_context(|| format!("Failed to read {} sensor", self.name))?;

        let previous = self.value.lock().unwrap().replace(next);

        for (axis, rid) in [RID_X_VALUE, RID_Y_VALUE, RID_Z_VALUE].into_iter().enumerate() {
            if previous.is_none_or(|prev| prev[axis] != next[axis]) {
                client.notify_changed(self.oid, rid);
            }
        }
        Ok(())
    }
}
