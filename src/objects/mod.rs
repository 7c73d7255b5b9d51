//! Data objects exposed to the server
//!
//! A fresh [`ObjectSet`] is built for every client run from the
//! [`ObjectCatalog`], registered into the client and released when the run
//! ends. The device object is mandatory; every other object is best effort.

pub mod basic_sensor;
pub mod device;
pub mod push_button;
pub mod sensor;
pub mod three_axis;

use crate::engine::Client;
use anyhow::{Context, Result};
use log::{debug, warn};
use std::sync::Arc;

pub use basic_sensor::BasicSensorObject;
pub use device::{DeviceInfo, DeviceObject};
pub use push_button::PushButtonObject;
pub use sensor::{Sensor, SimulatedSensor, SimulatedThreeAxis, ThreeAxisSensor};
pub use three_axis::ThreeAxisObject;

/// An object the client serves
pub trait DataObject: Send + Sync {
    fn oid(&self) -> u16;

    fn name(&self) -> &str;

    /// Sample the backing source and notify the client about changed resources
    fn update(&self, client: &dyn Client) -> Result<()>;
}

#[derive(Clone)]
enum SensorSource {
    Basic(Arc<dyn Sensor>),
    ThreeAxis(Arc<dyn ThreeAxisSensor>),
}

#[derive(Clone)]
struct SensorEntry {
    oid: u16,
    name: String,
    unit: String,
    source: SensorSource,
}

/// Which objects to create for a client run
#[derive(Clone)]
pub struct ObjectCatalog {
    device: DeviceInfo,
    push_button: Option<Arc<PushButtonObject>>,
    sensors: Vec<SensorEntry>,
}

impl ObjectCatalog {
    pub fn new(device: DeviceInfo) -> Self {
        Self {
            device,
            push_button: None,
            sensors: Vec::new(),
        }
    }

    /// The full set of simulated IPSO sensors
    pub fn simulated(device: DeviceInfo) -> Self {
        Self::new(device)
            .with_push_button(Arc::new(PushButtonObject::new()))
            .with_sensor(
                3303,
                "Temperature",
                "Cel",
                Arc::new(SimulatedSensor::new(21.0, -20.0, 60.0, 0.5)),
            )
            .with_sensor(
                3304,
                "Humidity",
                "%RH",
                Arc::new(SimulatedSensor::new(40.0, 0.0, 100.0, 1.0)),
            )
            .with_sensor(
                3315,
                "Barometer",
                "hPa",
                Arc::new(SimulatedSensor::new(1013.0, 950.0, 1050.0, 0.3)),
            )
            .with_sensor(
                3301,
                "Illuminance",
                "lx",
                Arc::new(SimulatedSensor::new(300.0, 0.0, 10000.0, 25.0)),
            )
            .with_three_axis_sensor(
                3313,
                "Accelerometer",
                "m/s2",
                Arc::new(SimulatedThreeAxis::new(20.0, 0.2)),
            )
            .with_three_axis_sensor(
                3314,
                "Magnetometer",
                "G",
                Arc::new(SimulatedThreeAxis::new(1.0, 0.01)),
            )
    }

    /// The push button survives across runs so presses are not lost
    pub fn with_push_button(mut self, button: Arc<PushButtonObject>) -> Self {
        self.push_button = Some(button);
        self
    }

    pub fn with_sensor(mut self, oid: u16, name: &str, unit: &str, sensor: Arc<dyn Sensor>) -> Self {
        self.sensors.push(SensorEntry {
            oid,
            name: name.to_string(),
            unit: unit.to_string(),
            source: SensorSource::Basic(sensor),
        });
        self
    }

    pub fn with_three_axis_sensor(
        mut self,
        oid: u16,
        name: &str,
        unit: &str,
        sensor: Arc<dyn ThreeAxisSensor>,
    ) -> Self {
        self.sensors.push(SensorEntry {
            oid,
            name: name.to_string(),
            unit: unit.to_string(),
            source: SensorSource::ThreeAxis(sensor),
        });
        self
    }

    pub fn push_button(&self) -> Option<Arc<PushButtonObject>> {
        self.push_button.clone()
    }

    /// Create this run's objects and register them into `client`
    ///
    /// Fails only if the device object cannot be registered; other objects
    /// that the client rejects are left out with a warning.
    pub fn install(&self, client: &dyn Client) -> Result<ObjectSet> {
        let device: Arc<dyn DataObject> = Arc::new(DeviceObject::new(self.device.clone()));
        client
            .register_object(device.clone())
            .context("Could not register Device object")?;

        let mut set = ObjectSet {
            frequent: vec![device],
            periodic: Vec::new(),
        };

        if let Some(button) = &self.push_button {
            let button: Arc<dyn DataObject> = button.clone();
            if try_register(client, &button) {
                set.frequent.push(button);
            }
        }

        for entry in &self.sensors {
            let object: Arc<dyn DataObject> = match &entry.source {
                SensorSource::Basic(sensor) => Arc::new(BasicSensorObject::new(
                    entry.oid,
                    &entry.name,
                    &entry.unit,
                    sensor.clone(),
                )),
                SensorSource::ThreeAxis(sensor) => Arc::new(ThreeAxisObject::new(
                    entry.oid,
                    &entry.name,
                    &entry.unit,
                    sensor.clone(),
                )),
            };
            if try_register(client, &object) {
                set.periodic.push(object);
            }
        }

        debug!("Installed {} objects", set.len());
        Ok(set)
    }
}

fn try_register(client: &dyn Client, object: &Arc<dyn DataObject>) -> bool {
    match client.register_object(object.clone()) {
        Ok(()) => true,
        Err(e) => {
            warn!("Could not register {} object: {:#}", object.name(), e);
            false
        }
    }
}

/// Objects registered into one client, split by update cadence
pub struct ObjectSet {
    frequent: Vec<Arc<dyn DataObject>>,
    periodic: Vec<Arc<dyn DataObject>>,
}

impl ObjectSet {
    /// Updated on every maintenance cycle
    pub fn frequent(&self) -> &[Arc<dyn DataObject>] {
        &self.frequent
    }

    /// Updated on every n-th maintenance cycle
    pub fn periodic(&self) -> &[Arc<dyn DataObject>] {
        &self.periodic
    }

    pub fn len(&self) -> usize {
        self.frequent.len() + self.periodic.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
