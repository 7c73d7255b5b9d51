//! Sensor driver seams and simulated drivers

use anyhow::Result;
use rand::Rng;
use std::sync::Mutex;

/// Producer of a single numeric reading
pub trait Sensor: Send + Sync {
    fn read(&self) -> Result<f64>;
}

/// Producer of an X/Y/Z reading
pub trait ThreeAxisSensor: Send + Sync {
    fn read(&self) -> Result<[f64; 3]>;
}

/// Random walk within `[min, max]`, standing in for real hardware
pub struct SimulatedSensor {
    value: Mutex<f64>,
    min: f64,
    max: f64,
    step: f64,
}

impl SimulatedSensor {
    pub fn new(initial: f64, min: f64, max: f64, step: f64) -> Self {
        Self {
            value: Mutex::new(initial.clamp(min, max)),
            min,
            max,
            step,
        }
    }
}

impl Sensor for SimulatedSensor {
    fn read(&self) -> Result<f64> {
        let mut value = self.value.lock().unwrap();
        let delta = if self.step > 0.0 {
            rand::thread_rng().gen_range(-self.step..=self.step)
        } else {
            0.0
        };
        *value = (*value + delta).clamp(self.min, self.max);
        Ok(*value)
    }
}

pub struct SimulatedThreeAxis {
    axes: [SimulatedSensor; 3],
}

impl SimulatedThreeAxis {
    pub fn new(range: f64, step: f64) -> Self {
        Self {
            axes: [
                SimulatedSensor::new(0.0, -range, range, step),
                SimulatedSensor::new(0.0, -range, range, step),
                SimulatedSensor::new(0.0, -range, range, step),
            ],
        }
    }
}

impl ThreeAxisSensor for SimulatedThreeAxis {
    fn read(&self) -> Result<[f64; 3]> {
        Ok([self.axes[0].read()?, self.axes[1].read()?, self.axes[2].read()?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walk_stays_in_range() {
        let sensor = SimulatedSensor::new(20.0, 15.0, 25.0, 3.0);
        for _ in 0..200 {
            let value = sensor.read().unwrap();
            assert!((15.0..=25.0).contains(&value));
        }
    }

    #[test]
    fn test_zero_step_is_constant() {
        let sensor = SimulatedSensor::new(1.5, 0.0, 2.0, 0.0);
        assert_eq!(sensor.read().unwrap(), 1.5);
        assert_eq!(sensor.read().unwrap(), 1.5);
    }
}
