//! Three-axis accelerometer

use super::{Observed, ReadingChanged, Sensor, SensorReading, Vector3};
use crossbeam_channel::Receiver;
use std::time::Instant;

/// Accelerometer reporting x/y/z in g
pub struct AccelerometerSensor {
    cell: Observed<Vector3>,
}

impl AccelerometerSensor {
    pub fn new() -> Self {
        Self {
            cell: Observed::new("Accelerometer", Vector3::default(), SensorReading::Acceleration),
        }
    }

    /// All three axes, read together
    pub fn values(&self) -> Vector3 {
        self.cell.get()
    }

    pub fn x(&self) -> f64 {
        self.values().x
    }

    pub fn y(&self) -> f64 {
        self.values().y
    }

    pub fn z(&self) -> f64 {
        self.values().z
    }

    /// Returns whether the reading changed
    pub(crate) fn set_values(&self, x: f64, y: f64, z: f64) -> bool {
        self.cell.update(Vector3::new(x, y, z))
    }
}

impl Default for AccelerometerSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl Sensor for AccelerometerSensor {
    fn name(&self) -> &'static str {
        self.cell.name()
    }

    fn reading(&self) -> SensorReading {
        self.cell.reading()
    }

    fn reading_time(&self) -> Option<Instant> {
        self.cell.changed_at()
    }

    fn display_reading(&self) -> String {
        let v = self.values();
        format!("X: {:.2}g, Y: {:.2}g, Z: {:.2}g", v.x, v.y, v.z)
    }

    fn subscribe(&self) -> Receiver<ReadingChanged> {
        self.cell.subscribe()
    }
}
