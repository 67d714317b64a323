//! Ultrasonic distance sensor

use super::{Observed, ReadingChanged, Sensor, SensorReading};
use crossbeam_channel::Receiver;
use std::time::Instant;

/// Ultrasonic range finder reporting whole centimetres
pub struct UltrasonicSensor {
    cell: Observed<i32>,
}

impl UltrasonicSensor {
    pub fn new(name: &'static str) -> Self {
        Self {
            cell: Observed::new(name, 0, SensorReading::Distance),
        }
    }

    /// Last distance reading in centimetres
    pub fn distance_cm(&self) -> i32 {
        self.cell.get()
    }

    /// Returns whether the reading changed
    pub(crate) fn set_distance_cm(&self, distance_cm: i32) -> bool {
        self.cell.update(distance_cm)
    }
}

impl Sensor for UltrasonicSensor {
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
        format!("{}cm", self.distance_cm())
    }

    fn subscribe(&self) -> Receiver<ReadingChanged> {
        self.cell.subscribe()
    }
}
