//! Immutable vehicle snapshot handed to interrupt and AI handlers

use crate::sensors::Vector3;
use crate::servo::{Servo, ServoChannel};

/// Position of a front ultrasonic sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum UltrasonicSensorIndex {
    FrontLeft = 0,
    FrontMiddle = 1,
    FrontRight = 2,
}

impl UltrasonicSensorIndex {
    pub const ALL: [UltrasonicSensorIndex; 3] = [
        UltrasonicSensorIndex::FrontLeft,
        UltrasonicSensorIndex::FrontMiddle,
        UltrasonicSensorIndex::FrontRight,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Copy of the vehicle's sensor and servo values at one instant
///
/// Holds no references to live sensors; later updates to the hardware do not
/// show up in an existing snapshot. The servos inside are detached copies.
#[derive(Debug, Clone)]
pub struct CarState {
    accelerometer: Vector3,
    rear_distance_cm: i32,
    front_distances_cm: [i32; 3],
    steering: Servo,
    throttle: Servo,
}

impl CarState {
    pub fn new(
        accelerometer: Vector3,
        rear_distance_cm: i32,
        front_distances_cm: [i32; 3],
        steering: f64,
        throttle: f64,
    ) -> Self {
        let steering_servo = Servo::detached(ServoChannel::Steering);
        steering_servo.set_value(steering);
        let throttle_servo = Servo::detached(ServoChannel::Throttle);
        throttle_servo.set_value(throttle);

        Self {
            accelerometer,
            rear_distance_cm,
            front_distances_cm,
            steering: steering_servo,
            throttle: throttle_servo,
        }
    }

    pub fn accelerometer(&self) -> Vector3 {
        self.accelerometer
    }

    pub fn rear_distance_cm(&self) -> i32 {
        self.rear_distance_cm
    }

    pub fn front_distance_cm(&self, index: UltrasonicSensorIndex) -> i32 {
        self.front_distances_cm[index.index()]
    }

    /// Front distances indexed by [`UltrasonicSensorIndex`]
    pub fn front_distances_cm(&self) -> [i32; 3] {
        self.front_distances_cm
    }

    pub fn steering(&self) -> f64 {
        self.steering.value()
    }

    pub fn throttle(&self) -> f64 {
        self.throttle.value()
    }
}

impl Default for CarState {
    fn default() -> Self {
        Self::new(Vector3::default(), 0, [0; 3], 0.0, 0.0)
    }
}
