//! Hardware interface for the RC car
//!
//! [`CarHardwareInterface`] is the contract the event loop drives: it hands
//! out snapshots of the live sensors and servos, and accepts servo writes.
//! [`SerialCarHardwareInterface`] implements it over the serial link to the
//! sensor module.

pub mod link;
pub mod protocol;
pub mod telemetry;

use crate::config::HardwareConfig;
use crate::error::{Error, Result};
use crate::sensors::{AccelerometerSensor, UltrasonicSensor};
use crate::servo::{Servo, ServoChannel, ServoWriter};
use crate::state::{CarState, UltrasonicSensorIndex};
use crate::transport::{SerialTransport, Transport};

use link::{LinkState, SerialLink, TransportOpener};
use protocol::ServoFrame;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

/// Live sensors of the car
///
/// Written by the serial I/O thread, read by everyone else.
pub struct CarSensors {
    front: [UltrasonicSensor; 3],
    rear: UltrasonicSensor,
    accelerometer: AccelerometerSensor,
}

impl CarSensors {
    pub fn new() -> Self {
        Self {
            front: [
                UltrasonicSensor::new("FrontLeft"),
                UltrasonicSensor::new("FrontMiddle"),
                UltrasonicSensor::new("FrontRight"),
            ],
            rear: UltrasonicSensor::new("Rear"),
            accelerometer: AccelerometerSensor::new(),
        }
    }

    pub fn front(&self, index: UltrasonicSensorIndex) -> &UltrasonicSensor {
        &self.front[index.index()]
    }

    /// Front sensors indexed by [`UltrasonicSensorIndex`]
    pub fn front_all(&self) -> &[UltrasonicSensor; 3] {
        &self.front
    }

    pub fn rear(&self) -> &UltrasonicSensor {
        &self.rear
    }

    pub fn accelerometer(&self) -> &AccelerometerSensor {
        &self.accelerometer
    }

    /// Current front distances indexed by [`UltrasonicSensorIndex`]
    pub fn front_distances_cm(&self) -> [i32; 3] {
        UltrasonicSensorIndex::ALL.map(|index| self.front(index).distance_cm())
    }
}

impl Default for CarSensors {
    fn default() -> Self {
        Self::new()
    }
}

/// Contract between the event loop and the car's hardware
pub trait CarHardwareInterface: ServoWriter {
    fn sensors(&self) -> &CarSensors;

    fn steering_servo(&self) -> &Servo;

    fn throttle_servo(&self) -> &Servo;

    fn servo(&self, channel: ServoChannel) -> &Servo {
        match channel {
            ServoChannel::Steering => self.steering_servo(),
            ServoChannel::Throttle => self.throttle_servo(),
        }
    }

    /// Copy the current sensor and servo values into a snapshot
    fn create_state(&self) -> CarState {
        let sensors = self.sensors();
        CarState::new(
            sensors.accelerometer().values(),
            sensors.rear().distance_cm(),
            sensors.front_distances_cm(),
            self.steering_servo().value(),
            self.throttle_servo().value(),
        )
    }
}

/// Hardware interface backed by the serial sensor module
///
/// Owns the serial I/O thread; dropping the interface stops the thread and
/// closes the port. The servos hold a weak reference back to the interface.
pub struct SerialCarHardwareInterface {
    sensors: Arc<CarSensors>,
    steering: Servo,
    throttle: Servo,
    link: SerialLink,
}

impl SerialCarHardwareInterface {
    /// Open the configured serial device
    ///
    /// The port is opened on the I/O thread. A device that cannot be opened
    /// is logged and leaves the interface non-functional
    /// ([`LinkState::Failed`]) rather than failing this call.
    pub fn open(config: &HardwareConfig) -> Result<Arc<Self>> {
        let port = config.serial_port.clone();
        let baud_rate = config.baud_rate;
        let read_timeout = Duration::from_millis(config.read_timeout_ms);

        log::info!("Opening sensor module on {} at {} baud", port, baud_rate);
        let opener: TransportOpener = Box::new(move || -> Result<Box<dyn Transport>> {
            let transport = SerialTransport::open(&port, baud_rate, read_timeout)?;
            Ok(Box::new(transport) as Box<dyn Transport>)
        });

        Self::start(opener, Duration::from_millis(config.startup_delay_ms))
    }

    /// Run over an already-open transport (tests, replays)
    pub fn with_transport<T: Transport + 'static>(
        transport: T,
        startup_delay: Duration,
    ) -> Result<Arc<Self>> {
        let opener: TransportOpener =
            Box::new(move || -> Result<Box<dyn Transport>> { Ok(Box::new(transport)) });
        Self::start(opener, startup_delay)
    }

    fn start(opener: TransportOpener, startup_delay: Duration) -> Result<Arc<Self>> {
        let sensors = Arc::new(CarSensors::new());
        let link = SerialLink::start(opener, Arc::clone(&sensors), startup_delay)?;

        Ok(Arc::new_cyclic(|weak: &Weak<Self>| {
            let writer: Weak<dyn ServoWriter> = weak.clone();
            Self {
                sensors,
                steering: Servo::attached(ServoChannel::Steering, writer.clone()),
                throttle: Servo::attached(ServoChannel::Throttle, writer),
                link,
            }
        }))
    }

    pub fn link_state(&self) -> LinkState {
        self.link.state()
    }

    /// Block until the link leaves [`LinkState::Connecting`] or `timeout` passes
    ///
    /// Returns [`Error::LinkUnavailable`] if the port failed to open or the
    /// link closed.
    pub fn wait_until_connected(&self, timeout: Duration) -> Result<LinkState> {
        let deadline = Instant::now() + timeout;
        loop {
            let state = self.link.state();
            match state {
                LinkState::Connected => return Ok(state),
                LinkState::Failed | LinkState::Closed => return Err(Error::LinkUnavailable),
                LinkState::Connecting if Instant::now() >= deadline => return Ok(state),
                LinkState::Connecting => thread::sleep(Duration::from_millis(10)),
            }
        }
    }

    /// Frames queued but not yet written
    pub fn pending_frames(&self) -> usize {
        self.link.pending_frames()
    }

    /// Stop the I/O thread and close the port
    ///
    /// Frames already queued are written first. Servo writes fail afterwards.
    pub fn close(&self) -> Result<()> {
        self.link.shutdown()
    }
}

impl ServoWriter for SerialCarHardwareInterface {
    fn apply_value_to_servo(&self, value: f64, servo: ServoChannel) -> bool {
        let other = self.servo(servo.other()).value();
        let (steering, throttle) = match servo {
            ServoChannel::Steering => (value, other),
            ServoChannel::Throttle => (other, value),
        };

        let frame = ServoFrame::new(steering, throttle);
        log::trace!(
            "Servo {} -> {:.3}, frame {:02X?}",
            servo,
            value,
            frame.as_bytes()
        );
        self.link.enqueue(frame)
    }
}

impl CarHardwareInterface for SerialCarHardwareInterface {
    fn sensors(&self) -> &CarSensors {
        &self.sensors
    }

    fn steering_servo(&self) -> &Servo {
        &self.steering
    }

    fn throttle_servo(&self) -> &Servo {
        &self.throttle
    }
}
