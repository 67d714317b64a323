//! Servo actuators
//!
//! A [`Servo`] holds a position in `[-1.0, 1.0]`. Attached servos write
//! through to the hardware before committing: the stored value only changes
//! when the hardware interface accepts the write, so a failed write leaves
//! the previous value in place. Detached servos (such as the copies inside a
//! [`CarState`](crate::state::CarState) snapshot) accept any value.

use std::fmt;
use std::sync::Weak;
use std::sync::atomic::{AtomicU64, Ordering};

/// Which of the two servos a value is meant for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServoChannel {
    Steering,
    Throttle,
}

impl ServoChannel {
    /// The servo that is not `self`
    pub fn other(self) -> Self {
        match self {
            ServoChannel::Steering => ServoChannel::Throttle,
            ServoChannel::Throttle => ServoChannel::Steering,
        }
    }
}

impl fmt::Display for ServoChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServoChannel::Steering => write!(f, "steering"),
            ServoChannel::Throttle => write!(f, "throttle"),
        }
    }
}

/// Sink for servo writes, implemented by hardware interfaces
pub trait ServoWriter: Send + Sync {
    /// Send `value` for `servo` to the hardware.
    ///
    /// Returns `true` if the write was accepted. The caller commits the value
    /// locally only on `true`.
    fn apply_value_to_servo(&self, value: f64, servo: ServoChannel) -> bool;
}

/// Connection between a servo and the hardware
#[derive(Clone)]
pub enum ServoLink {
    /// Writes go through the hardware interface
    Attached(Weak<dyn ServoWriter>),
    /// Not connected to hardware; every write is accepted
    Detached,
}

/// f64 stored in an AtomicU64
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn new(val: f64) -> Self {
        Self(AtomicU64::new(val.to_bits()))
    }

    fn load(&self, order: Ordering) -> f64 {
        f64::from_bits(self.0.load(order))
    }

    fn store(&self, val: f64, order: Ordering) {
        self.0.store(val.to_bits(), order);
    }
}

/// Servo position with write-through to the hardware
pub struct Servo {
    channel: ServoChannel,
    value: AtomicF64,
    link: ServoLink,
}

impl Servo {
    /// Servo whose writes go through `writer`
    pub fn attached(channel: ServoChannel, writer: Weak<dyn ServoWriter>) -> Self {
        Self {
            channel,
            value: AtomicF64::new(0.0),
            link: ServoLink::Attached(writer),
        }
    }

    /// Servo with no hardware behind it
    pub fn detached(channel: ServoChannel) -> Self {
        Self {
            channel,
            value: AtomicF64::new(0.0),
            link: ServoLink::Detached,
        }
    }

    pub fn channel(&self) -> ServoChannel {
        self.channel
    }

    /// Current (last committed) position
    pub fn value(&self) -> f64 {
        self.value.load(Ordering::Acquire)
    }

    pub fn is_attached(&self) -> bool {
        matches!(self.link, ServoLink::Attached(_))
    }

    /// Set the servo position.
    ///
    /// Values outside `[-1.0, 1.0]` are clamped; NaN is rejected. Returns
    /// whether the value was committed.
    pub fn set_value(&self, value: f64) -> bool {
        if value.is_nan() {
            log::warn!("Rejecting NaN {} servo value", self.channel);
            return false;
        }
        let value = value.clamp(-1.0, 1.0);

        let accepted = match &self.link {
            ServoLink::Detached => true,
            ServoLink::Attached(writer) => match writer.upgrade() {
                Some(writer) => writer.apply_value_to_servo(value, self.channel),
                None => {
                    log::warn!("{} servo write dropped: hardware interface gone", self.channel);
                    false
                }
            },
        };

        if accepted {
            self.value.store(value, Ordering::Release);
        }
        accepted
    }
}

impl Clone for Servo {
    fn clone(&self) -> Self {
        Self {
            channel: self.channel,
            value: AtomicF64::new(self.value()),
            link: self.link.clone(),
        }
    }
}

impl fmt::Debug for Servo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Servo")
            .field("channel", &self.channel)
            .field("value", &self.value())
            .field("attached", &self.is_attached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    struct FakeWriter {
        accept: AtomicBool,
        writes: Mutex<Vec<(f64, ServoChannel)>>,
    }

    impl ServoWriter for FakeWriter {
        fn apply_value_to_servo(&self, value: f64, servo: ServoChannel) -> bool {
            self.writes.lock().push((value, servo));
            self.accept.load(Ordering::Relaxed)
        }
    }

    fn fake_writer(accept: bool) -> Arc<FakeWriter> {
        Arc::new(FakeWriter {
            accept: AtomicBool::new(accept),
            writes: Mutex::new(Vec::new()),
        })
    }

    fn attach(channel: ServoChannel, writer: &Arc<FakeWriter>) -> Servo {
        let writer: Arc<dyn ServoWriter> = writer.clone();
        Servo::attached(channel, Arc::downgrade(&writer))
    }

    #[test]
    fn test_detached_accepts_any_value() {
        let servo = Servo::detached(ServoChannel::Steering);
        assert!(servo.set_value(0.75));
        assert_eq!(servo.value(), 0.75);
        assert!(!servo.is_attached());
    }

    #[test]
    fn test_attached_commits_on_success() {
        let writer = fake_writer(true);
        let servo = attach(ServoChannel::Throttle, &writer);

        assert!(servo.set_value(0.5));
        assert_eq!(servo.value(), 0.5);
        assert_eq!(*writer.writes.lock(), vec![(0.5, ServoChannel::Throttle)]);
    }

    #[test]
    fn test_attached_keeps_prior_value_on_failure() {
        let writer = fake_writer(true);
        let servo = attach(ServoChannel::Steering, &writer);
        servo.set_value(-0.25);

        writer.accept.store(false, Ordering::Relaxed);
        assert!(!servo.set_value(0.9));
        assert_eq!(servo.value(), -0.25);
        assert_eq!(writer.writes.lock().len(), 2);
    }

    #[test]
    fn test_dropped_writer_fails_write() {
        let writer = fake_writer(true);
        let servo = attach(ServoChannel::Steering, &writer);
        drop(writer);

        assert!(!servo.set_value(0.3));
        assert_eq!(servo.value(), 0.0);
    }

    #[test]
    fn test_out_of_range_is_clamped_and_nan_rejected() {
        let servo = Servo::detached(ServoChannel::Throttle);
        assert!(servo.set_value(1.7));
        assert_eq!(servo.value(), 1.0);
        assert!(!servo.set_value(f64::NAN));
        assert_eq!(servo.value(), 1.0);
    }

    #[test]
    fn test_other_channel() {
        assert_eq!(ServoChannel::Steering.other(), ServoChannel::Throttle);
        assert_eq!(ServoChannel::Throttle.other(), ServoChannel::Steering);
    }
}
