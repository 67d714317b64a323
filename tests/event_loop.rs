//! Event loop scheduling, interrupts and cancellation

use parking_lot::Mutex;
use rc_car_core::error::Error;
use rc_car_core::event_loop::{AiHandler, AiOutcome, CarEventLoop, ControlValues};
use rc_car_core::hardware::{CarHardwareInterface, CarSensors, SerialCarHardwareInterface};
use rc_car_core::servo::{Servo, ServoChannel, ServoWriter};
use rc_car_core::state::CarState;
use rc_car_core::transport::MockTransport;
use rc_car_core::Result;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(5);

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Hardware that records every servo write
struct RecordingHardware {
    sensors: CarSensors,
    steering: Servo,
    throttle: Servo,
    writes: Mutex<Vec<(ServoChannel, f64)>>,
}

impl RecordingHardware {
    fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let writer: Weak<dyn ServoWriter> = weak.clone();
            Self {
                sensors: CarSensors::new(),
                steering: Servo::attached(ServoChannel::Steering, writer.clone()),
                throttle: Servo::attached(ServoChannel::Throttle, writer),
                writes: Mutex::new(Vec::new()),
            }
        })
    }

    fn writes(&self) -> Vec<(ServoChannel, f64)> {
        self.writes.lock().clone()
    }
}

impl ServoWriter for RecordingHardware {
    fn apply_value_to_servo(&self, value: f64, servo: ServoChannel) -> bool {
        self.writes.lock().push((servo, value));
        true
    }
}

impl CarHardwareInterface for RecordingHardware {
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

fn event_loop(hardware: &Arc<RecordingHardware>) -> CarEventLoop {
    CarEventLoop::new(Arc::clone(hardware) as Arc<dyn CarHardwareInterface>)
}

/// Always drives at fixed values
struct Drive {
    throttle: f64,
    steering: f64,
    calls: Arc<AtomicUsize>,
}

impl Drive {
    fn new(throttle: f64, steering: f64) -> Self {
        Self {
            throttle,
            steering,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl AiHandler for Drive {
    fn perform_ai_work(&self, _state: &CarState, _current: ControlValues) -> Result<AiOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(AiOutcome::Update(ControlValues::new(self.throttle, self.steering)))
    }
}

/// Flags when it starts, then takes its time
struct Slow {
    entered: Arc<AtomicBool>,
    delay: Duration,
}

impl AiHandler for Slow {
    fn perform_ai_work(&self, _state: &CarState, _current: ControlValues) -> Result<AiOutcome> {
        self.entered.store(true, Ordering::SeqCst);
        thread::sleep(self.delay);
        Ok(AiOutcome::Update(ControlValues::new(1.0, 1.0)))
    }
}

/// Tracks how many computations overlap
struct Concurrency {
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
}

impl AiHandler for Concurrency {
    fn perform_ai_work(&self, _state: &CarState, current: ControlValues) -> Result<AiOutcome> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(AiOutcome::Update(current))
    }
}

/// Fails for the first `failures` calls
struct Flaky {
    failures: usize,
    calls: AtomicUsize,
    panic: bool,
}

impl AiHandler for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }

    fn perform_ai_work(&self, _state: &CarState, _current: ControlValues) -> Result<AiOutcome> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            if self.panic {
                panic!("flaky handler panicked on call {}", call);
            }
            return Err(Error::handler(self.name(), format!("call {}", call)));
        }
        Ok(AiOutcome::Update(ControlValues::new(0.25, 0.0)))
    }
}

#[test]
fn test_start_with_nothing_to_run() {
    let hardware = RecordingHardware::new();
    let mut event_loop = event_loop(&hardware);
    assert!(matches!(event_loop.start(), Err(Error::NothingToRun)));
    assert!(!event_loop.is_running());
}

#[test]
fn test_configuration_errors_while_running() {
    let hardware = RecordingHardware::new();
    let mut event_loop = event_loop(&hardware);
    event_loop.add_ai_handler(Drive::new(0.0, 0.0)).unwrap();
    event_loop.start().unwrap();
    assert!(event_loop.is_running());

    assert!(matches!(event_loop.start(), Err(Error::AlreadyRunning)));
    assert!(matches!(
        event_loop.add_ai_handler(Drive::new(0.1, 0.1)),
        Err(Error::LoopRunning)
    ));
    assert!(matches!(
        event_loop.add_interrupt_handler(|_: &CarState| false),
        Err(Error::LoopRunning)
    ));
    assert!(matches!(event_loop.reset_state(), Err(Error::LoopRunning)));
    assert_eq!(event_loop.ai_handler_count(), 1);

    event_loop.stop().unwrap();
    assert!(!event_loop.is_running());
    event_loop.reset_state().unwrap();
    assert_eq!(event_loop.ai_handler_count(), 0);
    assert!(matches!(event_loop.start(), Err(Error::NothingToRun)));
}

#[test]
fn test_ai_result_committed_and_stop_neutralises() {
    let hardware = RecordingHardware::new();
    let mut event_loop = event_loop(&hardware);
    event_loop.add_ai_handler(Drive::new(0.2, 0.9)).unwrap();
    event_loop.add_ai_handler(Drive::new(0.6, -0.4)).unwrap();
    event_loop.start().unwrap();

    assert!(wait_until(|| hardware.throttle.value() == 0.6));
    assert_eq!(hardware.steering.value(), -0.4);

    event_loop.stop().unwrap();
    assert!(!event_loop.is_running());
    assert_eq!(hardware.steering.value(), 0.0);
    assert_eq!(hardware.throttle.value(), 0.0);

    // Second stop is a no-op
    let writes = hardware.writes().len();
    event_loop.stop().unwrap();
    assert_eq!(hardware.writes().len(), writes);
}

#[test]
fn test_interrupt_zeroes_throttle_only_and_halts() {
    let hardware = RecordingHardware::new();
    let tripped = Arc::new(AtomicBool::new(false));
    let trip = Arc::clone(&tripped);

    let mut event_loop = event_loop(&hardware);
    event_loop
        .add_interrupt_handler(move |_: &CarState| trip.load(Ordering::SeqCst))
        .unwrap();
    event_loop.add_ai_handler(Drive::new(0.6, 0.4)).unwrap();
    event_loop.start().unwrap();

    assert!(wait_until(|| hardware.throttle.value() == 0.6));
    tripped.store(true, Ordering::SeqCst);
    assert!(wait_until(|| !event_loop.is_running()));

    assert_eq!(hardware.throttle.value(), 0.0);
    assert_eq!(hardware.steering.value(), 0.4);

    let writes = hardware.writes();
    assert_eq!(writes.last(), Some(&(ServoChannel::Throttle, 0.0)));

    // Nothing more from the AI after the halt
    thread::sleep(Duration::from_millis(100));
    assert_eq!(hardware.writes().len(), writes.len());

    // Halted loop can be reconfigured
    event_loop.add_ai_handler(Drive::new(0.0, 0.0)).unwrap();
}

#[test]
fn test_interrupt_checked_before_ai_runs() {
    let hardware = RecordingHardware::new();
    let drive = Drive::new(0.5, 0.5);
    let calls = Arc::clone(&drive.calls);

    let mut event_loop = event_loop(&hardware);
    event_loop.add_interrupt_handler(|_: &CarState| true).unwrap();
    event_loop.add_ai_handler(drive).unwrap();
    event_loop.start().unwrap();

    assert!(wait_until(|| !event_loop.is_running()));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(hardware.writes(), vec![(ServoChannel::Throttle, 0.0)]);
}

#[test]
fn test_interrupt_during_computation_discards_result() {
    let hardware = RecordingHardware::new();
    let entered = Arc::new(AtomicBool::new(false));
    let tripped = Arc::new(AtomicBool::new(false));
    let trip = Arc::clone(&tripped);
    let delay = Duration::from_millis(300);

    let mut event_loop = event_loop(&hardware);
    event_loop
        .add_interrupt_handler(move |_: &CarState| trip.load(Ordering::SeqCst))
        .unwrap();
    event_loop
        .add_ai_handler(Slow {
            entered: Arc::clone(&entered),
            delay,
        })
        .unwrap();
    event_loop.start().unwrap();

    assert!(wait_until(|| entered.load(Ordering::SeqCst)));
    tripped.store(true, Ordering::SeqCst);
    assert!(wait_until(|| !event_loop.is_running()));

    // Halt joined the slow computation, and its result was dropped
    assert_eq!(hardware.writes(), vec![(ServoChannel::Throttle, 0.0)]);
    assert_eq!(hardware.steering.value(), 0.0);

    thread::sleep(delay);
    assert_eq!(hardware.writes(), vec![(ServoChannel::Throttle, 0.0)]);
    assert_eq!(hardware.throttle.value(), 0.0);
}

#[test]
fn test_panicking_interrupt_halts_loop() {
    let hardware = RecordingHardware::new();
    let entered = Arc::new(AtomicBool::new(false));
    let tripped = Arc::new(AtomicBool::new(false));
    let trip = Arc::clone(&tripped);
    let delay = Duration::from_millis(300);

    let mut event_loop = event_loop(&hardware);
    event_loop
        .add_interrupt_handler(move |_: &CarState| {
            if trip.load(Ordering::SeqCst) {
                panic!("distance sensor went away");
            }
            false
        })
        .unwrap();
    event_loop
        .add_ai_handler(Slow {
            entered: Arc::clone(&entered),
            delay,
        })
        .unwrap();
    event_loop.start().unwrap();

    assert!(wait_until(|| entered.load(Ordering::SeqCst)));
    tripped.store(true, Ordering::SeqCst);
    assert!(wait_until(|| !event_loop.is_running()));
    event_loop.stop().unwrap();

    thread::sleep(delay + Duration::from_millis(200));
    assert_eq!(hardware.writes(), vec![(ServoChannel::Throttle, 0.0)]);
    assert_eq!(hardware.throttle.value(), 0.0);
}

#[test]
fn test_stop_waits_for_in_flight_computation() {
    let hardware = RecordingHardware::new();
    let entered = Arc::new(AtomicBool::new(false));
    let delay = Duration::from_millis(300);

    let mut event_loop = event_loop(&hardware);
    event_loop
        .add_ai_handler(Slow {
            entered: Arc::clone(&entered),
            delay,
        })
        .unwrap();
    event_loop.start().unwrap();
    assert!(wait_until(|| entered.load(Ordering::SeqCst)));

    let stop_started = Instant::now();
    event_loop.stop().unwrap();
    // Returned only after the slow handler unwound
    assert!(stop_started.elapsed() >= Duration::from_millis(100));

    let writes = hardware.writes();
    assert!(writes.iter().all(|&(_, value)| value != 1.0));
    assert_eq!(hardware.throttle.value(), 0.0);
    assert_eq!(hardware.steering.value(), 0.0);

    thread::sleep(delay);
    assert_eq!(hardware.writes(), writes);
}

#[test]
fn test_at_most_one_computation_in_flight() {
    let hardware = RecordingHardware::new();
    let active = Arc::new(AtomicUsize::new(0));
    let max_active = Arc::new(AtomicUsize::new(0));
    let calls = Arc::new(AtomicUsize::new(0));

    // Ticks every millisecond, computations take 20ms
    let mut event_loop =
        CarEventLoop::with_target_hz(Arc::clone(&hardware) as Arc<dyn CarHardwareInterface>, 1000.0);
    event_loop
        .add_ai_handler(Concurrency {
            active: Arc::clone(&active),
            max_active: Arc::clone(&max_active),
            calls: Arc::clone(&calls),
        })
        .unwrap();
    event_loop.start().unwrap();

    assert!(wait_until(|| calls.load(Ordering::SeqCst) >= 5));
    event_loop.stop().unwrap();

    assert_eq!(max_active.load(Ordering::SeqCst), 1);
    assert_eq!(active.load(Ordering::SeqCst), 0);
}

#[test]
fn test_handler_error_does_not_stop_loop() {
    let hardware = RecordingHardware::new();
    let mut event_loop = event_loop(&hardware);
    event_loop
        .add_ai_handler(Flaky {
            failures: 3,
            calls: AtomicUsize::new(0),
            panic: false,
        })
        .unwrap();
    event_loop.start().unwrap();

    assert!(wait_until(|| hardware.throttle.value() == 0.25));
    assert!(event_loop.is_running());
    event_loop.stop().unwrap();
}

#[test]
fn test_handler_panic_does_not_stop_loop() {
    let hardware = RecordingHardware::new();
    let mut event_loop = event_loop(&hardware);
    event_loop
        .add_ai_handler(Flaky {
            failures: 1,
            calls: AtomicUsize::new(0),
            panic: true,
        })
        .unwrap();
    event_loop.start().unwrap();

    assert!(wait_until(|| hardware.throttle.value() == 0.25));
    assert!(event_loop.is_running());
    event_loop.stop().unwrap();
}

#[test]
fn test_ai_output_reaches_serial_wire() {
    let mock = MockTransport::new();
    let hardware = SerialCarHardwareInterface::with_transport(mock.clone(), Duration::ZERO).unwrap();

    let mut event_loop = CarEventLoop::new(Arc::clone(&hardware) as Arc<dyn CarHardwareInterface>);
    event_loop.add_ai_handler(Drive::new(0.5, -0.5)).unwrap();
    event_loop.start().unwrap();

    // steering -0.5 -> 45, throttle 0.5 -> 135
    let expected: [u8; 5] = [0xBA, 0xBE, 45, 135, 45 ^ 135];
    assert!(wait_until(|| {
        mock.get_written()
            .chunks(5)
            .any(|frame| frame == &expected[..])
    }));

    event_loop.stop().unwrap();
    assert!(wait_until(|| mock.get_written().ends_with(&[0xBA, 0xBE, 90, 90, 0])));
}
