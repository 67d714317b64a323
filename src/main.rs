//! rc-car - telemetry monitor for the RC car sensor module
//!
//! Opens the serial link, optionally logs sensor changes, and holds the
//! servos in neutral until Ctrl-C.
//!
//! Usage: `rc-car [config.toml]` or `rc-car --config <path>`

use rc_car_core::config::AppConfig;
use rc_car_core::error::{Error, Result};
use rc_car_core::hardware::{CarHardwareInterface, SerialCarHardwareInterface};
use rc_car_core::sensors::{ReadingChanged, Sensor};

use crossbeam_channel::Receiver;
use std::env;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "/etc/rc-car.toml";

/// Config path from `<path>`, `--config <path>` or `-c <path>`
fn parse_config_path() -> Option<String> {
    let args: Vec<String> = env::args().collect();

    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }

    if args.len() > 1 && !args[1].starts_with('-') {
        return Some(args[1].clone());
    }

    None
}

fn load_config() -> Result<AppConfig> {
    match parse_config_path() {
        Some(path) => AppConfig::from_file(path),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => AppConfig::from_file(DEFAULT_CONFIG_PATH),
        None => Ok(AppConfig::default()),
    }
}

fn main() -> Result<()> {
    let config = load_config()?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    log::info!("rc-car v{} starting...", env!("CARGO_PKG_VERSION"));
    log::info!(
        "Serial port {} at {} baud, event loop target {}Hz",
        config.hardware.serial_port,
        config.hardware.baud_rate,
        config.event_loop.target_hz
    );

    let hardware = SerialCarHardwareInterface::open(&config.hardware)?;

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    let startup = Duration::from_millis(config.hardware.startup_delay_ms) + Duration::from_secs(1);
    match hardware.wait_until_connected(startup) {
        Ok(state) => log::info!("Serial link {:?}", state),
        Err(e) => {
            // Keep the monitor alive so the failure stays visible
            log::error!("Sensor module unavailable: {}", e);
        }
    }

    let subscriptions = subscribe(hardware.as_ref(), &config);
    while running.load(Ordering::Relaxed) {
        for event in subscriptions.iter().flat_map(|rx| rx.try_iter()) {
            log::info!("{}: {}", event.sensor, display(hardware.as_ref(), &event));
        }
        thread::sleep(Duration::from_millis(50));
    }

    log::info!("Shutting down...");
    if !hardware.steering_servo().set_value(0.0) {
        log::warn!("Failed to center steering on shutdown");
    }
    if !hardware.throttle_servo().set_value(0.0) {
        log::warn!("Failed to zero throttle on shutdown");
    }
    hardware.close()?;
    log::info!("Shutdown complete");
    Ok(())
}

fn subscribe(
    hardware: &SerialCarHardwareInterface,
    config: &AppConfig,
) -> Vec<Receiver<ReadingChanged>> {
    let sensors = hardware.sensors();
    let mut receivers = Vec::new();

    if config.logging.log_distance {
        for sensor in sensors.front_all() {
            receivers.push(sensor.subscribe());
        }
        receivers.push(sensors.rear().subscribe());
    }
    if config.logging.log_accel {
        receivers.push(sensors.accelerometer().subscribe());
    }
    receivers
}

/// Display text for the sensor that produced `event`
fn display(hardware: &SerialCarHardwareInterface, event: &ReadingChanged) -> String {
    let sensors = hardware.sensors();
    let all: [&dyn Sensor; 5] = [
        &sensors.front_all()[0],
        &sensors.front_all()[1],
        &sensors.front_all()[2],
        sensors.rear(),
        sensors.accelerometer(),
    ];
    all.iter()
        .find(|sensor| sensor.name() == event.sensor)
        .map(|sensor| sensor.display_reading())
        .unwrap_or_else(|| format!("{:?}", event.reading))
}
