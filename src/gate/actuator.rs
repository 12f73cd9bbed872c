use crate::common::{GateError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Physical gate output.
pub trait Actuator: Send {
    fn engage(&mut self) -> Result<()>;
    fn release(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorCall {
    Engage,
    Release,
}

/// Shared record of what a [`MockActuator`] was asked to do, and when.
pub type ActuatorLog = Arc<Mutex<Vec<(ActuatorCall, Instant)>>>;

/// Stand-in for hardware when not running on the gate itself.
pub struct MockActuator {
    pin: u32,
    engaged: bool,
    log: ActuatorLog,
}

impl MockActuator {
    pub fn new(pin: u32) -> Self {
        Self {
            pin,
            engaged: false,
            log: ActuatorLog::default(),
        }
    }

    pub fn log(&self) -> ActuatorLog {
        Arc::clone(&self.log)
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged
    }

    fn push(&self, call: ActuatorCall) {
        if let Ok(mut log) = self.log.lock() {
            log.push((call, Instant::now()));
        }
    }
}

impl Actuator for MockActuator {
    fn engage(&mut self) -> Result<()> {
        tracing::info!("[GATE] OPEN (mock pin {})", self.pin);
        self.engaged = true;
        self.push(ActuatorCall::Engage);
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        tracing::info!("[GATE] CLOSE (mock pin {})", self.pin);
        self.engaged = false;
        self.push(ActuatorCall::Release);
        Ok(())
    }
}

/// Drives a GPIO line through the sysfs interface: `1` engages, `0` releases.
pub struct SysfsGpioActuator {
    pin: u32,
    value_path: PathBuf,
}

impl SysfsGpioActuator {
    pub fn new(pin: u32) -> Result<Self> {
        Self::with_root(Path::new("/sys/class/gpio"), pin)
    }

    pub fn with_root(root: &Path, pin: u32) -> Result<Self> {
        let pin_dir = root.join(format!("gpio{}", pin));
        if !pin_dir.exists() {
            fs::write(root.join("export"), pin.to_string()).map_err(|e| {
                GateError::Actuator(format!("Failed to export GPIO {}: {}", pin, e))
            })?;
        }
        fs::write(pin_dir.join("direction"), "out").map_err(|e| {
            GateError::Actuator(format!("Failed to set GPIO {} as output: {}", pin, e))
        })?;

        let actuator = Self {
            pin,
            value_path: pin_dir.join("value"),
        };
        // start from a known released line
        actuator.write_value("0")?;
        tracing::info!("GPIO {} ready at {:?}", pin, pin_dir);
        Ok(actuator)
    }

    fn write_value(&self, value: &str) -> Result<()> {
        fs::write(&self.value_path, value)
            .map_err(|e| GateError::Actuator(format!("GPIO {} write failed: {}", self.pin, e)))
    }
}

impl Actuator for SysfsGpioActuator {
    fn engage(&mut self) -> Result<()> {
        tracing::info!("[GATE] OPEN (gpio {})", self.pin);
        self.write_value("1")
    }

    fn release(&mut self) -> Result<()> {
        tracing::info!("[GATE] CLOSE (gpio {})", self.pin);
        self.write_value("0")
    }
}
