//! The illumination line (spec.md §4.4, §6 "GPIO"), abstracted behind a
//! narrow trait so the camera unit is testable without real Raspberry Pi
//! GPIO hardware (spec.md §9 Design Notes: the log-tail recorder
//! reconciliation gets the same treatment in [`super::recorder`]).

use std::sync::Mutex;

use rppal::gpio::{Gpio, OutputPin};

use crate::error::CameraError;

pub trait GpioLine: Send + Sync {
    /// Drives the line high (`on=true`) or low (`on=false`). The line is
    /// active-high (spec.md §4.4): `on` powers the illumination.
    fn set(&self, on: bool);
}

pub struct RppalLine(Mutex<OutputPin>);

impl RppalLine {
    pub fn open(pin: u8) -> Result<Self, CameraError> {
        let gpio = Gpio::new().map_err(|e| CameraError::GpioUnavailable { pin, reason: e.to_string() })?;
        let output = gpio
            .get(pin)
            .map_err(|e| CameraError::GpioUnavailable { pin, reason: e.to_string() })?
            .into_output();
        Ok(RppalLine(Mutex::new(output)))
    }
}

impl GpioLine for RppalLine {
    fn set(&self, on: bool) {
        let mut pin = self.0.lock().unwrap_or_else(|e| e.into_inner());
        if on {
            pin.set_high();
        } else {
            pin.set_low();
        }
    }
}

#[cfg(test)]
pub struct FakeGpioLine(std::sync::atomic::AtomicBool);

#[cfg(test)]
impl FakeGpioLine {
    pub fn new() -> Self {
        FakeGpioLine(std::sync::atomic::AtomicBool::new(false))
    }

    pub fn is_on(&self) -> bool {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
impl GpioLine for FakeGpioLine {
    fn set(&self, on: bool) {
        self.0.store(on, std::sync::atomic::Ordering::SeqCst);
    }
}
