//! The controller state that is shared between tasks.
//!
//! Each field has a single writer, so plain atomics suffice. Readers see values that are at most
//! one sampling period old.

use core::cell::Cell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use portable_atomic::{AtomicBool, AtomicF32, AtomicU8, Ordering};

use super::calibration::FALLBACK_COLD_JUNCTION_DEG_C;
use super::pid::Tunings;
use crate::config::Config;

/// Shared controller state.
pub struct ControllerState {
    /// Operational set temperature in °C (written by the user interface).
    setpoint_deg_c: AtomicF32,
    /// Set temperature while sleeping in °C.
    sleep_setpoint_deg_c: AtomicF32,
    /// Last measured tip temperature in °C (written by the sampling worker).
    temperature_deg_c: AtomicF32,
    /// Cold junction temperature in °C (written by the sampling worker).
    cold_junction_deg_c: AtomicF32,
    /// A cold junction measurement was requested.
    cold_junction_refresh: AtomicBool,
    /// The iron is not in use (written by the posture supervisor).
    sleeping: AtomicBool,
    /// Heating is allowed (written by the user interface gate).
    ///
    /// Not cleared while sleeping. The sleep setpoint applies instead.
    heater_enabled: AtomicBool,
    /// The last applied heater duty cycle in percent (written by the sampling worker).
    duty_percent: AtomicU8,
    /// User-facing PID gains (written by the user interface).
    tunings: Mutex<CriticalSectionRawMutex, Cell<Tunings>>,
}

impl ControllerState {
    /// Create the state with heating disabled.
    pub const fn new(config: &Config, tunings: Tunings) -> Self {
        Self {
            setpoint_deg_c: AtomicF32::new(config.setpoint_deg_c),
            sleep_setpoint_deg_c: AtomicF32::new(config.sleep_setpoint_deg_c),
            temperature_deg_c: AtomicF32::new(f32::NAN),
            cold_junction_deg_c: AtomicF32::new(FALLBACK_COLD_JUNCTION_DEG_C),
            cold_junction_refresh: AtomicBool::new(false),
            sleeping: AtomicBool::new(false),
            heater_enabled: AtomicBool::new(false),
            duty_percent: AtomicU8::new(0),
            tunings: Mutex::new(Cell::new(tunings)),
        }
    }

    /// Operational set temperature in °C.
    pub fn setpoint_deg_c(&self) -> f32 {
        self.setpoint_deg_c.load(Ordering::Relaxed)
    }

    /// Change the operational set temperature.
    pub fn set_setpoint_deg_c(&self, deg_c: f32) {
        self.setpoint_deg_c.store(deg_c, Ordering::Relaxed);
    }

    /// Set temperature while sleeping in °C.
    pub fn sleep_setpoint_deg_c(&self) -> f32 {
        self.sleep_setpoint_deg_c.load(Ordering::Relaxed)
    }

    /// Change the set temperature while sleeping.
    pub fn set_sleep_setpoint_deg_c(&self, deg_c: f32) {
        self.sleep_setpoint_deg_c.store(deg_c, Ordering::Relaxed);
    }

    /// The set temperature that the controller regulates to, depending on sleep.
    pub fn target_deg_c(&self) -> f32 {
        if self.is_sleeping() {
            self.sleep_setpoint_deg_c()
        } else {
            self.setpoint_deg_c()
        }
    }

    /// Last measured tip temperature in °C, `NaN` before the first measurement.
    pub fn temperature_deg_c(&self) -> f32 {
        self.temperature_deg_c.load(Ordering::Relaxed)
    }

    /// Publish a new tip temperature.
    pub fn set_temperature_deg_c(&self, deg_c: f32) {
        self.temperature_deg_c.store(deg_c, Ordering::Relaxed);
    }

    /// Cold junction temperature in °C.
    pub fn cold_junction_deg_c(&self) -> f32 {
        self.cold_junction_deg_c.load(Ordering::Relaxed)
    }

    /// Publish a new cold junction temperature.
    pub fn set_cold_junction_deg_c(&self, deg_c: f32) {
        self.cold_junction_deg_c.store(deg_c, Ordering::Relaxed);
    }

    /// Ask the sampling worker to measure the cold junction on its next cycle.
    pub fn request_cold_junction_refresh(&self) {
        self.cold_junction_refresh.store(true, Ordering::Release);
    }

    /// Consume a pending cold junction refresh request.
    pub fn take_cold_junction_refresh(&self) -> bool {
        self.cold_junction_refresh.swap(false, Ordering::Acquire)
    }

    /// Whether the iron is considered not in use.
    pub fn is_sleeping(&self) -> bool {
        self.sleeping.load(Ordering::Relaxed)
    }

    /// Mark the iron as sleeping or in use. Returns the previous value.
    pub fn set_sleeping(&self, sleeping: bool) -> bool {
        self.sleeping.swap(sleeping, Ordering::Relaxed)
    }

    /// Whether heating is allowed.
    pub fn is_heater_enabled(&self) -> bool {
        self.heater_enabled.load(Ordering::Relaxed)
    }

    /// Allow or forbid heating.
    pub fn set_heater_enabled(&self, enabled: bool) {
        self.heater_enabled.store(enabled, Ordering::Relaxed);
    }

    /// The last applied heater duty cycle in percent.
    pub fn duty_percent(&self) -> u8 {
        self.duty_percent.load(Ordering::Relaxed)
    }

    /// Publish the applied heater duty cycle.
    pub fn set_duty_percent(&self, percent: u8) {
        self.duty_percent.store(percent, Ordering::Relaxed);
    }

    /// User-facing PID gains.
    pub fn tunings(&self) -> Tunings {
        self.tunings.lock(|tunings| tunings.get())
    }

    /// Publish new PID gains. The sampling worker applies them on its next cycle.
    pub fn set_tunings(&self, tunings: Tunings) {
        self.tunings.lock(|cell| cell.set(tunings));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_follows_sleep() {
        let state = ControllerState::new(&Config::default(), Tunings::default());
        assert_eq!(state.target_deg_c(), 350.0);

        assert!(!state.set_sleeping(true));
        assert_eq!(state.target_deg_c(), 150.0);
        // Sleep does not touch the heater permission.
        assert!(!state.is_heater_enabled());

        assert!(state.set_sleeping(false));
        assert_eq!(state.target_deg_c(), 350.0);
    }

    #[test]
    fn refresh_request_is_consumed_once() {
        let state = ControllerState::new(&Config::default(), Tunings::default());
        assert!(!state.take_cold_junction_refresh());

        state.request_cold_junction_refresh();
        state.request_cold_junction_refresh();
        assert!(state.take_cold_junction_refresh());
        assert!(!state.take_cold_junction_refresh());
    }

    #[test]
    fn temperature_is_unknown_at_start() {
        let state = ControllerState::new(&Config::default(), Tunings::default());
        assert!(state.temperature_deg_c().is_nan());
        assert_eq!(state.cold_junction_deg_c(), 25.0);
    }
}
