//! Temperature control core of a soldering iron.
//!
//! Hardware is reached through small traits (ports), so that the control loop, the posture
//! supervisor and the user interface state machine run unchanged on the target and on the host.
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

// This must go first, so that the other modules see its macros.
#[macro_use]
mod fmt;

pub mod config;
pub mod control;
pub mod posture;
pub mod power;
pub mod settings;
pub mod ui;

pub use config::Config;
pub use control::state::ControllerState;

/// Errors that prevent the controller from starting.
///
/// Each subsystem has its own variant, so that the boot log names the missing device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InitError {
    /// The tip ADC did not deliver the first conversion.
    TipAdc,
    /// The heater PWM timer could not be set up.
    HeaterPwm,
    /// The accelerometer is missing or did not identify itself.
    Accelerometer,
    /// The bus voltage/power monitor is not ready.
    PowerMonitor,
    /// The display did not initialize.
    Display,
}

/// Transient sensor faults.
///
/// These never abort the controller: the affected cycle is skipped and the last state is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorError {
    /// The bus transfer or conversion failed.
    ReadFailed,
    /// The device answered with data that cannot be interpreted.
    InvalidData,
    /// The device did not answer in time.
    Timeout,
}
