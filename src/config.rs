//! Run-time defaults of the controller.
//!
//! Everything here is fixed at build time. User-adjustable values (setpoints, gains) start from
//! these defaults and are then overridden by the persistent [`crate::settings::Settings`].

use crate::control::library::TipProperties;
use crate::posture::PostureConfig;

/// Controller configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Period of the sampling alarm in ms.
    pub sampling_period_ms: u32,
    /// Time between switching off the heater and sampling the tip, in µs.
    pub settle_delay_us: u32,
    /// Interval between PID computations in ms.
    ///
    /// Rounded down to a whole number of sampling periods.
    pub pid_compute_interval_ms: u32,
    /// Upper limit of the PID output, which maps to the maximum duty cycle.
    pub pid_max_output: f32,
    /// Maximum heater duty cycle in percent.
    pub max_duty_percent: u8,
    /// Length of the moving-average window over raw tip samples.
    pub filter_window: usize,
    /// Consecutive failed tip conversions after which the heater is switched off.
    pub max_tip_failures: u32,

    /// Default operational set temperature in °C.
    pub setpoint_deg_c: f32,
    /// Default set temperature while sleeping in °C.
    pub sleep_setpoint_deg_c: f32,
    /// Lowest set temperature that the user can select, in °C.
    pub min_setpoint_deg_c: f32,
    /// Highest set temperature that the user can select, in °C.
    pub max_setpoint_deg_c: f32,
    /// Set temperature change per button press, in °C.
    pub setpoint_step_deg_c: f32,

    /// Highest fixed supply potential to request in mV.
    pub requested_voltage_mv: u32,
    /// Highest fixed PDO index that is considered during negotiation.
    pub max_fixed_pdo_index: usize,
    /// Accepted deviation between requested and measured bus potential in mV.
    pub voltage_tolerance_mv: u32,

    /// Display refresh rate in Hz.
    pub frame_rate_hz: u32,

    /// Posture supervisor thresholds.
    pub posture: PostureConfig,
}

impl Config {
    /// Default configuration for a 15 V supply.
    pub const fn default() -> Self {
        Self {
            sampling_period_ms: 50,
            settle_delay_us: 500,
            pid_compute_interval_ms: 250,
            pid_max_output: 450.0,
            max_duty_percent: 90,
            filter_window: 2,
            max_tip_failures: 4,

            setpoint_deg_c: 350.0,
            sleep_setpoint_deg_c: 150.0,
            min_setpoint_deg_c: 100.0,
            max_setpoint_deg_c: 450.0,
            setpoint_step_deg_c: 10.0,

            requested_voltage_mv: 15_000,
            max_fixed_pdo_index: 3,
            voltage_tolerance_mv: 2_000,

            frame_rate_hz: 10,

            posture: PostureConfig::default(),
        }
    }

    /// Default configuration, with the supply request of a particular tip.
    pub const fn for_tip(tip: &TipProperties) -> Self {
        let mut config = Self::default();
        config.requested_voltage_mv = tip.max_supply_mv;
        config.max_fixed_pdo_index = tip.max_fixed_pdo_index;
        config
    }

    /// The number of sampling cycles per PID computation (at least one).
    pub const fn compute_divider(&self) -> u32 {
        if self.sampling_period_ms == 0 {
            return 1;
        }

        let divider = self.pid_compute_interval_ms / self.sampling_period_ms;
        if divider == 0 { 1 } else { divider }
    }
}
