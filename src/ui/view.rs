//! A snapshot of what the display shows, and its text.

use core::fmt::Write;

use micromath::F32Ext;
use uom::si::electric_potential::volt;
use uom::si::f32::{ElectricPotential, Power};
use uom::si::power::watt;

use super::{Gain, UiState};
use crate::control::pid::Tunings;

/// Characters per text line.
pub const LINE_LENGTH: usize = 24;

/// A line of text.
pub type Line = heapless::String<LINE_LENGTH>;

/// Temperatures below this are shown as "Cold".
const COLD_THRESHOLD_DEG_C: f32 = 40.0;

/// Renders views.
#[allow(async_fn_in_trait)]
pub trait Screen {
    /// Drawing errors.
    type Error;

    /// Draw a view. With `full_screen`, the whole screen is cleared first.
    async fn draw(&mut self, view: &View, full_screen: bool) -> Result<(), Self::Error>;
}

/// Everything that the display shows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct View {
    /// The current screen.
    pub state: UiState,
    /// Tip temperature in °C.
    pub temperature_deg_c: f32,
    /// Operational set temperature in °C.
    pub setpoint_deg_c: f32,
    /// The set temperature that is regulated to, in °C.
    pub target_deg_c: f32,
    /// The iron is not in use.
    pub sleeping: bool,
    /// Heating is allowed.
    pub heater_enabled: bool,
    /// Heater duty cycle in percent.
    pub duty_percent: u8,
    /// PID gains.
    pub tunings: Tunings,
    /// The gain that is being tuned.
    pub selected_gain: Gain,
    /// The supply is negotiated.
    pub power_ready: bool,
    /// Measured bus potential.
    pub bus_voltage: Option<ElectricPotential>,
    /// Measured bus power.
    pub bus_power: Option<Power>,
}

impl View {
    /// The screen's title.
    pub fn title(&self) -> &'static str {
        match self.state {
            UiState::Main => "Main",
            UiState::PidTuning => "PID tuning",
            UiState::Preview => "Preview",
        }
    }

    /// The tip temperature.
    pub fn temperature_line(&self) -> Line {
        let mut line = Line::new();

        if self.temperature_deg_c.is_nan() {
            line.push_str("---").ok();
        } else if self.temperature_deg_c < COLD_THRESHOLD_DEG_C {
            line.push_str("Cold").ok();
        } else {
            write!(line, "{} C", self.temperature_deg_c.round() as i16).ok();
        }

        line
    }

    /// Set temperature, duty cycle and sleep state.
    pub fn setpoint_line(&self) -> Line {
        let mut line = Line::new();
        write!(line, "Set {}", self.target_deg_c.round() as i16).ok();

        if self.sleeping {
            line.push_str(" Sleep").ok();
        } else if self.heater_enabled {
            write!(line, " {}%", self.duty_percent).ok();
        } else {
            line.push_str(" Off").ok();
        }

        line
    }

    /// One gain, marked if it is selected for tuning.
    pub fn gain_line(&self, gain: Gain) -> Line {
        let mut line = Line::new();
        let marker = if gain == self.selected_gain { '>' } else { ' ' };
        write!(line, "{}{} {:.2}", marker, gain.name(), gain.get(&self.tunings)).ok();
        line
    }

    /// Negotiation state and bus measurements.
    pub fn supply_line(&self) -> Line {
        let mut line = Line::new();

        if !self.power_ready {
            line.push_str("PD waiting").ok();
            return line;
        }

        match self.bus_voltage {
            Some(voltage) => write!(line, "{:.1} V", voltage.get::<volt>()).ok(),
            None => line.push_str("-- V").ok(),
        };

        if let Some(power) = self.bus_power {
            write!(line, " {} W", power.get::<watt>().round() as i16).ok();
        }

        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view() -> View {
        View {
            state: UiState::Main,
            temperature_deg_c: 312.4,
            setpoint_deg_c: 350.0,
            target_deg_c: 350.0,
            sleeping: false,
            heater_enabled: true,
            duty_percent: 45,
            tunings: Tunings::new(8.0, 2.0, 0.25),
            selected_gain: Gain::Ki,
            power_ready: true,
            bus_voltage: Some(ElectricPotential::new::<volt>(19.84)),
            bus_power: Some(Power::new::<watt>(24.6)),
        }
    }

    #[test]
    fn temperature_text() {
        let mut view = view();
        assert_eq!(view.temperature_line().as_str(), "312 C");

        view.temperature_deg_c = 30.0;
        assert_eq!(view.temperature_line().as_str(), "Cold");

        view.temperature_deg_c = f32::NAN;
        assert_eq!(view.temperature_line().as_str(), "---");
    }

    #[test]
    fn setpoint_text() {
        let mut view = view();
        assert_eq!(view.setpoint_line().as_str(), "Set 350 45%");

        view.sleeping = true;
        view.target_deg_c = 150.0;
        assert_eq!(view.setpoint_line().as_str(), "Set 150 Sleep");

        view.sleeping = false;
        view.heater_enabled = false;
        assert_eq!(view.setpoint_line().as_str(), "Set 150 Off");
    }

    #[test]
    fn gain_text() {
        let view = view();
        assert_eq!(view.gain_line(Gain::Kp).as_str(), " Kp 8.00");
        assert_eq!(view.gain_line(Gain::Ki).as_str(), ">Ki 2.00");
        assert_eq!(view.gain_line(Gain::Kd).as_str(), " Kd 0.25");
    }

    #[test]
    fn supply_text() {
        let mut view = view();
        assert_eq!(view.supply_line().as_str(), "19.8 V 25 W");

        view.bus_power = None;
        view.bus_voltage = None;
        assert_eq!(view.supply_line().as_str(), "-- V");

        view.power_ready = false;
        assert_eq!(view.supply_line().as_str(), "PD waiting");
    }
}
