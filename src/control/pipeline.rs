//! The worker side of the sampling cycle: ADC, filter, calibration, PID and heater output.

use super::calibration::{FALLBACK_COLD_JUNCTION_DEG_C, TemperatureCalibration};
use super::filter::MovingAverage;
use super::heater::{Heater, HeaterPwm};
use super::pid::{Direction, Pid, Tunings};
use super::sensors::TipSensors;
use super::sequencer::Job;
use super::state::ControllerState;
use crate::{InitError, SensorError};
use crate::config::Config;

/// The worker stage of the current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Stage {
    /// Waiting for a job.
    Idle,
    /// Converting and filtering the tip sample.
    Sampling,
    /// Running the PID and driving the heater.
    Computing,
}

/// The outcome of one executed cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CycleReport {
    /// The cycle's sequence number.
    pub cycle: u32,
    /// The filtered ADC code, if the conversion succeeded.
    pub filtered: Option<u32>,
    /// The published tip temperature in °C (stale if the conversion failed).
    pub temperature_deg_c: f32,
    /// The PID was computed in this cycle.
    pub computed: bool,
    /// The applied heater duty cycle in percent.
    pub duty_percent: u8,
}

/// The sampling pipeline, owned by the worker.
pub struct Pipeline {
    /// Smooths raw tip samples.
    filter: MovingAverage,
    /// Converts filtered samples to temperature.
    calibration: TemperatureCalibration,
    /// The temperature controller.
    pid: Pid,
    /// The PID output that corresponds to full duty.
    pid_max_output: f32,
    /// The number of cycles per PID computation.
    compute_divider: u32,
    /// Cycles since the last PID computation.
    compute_count: u32,
    /// The sequence number of the last executed cycle.
    last_cycle: Option<u32>,
    /// Consecutive failed tip conversions after which the heater is switched off.
    max_tip_failures: u32,
    /// Consecutive failed tip conversions.
    tip_failures: u32,
    /// Heating was active in the last cycle.
    heater_was_enabled: bool,
    /// The worker stage.
    stage: Stage,
}

impl Pipeline {
    /// Create a pipeline for a tip calibration and initial gains.
    pub fn new(config: &Config, calibration: TemperatureCalibration, tunings: Tunings) -> Self {
        let mut pid = Pid::new(tunings, config.pid_compute_interval_ms, Direction::Direct);
        if !pid.set_output_limits(0.0, config.pid_max_output) {
            warn!("Invalid PID output limit {}", config.pid_max_output);
        }

        Self {
            filter: MovingAverage::new(config.filter_window),
            calibration,
            pid,
            pid_max_output: config.pid_max_output,
            compute_divider: config.compute_divider(),
            compute_count: 0,
            last_cycle: None,
            max_tip_failures: config.max_tip_failures,
            tip_failures: 0,
            heater_was_enabled: false,
            stage: Stage::Idle,
        }
    }

    /// Measure the cold junction and the first tip sample, and fill the filter with it.
    ///
    /// Fails if the tip ADC does not deliver, which means that the device is not ready.
    pub async fn prime<S: TipSensors>(
        &mut self,
        sensors: &mut S,
        state: &ControllerState,
    ) -> Result<(), InitError> {
        let cold_junction_deg_c = refresh_cold_junction(sensors, state).await;

        let raw = sensors.read_tip().await.map_err(|_| InitError::TipAdc)?;
        self.filter.set_value(raw);

        let temperature_deg_c = self.calibration.raw_to_temperature(raw, cold_junction_deg_c);
        state.set_temperature_deg_c(temperature_deg_c);
        self.pid.reset(temperature_deg_c);

        info!(
            "Primed at {} C (cold junction {} C)",
            temperature_deg_c, cold_junction_deg_c
        );
        Ok(())
    }

    /// Execute one sampling job.
    ///
    /// Returns `None` for jobs that are not newer than the last executed one.
    pub async fn run<S: TipSensors, P: HeaterPwm>(
        &mut self,
        job: Job,
        sensors: &mut S,
        heater: &Heater<P>,
        state: &ControllerState,
    ) -> Option<CycleReport> {
        if let Some(last_cycle) = self.last_cycle
            && (job.cycle.wrapping_sub(last_cycle) as i32) <= 0
        {
            debug!("Skipping stale cycle {}", job.cycle);
            return None;
        }
        self.last_cycle = Some(job.cycle);

        self.stage = Stage::Sampling;
        if state.take_cold_junction_refresh() {
            refresh_cold_junction(sensors, state).await;
        }

        let mut tip_fault = false;
        let filtered = match sensors.read_tip().await {
            Ok(raw) => {
                self.tip_failures = 0;
                Some(self.filter.compute(raw))
            }
            Err(error) => {
                warn!("Tip conversion failed: {:?}", error);
                self.tip_failures = self.tip_failures.saturating_add(1);

                // Implausible data (open thermocouple) or persistent failures leave the
                // temperature unknown, so the heater must not run open loop.
                tip_fault =
                    error == SensorError::InvalidData || self.tip_failures >= self.max_tip_failures;
                None
            }
        };

        if let Some(filtered) = filtered {
            let temperature_deg_c = self
                .calibration
                .raw_to_temperature(filtered, state.cold_junction_deg_c());
            state.set_temperature_deg_c(temperature_deg_c);
        }
        let temperature_deg_c = state.temperature_deg_c();

        self.stage = Stage::Computing;
        self.apply_tunings(state.tunings());

        let enabled = state.is_heater_enabled() && !tip_fault;
        if enabled && !self.heater_was_enabled {
            self.pid.reset(temperature_deg_c);
        }
        self.heater_was_enabled = enabled;

        self.compute_count += 1;
        let due = self.compute_count >= self.compute_divider;
        if due {
            self.compute_count = 0;
        }

        let computed = enabled && due && filtered.is_some();
        if computed {
            self.pid.compute(temperature_deg_c, state.target_deg_c());
        }

        let duty_percent = heater.drive(self.pid.output(), self.pid_max_output, enabled);
        state.set_duty_percent(duty_percent);
        self.stage = Stage::Idle;

        Some(CycleReport {
            cycle: job.cycle,
            filtered,
            temperature_deg_c,
            computed,
            duty_percent,
        })
    }

    /// Apply gains that were changed by the user interface.
    fn apply_tunings(&mut self, tunings: Tunings) {
        if tunings == self.pid.tunings() {
            return;
        }

        if self.pid.set_tunings(tunings) {
            info!(
                "PID gains: kp {}, ki {}, kd {}",
                tunings.kp, tunings.ki, tunings.kd
            );
        } else {
            debug!("Rejected PID gains");
        }
    }

    /// The worker stage.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// The temperature controller.
    pub fn pid(&self) -> &Pid {
        &self.pid
    }
}

/// Measure and publish the cold junction temperature, falling back to a fixed value.
async fn refresh_cold_junction<S: TipSensors>(sensors: &mut S, state: &ControllerState) -> f32 {
    let deg_c = match sensors.read_die_temperature().await {
        Ok(deg_c) => deg_c,
        Err(error) => {
            warn!("Die temperature unavailable: {:?}", error);
            FALLBACK_COLD_JUNCTION_DEG_C
        }
    };

    state.set_cold_junction_deg_c(deg_c);
    deg_c
}
