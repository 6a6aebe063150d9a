//! PID controller with a fixed sample time.
//!
//! The derivative acts on the measurement rather than on the error, so that setpoint steps do
//! not kick the output. The integral is clamped to the output limits (anti-windup).

use serde::{Deserialize, Serialize};

/// The sign of the control action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// The output rises when the input is below the setpoint (heating).
    Direct,
    /// The output rises when the input is above the setpoint (cooling).
    Reverse,
}

/// User-facing PID gains, independent of the sample time.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Tunings {
    /// Proportional gain.
    pub kp: f32,
    /// Integral gain per second.
    pub ki: f32,
    /// Derivative gain in seconds.
    pub kd: f32,
}

impl Tunings {
    /// Create a set of gains.
    pub const fn new(kp: f32, ki: f32, kd: f32) -> Self {
        Self { kp, ki, kd }
    }

    /// Gains are usable if they are finite and not negative.
    pub fn is_valid(&self) -> bool {
        [self.kp, self.ki, self.kd]
            .iter()
            .all(|gain| gain.is_finite() && *gain >= 0.0)
    }
}

/// A PID controller.
#[derive(Debug, Clone)]
pub struct Pid {
    /// Proportional gain, signed by direction.
    kp: f32,
    /// Integral gain per sample, signed by direction.
    ki: f32,
    /// Derivative gain per sample, signed by direction.
    kd: f32,
    /// The gains as they were set.
    tunings: Tunings,
    /// Sign of the control action.
    direction: Direction,
    /// The sample time in ms.
    sample_time_ms: u32,

    /// Lower output limit.
    out_min: f32,
    /// Upper output limit.
    out_max: f32,

    /// Integral term, within the output limits.
    output_sum: f32,
    /// The input of the previous computation.
    last_input: f32,
    /// The last output, within the output limits.
    output: f32,
}

impl Pid {
    /// Create a controller with output limits `[0, 100]`.
    ///
    /// A sample time of zero is treated as 1 ms. Invalid gains leave all gains at zero.
    pub fn new(tunings: Tunings, sample_time_ms: u32, direction: Direction) -> Self {
        let mut pid = Self {
            kp: 0.0,
            ki: 0.0,
            kd: 0.0,
            tunings: Tunings::default(),
            direction: Direction::Direct,
            sample_time_ms: sample_time_ms.max(1),
            out_min: 0.0,
            out_max: 100.0,
            output_sum: 0.0,
            last_input: 0.0,
            output: 0.0,
        };

        pid.set_controller_direction(direction);
        pid.set_tunings(tunings);
        pid
    }

    /// Run one computation and return the new output.
    ///
    /// Must be called once per sample time.
    pub fn compute(&mut self, input: f32, setpoint: f32) -> f32 {
        let error = setpoint - input;
        let d_input = input - self.last_input;

        self.output_sum = (self.output_sum + self.ki * error).clamp(self.out_min, self.out_max);
        self.output =
            (self.kp * error + self.output_sum - self.kd * d_input).clamp(self.out_min, self.out_max);
        self.last_input = input;

        self.output
    }

    /// Set the output limits. Ignored (returns `false`) unless `min < max`.
    pub fn set_output_limits(&mut self, min: f32, max: f32) -> bool {
        if !(min < max) {
            return false;
        }

        self.out_min = min;
        self.out_max = max;
        self.output = self.output.clamp(min, max);
        self.output_sum = self.output_sum.clamp(min, max);
        true
    }

    /// Set new gains. Ignored (returns `false`) if any gain is negative or not finite.
    pub fn set_tunings(&mut self, tunings: Tunings) -> bool {
        if !tunings.is_valid() {
            return false;
        }

        self.tunings = tunings;

        let sample_time_s = self.sample_time_ms as f32 / 1000.0;
        let sign = match self.direction {
            Direction::Direct => 1.0,
            Direction::Reverse => -1.0,
        };

        self.kp = sign * tunings.kp;
        self.ki = sign * tunings.ki * sample_time_s;
        self.kd = sign * tunings.kd / sample_time_s;
        true
    }

    /// Change the sample time, rescaling the time-dependent gains. Zero is ignored.
    pub fn set_sample_time(&mut self, sample_time_ms: u32) {
        if sample_time_ms == 0 {
            return;
        }

        let ratio = sample_time_ms as f32 / self.sample_time_ms as f32;
        self.ki *= ratio;
        self.kd /= ratio;
        self.sample_time_ms = sample_time_ms;
    }

    /// Change the sign of the control action.
    pub fn set_controller_direction(&mut self, direction: Direction) {
        if direction != self.direction {
            self.kp = -self.kp;
            self.ki = -self.ki;
            self.kd = -self.kd;
        }
        self.direction = direction;
    }

    /// Restart from `input` without integral history, e.g. when heating is switched back on.
    pub fn reset(&mut self, input: f32) {
        self.output_sum = 0.0_f32.clamp(self.out_min, self.out_max);
        self.output = self.output_sum;
        self.last_input = input;
    }

    /// The gains as they were set.
    pub fn tunings(&self) -> Tunings {
        self.tunings
    }

    /// The sign of the control action.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The last output.
    pub fn output(&self) -> f32 {
        self.output
    }

    /// The integral term.
    pub fn integral(&self) -> f32 {
        self.output_sum
    }

    /// The sample time in ms.
    pub fn sample_time_ms(&self) -> u32 {
        self.sample_time_ms
    }

    /// The output limits `(min, max)`.
    pub fn output_limits(&self) -> (f32, f32) {
        (self.out_min, self.out_max)
    }
}
