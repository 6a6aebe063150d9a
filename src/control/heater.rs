//! Heater output: PID output to PWM duty cycle.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

/// The PWM channel that switches the heating element.
pub trait HeaterPwm {
    /// Set the duty cycle in percent (0 to 100).
    fn set_duty_percent(&mut self, percent: u8);
}

/// Map a PID output to a duty cycle in percent.
///
/// The output is scaled relative to `pid_max_output`, clamped to `[0, 1]` and then truncated to
/// a whole percentage of `max_duty_percent`.
pub fn duty_for(output: f32, pid_max_output: f32, max_duty_percent: u8) -> u8 {
    if !(pid_max_output > 0.0) {
        return 0;
    }

    let ratio = (output / pid_max_output).clamp(0.0, 1.0);
    (ratio * f32::from(max_duty_percent)) as u8
}

/// The heater, shared between the alarm context (switches off) and the worker (sets duty).
pub struct Heater<P> {
    /// The PWM channel.
    pwm: Mutex<CriticalSectionRawMutex, RefCell<P>>,
    /// Maximum duty cycle in percent.
    max_duty_percent: u8,
}

impl<P: HeaterPwm> Heater<P> {
    /// Take ownership of the PWM channel. The heater starts switched off.
    pub fn new(mut pwm: P, max_duty_percent: u8) -> Self {
        pwm.set_duty_percent(0);

        Self {
            pwm: Mutex::new(RefCell::new(pwm)),
            max_duty_percent: max_duty_percent.min(100),
        }
    }

    /// Set the duty cycle, clamped to the maximum. Returns the applied duty cycle.
    pub fn set_duty_percent(&self, percent: u8) -> u8 {
        let percent = percent.min(self.max_duty_percent);
        self.with_pwm(|pwm| pwm.set_duty_percent(percent));
        percent
    }

    /// Switch the heater off.
    pub fn off(&self) {
        self.set_duty_percent(0);
    }

    /// Drive the heater from a PID output, or switch it off if heating is disabled.
    pub fn drive(&self, output: f32, pid_max_output: f32, enabled: bool) -> u8 {
        let percent = if enabled {
            duty_for(output, pid_max_output, self.max_duty_percent)
        } else {
            0
        };

        self.set_duty_percent(percent)
    }

    /// The maximum duty cycle in percent.
    pub fn max_duty_percent(&self) -> u8 {
        self.max_duty_percent
    }

    /// Run a closure on the PWM channel, under the lock.
    pub fn with_pwm<R>(&self, f: impl FnOnce(&mut P) -> R) -> R {
        self.pwm.lock(|pwm| f(&mut pwm.borrow_mut()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Records the duty cycles it was driven with.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingPwm {
        pub(crate) duty: u8,
        pub(crate) writes: usize,
    }

    impl HeaterPwm for RecordingPwm {
        fn set_duty_percent(&mut self, percent: u8) {
            self.duty = percent;
            self.writes += 1;
        }
    }

    #[test]
    fn duty_mapping() {
        assert_eq!(duty_for(0.0, 450.0, 90), 0);
        assert_eq!(duty_for(225.0, 450.0, 90), 45);
        assert_eq!(duty_for(450.0, 450.0, 90), 90);
        assert_eq!(duty_for(100.0, 450.0, 90), 20);
    }

    #[test]
    fn duty_mapping_clamps() {
        assert_eq!(duty_for(-50.0, 450.0, 90), 0);
        assert_eq!(duty_for(1e9, 450.0, 90), 90);
        assert_eq!(duty_for(f32::NAN, 450.0, 90), 0);
        assert_eq!(duty_for(100.0, 0.0, 90), 0);
    }

    #[test]
    fn duty_is_limited() {
        let heater = Heater::new(RecordingPwm::default(), 90);
        assert_eq!(heater.with_pwm(|pwm| pwm.writes), 1);

        assert_eq!(heater.set_duty_percent(100), 90);
        assert_eq!(heater.with_pwm(|pwm| pwm.duty), 90);

        heater.off();
        assert_eq!(heater.with_pwm(|pwm| pwm.duty), 0);
    }

    #[test]
    fn disabled_heater_is_off() {
        let heater = Heater::new(RecordingPwm::default(), 90);
        assert_eq!(heater.drive(450.0, 450.0, false), 0);
        assert_eq!(heater.drive(450.0, 450.0, true), 90);
        assert_eq!(heater.with_pwm(|pwm| pwm.duty), 90);
    }
}
