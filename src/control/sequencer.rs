//! Alarm sequencing of the sampling cycle.
//!
//! Each cycle starts with the sampling alarm, which switches off the heater, so that the
//! thermocouple can be read without the heater current coupling into it. The settle alarm fires
//! after the amplifier has settled, and hands the cycle to the sampling worker.
//!
//! ```text
//!  sample alarm           settle alarm                      next sample alarm
//!      |--- heater off ---|--- worker: ADC, filter, PID ---|
//! ```
//!
//! Cycles carry sequence numbers, so that the worker runs each cycle at most once.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant};

use crate::config::Config;

/// The alarms of a sampling cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Alarm {
    /// Start of a cycle.
    Sample,
    /// The analog front end has settled.
    Settle,
}

/// The alarm-side state of the sampling cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SequencerState {
    /// No cycle is in the alarm stage.
    Idle,
    /// The heater is off, waiting for the settle alarm.
    HeaterOffSettling {
        /// The cycle's sequence number.
        cycle: u32,
    },
}

/// A sampling job for the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Job {
    /// The cycle's sequence number.
    pub cycle: u32,
}

/// What the alarm context has to do after an alarm.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Actions {
    /// Switch the heater off immediately.
    pub heater_off: bool,
    /// Replace the worker's pending job with this one.
    pub submit: Option<Job>,
}

/// Sequences the sampling and settle alarms.
#[derive(Debug, Clone)]
pub struct Sequencer {
    /// The time between sampling alarms.
    period: Duration,
    /// The time between a sampling alarm and its settle alarm.
    settle_delay: Duration,
    /// The alarm stage of the current cycle.
    state: SequencerState,
    /// When the next sampling alarm fires.
    sample_deadline: Option<Instant>,
    /// When the pending settle alarm fires.
    settle_deadline: Option<Instant>,
    /// Sequence number of the most recent cycle.
    cycle: u32,
    /// The number of cycles that were dropped before their settle alarm.
    dropped: u32,
}

impl Sequencer {
    /// Create a sequencer with the configured timing. No alarm is armed.
    pub fn new(config: &Config) -> Self {
        Self {
            period: Duration::from_millis(u64::from(config.sampling_period_ms.max(1))),
            settle_delay: Duration::from_micros(u64::from(config.settle_delay_us)),
            state: SequencerState::Idle,
            sample_deadline: None,
            settle_deadline: None,
            cycle: 0,
            dropped: 0,
        }
    }

    /// Arm the first sampling alarm, one period from `now`.
    pub fn start(&mut self, now: Instant) {
        self.sample_deadline = Some(now + self.period);
    }

    /// The next alarm to wait for.
    ///
    /// On a tie, the settle alarm goes first, so that the earlier cycle is handed over before a
    /// new one begins.
    pub fn next_alarm(&self) -> Option<(Alarm, Instant)> {
        match (self.settle_deadline, self.sample_deadline) {
            (Some(settle), Some(sample)) if sample < settle => Some((Alarm::Sample, sample)),
            (Some(settle), _) => Some((Alarm::Settle, settle)),
            (None, Some(sample)) => Some((Alarm::Sample, sample)),
            (None, None) => None,
        }
    }

    /// Handle an alarm that fired at `at`.
    ///
    /// Follow-up alarms are armed relative to `at`, so the cycle keeps a fixed cadence.
    pub fn handle_alarm(&mut self, alarm: Alarm, at: Instant) -> Actions {
        match alarm {
            Alarm::Sample => {
                if let SequencerState::HeaterOffSettling { cycle } = self.state {
                    self.dropped = self.dropped.wrapping_add(1);
                    warn!("Sampling cycle {} dropped before settling", cycle);
                }

                self.cycle = self.cycle.wrapping_add(1);
                self.state = SequencerState::HeaterOffSettling { cycle: self.cycle };
                self.settle_deadline = Some(at + self.settle_delay);
                self.sample_deadline = Some(at + self.period);

                Actions {
                    heater_off: true,
                    submit: None,
                }
            }
            Alarm::Settle => {
                self.settle_deadline = None;
                self.state = SequencerState::Idle;

                Actions {
                    heater_off: false,
                    submit: Some(Job { cycle: self.cycle }),
                }
            }
        }
    }

    /// The alarm stage of the current cycle.
    pub fn state(&self) -> SequencerState {
        self.state
    }

    /// The sequence number of the most recent cycle.
    pub fn cycle(&self) -> u32 {
        self.cycle
    }

    /// The number of cycles that were dropped before their settle alarm.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }
}

/// A single-slot mailbox from the alarm context to the sampling worker.
///
/// At most one job is pending. Submitting cancels a job that did not start yet.
pub struct WorkQueue {
    /// The pending job.
    slot: Signal<CriticalSectionRawMutex, Job>,
}

impl WorkQueue {
    /// Create an empty queue.
    pub const fn new() -> Self {
        Self { slot: Signal::new() }
    }

    /// Replace any pending job with `job`.
    pub fn submit(&self, job: Job) {
        self.slot.signal(job);
    }

    /// Drop the pending job, if any.
    pub fn cancel(&self) {
        self.slot.reset();
    }

    /// Whether a job is pending.
    pub fn is_pending(&self) -> bool {
        self.slot.signaled()
    }

    /// Take the pending job without waiting.
    pub fn try_take(&self) -> Option<Job> {
        self.slot.try_take()
    }

    /// Wait for the next job.
    pub async fn wait(&self) -> Job {
        self.slot.wait().await
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        let mut config = Config::default();
        config.sampling_period_ms = 50;
        config.settle_delay_us = 500;
        config
    }

    #[test]
    fn cycle_sequence() {
        let mut sequencer = Sequencer::new(&config());
        let t0 = Instant::from_millis(1000);
        sequencer.start(t0);

        let (alarm, at) = sequencer.next_alarm().unwrap();
        assert_eq!(alarm, Alarm::Sample);
        assert_eq!(at, t0 + Duration::from_millis(50));

        let actions = sequencer.handle_alarm(alarm, at);
        assert!(actions.heater_off);
        assert_eq!(actions.submit, None);
        assert_eq!(sequencer.state(), SequencerState::HeaterOffSettling { cycle: 1 });

        let (alarm, settle_at) = sequencer.next_alarm().unwrap();
        assert_eq!(alarm, Alarm::Settle);
        assert_eq!(settle_at, at + Duration::from_micros(500));

        let actions = sequencer.handle_alarm(alarm, settle_at);
        assert!(!actions.heater_off);
        assert_eq!(actions.submit, Some(Job { cycle: 1 }));
        assert_eq!(sequencer.state(), SequencerState::Idle);

        // The next sampling alarm is measured from the previous one.
        let (alarm, next_at) = sequencer.next_alarm().unwrap();
        assert_eq!(alarm, Alarm::Sample);
        assert_eq!(next_at, at + Duration::from_millis(50));
    }

    #[test]
    fn late_settle_drops_cycle() {
        let mut sequencer = Sequencer::new(&config());
        let t0 = Instant::from_millis(0);

        sequencer.handle_alarm(Alarm::Sample, t0);
        sequencer.handle_alarm(Alarm::Sample, t0 + Duration::from_millis(50));
        assert_eq!(sequencer.dropped(), 1);
        assert_eq!(sequencer.state(), SequencerState::HeaterOffSettling { cycle: 2 });

        let actions = sequencer.handle_alarm(Alarm::Settle, t0 + Duration::from_millis(51));
        assert_eq!(actions.submit, Some(Job { cycle: 2 }));
    }

    #[test]
    fn settle_wins_tie() {
        let mut config = config();
        config.settle_delay_us = 50_000;
        let mut sequencer = Sequencer::new(&config);

        sequencer.handle_alarm(Alarm::Sample, Instant::from_millis(0));
        assert_eq!(
            sequencer.next_alarm(),
            Some((Alarm::Settle, Instant::from_millis(50)))
        );
    }

    #[test]
    fn unstarted_sequencer_has_no_alarm() {
        assert_eq!(Sequencer::new(&config()).next_alarm(), None);
    }

    #[test]
    fn queue_keeps_latest_job() {
        let queue = WorkQueue::new();
        assert!(!queue.is_pending());

        queue.submit(Job { cycle: 1 });
        queue.submit(Job { cycle: 2 });
        assert!(queue.is_pending());
        assert_eq!(queue.try_take(), Some(Job { cycle: 2 }));
        assert_eq!(queue.try_take(), None);

        queue.submit(Job { cycle: 3 });
        queue.cancel();
        assert_eq!(queue.try_take(), None);
    }
}
