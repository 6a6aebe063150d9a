//! Posture supervisor: puts the iron to sleep when it is not in use.
//!
//! The iron is considered put down when it lies flat (little acceleration along the handle's
//! vertical axis) and is still (the magnitude of the acceleration is close to gravity). After
//! a short timeout, the controller regulates to the sleep setpoint. After a long timeout, the
//! user interface is forced into the preview screen, which switches the heater off.

use embassy_time::{Duration, Instant, Ticker};
use micromath::F32Ext;
use uom::si::acceleration::meter_per_second_squared;
use uom::si::f32::Acceleration;

use crate::SensorError;
use crate::control::state::ControllerState;
use crate::ui::{Event, EventSink};

/// Standard gravity in m/s².
const STANDARD_GRAVITY: f32 = 9.81;

/// The accelerometer on the handle.
#[allow(async_fn_in_trait)]
pub trait Accelerometer {
    /// Fetch and read one sample.
    async fn read(&mut self) -> Result<Acceleration3, SensorError>;
}

/// A three-axis acceleration sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Acceleration3 {
    /// Acceleration along the x axis.
    pub x: Acceleration,
    /// Acceleration along the y axis (vertical when the iron is held).
    pub y: Acceleration,
    /// Acceleration along the z axis.
    pub z: Acceleration,
}

impl Acceleration3 {
    /// Create a sample from values in m/s².
    pub fn from_meter_per_second_squared(x: f32, y: f32, z: f32) -> Self {
        Self {
            x: Acceleration::new::<meter_per_second_squared>(x),
            y: Acceleration::new::<meter_per_second_squared>(y),
            z: Acceleration::new::<meter_per_second_squared>(z),
        }
    }

    /// The magnitude in m/s².
    pub fn magnitude(&self) -> f32 {
        let [x, y, z] = [self.x, self.y, self.z].map(|a| a.get::<meter_per_second_squared>());
        (x * x + y * y + z * z).sqrt()
    }
}

/// Thresholds and timeouts of the posture supervisor.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PostureConfig {
    /// Vertical acceleration below which the iron is considered lying, in m/s².
    pub max_vertical_acceleration: f32,
    /// Accepted deviation of the magnitude from gravity while still, in m/s².
    pub gravity_tolerance: f32,
    /// Time at rest until the iron sleeps, in ms.
    pub sleep_timeout_ms: u32,
    /// Time at rest until the heater is stopped, in ms.
    pub stop_timeout_ms: u32,
    /// Accelerometer sampling period in ms.
    pub sample_period_ms: u32,
}

impl PostureConfig {
    /// Default thresholds.
    pub const fn default() -> Self {
        Self {
            max_vertical_acceleration: 3.0,
            gravity_tolerance: 1.0,
            sleep_timeout_ms: 5_000,
            stop_timeout_ms: 10 * 60 * 1_000,
            sample_period_ms: 200,
        }
    }
}

/// Whether the iron is in use, as seen by the posture supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PostureState {
    /// The iron is being handled.
    Active,
    /// The iron rests, but not for long.
    Drowsy(Instant),
    /// The iron rests long enough to sleep.
    Sleeping(Instant),
    /// The iron rests long enough to stop heating.
    Stopped(Instant),
}

impl PostureState {
    /// When the current rest period started.
    fn rest_start(&self) -> Option<Instant> {
        match self {
            Self::Active => None,
            Self::Drowsy(since) | Self::Sleeping(since) | Self::Stopped(since) => Some(*since),
        }
    }
}

/// The decision after one accelerometer sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Verdict {
    /// The sample could not be read, nothing changes.
    Skip,
    /// The iron is in use.
    Wake,
    /// The iron rests, within the sleep timeout.
    Rest,
    /// The iron rests beyond the sleep timeout.
    Sleep,
    /// The iron rests beyond the stop timeout.
    Stop,
}

/// Tracks rest periods and decides on sleep and stop.
#[derive(Debug, Clone)]
pub struct PostureSupervisor {
    /// Thresholds and timeouts.
    config: PostureConfig,
    /// The current posture.
    state: PostureState,
}

impl PostureSupervisor {
    /// Create a supervisor that considers the iron in use.
    pub fn new(config: PostureConfig) -> Self {
        Self {
            config,
            state: PostureState::Active,
        }
    }

    /// Whether a sample looks like the iron lies still.
    pub fn is_still(&self, sample: &Acceleration3) -> bool {
        let vertical = sample.y.get::<meter_per_second_squared>();

        vertical < self.config.max_vertical_acceleration
            && (sample.magnitude() - STANDARD_GRAVITY).abs() < self.config.gravity_tolerance
    }

    /// Evaluate one sample taken at `now`.
    ///
    /// A failed read keeps the rest timer running.
    pub fn update(&mut self, sample: Result<Acceleration3, SensorError>, now: Instant) -> Verdict {
        let sample = match sample {
            Ok(sample) => sample,
            Err(error) => {
                warn!("Accelerometer read failed: {:?}", error);
                return Verdict::Skip;
            }
        };

        if !self.is_still(&sample) {
            self.state = PostureState::Active;
            return Verdict::Wake;
        }

        let since = self.state.rest_start().unwrap_or(now);
        let resting = now.saturating_duration_since(since);

        let (state, verdict) = if resting >= Duration::from_millis(self.config.stop_timeout_ms.into()) {
            (PostureState::Stopped(since), Verdict::Stop)
        } else if resting >= Duration::from_millis(self.config.sleep_timeout_ms.into()) {
            (PostureState::Sleeping(since), Verdict::Sleep)
        } else {
            (PostureState::Drowsy(since), Verdict::Rest)
        };

        self.state = state;
        verdict
    }

    /// The current posture.
    pub fn state(&self) -> PostureState {
        self.state
    }
}

/// Apply a verdict to the controller state.
///
/// Returns `true` if heating must be stopped through the user interface.
pub fn apply(verdict: Verdict, state: &ControllerState) -> bool {
    match verdict {
        Verdict::Skip | Verdict::Rest => false,
        Verdict::Wake => {
            if state.set_sleeping(false) {
                info!("Iron in use");
            }
            false
        }
        Verdict::Sleep => {
            if !state.set_sleeping(true) {
                info!("Iron sleeps");
            }
            false
        }
        Verdict::Stop => {
            state.set_sleeping(true);
            true
        }
    }
}

/// Sample the accelerometer periodically and supervise sleep, forever.
///
/// While the stop timeout is exceeded, the preview event is sent on every sample. The user
/// interface ignores it once it is in preview.
pub async fn run<A: Accelerometer, E: EventSink>(
    mut supervisor: PostureSupervisor,
    accelerometer: &mut A,
    state: &ControllerState,
    events: &E,
) -> ! {
    let mut ticker = Ticker::every(Duration::from_millis(
        supervisor.config.sample_period_ms.max(1).into(),
    ));

    loop {
        let sample = accelerometer.read().await;
        let verdict = supervisor.update(sample, Instant::now());

        if apply(verdict, state) {
            debug!("Iron unused, stopping heater");
            events.handle_event(Event::EnterPreview).await;
        }

        ticker.next().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::control::pid::Tunings;

    fn lying() -> Result<Acceleration3, SensorError> {
        Ok(Acceleration3::from_meter_per_second_squared(0.3, 0.5, 9.78))
    }

    fn held() -> Result<Acceleration3, SensorError> {
        Ok(Acceleration3::from_meter_per_second_squared(1.0, 9.6, 1.2))
    }

    fn at(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    #[test]
    fn stillness_needs_flat_and_gravity() {
        let supervisor = PostureSupervisor::new(PostureConfig::default());
        assert!(supervisor.is_still(&lying().unwrap()));
        assert!(!supervisor.is_still(&held().unwrap()));

        // Flat, but shaken.
        let shaken = Acceleration3::from_meter_per_second_squared(4.0, 0.5, 12.0);
        assert!(!supervisor.is_still(&shaken));
    }

    #[test]
    fn short_rest_sleeps() {
        let mut supervisor = PostureSupervisor::new(PostureConfig::default());

        assert_eq!(supervisor.update(lying(), at(0)), Verdict::Rest);
        assert_eq!(supervisor.state(), PostureState::Drowsy(at(0)));
        assert_eq!(supervisor.update(lying(), at(4_800)), Verdict::Rest);
        assert_eq!(supervisor.update(lying(), at(5_000)), Verdict::Sleep);
        assert_eq!(supervisor.state(), PostureState::Sleeping(at(0)));
    }

    #[test]
    fn long_rest_stops() {
        let mut supervisor = PostureSupervisor::new(PostureConfig::default());

        supervisor.update(lying(), at(0));
        assert_eq!(supervisor.update(lying(), at(599_800)), Verdict::Sleep);
        assert_eq!(supervisor.update(lying(), at(600_000)), Verdict::Stop);
        assert_eq!(supervisor.update(lying(), at(600_200)), Verdict::Stop);
        assert_eq!(supervisor.state(), PostureState::Stopped(at(0)));
    }

    #[test]
    fn movement_resets() {
        let mut supervisor = PostureSupervisor::new(PostureConfig::default());

        supervisor.update(lying(), at(0));
        assert_eq!(supervisor.update(lying(), at(6_000)), Verdict::Sleep);
        assert_eq!(supervisor.update(held(), at(6_200)), Verdict::Wake);
        assert_eq!(supervisor.state(), PostureState::Active);

        // The timer starts over.
        assert_eq!(supervisor.update(lying(), at(6_400)), Verdict::Rest);
        assert_eq!(supervisor.update(lying(), at(11_000)), Verdict::Rest);
        assert_eq!(supervisor.update(lying(), at(11_400)), Verdict::Sleep);
    }

    #[test]
    fn read_failure_keeps_timer() {
        let mut supervisor = PostureSupervisor::new(PostureConfig::default());

        supervisor.update(lying(), at(0));
        assert_eq!(supervisor.update(Err(SensorError::ReadFailed), at(3_000)), Verdict::Skip);
        assert_eq!(supervisor.state(), PostureState::Drowsy(at(0)));
        assert_eq!(supervisor.update(lying(), at(5_000)), Verdict::Sleep);
    }

    #[test]
    fn verdicts_drive_sleep_flag() {
        let state = ControllerState::new(&Config::default(), Tunings::default());

        assert!(!apply(Verdict::Rest, &state));
        assert!(!state.is_sleeping());

        assert!(!apply(Verdict::Sleep, &state));
        assert!(state.is_sleeping());

        assert!(!apply(Verdict::Skip, &state));
        assert!(state.is_sleeping());

        assert!(apply(Verdict::Stop, &state));
        assert!(state.is_sleeping());

        assert!(!apply(Verdict::Wake, &state));
        assert!(!state.is_sleeping());
    }
}
