//! User interface state machine, and the supervisory gate that enables heating.
//!
//! The interface starts in preview, where the heater is off. It only leaves preview once the
//! negotiated supply is in place and the bus carries the requested potential. Entering the main
//! screen enables heating.

pub mod view;

use core::cell::Cell;

use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Timer};

use crate::config::Config;
use crate::control::pid::Tunings;
use crate::control::state::ControllerState;
use crate::power::{PowerMonitor, PowerNegotiation, SupplyCheck, check_supply};
use crate::settings::{Settings, SettingsSignal};
use view::{Screen, View};

/// User and supervisor events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// Increase the selected value.
    Up,
    /// Decrease the selected value.
    Down,
    /// Confirm, or select the next item.
    Ok,
    /// Go to the next screen.
    Next,
    /// Go to the previous screen.
    Back,
    /// Go to the main screen.
    Home,
    /// Go to preview, which stops heating.
    EnterPreview,
}

/// The screens of the interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UiState {
    /// Temperature display and set temperature adjustment. Heating is enabled.
    Main,
    /// Live adjustment of the PID gains.
    PidTuning,
    /// Heating is disabled until the supply is verified.
    Preview,
}

impl UiState {
    /// The next screen, wrapping around.
    fn next(self) -> Self {
        match self {
            Self::Main => Self::PidTuning,
            Self::PidTuning => Self::Preview,
            Self::Preview => Self::Main,
        }
    }

    /// The previous screen, wrapping around.
    fn previous(self) -> Self {
        match self {
            Self::Main => Self::Preview,
            Self::PidTuning => Self::Main,
            Self::Preview => Self::PidTuning,
        }
    }
}

/// A PID gain that can be tuned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Gain {
    /// Proportional gain.
    Kp,
    /// Integral gain.
    Ki,
    /// Derivative gain.
    Kd,
}

impl Gain {
    /// The next gain, wrapping around.
    fn next(self) -> Self {
        match self {
            Self::Kp => Self::Ki,
            Self::Ki => Self::Kd,
            Self::Kd => Self::Kp,
        }
    }

    /// The change per button press.
    fn step(self) -> f32 {
        match self {
            Self::Kp | Self::Kd => 0.1,
            Self::Ki => 0.01,
        }
    }

    /// The gain's short name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Kp => "Kp",
            Self::Ki => "Ki",
            Self::Kd => "Kd",
        }
    }

    /// Read this gain from a set of gains.
    pub fn get(self, tunings: &Tunings) -> f32 {
        match self {
            Self::Kp => tunings.kp,
            Self::Ki => tunings.ki,
            Self::Kd => tunings.kd,
        }
    }

    /// Mutable access to this gain in a set of gains.
    fn get_mut(self, tunings: &mut Tunings) -> &mut f32 {
        match self {
            Self::Kp => &mut tunings.kp,
            Self::Ki => &mut tunings.ki,
            Self::Kd => &mut tunings.kd,
        }
    }
}

/// The extent of a redraw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Redraw {
    /// Update the contents.
    Normal,
    /// Clear and redraw everything, e.g. after a screen change.
    FullScreen,
}

/// Accepts events for the user interface.
#[allow(async_fn_in_trait)]
pub trait EventSink {
    /// Handle an event.
    async fn handle_event(&self, event: Event);
}

/// The user interface state machine.
pub struct App<'a, N, M> {
    /// Limits and steps.
    config: Config,
    /// The current screen.
    state: UiState,
    /// The gain that is being tuned.
    gain: Gain,
    /// The shared controller state.
    controller: &'a ControllerState,
    /// Supply negotiation status.
    negotiation: &'a N,
    /// Bus measurements.
    monitor: M,
    /// Receives changed settings for storage.
    settings: &'a SettingsSignal,
}

impl<'a, N: PowerNegotiation, M: PowerMonitor> App<'a, N, M> {
    /// Create the state machine in preview, with heating disabled.
    pub fn new(
        config: Config,
        controller: &'a ControllerState,
        negotiation: &'a N,
        monitor: M,
        settings: &'a SettingsSignal,
    ) -> Self {
        let app = Self {
            config,
            state: UiState::Preview,
            gain: Gain::Kp,
            controller,
            negotiation,
            monitor,
            settings,
        };
        app.enter(UiState::Preview);
        app
    }

    /// The current screen.
    pub fn state(&self) -> UiState {
        self.state
    }

    /// Handle an event and return the required redraw.
    pub async fn handle_event(&mut self, event: Event) -> Redraw {
        if self.state == UiState::Preview && event != Event::EnterPreview {
            return self.check_supply().await;
        }

        match event {
            Event::Next => self.transition(self.state.next()),
            Event::Back => self.transition(self.state.previous()),
            Event::Home => self.transition(UiState::Main),
            Event::EnterPreview => self.transition(UiState::Preview),
            Event::Up | Event::Down | Event::Ok => match self.state {
                UiState::Main => self.main_event(event),
                UiState::PidTuning => self.tuning_event(event),
                UiState::Preview => Redraw::Normal,
            },
        }
    }

    /// Periodic work on every frame.
    pub async fn tick(&mut self) -> Redraw {
        if self.state == UiState::Preview {
            self.check_supply().await
        } else {
            Redraw::Normal
        }
    }

    /// Take a snapshot for the display.
    pub async fn view(&mut self) -> View {
        let power_ready = self.negotiation.is_ready();
        let (bus_voltage, bus_power) = if power_ready {
            (
                self.monitor.bus_voltage().await.ok(),
                self.monitor.bus_power().await.ok(),
            )
        } else {
            (None, None)
        };

        View {
            state: self.state,
            temperature_deg_c: self.controller.temperature_deg_c(),
            setpoint_deg_c: self.controller.setpoint_deg_c(),
            target_deg_c: self.controller.target_deg_c(),
            sleeping: self.controller.is_sleeping(),
            heater_enabled: self.controller.is_heater_enabled(),
            duty_percent: self.controller.duty_percent(),
            tunings: self.controller.tunings(),
            selected_gain: self.gain,
            power_ready,
            bus_voltage,
            bus_power,
        }
    }

    /// Leave preview for the main screen if the supply is verified.
    ///
    /// An unused iron stays in preview until the posture supervisor sees it handled again.
    async fn check_supply(&mut self) -> Redraw {
        if self.controller.is_sleeping() {
            trace!("Iron unused, staying in preview");
            return Redraw::Normal;
        }

        match check_supply(
            self.negotiation,
            &mut self.monitor,
            self.config.voltage_tolerance_mv,
        )
        .await
        {
            SupplyCheck::Ready => self.transition(UiState::Main),
            SupplyCheck::Pending | SupplyCheck::Mismatch => Redraw::Normal,
        }
    }

    /// Change the screen. Entry actions only run on an actual change.
    fn transition(&mut self, state: UiState) -> Redraw {
        if state == self.state {
            return Redraw::Normal;
        }

        debug!("Screen {:?} -> {:?}", self.state, state);
        self.state = state;
        self.enter(state);
        Redraw::FullScreen
    }

    /// Entry actions of a screen.
    fn enter(&self, state: UiState) {
        match state {
            UiState::Main => {
                if self.controller.is_sleeping() {
                    info!("Heating enabled, sleeping");
                } else {
                    info!("Heating enabled");
                }
                self.controller.set_heater_enabled(true);
            }
            UiState::PidTuning => {}
            UiState::Preview => {
                self.controller.set_heater_enabled(false);
                self.controller.request_cold_junction_refresh();
                info!("Heating disabled");
            }
        }
    }

    /// Events on the main screen.
    fn main_event(&mut self, event: Event) -> Redraw {
        let step = self.config.setpoint_step_deg_c;

        match event {
            Event::Up => self.adjust_setpoint(step),
            Event::Down => self.adjust_setpoint(-step),
            Event::Ok => return self.transition(UiState::Preview),
            _ => {}
        }

        Redraw::Normal
    }

    /// Change the set temperature within the configured range.
    fn adjust_setpoint(&mut self, delta_deg_c: f32) {
        let current = self.controller.setpoint_deg_c();
        let setpoint = (current + delta_deg_c).clamp(
            self.config.min_setpoint_deg_c,
            self.config.max_setpoint_deg_c,
        );

        if setpoint != current {
            self.controller.set_setpoint_deg_c(setpoint);
            self.store_settings();
        }
    }

    /// Events on the PID tuning screen.
    fn tuning_event(&mut self, event: Event) -> Redraw {
        let step = match event {
            Event::Ok => {
                self.gain = self.gain.next();
                return Redraw::Normal;
            }
            Event::Up => self.gain.step(),
            Event::Down => -self.gain.step(),
            _ => return Redraw::Normal,
        };

        let mut tunings = self.controller.tunings();
        *self.gain.get_mut(&mut tunings) += step;

        if tunings.is_valid() {
            self.controller.set_tunings(tunings);
            self.store_settings();
        } else {
            debug!("Rejected {} change", self.gain.name());
        }

        Redraw::Normal
    }

    /// Hand the current settings to the storage task.
    fn store_settings(&self) {
        self.settings.signal(Settings::capture(self.controller));
    }
}

/// Collects redraw requests from any context, keeping the largest extent.
pub struct RedrawQueue {
    /// The pending request.
    pending: BlockingMutex<CriticalSectionRawMutex, Cell<Option<Redraw>>>,
    /// Wakes the draw loop.
    wake: Signal<CriticalSectionRawMutex, ()>,
}

impl RedrawQueue {
    /// Create an empty queue.
    pub const fn new() -> Self {
        Self {
            pending: BlockingMutex::new(Cell::new(None)),
            wake: Signal::new(),
        }
    }

    /// Request a redraw.
    pub fn request(&self, redraw: Redraw) {
        self.pending.lock(|pending| {
            let merged = pending.get().map_or(redraw, |previous| previous.max(redraw));
            pending.set(Some(merged));
        });
        self.wake.signal(());
    }

    /// Take the pending request without waiting.
    pub fn try_take(&self) -> Option<Redraw> {
        self.pending.lock(|pending| pending.take())
    }

    /// Wait for a request.
    pub async fn wait(&self) -> Redraw {
        loop {
            self.wake.wait().await;
            if let Some(redraw) = self.try_take() {
                return redraw;
            }
        }
    }
}

impl Default for RedrawQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// The shared user interface: the state machine behind a lock, and its redraw queue.
///
/// The lock is held for state transitions and for drawing, but never while waiting for the next
/// frame.
pub struct AppHandle<'a, N, M> {
    /// The state machine.
    app: Mutex<CriticalSectionRawMutex, App<'a, N, M>>,
    /// Pending redraws.
    redraw: RedrawQueue,
    /// Time between frames.
    frame_period: Duration,
}

impl<'a, N: PowerNegotiation, M: PowerMonitor> AppHandle<'a, N, M> {
    /// Wrap a state machine.
    pub fn new(app: App<'a, N, M>) -> Self {
        let frame_period = Duration::from_hz(u64::from(app.config.frame_rate_hz.max(1)));

        Self {
            app: Mutex::new(app),
            redraw: RedrawQueue::new(),
            frame_period,
        }
    }

    /// The current screen.
    pub async fn state(&self) -> UiState {
        self.app.lock().await.state()
    }

    /// Request a redraw outside of the frame rate.
    pub fn request_redraw(&self, redraw: Redraw) {
        self.redraw.request(redraw);
    }

    /// Draw frames at the frame rate, or earlier on request, forever.
    pub async fn run<S: Screen>(&self, screen: &mut S) -> ! {
        let mut full_screen = true;
        let mut next_frame = Instant::now();

        loop {
            let tick = match select(Timer::at(next_frame), self.redraw.wait()).await {
                Either::First(()) => true,
                Either::Second(redraw) => {
                    full_screen |= redraw == Redraw::FullScreen;
                    false
                }
            };
            next_frame = Instant::now() + self.frame_period;

            let mut app = self.app.lock().await;
            if tick {
                full_screen |= app.tick().await == Redraw::FullScreen;
            }

            let view = app.view().await;
            if screen.draw(&view, full_screen).await.is_err() {
                warn!("Display refresh failed");
            }
            full_screen = false;
        }
    }
}

impl<N: PowerNegotiation, M: PowerMonitor> EventSink for AppHandle<'_, N, M> {
    async fn handle_event(&self, event: Event) {
        let redraw = self.app.lock().await.handle_event(event).await;
        self.redraw.request(redraw);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::power::PowerStatus;
    use crate::power::tests::FakeMonitor;
    use embassy_futures::block_on;

    struct Fixture {
        config: Config,
        controller: ControllerState,
        status: PowerStatus,
        settings: SettingsSignal,
    }

    impl Fixture {
        fn new() -> Self {
            let config = Config::default();
            Self {
                config,
                controller: ControllerState::new(&config, Tunings::new(1.0, 0.05, 0.0)),
                status: PowerStatus::new(),
                settings: SettingsSignal::new(),
            }
        }

        fn app(&self, bus_mv: f32) -> App<'_, PowerStatus, FakeMonitor> {
            App::new(
                self.config,
                &self.controller,
                &self.status,
                FakeMonitor::at_millivolts(bus_mv),
                &self.settings,
            )
        }

        fn negotiated(&self, requested_mv: u32) {
            self.status.set_requested(requested_mv);
            self.status.set_ready();
        }
    }

    #[test]
    fn starts_in_preview_without_heating() {
        let fixture = Fixture::new();
        fixture.controller.set_heater_enabled(true);

        let app = fixture.app(15_000.0);
        assert_eq!(app.state(), UiState::Preview);
        assert!(!fixture.controller.is_heater_enabled());
        assert!(fixture.controller.take_cold_junction_refresh());
    }

    #[test]
    fn preview_waits_for_negotiation() {
        let fixture = Fixture::new();
        let mut app = fixture.app(15_000.0);

        for event in [Event::Up, Event::Home, Event::Next, Event::Ok] {
            assert_eq!(block_on(app.handle_event(event)), Redraw::Normal);
            assert_eq!(app.state(), UiState::Preview);
        }
        assert!(!fixture.controller.is_heater_enabled());
    }

    #[test]
    fn verified_supply_enables_heating() {
        let fixture = Fixture::new();
        let mut app = fixture.app(14_200.0);
        fixture.negotiated(15_000);

        assert_eq!(block_on(app.handle_event(Event::Down)), Redraw::FullScreen);
        assert_eq!(app.state(), UiState::Main);
        assert!(fixture.controller.is_heater_enabled());
        // The triggering event is consumed by the gate.
        assert_eq!(fixture.controller.setpoint_deg_c(), 350.0);
    }

    #[test]
    fn mismatched_supply_renegotiates() {
        let fixture = Fixture::new();
        let mut app = fixture.app(5_000.0);
        fixture.negotiated(15_000);

        assert_eq!(block_on(app.tick()), Redraw::Normal);
        assert_eq!(app.state(), UiState::Preview);
        assert!(!fixture.controller.is_heater_enabled());
        assert!(!fixture.status.is_ready());
    }

    #[test]
    fn tick_runs_gate() {
        let fixture = Fixture::new();
        let mut app = fixture.app(15_000.0);

        assert_eq!(block_on(app.tick()), Redraw::Normal);
        fixture.negotiated(15_000);
        assert_eq!(block_on(app.tick()), Redraw::FullScreen);
        assert_eq!(app.state(), UiState::Main);

        // No gate outside of preview.
        assert_eq!(block_on(app.tick()), Redraw::Normal);
    }

    #[test]
    fn unused_iron_stays_in_preview() {
        let fixture = Fixture::new();
        let mut app = fixture.app(15_000.0);
        fixture.negotiated(15_000);
        block_on(app.tick());
        assert_eq!(app.state(), UiState::Main);

        // Stopped by posture supervision.
        fixture.controller.set_sleeping(true);
        block_on(app.handle_event(Event::EnterPreview));
        assert!(!fixture.controller.is_heater_enabled());

        for _ in 0..10 {
            assert_eq!(block_on(app.tick()), Redraw::Normal);
        }
        for event in [Event::Ok, Event::Home, Event::Up] {
            block_on(app.handle_event(event));
        }
        assert_eq!(app.state(), UiState::Preview);
        assert!(!fixture.controller.is_heater_enabled());

        // Handled again.
        fixture.controller.set_sleeping(false);
        assert_eq!(block_on(app.tick()), Redraw::FullScreen);
        assert_eq!(app.state(), UiState::Main);
        assert!(fixture.controller.is_heater_enabled());
    }

    #[test]
    fn setpoint_adjustment() {
        let fixture = Fixture::new();
        let mut app = fixture.app(15_000.0);
        fixture.negotiated(15_000);
        block_on(app.handle_event(Event::Home));

        block_on(app.handle_event(Event::Up));
        assert_eq!(fixture.controller.setpoint_deg_c(), 360.0);
        assert_eq!(fixture.settings.try_take().map(|s| s.setpoint_deg_c), Some(360));

        for _ in 0..20 {
            block_on(app.handle_event(Event::Up));
        }
        assert_eq!(fixture.controller.setpoint_deg_c(), 450.0);

        for _ in 0..50 {
            block_on(app.handle_event(Event::Down));
        }
        assert_eq!(fixture.controller.setpoint_deg_c(), 100.0);
    }

    #[test]
    fn ok_stops_heating() {
        let fixture = Fixture::new();
        let mut app = fixture.app(15_000.0);
        fixture.negotiated(15_000);
        block_on(app.handle_event(Event::Home));
        fixture.controller.take_cold_junction_refresh();

        assert_eq!(block_on(app.handle_event(Event::Ok)), Redraw::FullScreen);
        assert_eq!(app.state(), UiState::Preview);
        assert!(!fixture.controller.is_heater_enabled());
        assert!(fixture.controller.take_cold_junction_refresh());
    }

    #[test]
    fn screens_wrap_around() {
        let fixture = Fixture::new();
        let mut app = fixture.app(15_000.0);
        fixture.negotiated(15_000);
        block_on(app.handle_event(Event::Home));

        block_on(app.handle_event(Event::Next));
        assert_eq!(app.state(), UiState::PidTuning);
        // Heating stays on while tuning.
        assert!(fixture.controller.is_heater_enabled());

        block_on(app.handle_event(Event::Back));
        assert_eq!(app.state(), UiState::Main);

        block_on(app.handle_event(Event::Back));
        assert_eq!(app.state(), UiState::Preview);
        assert!(!fixture.controller.is_heater_enabled());
    }

    #[test]
    fn enter_preview_is_idempotent() {
        let fixture = Fixture::new();
        let mut app = fixture.app(15_000.0);
        fixture.negotiated(15_000);
        block_on(app.handle_event(Event::Home));
        block_on(app.handle_event(Event::Next));

        assert_eq!(block_on(app.handle_event(Event::EnterPreview)), Redraw::FullScreen);
        assert_eq!(app.state(), UiState::Preview);
        assert_eq!(block_on(app.handle_event(Event::EnterPreview)), Redraw::Normal);
        assert_eq!(app.state(), UiState::Preview);
    }

    #[test]
    fn home_from_main_keeps_state() {
        let fixture = Fixture::new();
        let mut app = fixture.app(15_000.0);
        fixture.negotiated(15_000);
        block_on(app.handle_event(Event::Home));

        fixture.controller.set_heater_enabled(false);
        assert_eq!(block_on(app.handle_event(Event::Home)), Redraw::Normal);
        // No entry action without a change.
        assert!(!fixture.controller.is_heater_enabled());
    }

    #[test]
    fn pid_tuning() {
        let fixture = Fixture::new();
        let mut app = fixture.app(15_000.0);
        fixture.negotiated(15_000);
        block_on(app.handle_event(Event::Home));
        block_on(app.handle_event(Event::Next));

        block_on(app.handle_event(Event::Up));
        let kp = fixture.controller.tunings().kp;
        assert!((kp - 1.1).abs() < 1e-6);

        block_on(app.handle_event(Event::Ok));
        block_on(app.handle_event(Event::Down));
        let ki = fixture.controller.tunings().ki;
        assert!((ki - 0.04).abs() < 1e-6);
        assert!(fixture.settings.signaled());

        // Kd is zero, a decrease would make it negative.
        block_on(app.handle_event(Event::Ok));
        block_on(app.handle_event(Event::Down));
        assert_eq!(fixture.controller.tunings().kd, 0.0);

        // Back to Kp.
        block_on(app.handle_event(Event::Ok));
        assert_eq!(block_on(app.view()).selected_gain, Gain::Kp);
    }

    #[test]
    fn view_snapshot() {
        let fixture = Fixture::new();
        let mut app = fixture.app(15_000.0);

        let view = block_on(app.view());
        assert_eq!(view.state, UiState::Preview);
        assert!(!view.power_ready);
        assert_eq!(view.bus_voltage, None);

        fixture.negotiated(15_000);
        let view = block_on(app.view());
        assert!(view.power_ready);
        assert!(view.bus_voltage.is_some());
        assert_eq!(view.target_deg_c, 350.0);
    }

    #[test]
    fn redraw_requests_merge() {
        let queue = RedrawQueue::new();
        assert_eq!(queue.try_take(), None);

        queue.request(Redraw::FullScreen);
        queue.request(Redraw::Normal);
        assert_eq!(block_on(queue.wait()), Redraw::FullScreen);

        queue.request(Redraw::Normal);
        assert_eq!(queue.try_take(), Some(Redraw::Normal));
        assert_eq!(queue.try_take(), None);
    }

    #[test]
    fn handle_forwards_events() {
        let fixture = Fixture::new();
        let handle = AppHandle::new(fixture.app(15_000.0));
        fixture.negotiated(15_000);

        block_on(handle.handle_event(Event::Home));
        assert_eq!(block_on(handle.state()), UiState::Main);
        assert_eq!(handle.redraw.try_take(), Some(Redraw::FullScreen));

        block_on(handle.handle_event(Event::EnterPreview));
        assert_eq!(block_on(handle.state()), UiState::Preview);
        assert!(!fixture.controller.is_heater_enabled());
    }
}
