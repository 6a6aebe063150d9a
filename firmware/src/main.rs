//! Soldering iron firmware for the STM32G431.
//!
//! The sampling alarms run on a high-priority interrupt executor, so that the heater is switched
//! off before each measurement, no matter what the other tasks do.
#![no_std]
#![no_main]
#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

// This must go first, so that the other modules see `split_resources!`.
#[macro_use]
mod resources;
mod accelerometer;
mod buttons;
mod display;
mod storage;
mod supply;
mod tip;

use defmt::{info, unwrap};
use embassy_executor::{InterruptExecutor, Spawner};
use embassy_stm32::interrupt::{InterruptExt, Priority};
use embassy_stm32::{bind_interrupts, i2c, interrupt, peripherals, ucpd};
use static_cell::StaticCell;
use tipctl::control::heater::Heater;
use tipctl::control::library::{self, TipProperties};
use tipctl::control::pipeline::Pipeline;
use tipctl::control::sequencer::{Sequencer, WorkQueue};
use tipctl::posture::PostureSupervisor;
use tipctl::power::PowerStatus;
use tipctl::settings::{self, Settings, SettingsSignal};
use tipctl::ui::{App, AppHandle};
use tipctl::{Config, ControllerState};
use {defmt_rtt as _, panic_probe as _};

use crate::accelerometer::Lis2dw12;
use crate::display::Display;
use crate::resources::*;
use crate::storage::FlashStorage;
use crate::supply::BusMonitor;
use crate::tip::{TipAdc, TipHeater};

bind_interrupts!(struct Irqs {
    UCPD1 => ucpd::InterruptHandler<peripherals::UCPD1>;
    I2C1_EV => i2c::EventInterruptHandler<peripherals::I2C1>;
    I2C1_ER => i2c::ErrorInterruptHandler<peripherals::I2C1>;
});

/// The tip family that this build drives.
#[cfg(feature = "t12")]
const TIP: &TipProperties = &library::T12;
/// The tip family that this build drives.
#[cfg(all(feature = "c245", not(feature = "t12")))]
const TIP: &TipProperties = &library::C245;
/// The tip family that this build drives.
#[cfg(all(feature = "c210", not(any(feature = "t12", feature = "c245"))))]
const TIP: &TipProperties = &library::C210;

#[cfg(not(any(feature = "t12", feature = "c245", feature = "c210")))]
compile_error!("Select a tip family: feature \"t12\", \"c245\" or \"c210\"");

/// Controller configuration, with the tip's supply limits.
pub const CONFIG: Config = Config::for_tip(TIP);

/// The user interface, as shared between tasks.
pub type UiHandle = AppHandle<'static, PowerStatus, BusMonitor>;

/// State shared between the control loop, posture supervision and the user interface.
static CONTROLLER_STATE: ControllerState = ControllerState::new(&CONFIG, TIP.tunings);

/// Hands sampling cycles from the alarms to the worker.
static WORK_QUEUE: WorkQueue = WorkQueue::new();

/// Supply negotiation status.
static POWER_STATUS: PowerStatus = PowerStatus::new();

/// Signals changed settings for storage.
static SETTINGS_SIG: SettingsSignal = SettingsSignal::new();

/// The heater, shared between the alarms and the worker.
static HEATER: StaticCell<Heater<TipHeater>> = StaticCell::new();

/// The user interface.
static APP: StaticCell<UiHandle> = StaticCell::new();

/// Runs the sampling alarms.
static EXECUTOR_HIGH: InterruptExecutor = InterruptExecutor::new();

#[interrupt]
#[allow(non_snake_case, clippy::missing_docs_in_private_items)]
unsafe fn UART4() {
    unsafe { EXECUTOR_HIGH.on_interrupt() }
}

/// Switches the heater off ahead of measurements, and hands cycles to the worker.
#[embassy_executor::task]
async fn alarm_task(sequencer: Sequencer, heater: &'static Heater<TipHeater>) {
    tipctl::control::run_alarms(sequencer, heater, &WORK_QUEUE).await
}

/// Measures the tip and drives the heater.
#[embassy_executor::task]
async fn worker_task(pipeline: Pipeline, mut sensors: TipAdc, heater: &'static Heater<TipHeater>) {
    tipctl::control::run_worker(pipeline, &mut sensors, heater, &WORK_QUEUE, &CONTROLLER_STATE)
        .await
}

/// Puts the iron to sleep when it is not in use.
#[embassy_executor::task]
async fn posture_task(mut accelerometer: Lis2dw12, app: &'static UiHandle) {
    let supervisor = PostureSupervisor::new(CONFIG.posture);
    tipctl::posture::run(supervisor, &mut accelerometer, &CONTROLLER_STATE, app).await
}

/// Draws the user interface.
#[embassy_executor::task]
async fn ui_task(app: &'static UiHandle, mut display: Display) {
    app.run(&mut display).await
}

/// Persists settings.
#[embassy_executor::task]
async fn settings_task(mut storage: FlashStorage) {
    settings::run(&mut storage, &SETTINGS_SIG, &CONTROLLER_STATE).await
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let mut config = embassy_stm32::Config::default();
    {
        use embassy_stm32::rcc::*;
        config.rcc.hsi = true;
        config.rcc.hse = None;
        config.rcc.pll = Some(Pll {
            source: PllSource::HSI,
            prediv: PllPreDiv::DIV4,
            mul: PllMul::MUL85,
            divp: Some(PllPDiv::DIV20), // 17 MHz ADC clock
            divq: None,
            divr: Some(PllRDiv::DIV2), // 170 MHz system clock
        });
        config.rcc.mux.adc12sel = mux::Adcsel::PLL1_P;
        config.rcc.sys = Sysclk::PLL1_R;
        config.enable_debug_during_sleep = true;
    }
    let p = embassy_stm32::init(config);
    let r = split_resources!(p);

    info!("Version {}, {} tip", env!("GIT_HASH"), TIP.name);

    let (mut tip_adc, tip_heater) = unwrap!(tip::init(r.tip));
    let heater: &'static Heater<TipHeater> =
        HEATER.init(Heater::new(tip_heater, CONFIG.max_duty_percent));

    // Heating depends on posture supervision and on the bus monitor, so both must be present
    // before the control loop starts.
    let accelerometer = unwrap!(accelerometer::init(r.accelerometer).await);
    let bus_monitor = unwrap!(BusMonitor::init(r.bus).await);
    let display = unwrap!(display::init(r.display).await);

    let mut storage = FlashStorage::new(r.storage);
    settings::load(&mut storage, Settings::new(&CONFIG, TIP.tunings))
        .await
        .apply(&CONFIG, &CONTROLLER_STATE);

    let mut pipeline = Pipeline::new(&CONFIG, TIP.calibration, CONTROLLER_STATE.tunings());
    unwrap!(pipeline.prime(&mut tip_adc, &CONTROLLER_STATE).await);

    let app: &'static UiHandle = APP.init(AppHandle::new(App::new(
        CONFIG,
        &CONTROLLER_STATE,
        &POWER_STATUS,
        bus_monitor,
        &SETTINGS_SIG,
    )));
    spawner.must_spawn(posture_task(accelerometer, app));
    spawner.must_spawn(buttons::input_task(r.buttons, app));
    spawner.must_spawn(ui_task(app, display));
    spawner.must_spawn(supply::ucpd_task(r.ucpd, &POWER_STATUS));
    spawner.must_spawn(settings_task(storage));

    interrupt::UART4.set_priority(Priority::P6);
    let high_spawner = EXECUTOR_HIGH.start(interrupt::UART4);
    high_spawner.must_spawn(alarm_task(Sequencer::new(&CONFIG), heater));

    spawner.must_spawn(worker_task(pipeline, tip_adc, heater));
}
