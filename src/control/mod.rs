//! Closed-loop tip temperature control.
//!
//! Two contexts cooperate:
//! - The alarm context ([`run_alarms`]) switches the heater off before each measurement and
//!   hands the cycle to the worker once the analog front end has settled.
//! - The worker ([`run_worker`]) converts the tip sample, filters and calibrates it, runs the PID
//!   and drives the heater.
//!
//! The alarm context must run at a higher priority than the worker, so that the heater is
//! switched off in time.

pub mod calibration;
pub mod filter;
pub mod heater;
pub mod library;
pub mod pid;
pub mod pipeline;
pub mod sensors;
pub mod sequencer;
pub mod state;

use embassy_time::{Instant, Timer};

use heater::{Heater, HeaterPwm};
use pipeline::Pipeline;
use sensors::TipSensors;
use sequencer::{Sequencer, WorkQueue};
use state::ControllerState;

/// Fire the sampling and settle alarms, forever.
pub async fn run_alarms<P: HeaterPwm>(
    mut sequencer: Sequencer,
    heater: &Heater<P>,
    queue: &WorkQueue,
) -> ! {
    sequencer.start(Instant::now());

    loop {
        let Some((alarm, deadline)) = sequencer.next_alarm() else {
            sequencer.start(Instant::now());
            continue;
        };

        Timer::at(deadline).await;

        let actions = sequencer.handle_alarm(alarm, deadline);
        if actions.heater_off {
            heater.off();
        }
        if let Some(job) = actions.submit {
            queue.submit(job);
        }
    }
}

/// Execute sampling jobs as they arrive, forever.
pub async fn run_worker<S: TipSensors, P: HeaterPwm>(
    mut pipeline: Pipeline,
    sensors: &mut S,
    heater: &Heater<P>,
    queue: &WorkQueue,
    state: &ControllerState,
) -> ! {
    loop {
        let job = queue.wait().await;

        if let Some(report) = pipeline.run(job, sensors, heater, state).await {
            trace!(
                "Cycle {}: {} C, duty {} %",
                report.cycle, report.temperature_deg_c, report.duty_percent
            );
        }
    }
}
