//! Handles user inputs by means of four push buttons.
//!
//! Holding `Ok` goes home, holding `Next` goes back.
use defmt::debug;
use embassy_futures::select::{Either4, select4};
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::Pull;
use embassy_time::{Duration, Timer, WithTimeout};
use tipctl::ui::{Event, EventSink};

use crate::UiHandle;
use crate::resources::ButtonResources;

/// Time for contacts to settle after an edge.
const DEBOUNCE: Duration = Duration::from_millis(20);
/// Presses longer than this are long presses.
const LONG_PRESS: Duration = Duration::from_millis(600);

/// Wait for the release of a pressed button, and tell short from long presses.
async fn press(input: &mut ExtiInput<'static>, short: Event, long: Event) -> Event {
    match input.wait_for_high().with_timeout(LONG_PRESS).await {
        Ok(()) => short,
        Err(_) => {
            input.wait_for_high().await;
            long
        }
    }
}

/// Handle button presses.
#[embassy_executor::task]
pub async fn input_task(resources: ButtonResources, app: &'static UiHandle) {
    let mut up = ExtiInput::new(resources.pin_up, resources.exti_up, Pull::Up);
    let mut down = ExtiInput::new(resources.pin_down, resources.exti_down, Pull::Up);
    let mut ok = ExtiInput::new(resources.pin_ok, resources.exti_ok, Pull::Up);
    let mut next = ExtiInput::new(resources.pin_next, resources.exti_next, Pull::Up);

    loop {
        let pressed = select4(
            up.wait_for_falling_edge(),
            down.wait_for_falling_edge(),
            ok.wait_for_falling_edge(),
            next.wait_for_falling_edge(),
        )
        .await;

        Timer::after(DEBOUNCE).await;

        let event = match pressed {
            Either4::First(()) if up.is_low() => Some(Event::Up),
            Either4::Second(()) if down.is_low() => Some(Event::Down),
            Either4::Third(()) if ok.is_low() => Some(press(&mut ok, Event::Ok, Event::Home).await),
            Either4::Fourth(()) if next.is_low() => {
                Some(press(&mut next, Event::Next, Event::Back).await)
            }
            _ => None,
        };

        if let Some(event) = event {
            debug!("Button event: {}", event);
            app.handle_event(event).await;
        }
    }
}
