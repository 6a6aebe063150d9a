//! Controls the display of the soldering controller.
use display_interface::DisplayError;
use embassy_stm32::gpio::{Level, Output, Speed};
use embassy_stm32::mode::Async;
use embassy_stm32::spi::{self, Spi};
use embassy_stm32::time::Hertz;
use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use embedded_graphics::text::{Alignment, Baseline, Text, TextStyleBuilder};
use embedded_hal_bus::spi::ExclusiveDevice;
use profont::{PROFONT_9_POINT, PROFONT_24_POINT};
use ssd1306::Ssd1306Async;
use ssd1306::mode::BufferedGraphicsModeAsync;
use ssd1306::prelude::{Brightness, DisplayRotation, DisplaySize102x64, SPIInterface};
use tipctl::InitError;
use tipctl::ui::view::{Screen, View};
use tipctl::ui::{Gain, UiState};

use crate::resources::DisplayResources;

/// The inner display type (draw target).
type InnerDisplay = Ssd1306Async<
    SPIInterface<
        ExclusiveDevice<Spi<'static, Async>, Output<'static>, embassy_time::Delay>,
        Output<'static>,
    >,
    DisplaySize102x64,
    BufferedGraphicsModeAsync<DisplaySize102x64>,
>;

/// Display width in pixels (shown).
const DISPLAY_WIDTH: i32 = 102;

/// Display height in pixels.
const DISPLAY_HEIGHT: i32 = 64;

/// Height of a small text line in pixels.
const LINE_HEIGHT: i32 = 11;

/// Small text.
const SMALL_STYLE: MonoTextStyle<'static, BinaryColor> =
    MonoTextStyle::new(&PROFONT_9_POINT, BinaryColor::On);

/// Large text.
const LARGE_STYLE: MonoTextStyle<'static, BinaryColor> =
    MonoTextStyle::new(&PROFONT_24_POINT, BinaryColor::On);

/// The display.
pub struct Display {
    /// The inner display structure (draw target).
    inner: InnerDisplay,
    /// Held high while the display runs.
    _pin_reset: Output<'static>,
}

impl Display {
    /// Draw a line of text, horizontally centered, with its top at `y`.
    fn centered(
        &mut self,
        text: &str,
        y: i32,
        style: MonoTextStyle<'static, BinaryColor>,
    ) -> Result<(), DisplayError> {
        let text_style = TextStyleBuilder::new()
            .alignment(Alignment::Center)
            .baseline(Baseline::Top)
            .build();

        Text::with_text_style(text, Point::new(DISPLAY_WIDTH / 2, y), style, text_style)
            .draw(&mut self.inner)?;
        Ok(())
    }
}

impl Screen for Display {
    type Error = DisplayError;

    async fn draw(&mut self, view: &View, full_screen: bool) -> Result<(), DisplayError> {
        // Frames are always drawn completely into the buffer.
        self.inner.clear_buffer();
        if full_screen {
            self.inner.flush().await?;
        }

        self.centered(view.title(), 0, SMALL_STYLE)?;

        match view.state {
            UiState::PidTuning => {
                for (row, gain) in [Gain::Kp, Gain::Ki, Gain::Kd].into_iter().enumerate() {
                    let y = LINE_HEIGHT * (row as i32 + 1) + 2;
                    self.centered(&view.gain_line(gain), y, SMALL_STYLE)?;
                }
            }
            UiState::Main | UiState::Preview => {
                self.centered(&view.temperature_line(), LINE_HEIGHT, LARGE_STYLE)?;
            }
        }

        self.centered(
            &view.setpoint_line(),
            DISPLAY_HEIGHT - 2 * LINE_HEIGHT,
            SMALL_STYLE,
        )?;
        self.centered(&view.supply_line(), DISPLAY_HEIGHT - LINE_HEIGHT, SMALL_STYLE)?;

        self.inner.flush().await
    }
}

/// Set up the display.
pub async fn init(resources: DisplayResources) -> Result<Display, InitError> {
    let mut config = spi::Config::default();
    config.frequency = Hertz::mhz(8);

    let spi = Spi::new_txonly(
        resources.spi,
        resources.pin_sck,
        resources.pin_mosi,
        resources.dma,
        config,
    );
    let pin_cs = Output::new(resources.pin_cs, Level::High, Speed::High);
    let pin_dc = Output::new(resources.pin_dc, Level::Low, Speed::High);
    let mut pin_reset = Output::new(resources.pin_reset, Level::Low, Speed::Low);

    let spi = ExclusiveDevice::new(spi, pin_cs, embassy_time::Delay)
        .map_err(|_| InitError::Display)?;
    let interface = SPIInterface::new(spi, pin_dc);
    let mut inner = Ssd1306Async::new(interface, DisplaySize102x64, DisplayRotation::Rotate0)
        .into_buffered_graphics_mode();

    inner
        .reset(&mut pin_reset, &mut embassy_time::Delay {})
        .await
        .map_err(|_| InitError::Display)?;
    inner
        .init_with_addr_mode(ssd1306::command::AddrMode::Horizontal)
        .await
        .map_err(|_| InitError::Display)?;
    inner
        .set_brightness(Brightness::BRIGHTEST)
        .await
        .map_err(|_| InitError::Display)?;

    Ok(Display {
        inner,
        _pin_reset: pin_reset,
    })
}
