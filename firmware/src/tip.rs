//! The tip's thermocouple input and the heater output.
use defmt::trace;
use embassy_stm32::adc::{self, Adc, AdcChannel, AnyAdcChannel, Resolution};
use embassy_stm32::gpio::OutputType;
use embassy_stm32::time::Hertz;
use embassy_stm32::timer::low_level::CountingMode;
use embassy_stm32::timer::simple_pwm::{PwmPin, SimplePwm};
use embassy_stm32::{Peri, peripherals};
use embassy_time::{Duration, WithTimeout};
use tipctl::{InitError, SensorError};
use tipctl::control::heater::HeaterPwm;
use tipctl::control::sensors::TipSensors;

use crate::resources::TipResources;

/// ADC max. value (12 bit).
const ADC_MAX: u16 = 4095;
/// ADC sample time for the thermocouple amplifier output.
const ADC_SAMPLE_TIME_TIP: adc::SampleTime = adc::SampleTime::CYCLES92_5;
/// ADC sample time for the internal temperature sensor (needs at least 5 µs).
const ADC_SAMPLE_TIME_DIE: adc::SampleTime = adc::SampleTime::CYCLES640_5;
/// Upper bound for a single conversion.
const CONVERSION_TIMEOUT: Duration = Duration::from_millis(5);
/// The analog supply voltage.
const ANALOG_SUPPLY_V: f32 = 3.3;
/// The supply voltage at which the temperature sensor was calibrated.
const CALIBRATION_SUPPLY_V: f32 = 3.0;
/// Temperature sensor calibration value at 30 °C.
const TS_CAL1: *const u16 = 0x1FFF_75A8 as *const u16;
/// Temperature sensor calibration value at 130 °C.
const TS_CAL2: *const u16 = 0x1FFF_75CA as *const u16;
/// Temperature of the first calibration point.
const TS_CAL1_DEG_C: f32 = 30.0;
/// Temperature of the second calibration point.
const TS_CAL2_DEG_C: f32 = 130.0;
/// Heater PWM frequency.
const PWM_FREQUENCY: Hertz = Hertz::khz(1);

/// Tip and die temperature measurements on ADC1.
pub struct TipAdc {
    /// The ADC.
    adc: Adc<'static, peripherals::ADC1>,
    /// The thermocouple amplifier output.
    pin_tip: AnyAdcChannel<peripherals::ADC1>,
    /// The internal temperature sensor.
    die_temperature: AnyAdcChannel<peripherals::ADC1>,
    /// The DMA for the ADC.
    dma: Peri<'static, peripherals::DMA1_CH6>,
}

impl TipAdc {
    /// Take a single conversion of a channel.
    async fn convert(&mut self, channel: Channel) -> Result<u16, SensorError> {
        let mut buffer = [0u16; 1];
        let (pin, sample_time) = match channel {
            Channel::Tip => (&mut self.pin_tip, ADC_SAMPLE_TIME_TIP),
            Channel::Die => (&mut self.die_temperature, ADC_SAMPLE_TIME_DIE),
        };

        self.adc
            .read(
                self.dma.reborrow(),
                [(pin, sample_time)].into_iter(),
                &mut buffer,
            )
            .with_timeout(CONVERSION_TIMEOUT)
            .await
            .map_err(|_| SensorError::Timeout)?;

        Ok(buffer[0])
    }
}

/// ADC1 channels.
#[derive(Clone, Copy)]
enum Channel {
    /// The tip.
    Tip,
    /// The die temperature sensor.
    Die,
}

/// Convert a die temperature sensor reading, with the factory calibration.
fn die_temperature_deg_c(raw: u16, cal1: u16, cal2: u16) -> Result<f32, SensorError> {
    if cal2 <= cal1 {
        return Err(SensorError::InvalidData);
    }

    let scaled = raw as f32 * ANALOG_SUPPLY_V / CALIBRATION_SUPPLY_V;
    Ok((TS_CAL2_DEG_C - TS_CAL1_DEG_C) / (cal2 - cal1) as f32 * (scaled - cal1 as f32)
        + TS_CAL1_DEG_C)
}

impl TipSensors for TipAdc {
    async fn read_tip(&mut self) -> Result<u32, SensorError> {
        let raw = self.convert(Channel::Tip).await?;
        trace!("Tip ADC value: {}", raw);

        // An open thermocouple drives the amplifier into saturation.
        if raw >= ADC_MAX {
            return Err(SensorError::InvalidData);
        }
        Ok(raw.into())
    }

    async fn read_die_temperature(&mut self) -> Result<f32, SensorError> {
        let raw = self.convert(Channel::Die).await?;

        // SAFETY: Both addresses lie in the system memory, which is always readable.
        let (cal1, cal2) = unsafe { (TS_CAL1.read_volatile(), TS_CAL2.read_volatile()) };
        die_temperature_deg_c(raw, cal1, cal2)
    }
}

/// The heater's PWM channel on TIM1.
pub struct TipHeater {
    /// The PWM timer.
    pwm: SimplePwm<'static, peripherals::TIM1>,
}

impl HeaterPwm for TipHeater {
    fn set_duty_percent(&mut self, percent: u8) {
        let mut channel = self.pwm.ch1();
        if percent == 0 {
            channel.set_duty_cycle_fully_off();
        } else {
            let duty = u32::from(channel.max_duty_cycle()) * u32::from(percent.min(100)) / 100;
            channel.set_duty_cycle(duty as u16);
        }
    }
}

/// Set up tip measurements and the heater output.
///
/// The heater starts switched off.
pub fn init(resources: TipResources) -> Result<(TipAdc, TipHeater), InitError> {
    let mut adc = Adc::new(resources.adc);
    adc.set_resolution(Resolution::BITS12);
    let die_temperature = adc.enable_temperature().degrade_adc();

    let tip_adc = TipAdc {
        adc,
        pin_tip: resources.pin_tip.degrade_adc(),
        die_temperature,
        dma: resources.dma,
    };

    let mut pwm = SimplePwm::new(
        resources.timer,
        Some(PwmPin::new(resources.pin_heater, OutputType::PushPull)),
        None,
        None,
        None,
        PWM_FREQUENCY,
        CountingMode::EdgeAlignedUp,
    );
    let mut channel = pwm.ch1();
    if channel.max_duty_cycle() == 0 {
        return Err(InitError::HeaterPwm);
    }
    channel.set_duty_cycle_fully_off();
    channel.enable();

    Ok((tip_adc, TipHeater { pwm }))
}
