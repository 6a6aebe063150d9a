//! The handle's accelerometer (LIS2DW12 on I2C).
use defmt::{debug, info};
use embassy_stm32::i2c::mode::Master;
use embassy_stm32::i2c::{self, I2c};
use embassy_stm32::mode::Async;
use embassy_stm32::time::Hertz;
use embassy_time::{Duration, WithTimeout};
use tipctl::posture::{Acceleration3, Accelerometer};
use tipctl::{InitError, SensorError};

use crate::Irqs;
use crate::resources::AccelerometerResources;

/// The accelerometer's I2C address (SA0 high).
const ADDRESS: u8 = 0x19;
/// Identification register.
const WHO_AM_I: u8 = 0x0F;
/// Expected identification.
const IDENTITY: u8 = 0x44;
/// Control register 1: output data rate and mode.
const CTRL1: u8 = 0x20;
/// 50 Hz, high-performance mode.
const CTRL1_ODR_50HZ_HIGH_PERFORMANCE: u8 = 0x44;
/// Control register 6: full scale selection (0 is ±2 g).
const CTRL6: u8 = 0x25;
/// First output register, the following five are read by auto-increment.
const OUT_X_L: u8 = 0x28;
/// Acceleration per LSB of the 14 bit output at ±2 g, in m/s².
const SENSITIVITY_M_PER_S2: f32 = 0.000_244 * 9.806_65;
/// Upper bound for a bus transaction.
const TRANSACTION_TIMEOUT: Duration = Duration::from_millis(10);

/// The accelerometer driver.
pub struct Lis2dw12 {
    /// The I2C bus.
    i2c: I2c<'static, Async, Master>,
}

impl Lis2dw12 {
    /// Write a register.
    async fn write_register(&mut self, register: u8, value: u8) -> Result<(), SensorError> {
        self.i2c
            .write(ADDRESS, &[register, value])
            .with_timeout(TRANSACTION_TIMEOUT)
            .await
            .map_err(|_| SensorError::Timeout)?
            .map_err(|_| SensorError::ReadFailed)
    }

    /// Read consecutive registers.
    async fn read_registers(&mut self, register: u8, buffer: &mut [u8]) -> Result<(), SensorError> {
        self.i2c
            .write_read(ADDRESS, &[register], buffer)
            .with_timeout(TRANSACTION_TIMEOUT)
            .await
            .map_err(|_| SensorError::Timeout)?
            .map_err(|_| SensorError::ReadFailed)
    }

    /// Identify and configure the accelerometer.
    async fn configure(&mut self) -> Result<(), SensorError> {
        let mut identity = [0u8; 1];
        self.read_registers(WHO_AM_I, &mut identity).await?;
        if identity[0] != IDENTITY {
            debug!("Unexpected accelerometer identity {:#x}", identity[0]);
            return Err(SensorError::InvalidData);
        }

        self.write_register(CTRL6, 0x00).await?;
        self.write_register(CTRL1, CTRL1_ODR_50HZ_HIGH_PERFORMANCE)
            .await
    }
}

/// Convert a left-aligned 14 bit sample.
fn to_m_per_s2(low: u8, high: u8) -> f32 {
    (i16::from_le_bytes([low, high]) >> 2) as f32 * SENSITIVITY_M_PER_S2
}

impl Accelerometer for Lis2dw12 {
    async fn read(&mut self) -> Result<Acceleration3, SensorError> {
        let mut buffer = [0u8; 6];
        self.read_registers(OUT_X_L, &mut buffer).await?;

        Ok(Acceleration3::from_meter_per_second_squared(
            to_m_per_s2(buffer[0], buffer[1]),
            to_m_per_s2(buffer[2], buffer[3]),
            to_m_per_s2(buffer[4], buffer[5]),
        ))
    }
}

/// Set up the accelerometer.
pub async fn init(resources: AccelerometerResources) -> Result<Lis2dw12, InitError> {
    let mut config = i2c::Config::default();
    config.frequency = Hertz::khz(400);

    let i2c = I2c::new(
        resources.i2c,
        resources.pin_scl,
        resources.pin_sda,
        Irqs,
        resources.tx_dma,
        resources.rx_dma,
        config,
    );

    let mut accelerometer = Lis2dw12 { i2c };
    accelerometer
        .configure()
        .await
        .map_err(|_| InitError::Accelerometer)?;

    info!("Accelerometer ready");
    Ok(accelerometer)
}
