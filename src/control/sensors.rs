//! The analog inputs of the sampling worker.

use crate::SensorError;

/// Tip thermocouple and cold junction measurement.
///
/// Both are converted by the same ADC, which is owned by the sampling worker.
#[allow(async_fn_in_trait)]
pub trait TipSensors {
    /// Convert the thermocouple channel and return the raw ADC code.
    async fn read_tip(&mut self) -> Result<u32, SensorError>;

    /// Measure the cold junction (die) temperature in °C.
    async fn read_die_temperature(&mut self) -> Result<f32, SensorError>;
}
