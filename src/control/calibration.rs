//! Thermocouple calibration: filtered ADC codes to tip temperature.
//!
//! The thermocouple voltage only encodes the difference between the tip and the cold junction
//! (the amplifier on the board). Both models therefore add the cold junction temperature, which
//! is measured separately and refreshed on demand.

/// Cold junction temperature that is assumed when the die sensor cannot be read, in °C.
pub const FALLBACK_COLD_JUNCTION_DEG_C: f32 = 25.0;

/// The analog path from the thermocouple to the ADC.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AnalogFrontEnd {
    /// ADC reference potential in mV.
    pub reference_mv: u32,
    /// ADC resolution in bits.
    pub resolution_bits: u8,
    /// Voltage gain of the thermocouple amplifier.
    pub gain: f32,
}

impl AnalogFrontEnd {
    /// Convert a raw ADC code to the thermocouple potential in µV.
    ///
    /// The potential at the ADC input is truncated to whole mV before the gain is removed.
    pub fn raw_to_microvolts(&self, raw: u32) -> i32 {
        let millivolts = (u64::from(raw) * u64::from(self.reference_mv)) >> self.resolution_bits;
        (millivolts as f32 * (1000.0 / self.gain)) as i32
    }
}

/// A calibration model of a tip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TemperatureCalibration {
    /// Piecewise-linear interpolation in a thermocouple table.
    LookupTable {
        /// The amplifier and ADC in front of the thermocouple.
        front_end: AnalogFrontEnd,
        /// Pairs of thermocouple potential (µV) and temperature difference (°C), sorted by
        /// potential.
        table: &'static [(i32, i32)],
    },
    /// A quadratic fit over raw ADC codes.
    Quadratic {
        /// The coefficient of the squared raw code.
        square: f32,
        /// The coefficient of the raw code.
        linear: f32,
    },
}

impl TemperatureCalibration {
    /// Calculate the tip temperature in °C from a filtered ADC code.
    pub fn raw_to_temperature(&self, raw: u32, cold_junction_deg_c: f32) -> f32 {
        match self {
            Self::LookupTable { front_end, table } => {
                interpolate(table, front_end.raw_to_microvolts(raw)) as f32 + cold_junction_deg_c
            }
            Self::Quadratic { square, linear } => {
                let raw = raw as f32;
                square * raw * raw + linear * raw + cold_junction_deg_c
            }
        }
    }
}

/// Linear interpolation between two points in integer math.
///
/// The slope is kept in thousandths, matching the resolution of the thermocouple tables.
fn interpolate_between(lower: (i32, i32), upper: (i32, i32), x: i32) -> i32 {
    let (x1, y1) = (i64::from(lower.0), i64::from(lower.1));
    let (x2, y2) = (i64::from(upper.0), i64::from(upper.1));

    if x2 == x1 {
        return lower.1;
    }

    let slope_milli = ((i64::from(x) - x1) * 1000) / (x2 - x1);
    (y1 + (slope_milli * (y2 - y1)) / 1000) as i32
}

/// Look up `x` in a table that is sorted by its first column.
///
/// Interpolates in the first segment whose upper bound exceeds `x`. Values beyond the table
/// are extrapolated from the outermost segments.
pub fn interpolate(table: &[(i32, i32)], x: i32) -> i32 {
    match table {
        [] => 0,
        [(_, y)] => *y,
        _ => {
            let segment = table
                .windows(2)
                .find(|segment| x < segment[1].0)
                .unwrap_or(&table[table.len() - 2..]);

            interpolate_between(segment[0], segment[1], x)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::library::{self, T12_THERMOCOUPLE_TABLE};

    fn t12_front_end() -> AnalogFrontEnd {
        match library::T12.calibration {
            TemperatureCalibration::LookupTable { front_end, .. } => front_end,
            TemperatureCalibration::Quadratic { .. } => unreachable!(),
        }
    }

    #[test]
    fn breakpoints_are_exact() {
        for &(microvolts, deg_c) in T12_THERMOCOUPLE_TABLE {
            assert_eq!(interpolate(T12_THERMOCOUPLE_TABLE, microvolts), deg_c);
        }
    }

    #[test]
    fn interpolates_within_segment() {
        // Between (2351, 100) and (2566, 110).
        assert_eq!(interpolate(T12_THERMOCOUPLE_TABLE, 2458), 104);
    }

    #[test]
    fn extrapolates_beyond_table() {
        // Beyond (12337, 490) and (12575, 500).
        assert_eq!(interpolate(T12_THERMOCOUPLE_TABLE, 12813), 510);
        // Below (0, 0) and (266, 10).
        assert_eq!(interpolate(T12_THERMOCOUPLE_TABLE, -266), -10);
    }

    #[test]
    fn degenerate_tables() {
        assert_eq!(interpolate(&[], 100), 0);
        assert_eq!(interpolate(&[(5, 42)], 100), 42);
        assert_eq!(interpolate(&[(5, 42), (5, 50)], 100), 42);
    }

    #[test]
    fn front_end_conversion() {
        let front_end = t12_front_end();
        assert_eq!(front_end.raw_to_microvolts(0), 0);
        // 4095 codes are 3299 mV at the ADC, divided by a gain of 201.
        assert_eq!(front_end.raw_to_microvolts(4095), 16412);
    }

    #[test]
    fn lookup_adds_cold_junction() {
        let calibration = library::T12.calibration;
        assert_eq!(calibration.raw_to_temperature(0, 25.0), 25.0);
        assert_eq!(calibration.raw_to_temperature(0, 31.5), 31.5);
    }

    #[test]
    fn quadratic_fit() {
        let calibration = TemperatureCalibration::Quadratic {
            square: 0.0001,
            linear: 0.1,
        };
        let temperature = calibration.raw_to_temperature(1000, 20.0);
        assert!((temperature - 220.0).abs() < 1e-3);
    }
}
