//! A library of supported tips, and their calibration.

use super::calibration::{AnalogFrontEnd, TemperatureCalibration};
use super::pid::Tunings;

/// Properties of a tip and its handle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TipProperties {
    /// The tip family's name.
    pub name: &'static str,
    /// Conversion from ADC codes to tip temperature.
    pub calibration: TemperatureCalibration,
    /// Default PID gains.
    pub tunings: Tunings,
    /// Highest fixed supply potential that the heater tolerates, in mV.
    pub max_supply_mv: u32,
    /// Highest fixed PDO index to consider during negotiation.
    pub max_fixed_pdo_index: usize,
}

/// Thermocouple potential (µV) over temperature difference (°C) of T12 tips.
pub const T12_THERMOCOUPLE_TABLE: &[(i32, i32)] = &[
    (0, 0),
    (266, 10),
    (522, 20),
    (770, 30),
    (1010, 40),
    (1244, 50),
    (1473, 60),
    (1697, 70),
    (1917, 80),
    (2135, 90),
    (2351, 100),
    (2566, 110),
    (2780, 120),
    (2994, 130),
    (3209, 140),
    (3426, 150),
    (3644, 160),
    (3865, 170),
    (4088, 180),
    (4314, 190),
    (4544, 200),
    (4777, 210),
    (5014, 220),
    (5255, 230),
    (5500, 240),
    (5750, 250),
    (6003, 260),
    (6261, 270),
    (6523, 280),
    (6789, 290),
    (7059, 300),
    (7332, 310),
    (7609, 320),
    (7889, 330),
    (8171, 340),
    (8456, 350),
    (8742, 360),
    (9030, 370),
    (9319, 380),
    (9607, 390),
    (9896, 400),
    (10183, 410),
    (10468, 420),
    (10750, 430),
    (11029, 440),
    (11304, 450),
    (11573, 460),
    (11835, 470),
    (12091, 480),
    (12337, 490),
    (12575, 500),
];

/// Hakko T12 tips behind a 201x amplifier on a 12 bit, 3.3 V ADC.
pub const T12: TipProperties = TipProperties {
    name: "T12",
    calibration: TemperatureCalibration::LookupTable {
        front_end: AnalogFrontEnd {
            reference_mv: 3300,
            resolution_bits: 12,
            gain: 201.0,
        },
        table: T12_THERMOCOUPLE_TABLE,
    },
    tunings: Tunings::new(8.0, 2.0, 0.2),
    max_supply_mv: 20_000,
    max_fixed_pdo_index: 4,
};

/// JBC C245 cartridges.
pub const C245: TipProperties = TipProperties {
    name: "C245",
    calibration: TemperatureCalibration::Quadratic {
        square: -6.818_562e-7,
        linear: 0.143_237_42,
    },
    tunings: Tunings::new(10.0, 1.5, 0.3),
    max_supply_mv: 15_000,
    max_fixed_pdo_index: 3,
};

/// JBC C210 cartridges.
pub const C210: TipProperties = TipProperties {
    name: "C210",
    calibration: TemperatureCalibration::Quadratic {
        square: 6.082_462e-6,
        linear: 0.382_365_56,
    },
    tunings: Tunings::new(6.0, 2.5, 0.1),
    max_supply_mv: 15_000,
    max_fixed_pdo_index: 3,
};
