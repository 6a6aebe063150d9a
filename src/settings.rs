//! Persistent user settings.
//!
//! A record is a CRC-32 checksum (little endian) of the encoded data, followed by the settings
//! as a COBS-framed postcard message. Erased or corrupted records are rejected, and the defaults
//! apply instead.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, with_timeout};
use postcard::{from_bytes_cobs, to_slice_cobs};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::control::pid::Tunings;
use crate::control::state::ControllerState;

/// Size of a stored record.
pub const RECORD_SIZE: usize = 32;

/// Size of the checksum at the start of a record.
const CHECKSUM_SIZE: usize = 4;

/// Time without changes before settings are written, so that button presses do not each cause
/// a write.
const STORE_DELAY: Duration = Duration::from_millis(2_000);

/// Interval for checking whether a deferred write may happen.
const DEFER_POLL_PERIOD: Duration = Duration::from_millis(500);

/// Signals changed settings to the storage task.
pub type SettingsSignal = Signal<CriticalSectionRawMutex, Settings>;

/// Errors when loading or storing settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The record holds no valid frame.
    Encoding,
    /// The checksum does not match the data.
    Checksum,
    /// The storage medium failed.
    Storage,
}

/// Settings that survive a power cycle.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Settings {
    /// Operational set temperature in °C.
    pub setpoint_deg_c: i16,
    /// Set temperature while sleeping in °C.
    pub sleep_setpoint_deg_c: i16,
    /// PID gains.
    pub tunings: Tunings,
}

impl Settings {
    /// Default settings for a configuration and the tip's default gains.
    pub fn new(config: &Config, tunings: Tunings) -> Self {
        Self {
            setpoint_deg_c: config.setpoint_deg_c as i16,
            sleep_setpoint_deg_c: config.sleep_setpoint_deg_c as i16,
            tunings,
        }
    }

    /// Take the current settings from the controller state.
    pub fn capture(state: &ControllerState) -> Self {
        Self {
            setpoint_deg_c: state.setpoint_deg_c() as i16,
            sleep_setpoint_deg_c: state.sleep_setpoint_deg_c() as i16,
            tunings: state.tunings(),
        }
    }

    /// Apply the settings to the controller state.
    ///
    /// Set temperatures are clamped to the configured range, invalid gains are ignored.
    pub fn apply(&self, config: &Config, state: &ControllerState) {
        let clamp = |deg_c: i16| {
            f32::from(deg_c).clamp(config.min_setpoint_deg_c, config.max_setpoint_deg_c)
        };

        state.set_setpoint_deg_c(clamp(self.setpoint_deg_c));
        state.set_sleep_setpoint_deg_c(
            f32::from(self.sleep_setpoint_deg_c).clamp(0.0, config.max_setpoint_deg_c),
        );

        if self.tunings.is_valid() {
            state.set_tunings(self.tunings);
        } else {
            warn!("Ignoring stored PID gains");
        }
    }
}

/// Calculate checksum bytes for provided data.
fn calculate_checksum_bytes(data: &[u8]) -> [u8; CHECKSUM_SIZE] {
    let crc = crc::Crc::<u32>::new(&crc::CRC_32_CKSUM);
    crc.checksum(data).to_le_bytes()
}

/// Encode settings into a record.
pub fn encode(settings: &Settings, record: &mut [u8; RECORD_SIZE]) -> Result<(), Error> {
    record.fill(0);

    let (checksum, data) = record.split_at_mut(CHECKSUM_SIZE);
    let encoded = to_slice_cobs(settings, data).map_err(|_| Error::Encoding)?;
    let checksum_bytes = calculate_checksum_bytes(encoded);
    checksum.copy_from_slice(&checksum_bytes);

    Ok(())
}

/// Decode settings from a record.
pub fn decode(record: &[u8; RECORD_SIZE]) -> Result<Settings, Error> {
    let (checksum, data) = record.split_at(CHECKSUM_SIZE);

    let frame_end = data.iter().position(|&x| x == 0).ok_or(Error::Encoding)?;
    let frame = &data[..=frame_end];
    if calculate_checksum_bytes(frame) != checksum {
        return Err(Error::Checksum);
    }

    let mut buffer = [0u8; RECORD_SIZE];
    let buffer = &mut buffer[..frame.len()];
    buffer.copy_from_slice(frame);
    from_bytes_cobs(buffer).map_err(|_| Error::Encoding)
}

/// The medium that holds the settings record.
#[allow(async_fn_in_trait)]
pub trait SettingsStorage {
    /// Read the record.
    async fn read(&mut self, record: &mut [u8; RECORD_SIZE]) -> Result<(), Error>;

    /// Replace the record.
    async fn write(&mut self, record: &[u8; RECORD_SIZE]) -> Result<(), Error>;
}

/// Load settings, or the provided defaults if there are no valid settings.
pub async fn load<S: SettingsStorage>(storage: &mut S, defaults: Settings) -> Settings {
    let mut record = [0u8; RECORD_SIZE];

    match storage.read(&mut record).await.and_then(|_| decode(&record)) {
        Ok(settings) => {
            debug!("Loaded settings: {:?}", settings);
            settings
        }
        Err(error) => {
            info!("Using default settings ({:?})", error);
            defaults
        }
    }
}

/// Encode and write settings.
pub async fn store<S: SettingsStorage>(storage: &mut S, settings: &Settings) -> Result<(), Error> {
    let mut record = [0u8; RECORD_SIZE];
    encode(settings, &mut record)?;
    storage.write(&record).await?;

    debug!("Stored settings: {:?}", settings);
    Ok(())
}

/// Store settings when they change, forever.
///
/// Writes happen once the settings did not change for a while, and only while heating is
/// disabled. Writing to flash stalls the CPU, which would delay the sampling alarms and hold the
/// heater on for longer than commanded.
pub async fn run<S: SettingsStorage>(
    storage: &mut S,
    signal: &SettingsSignal,
    state: &ControllerState,
) -> ! {
    loop {
        let mut settings = signal.wait().await;
        while let Ok(newer) = with_timeout(STORE_DELAY, signal.wait()).await {
            settings = newer;
        }

        while state.is_heater_enabled() {
            if let Ok(newer) = with_timeout(DEFER_POLL_PERIOD, signal.wait()).await {
                settings = newer;
            }
        }

        if let Err(error) = store(storage, &settings).await {
            warn!("Storing settings failed: {:?}", error);
        }
    }
}
