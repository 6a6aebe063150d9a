//! USB Power Delivery status, as far as the controller is concerned.
//!
//! The negotiation itself runs in a separate task. It publishes readiness and the requested
//! potential through [`PowerStatus`], and renegotiates when asked to. Before heating is enabled,
//! the user interface compares the requested potential with the measured bus potential
//! ([`check_supply`]), so that the heater never runs from an unexpected supply.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use micromath::F32Ext;
use portable_atomic::{AtomicBool, AtomicU32, Ordering};
use uom::si::electric_potential::millivolt;
use uom::si::f32::{ElectricPotential, Power};

use crate::SensorError;

/// Negotiation state, as seen by the user interface.
pub trait PowerNegotiation {
    /// The negotiated supply is in place.
    fn is_ready(&self) -> bool;

    /// The potential that was requested from the source.
    fn requested_voltage(&self) -> ElectricPotential;

    /// Start over with negotiation (hard reset). Readiness is cleared until it completes.
    fn request_renegotiation(&self);
}

/// Bus measurements.
#[allow(async_fn_in_trait)]
pub trait PowerMonitor {
    /// Measure the bus potential.
    async fn bus_voltage(&mut self) -> Result<ElectricPotential, SensorError>;

    /// Measure the power drawn from the bus.
    async fn bus_power(&mut self) -> Result<Power, SensorError>;
}

/// Negotiation status, shared between the negotiation task and the user interface.
pub struct PowerStatus {
    /// The source transitioned to the requested supply.
    ready: AtomicBool,
    /// The requested potential in mV.
    requested_mv: AtomicU32,
    /// Signals a renegotiation request to the negotiation task.
    renegotiate: Signal<CriticalSectionRawMutex, ()>,
}

impl PowerStatus {
    /// Create a status without a contract.
    pub const fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            requested_mv: AtomicU32::new(0),
            renegotiate: Signal::new(),
        }
    }

    /// Record a request for a potential, before the source accepted it.
    pub fn set_requested(&self, millivolts: u32) {
        self.requested_mv.store(millivolts, Ordering::Relaxed);
    }

    /// The source transitioned to the requested supply.
    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    /// The contract is gone (detach, hard reset).
    pub fn clear_ready(&self) {
        self.ready.store(false, Ordering::Release);
    }

    /// Wait for a renegotiation request.
    pub async fn wait_renegotiation(&self) {
        self.renegotiate.wait().await
    }

    /// The requested potential in mV.
    pub fn requested_mv(&self) -> u32 {
        self.requested_mv.load(Ordering::Relaxed)
    }
}

impl Default for PowerStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl PowerNegotiation for PowerStatus {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn requested_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<millivolt>(self.requested_mv() as f32)
    }

    fn request_renegotiation(&self) {
        self.clear_ready();
        self.renegotiate.signal(());
    }
}

/// The outcome of a supply check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SupplyCheck {
    /// Negotiation did not complete yet, or the bus could not be measured.
    Pending,
    /// The bus potential matches the request.
    Ready,
    /// The bus potential does not match, renegotiation was requested.
    Mismatch,
}

/// Check that the bus carries the requested potential.
///
/// On a deviation of `tolerance_mv` or more, renegotiation is requested.
pub async fn check_supply<N: PowerNegotiation, M: PowerMonitor>(
    negotiation: &N,
    monitor: &mut M,
    tolerance_mv: u32,
) -> SupplyCheck {
    if !negotiation.is_ready() {
        return SupplyCheck::Pending;
    }

    let measured = match monitor.bus_voltage().await {
        Ok(measured) => measured,
        Err(error) => {
            warn!("Bus potential unavailable: {:?}", error);
            return SupplyCheck::Pending;
        }
    };

    let requested_mv = negotiation.requested_voltage().get::<millivolt>();
    let measured_mv = measured.get::<millivolt>();

    if (requested_mv - measured_mv).abs() < tolerance_mv as f32 {
        SupplyCheck::Ready
    } else {
        warn!(
            "Bus at {} mV, requested {} mV, renegotiating",
            measured_mv, requested_mv
        );
        negotiation.request_renegotiation();
        SupplyCheck::Mismatch
    }
}

/// Select the fixed supply to request from a source's capabilities.
///
/// `fixed_mv` lists the capabilities in source order, with the potential of fixed supplies and
/// `None` for other supply types. Among the fixed supplies up to `max_index`, the last one with
/// a potential in `(0, max_mv]` wins. Without a match, index 0 (vSafe5V) is selected.
pub fn select_fixed_pdo(
    fixed_mv: impl IntoIterator<Item = Option<u32>>,
    max_mv: u32,
    max_index: usize,
) -> usize {
    fixed_mv
        .into_iter()
        .enumerate()
        .take(max_index.saturating_add(1))
        .filter_map(|(index, millivolts)| match millivolts {
            Some(millivolts) if millivolts > 0 && millivolts <= max_mv => Some(index),
            _ => None,
        })
        .last()
        .unwrap_or(0)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use embassy_futures::block_on;
    use uom::si::power::watt;

    /// A bus with a fixed potential.
    pub(crate) struct FakeMonitor {
        pub(crate) voltage: Result<f32, SensorError>,
        pub(crate) reads: usize,
    }

    impl FakeMonitor {
        pub(crate) fn at_millivolts(millivolts: f32) -> Self {
            Self {
                voltage: Ok(millivolts),
                reads: 0,
            }
        }
    }

    impl PowerMonitor for FakeMonitor {
        async fn bus_voltage(&mut self) -> Result<ElectricPotential, SensorError> {
            self.reads += 1;
            self.voltage
                .map(|millivolts| ElectricPotential::new::<millivolt>(millivolts))
        }

        async fn bus_power(&mut self) -> Result<Power, SensorError> {
            Ok(Power::new::<watt>(12.5))
        }
    }

    fn ready_status(requested_mv: u32) -> PowerStatus {
        let status = PowerStatus::new();
        status.set_requested(requested_mv);
        status.set_ready();
        status
    }

    #[test]
    fn within_tolerance() {
        let status = ready_status(20_000);
        let mut monitor = FakeMonitor::at_millivolts(19_500.0);

        assert_eq!(block_on(check_supply(&status, &mut monitor, 2_000)), SupplyCheck::Ready);
        assert!(status.is_ready());
        assert!(!status.renegotiate.signaled());
    }

    #[test]
    fn outside_tolerance_renegotiates() {
        let status = ready_status(20_000);
        let mut monitor = FakeMonitor::at_millivolts(15_000.0);

        assert_eq!(
            block_on(check_supply(&status, &mut monitor, 2_000)),
            SupplyCheck::Mismatch
        );
        assert!(!status.is_ready());
        assert!(status.renegotiate.signaled());

        // Readiness holds off further checks until negotiation completes.
        assert_eq!(
            block_on(check_supply(&status, &mut monitor, 2_000)),
            SupplyCheck::Pending
        );
        assert_eq!(monitor.reads, 1);
    }

    #[test]
    fn tolerance_is_exclusive() {
        let status = ready_status(20_000);
        let mut monitor = FakeMonitor::at_millivolts(18_000.0);

        assert_eq!(
            block_on(check_supply(&status, &mut monitor, 2_000)),
            SupplyCheck::Mismatch
        );
    }

    #[test]
    fn not_ready_skips_measurement() {
        let status = PowerStatus::new();
        let mut monitor = FakeMonitor::at_millivolts(20_000.0);

        assert_eq!(
            block_on(check_supply(&status, &mut monitor, 2_000)),
            SupplyCheck::Pending
        );
        assert_eq!(monitor.reads, 0);
    }

    #[test]
    fn failed_measurement_is_pending() {
        let status = ready_status(20_000);
        let mut monitor = FakeMonitor::at_millivolts(0.0);
        monitor.voltage = Err(SensorError::Timeout);

        assert_eq!(
            block_on(check_supply(&status, &mut monitor, 2_000)),
            SupplyCheck::Pending
        );
        assert!(status.is_ready());
    }

    #[test]
    fn pdo_selection() {
        let capabilities = [Some(5_000), Some(9_000), Some(15_000), None, Some(20_000)];

        assert_eq!(select_fixed_pdo(capabilities, 15_000, 3), 2);
        assert_eq!(select_fixed_pdo(capabilities, 20_000, 4), 4);
        assert_eq!(select_fixed_pdo(capabilities, 20_000, 3), 2);
        assert_eq!(select_fixed_pdo(capabilities, 12_000, 4), 1);
    }

    #[test]
    fn pdo_selection_falls_back_to_safe_5v() {
        assert_eq!(select_fixed_pdo([None, Some(0), Some(9_000)], 5_000, 4), 0);
        assert_eq!(select_fixed_pdo([], 20_000, 4), 0);
    }
}
