//! Handles USB PD negotiation and measures the bus.
use defmt::{error, info, trace, warn, Format};
use embassy_futures::select::{Either, select};
use embassy_stm32::adc::{self, Adc, AdcChannel, AnyAdcChannel, Resolution};
use embassy_stm32::gpio::{Level, Output, Speed};
use embassy_stm32::ucpd::{self, CcPhy, CcPull, CcSel, CcVState, PdPhy, Ucpd};
use embassy_stm32::{Peri, peripherals};
use embassy_time::{Duration, Timer, WithTimeout, with_timeout};
use tipctl::{InitError, SensorError};
use tipctl::power::{PowerMonitor, PowerStatus, select_fixed_pdo};
use uom::si::electric_potential::{millivolt, volt};
use uom::si::electrical_resistance::ohm;
use uom::si::f32::{ElectricPotential, ElectricalResistance, Power};
use usbpd::protocol_layer::message::{pdo, request};
use usbpd::sink::device_policy_manager::DevicePolicyManager;
use usbpd::sink::policy_engine::Sink;
use usbpd::timers::Timer as SinkTimer;
use usbpd_traits::Driver as SinkDriver;

use crate::resources::{BusResources, UcpdResources};
use crate::{CONFIG, Irqs};

/// ADC max. value (12 bit).
const ADC_MAX: f32 = 4095.0;
/// The ADC reference voltage.
const ADC_REFERENCE_V: f32 = 3.3;
/// ADC sample time for voltage/current in cycles.
const ADC_SAMPLE_TIME: adc::SampleTime = adc::SampleTime::CYCLES640_5;
/// Ratio of the bus voltage divider.
const VOLTAGE_DIVIDER_RATIO: f32 = 7.667;
/// Current monitor total gain (shunt + amplifier) in V/A.
const CURRENT_MONITOR_GAIN_V_PER_A: f32 = 0.2;
/// Upper bound for a single conversion.
const CONVERSION_TIMEOUT: Duration = Duration::from_millis(5);

/// Convert an ADC value to measured voltage.
fn adc_value_to_potential(value: u16) -> ElectricPotential {
    ElectricPotential::new::<volt>(ADC_REFERENCE_V * (value as f32) / ADC_MAX)
}

/// Bus voltage and current measurements on ADC2.
pub struct BusMonitor {
    /// The ADC.
    adc: Adc<'static, peripherals::ADC2>,
    /// The ADC input for voltage on the bus.
    pin_voltage: AnyAdcChannel<peripherals::ADC2>,
    /// The ADC input for heater current.
    pin_current: AnyAdcChannel<peripherals::ADC2>,
    /// The DMA for the ADC.
    dma: Peri<'static, peripherals::DMA2_CH1>,
}

impl BusMonitor {
    /// Set up bus measurements.
    ///
    /// Fails if the ADC does not deliver a first conversion.
    pub async fn init(resources: BusResources) -> Result<Self, InitError> {
        let mut adc = Adc::new(resources.adc);
        adc.set_resolution(Resolution::BITS12);

        let mut monitor = Self {
            adc,
            pin_voltage: resources.pin_voltage.degrade_adc(),
            pin_current: resources.pin_current.degrade_adc(),
            dma: resources.dma,
        };
        monitor
            .measure()
            .await
            .map_err(|_| InitError::PowerMonitor)?;

        Ok(monitor)
    }

    /// Measure voltage and current sense outputs, in this order.
    async fn measure(&mut self) -> Result<[u16; 2], SensorError> {
        let mut adc_buffer = [0u16; 2];

        self.adc
            .read(
                self.dma.reborrow(),
                [
                    (&mut self.pin_voltage, ADC_SAMPLE_TIME),
                    (&mut self.pin_current, ADC_SAMPLE_TIME),
                ]
                .into_iter(),
                &mut adc_buffer,
            )
            .with_timeout(CONVERSION_TIMEOUT)
            .await
            .map_err(|_| SensorError::Timeout)?;

        trace!("Measured bus, ADC values: {}", adc_buffer);
        Ok(adc_buffer)
    }
}

impl PowerMonitor for BusMonitor {
    async fn bus_voltage(&mut self) -> Result<ElectricPotential, SensorError> {
        let [voltage, _] = self.measure().await?;
        Ok(VOLTAGE_DIVIDER_RATIO * adc_value_to_potential(voltage))
    }

    async fn bus_power(&mut self) -> Result<Power, SensorError> {
        let [voltage, current] = self.measure().await?;
        let current_sense_resistance =
            ElectricalResistance::new::<ohm>(CURRENT_MONITOR_GAIN_V_PER_A);

        Ok(VOLTAGE_DIVIDER_RATIO
            * adc_value_to_potential(voltage)
            * (adc_value_to_potential(current) / current_sense_resistance))
    }
}

#[derive(Debug, Format)]
#[allow(clippy::missing_docs_in_private_items)]
enum CableOrientation {
    Normal,
    Flipped,
    DebugAccessoryMode,
}

/// Map UCPD transmit errors.
fn map_tx_error(error: ucpd::TxError) -> usbpd_traits::DriverTxError {
    match error {
        ucpd::TxError::Discarded => usbpd_traits::DriverTxError::Discarded,
        ucpd::TxError::HardReset => usbpd_traits::DriverTxError::HardReset,
    }
}

/// The sink driver.
///
/// Renegotiation requests interrupt reception with a hard reset, after which the source
/// advertises its capabilities again.
struct UcpdSinkDriver<'d> {
    /// The UCPD PD phy instance.
    pd_phy: PdPhy<'d, peripherals::UCPD1>,
    /// Negotiation status, shared with the user interface.
    status: &'static PowerStatus,
}

impl SinkDriver for UcpdSinkDriver<'_> {
    async fn wait_for_vbus(&self) {
        // The sink policy engine is only running when attached. Therefore VBus is present.
    }

    async fn receive(&mut self, buffer: &mut [u8]) -> Result<usize, usbpd_traits::DriverRxError> {
        let received = select(self.pd_phy.receive(buffer), self.status.wait_renegotiation()).await;

        match received {
            Either::First(result) => result.map_err(|err| match err {
                ucpd::RxError::Crc | ucpd::RxError::Overrun => {
                    usbpd_traits::DriverRxError::Discarded
                }
                ucpd::RxError::HardReset => usbpd_traits::DriverRxError::HardReset,
            }),
            Either::Second(()) => {
                info!("Supply renegotiation requested");
                if let Err(err) = self.pd_phy.transmit_hardreset().await {
                    warn!("Hard reset failed: {}", map_tx_error(err));
                }
                Err(usbpd_traits::DriverRxError::HardReset)
            }
        }
    }

    async fn transmit(&mut self, data: &[u8]) -> Result<(), usbpd_traits::DriverTxError> {
        self.pd_phy.transmit(data).await.map_err(map_tx_error)
    }

    async fn transmit_hard_reset(&mut self) -> Result<(), usbpd_traits::DriverTxError> {
        self.pd_phy.transmit_hardreset().await.map_err(map_tx_error)
    }
}

/// Waits until the cable was detached.
async fn wait_detached<T: ucpd::Instance>(cc_phy: &mut CcPhy<'_, T>) {
    loop {
        let (cc1, cc2) = cc_phy.vstate();
        if cc1 == CcVState::LOWEST && cc2 == CcVState::LOWEST {
            return;
        }
        cc_phy.wait_for_vstate_change().await;
    }
}

/// Waits until the cable was attached.
async fn wait_attached<T: ucpd::Instance>(cc_phy: &mut CcPhy<'_, T>) -> CableOrientation {
    loop {
        let (cc1, cc2) = cc_phy.vstate();
        if cc1 == CcVState::LOWEST && cc2 == CcVState::LOWEST {
            cc_phy.wait_for_vstate_change().await;
            continue;
        }

        // Attached, wait for CC lines to be stable for tCCDebounce (100..200ms).
        if with_timeout(Duration::from_millis(100), cc_phy.wait_for_vstate_change())
            .await
            .is_ok()
        {
            continue;
        };

        return match (cc1, cc2) {
            (_, CcVState::LOWEST) => CableOrientation::Normal,
            (CcVState::LOWEST, _) => CableOrientation::Flipped,
            _ => CableOrientation::DebugAccessoryMode,
        };
    }
}

/// Timer implementation for usbpd.
struct EmbassySinkTimer {}

impl SinkTimer for EmbassySinkTimer {
    async fn after_millis(milliseconds: u64) {
        Timer::after_millis(milliseconds).await
    }
}

/// This device.
struct Device {
    /// Negotiation status, shared with the user interface.
    status: &'static PowerStatus,
}

impl DevicePolicyManager for Device {
    async fn request(
        &mut self,
        source_capabilities: &pdo::SourceCapabilities,
    ) -> request::PowerSource {
        let pdos = source_capabilities.pdos();
        let index = select_fixed_pdo(
            pdos.iter().map(|pdo| match pdo {
                pdo::PowerDataObject::FixedSupply(supply) => {
                    Some(supply.voltage().get::<millivolt>())
                }
                _ => None,
            }),
            CONFIG.requested_voltage_mv,
            CONFIG.max_fixed_pdo_index,
        );

        // Compliant sources list vSafe5V first, so the fallback is the first fixed supply.
        let selected = match pdos.get(index) {
            Some(pdo::PowerDataObject::FixedSupply(supply)) => Some((index, supply)),
            _ => pdos.iter().enumerate().find_map(|(index, pdo)| match pdo {
                pdo::PowerDataObject::FixedSupply(supply) => Some((index, supply)),
                _ => None,
            }),
        };

        let request = selected.and_then(|(index, supply)| {
            let requested_mv = supply.voltage().get::<millivolt>();
            info!("Requesting fixed supply {} at {} mV", index, requested_mv);
            self.status.set_requested(requested_mv);

            request::PowerSource::new_fixed_specific(
                request::IndexedFixedSupply(supply, index),
                request::CurrentRequest::Highest,
            )
            .ok()
        });

        match request {
            Some(request) => request,
            None => {
                // Without a request, the sink never becomes ready and heating stays disabled
                // until the cable is detached.
                error!("Source offers no usable fixed supply");
                core::future::pending().await
            }
        }
    }

    /// Notify the device that it shall transition to a new power level.
    async fn transition_power(&mut self, accepted: &request::PowerSource) {
        if let request::PowerSource::FixedVariableSupply(_) = accepted {
            info!("Supply ready at {} mV", self.status.requested_mv());
            self.status.set_ready();
        }
    }
}

/// Handle USB PD negotiation.
#[embassy_executor::task]
pub async fn ucpd_task(mut ucpd_resources: UcpdResources, status: &'static PowerStatus) {
    let mut ndb_pin = Output::new(ucpd_resources.pin_ndb.reborrow(), Level::Low, Speed::Low);

    loop {
        status.clear_ready();

        let mut ucpd = Ucpd::new(
            ucpd_resources.ucpd.reborrow(),
            Irqs {},
            ucpd_resources.pin_cc1.reborrow(),
            ucpd_resources.pin_cc2.reborrow(),
            Default::default(),
        );

        ucpd.cc_phy().set_pull(CcPull::Sink);
        ndb_pin.set_high();

        info!("Waiting for USB connection");
        let cable_orientation = wait_attached(ucpd.cc_phy()).await;
        info!("USB cable attached, orientation: {}", cable_orientation);

        let cc_sel = match cable_orientation {
            CableOrientation::Normal => CcSel::CC1,
            CableOrientation::Flipped => CcSel::CC2,
            CableOrientation::DebugAccessoryMode => {
                warn!("No PD communication in DAM");
                wait_detached(ucpd.cc_phy()).await;
                continue;
            }
        };
        let (mut cc_phy, pd_phy) = ucpd.split_pd_phy(
            ucpd_resources.rx_dma.reborrow(),
            ucpd_resources.tx_dma.reborrow(),
            cc_sel,
        );

        let driver = UcpdSinkDriver { pd_phy, status };
        let mut sink: Sink<UcpdSinkDriver<'_>, EmbassySinkTimer, _> =
            Sink::new(driver, Device { status });
        info!("Run sink");

        match select(sink.run(), wait_detached(&mut cc_phy)).await {
            Either::First(result) => warn!("Sink loop broken with result: {}", result),
            Either::Second(_) => info!("Detached"),
        }
    }
}
