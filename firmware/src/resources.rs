//! Assignment of the board's peripherals to tasks.
use assign_resources::assign_resources;
use embassy_stm32::Peri;
use embassy_stm32::peripherals;

assign_resources! {
    #[allow(missing_docs)]
    tip: TipResources {
        adc: ADC1,
        pin_tip: PA0,
        dma: DMA1_CH6,
        timer: TIM1,
        pin_heater: PA8,
    }
    #[allow(missing_docs)]
    bus: BusResources {
        adc: ADC2,
        pin_voltage: PA4,
        pin_current: PC4,
        dma: DMA2_CH1,
    }
    #[allow(missing_docs)]
    accelerometer: AccelerometerResources {
        i2c: I2C1,
        pin_scl: PB8,
        pin_sda: PB9,
        tx_dma: DMA2_CH2,
        rx_dma: DMA2_CH3,
    }
    #[allow(missing_docs)]
    ucpd: UcpdResources {
        ucpd: UCPD1,
        pin_cc1: PB6,
        pin_cc2: PB4,
        rx_dma: DMA1_CH1,
        tx_dma: DMA1_CH2,
        pin_ndb: PB5,
    }
    #[allow(missing_docs)]
    display: DisplayResources {
        spi: SPI1,
        pin_sck: PA5,
        pin_mosi: PA7,
        dma: DMA2_CH4,
        pin_dc: PB11,
        pin_cs: PB12,
        pin_reset: PB13,
    }
    #[allow(missing_docs)]
    buttons: ButtonResources {
        pin_up: PB0,
        exti_up: EXTI0,
        pin_down: PB1,
        exti_down: EXTI1,
        pin_ok: PB2,
        exti_ok: EXTI2,
        pin_next: PB10,
        exti_next: EXTI10,
    }
    #[allow(missing_docs)]
    storage: StorageResources {
        flash: FLASH,
    }
}
