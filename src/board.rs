//! Evaluation board wiring: an AD7124 on SPI0 with DOUT/RDY also routed to GPIO20.

use core::convert::Infallible;
use embedded_hal::digital::{ErrorType, InputPin};
use hal::gpio::bank0::{Gpio16, Gpio17, Gpio18, Gpio19, Gpio20};
use hal::gpio::{FunctionSioInput, FunctionSioOutput, FunctionSpi, Interrupt, Pin, PullDown, PullUp};
use hal::pac;
use iio_capture::config::{DEFAULT_DATA_READY_BUDGET, DEFAULT_STOP_BUDGET};
use iio_capture::sampler::{SpiAdc, SpiAdcConfig};
use iio_capture::{Budget, Channel, PolledController, TriggerSource};

use crate::CHANNELS;

pub const RDY_GPIO: u32 = 20;

pub type Miso = Pin<Gpio16, FunctionSpi, PullDown>;
pub type Sclk = Pin<Gpio18, FunctionSpi, PullDown>;
pub type Mosi = Pin<Gpio19, FunctionSpi, PullDown>;
pub type CsPin = Pin<Gpio17, FunctionSioOutput, PullDown>;
pub type RdyPin = Pin<Gpio20, FunctionSioInput, PullUp>;

pub type AdcSpi = hal::spi::Spi<hal::spi::Enabled, pac::SPI0, (Mosi, Miso, Sclk), 8>;
pub type Adc = SpiAdc<AdcSpi, CsPin, ReadyLine>;
pub type Controller = PolledController<'static, Adc, RdyTrigger, CHANNELS>;

const ADC_CONTROL: u8 = 0x01;
const DATA: u8 = 0x02;
const CHANNEL_0: u8 = 0x09;

const CONT_READ: u32 = 1 << 11;
const FULL_POWER: u32 = 0b10 << 6;
const MODE_STANDBY: u32 = 0b0010 << 2;
const CHANNEL_ENABLE: u32 = 1 << 15;

/// Full scale of the bipolar input range with the internal 2.5 V reference.
const VOLTS_PER_CODE: f32 = 2.980_232_2e-7;
const MID_SCALE: f32 = -8_388_608.0;

fn ad7124_register_bytes(addr: u8) -> usize {
    match addr {
        // status, id, mclk count
        0x00 | 0x05 | 0x08 => 1,
        // adc control, io control 2, channels, setups
        0x01 | 0x04 | 0x09..=0x20 => 2,
        _ => 3,
    }
}

pub const AD7124: SpiAdcConfig = SpiAdcConfig {
    data_register: DATA,
    data_bytes: 3,
    mode_register: ADC_CONTROL,
    continuous_mode: CONT_READ | FULL_POWER,
    standby_mode: FULL_POWER | MODE_STANDBY,
    channel_register: CHANNEL_0,
    channel_count: CHANNELS as u8,
    channel_enable: CHANNEL_ENABLE,
    register_bytes: ad7124_register_bytes,
    ready: Budget::new(DEFAULT_DATA_READY_BUDGET),
    stop: Budget::new(DEFAULT_STOP_BUDGET),
};

pub fn ad7124_channel(index: u8) -> Channel {
    Channel::new(index, 24).with_scale(VOLTS_PER_CODE, MID_SCALE)
}

/// Level of DOUT/RDY, sampled straight from SIO. The pin itself belongs to
/// [`RdyTrigger`].
pub struct ReadyLine;

impl ErrorType for ReadyLine {
    type Error = Infallible;
}

impl InputPin for ReadyLine {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        // SAFETY: GPIO_IN is a read-only snapshot of the pad levels.
        let levels = unsafe { (*pac::SIO::ptr()).gpio_in.read().bits() };
        Ok(levels & (1 << RDY_GPIO) != 0)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.is_high().map(|high| !high)
    }
}

/// Falling edge of RDY. Continuous capture takes it as `IO_IRQ_BANK0`; burst capture
/// polls the line level and leaves the interrupt masked.
pub struct RdyTrigger {
    pin: RdyPin,
    edge_irq: bool,
    armed: bool,
}

impl RdyTrigger {
    pub fn new(pin: RdyPin, edge_irq: bool) -> Self {
        Self {
            pin,
            edge_irq,
            armed: false,
        }
    }
}

impl TriggerSource for RdyTrigger {
    type Error = Infallible;

    fn enable(&mut self) -> Result<(), Self::Error> {
        self.armed = true;
        self.pin
            .set_interrupt_enabled(Interrupt::EdgeLow, self.edge_irq);
        Ok(())
    }

    fn disable(&mut self) -> Result<(), Self::Error> {
        self.armed = false;
        self.pin.set_interrupt_enabled(Interrupt::EdgeLow, false);
        Ok(())
    }

    fn clear_pending(&mut self) -> Result<(), Self::Error> {
        self.pin.clear_interrupt(Interrupt::EdgeLow);
        Ok(())
    }

    fn take_pending(&mut self) -> Result<bool, Self::Error> {
        if !self.armed {
            return Ok(false);
        }
        self.pin.is_low()
    }
}
