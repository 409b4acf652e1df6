#![no_std]
#![no_main]

extern crate panic_probe;
extern crate rp2040_hal as hal;
extern crate rtic;

mod board;
mod link;

use defmt_rtt as _;

use board::*;
use cortex_m::singleton;
use embedded_hal::digital::{OutputPin, StatefulOutputPin};
use fugit::RateExtU32;
use hal::gpio::*;
use hal::pac;
use hal::usb::UsbBus;
use hal::Clock;
use iio_capture::sampler::SpiAdc;
use iio_capture::{AcquisitionController, ChannelSet, Config, Mode, RingBuffer};
use link::*;
use rtic_monotonics::rp2040::prelude::*;
use usb_device::{class_prelude::*, prelude::*};
use usbd_serial::SerialPort;

pub const CHANNELS: usize = 4;
pub const BUFFER_SIZE: usize = iio_capture::config::DEFAULT_BUFFER_SIZE;
pub const SPI_FREQ_HZ: u32 = 5_000_000;
pub const HEARTBEAT_MS: u64 = 250;

pub const XTAL_FREQ_HZ: u32 = 12_000_000_u32;

#[cfg(not(feature = "burst"))]
pub const CAPTURE_MODE: Mode = Mode::Continuous;

#[cfg(feature = "burst")]
pub const CAPTURE_MODE: Mode = Mode::Burst;

#[cfg(not(feature = "generic-bootloader"))]
#[used]
#[no_mangle]
#[link_section = ".boot2"]
pub static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_W25Q080;

#[cfg(feature = "generic-bootloader")]
#[used]
#[no_mangle]
#[link_section = ".boot2"]
pub static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_GENERIC_03H;

rp2040_timer_monotonic!(Mono);

type LedPin = Pin<bank0::Gpio25, FunctionSioOutput, PullDown>;

#[rtic::app(device = pac, peripherals = true, dispatchers = [TIMER_IRQ_1])]
mod app {
    use super::*;

    #[shared]
    struct Shared {
        controller: Controller,
        link: HostLink,
    }

    #[local]
    struct Local {
        status_led: LedPin,
    }

    #[init]
    fn init(ctx: init::Context) -> (Shared, Local) {
        unsafe {
            hal::sio::spinlock_reset();
        }

        let mut resets = ctx.device.RESETS;
        let mut watchdog = hal::Watchdog::new(ctx.device.WATCHDOG);
        let clocks = hal::clocks::init_clocks_and_plls(
            XTAL_FREQ_HZ,
            ctx.device.XOSC,
            ctx.device.CLOCKS,
            ctx.device.PLL_SYS,
            ctx.device.PLL_USB,
            &mut resets,
            &mut watchdog,
        )
        .ok()
        .unwrap();

        Mono::start(ctx.device.TIMER, &resets);

        let usb_regs = ctx.device.USBCTRL_REGS;
        let usb_dpram = ctx.device.USBCTRL_DPRAM;
        let usb_bus = UsbBus::new(usb_regs, usb_dpram, clocks.usb_clock, true, &mut resets);
        let usb_bus: &'static UsbBusAllocator<UsbBus> =
            singleton!(: UsbBusAllocator<UsbBus> = UsbBusAllocator::new(usb_bus)).unwrap();

        let serial = SerialPort::new(usb_bus);
        let usb_dev = UsbDeviceBuilder::new(usb_bus, UsbVidPid(0x16c0, 0x27dd))
            .strings(&[StringDescriptors::default()
                .manufacturer("Analog Devices")
                .product("iio-capture")
                .serial_number("AD7124")])
            .unwrap()
            .device_class(2)
            .build();

        let sio = hal::Sio::new(ctx.device.SIO);
        let pins = Pins::new(
            ctx.device.IO_BANK0,
            ctx.device.PADS_BANK0,
            sio.gpio_bank0,
            &mut resets,
        );

        let mosi: Mosi = pins.gpio19.into_function::<FunctionSpi>();
        let miso: Miso = pins.gpio16.into_function::<FunctionSpi>();
        let sclk: Sclk = pins.gpio18.into_function::<FunctionSpi>();
        let cs: CsPin = pins.gpio17.into_push_pull_output_in_state(PinState::High);
        let rdy: RdyPin = pins.gpio20.into_pull_up_input();

        let spi = hal::spi::Spi::<_, _, _, 8>::new(ctx.device.SPI0, (mosi, miso, sclk)).init(
            &mut resets,
            clocks.peripheral_clock.freq(),
            SPI_FREQ_HZ.Hz(),
            embedded_hal::spi::MODE_3,
        );

        let storage = singleton!(: [u8; BUFFER_SIZE] = [0; BUFFER_SIZE]).unwrap();
        let channels = ChannelSet::new(core::array::from_fn(|n| ad7124_channel(n as u8)));
        let controller = AcquisitionController::new(
            SpiAdc::new(spi, cs, ReadyLine, AD7124),
            RdyTrigger::new(rdy, CAPTURE_MODE == Mode::Continuous),
            channels,
            RingBuffer::new(storage),
            Config::new(CAPTURE_MODE),
        );

        unsafe {
            pac::NVIC::unmask(pac::Interrupt::USBCTRL_IRQ);
            pac::NVIC::unmask(pac::Interrupt::IO_IRQ_BANK0);
        };

        let status_led = pins.gpio25.into_push_pull_output();
        let link = HostLink::new(usb_dev, serial);
        heartbeat::spawn().ok();
        defmt::info!("iio-capture: {} channels, {} mode", CHANNELS, CAPTURE_MODE);

        (Shared { controller, link }, Local { status_led })
    }

    #[task(binds = IO_IRQ_BANK0, shared = [controller], priority = 2)]
    fn rdy_irq(mut ctx: rdy_irq::Context) {
        ctx.shared.controller.lock(|ctl| {
            if ctl.trigger_handler().is_err() {
                ctl.disarm_trigger().ok();
            }
        });
    }

    #[task(binds = USBCTRL_IRQ, shared = [controller, link], priority = 1)]
    fn usb_irq(ctx: usb_irq::Context) {
        (ctx.shared.link, ctx.shared.controller).lock(|link, ctl| link.poll(ctl));
    }

    #[task(shared = [link], local = [status_led], priority = 1)]
    async fn heartbeat(mut ctx: heartbeat::Context) {
        loop {
            if ctx.shared.link.lock(|link| link.is_streaming()) {
                ctx.local.status_led.toggle().ok();
                rtic::pend(pac::Interrupt::USBCTRL_IRQ);
            } else {
                ctx.local.status_led.set_low().ok();
            }
            Mono::delay(HEARTBEAT_MS.millis()).await;
        }
    }
}
