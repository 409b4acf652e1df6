//! Device adapters that produce raw conversion codes.
//!
//! [`SpiAdc`] covers the sigma-delta parts that stream results out of a data register
//! with data-ready multiplexed on DOUT. [`Sequencer`] covers the SAR parts that take the
//! configuration for conversion `n + 2` while shifting out the result of `n`. [`BitBang`]
//! clocks a result in over two GPIOs.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{self, Error as _, InputPin, OutputPin};
use embedded_hal::spi::{self, Error as _, SpiBus};

use crate::budget::Budget;
use crate::channel::Rotation;
use crate::error::Error;

/// Synchronous producer of raw conversion codes for one device.
pub trait SampleSource {
    type Error;

    /// Puts the device into continuous conversion of the channels in `mask`.
    fn start_conversion(&mut self, mask: u32) -> Result<(), Self::Error>;

    /// Returns the device to standby.
    fn stop_conversion(&mut self) -> Result<(), Self::Error>;

    /// Reads one raw code for `channel`.
    fn read_single(&mut self, channel: u8) -> Result<u32, Self::Error>;

    /// Reads one raw code per entry of `active` into `out`, in order.
    fn read_all_active(&mut self, active: &[u8], out: &mut [u32]) -> Result<(), Self::Error> {
        for (&channel, slot) in active.iter().zip(out.iter_mut()) {
            *slot = self.read_single(channel)?;
        }
        Ok(())
    }

    fn read_register(&mut self, addr: u32) -> Result<u32, Self::Error>;

    fn write_register(&mut self, addr: u32, value: u32) -> Result<(), Self::Error>;
}

/// Errors of the adapters in this module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SourceError {
    Spi(spi::ErrorKind),
    Pin(digital::ErrorKind),
    /// Data-ready was not seen within the budget.
    Timeout,
    /// Register access is not possible while the device streams.
    Busy,
    /// No conversion has been started.
    Idle,
    Unsupported,
}

fn spi_err<E: spi::Error>(err: E) -> SourceError {
    SourceError::Spi(err.kind())
}

fn pin_err<E: digital::Error>(err: E) -> SourceError {
    SourceError::Pin(err.kind())
}

fn settle(err: Error<SourceError>) -> SourceError {
    match err {
        Error::Bus(err) => err,
        _ => SourceError::Timeout,
    }
}

fn be_decode(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0, |value, &b| value << 8 | b as u32)
}

/// Read bit of the communications register.
pub const COMMS_READ: u8 = 0x40;

/// Highest address the communications register can select.
pub const COMMS_ADDR_MASK: u8 = 0x3f;

/// Register layout of an [`SpiAdc`] device.
#[derive(Debug, Clone, Copy)]
pub struct SpiAdcConfig {
    pub data_register: u8,
    /// Width of one conversion result.
    pub data_bytes: usize,
    /// Register holding the operating mode.
    pub mode_register: u8,
    /// Mode word for continuous conversion with continuous read.
    pub continuous_mode: u32,
    pub standby_mode: u32,
    /// Address of the channel 0 setup register. Channel `n` is at `channel_register + n`.
    pub channel_register: u8,
    pub channel_count: u8,
    /// Enable bit in a channel setup register.
    pub channel_enable: u32,
    /// Width in bytes of the register at an address.
    pub register_bytes: fn(u8) -> usize,
    /// Data-ready wait for a single read outside continuous mode.
    pub ready: Budget,
    /// Data-ready wait when leaving continuous read mode.
    pub stop: Budget,
}

/// Sigma-delta ADC read back through its data register.
///
/// In continuous read mode the part shifts out a result on every data-ready without a
/// command byte, and only drives DOUT/RDY while selected, so chip select is held low
/// for the whole session. The part sequences its enabled channels itself and signals
/// one result per data-ready, so a scan waits for data-ready before every result but
/// the first.
pub struct SpiAdc<SPI, CS, RDY> {
    spi: SPI,
    cs: CS,
    rdy: RDY,
    config: SpiAdcConfig,
    streaming: bool,
}

impl<SPI, CS, RDY> SpiAdc<SPI, CS, RDY>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
    RDY: InputPin,
{
    pub fn new(spi: SPI, cs: CS, rdy: RDY, config: SpiAdcConfig) -> Self {
        Self {
            spi,
            cs,
            rdy,
            config,
            streaming: false,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn free(self) -> (SPI, CS, RDY) {
        (self.spi, self.cs, self.rdy)
    }

    /// Data-ready is active low.
    pub fn data_ready(&mut self) -> Result<bool, SourceError> {
        self.rdy.is_low().map_err(pin_err)
    }

    fn wait_ready(&mut self, budget: Budget) -> Result<(), SourceError> {
        let rdy = &mut self.rdy;
        budget
            .poll(|| rdy.is_low().map_err(|err| Error::Bus(pin_err(err))))
            .map_err(settle)
    }

    /// One command byte followed by `buf.len()` bytes clocked in place.
    fn transact(&mut self, cmd: u8, buf: &mut [u8]) -> Result<(), SourceError> {
        if !self.streaming {
            self.cs.set_low().map_err(pin_err)?;
        }
        let res = self
            .spi
            .write(&[cmd])
            .and_then(|_| self.spi.transfer_in_place(buf))
            .and_then(|_| self.spi.flush())
            .map_err(spi_err);
        if !self.streaming {
            self.cs.set_high().map_err(pin_err)?;
        }
        res
    }

    fn register_bytes(&self, addr: u32) -> Result<(u8, usize), SourceError> {
        if addr > COMMS_ADDR_MASK as u32 {
            return Err(SourceError::Unsupported);
        }
        let addr = addr as u8;
        Ok((addr, (self.config.register_bytes)(addr).min(4)))
    }

    fn read_raw(&mut self, addr: u32) -> Result<u32, SourceError> {
        let (addr, n) = self.register_bytes(addr)?;
        let mut buf = [0u8; 4];
        self.transact(COMMS_READ | addr, &mut buf[..n])?;
        Ok(be_decode(&buf[..n]))
    }

    fn write_raw(&mut self, addr: u32, value: u32) -> Result<(), SourceError> {
        let (addr, n) = self.register_bytes(addr)?;
        let mut buf = value.to_be_bytes();
        self.transact(addr, &mut buf[4 - n..])
    }

    fn read_data(&mut self) -> Result<u32, SourceError> {
        let n = self.config.data_bytes.min(4);
        let mut buf = [0u8; 4];
        self.spi.read(&mut buf[..n]).map_err(spi_err)?;
        Ok(be_decode(&buf[..n]))
    }
}

impl<SPI, CS, RDY> SampleSource for SpiAdc<SPI, CS, RDY>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
    RDY: InputPin,
{
    type Error = SourceError;

    fn start_conversion(&mut self, mask: u32) -> Result<(), SourceError> {
        if self.streaming {
            return Err(SourceError::Busy);
        }
        let cfg = self.config;
        for n in 0..cfg.channel_count.min(32) {
            let addr = (cfg.channel_register + n) as u32;
            let setup = self.read_raw(addr)?;
            let setup = if mask >> n & 1 == 1 {
                setup | cfg.channel_enable
            } else {
                setup & !cfg.channel_enable
            };
            self.write_raw(addr, setup)?;
        }
        self.write_raw(cfg.mode_register as u32, cfg.continuous_mode)?;

        self.cs.set_low().map_err(pin_err)?;
        self.streaming = true;
        Ok(())
    }

    fn stop_conversion(&mut self) -> Result<(), SourceError> {
        if !self.streaming {
            return self.write_raw(self.config.mode_register as u32, self.config.standby_mode);
        }

        // continuous read ends with a data register read issued while RDY is low
        let ready = self.wait_ready(self.config.stop);
        let mut discard = [0u8; 4];
        let n = self.config.data_bytes.min(4);
        let exit = self.transact(COMMS_READ | self.config.data_register, &mut discard[..n]);
        self.streaming = false;
        self.cs.set_high().map_err(pin_err)?;
        exit?;

        self.write_raw(self.config.mode_register as u32, self.config.standby_mode)?;
        ready
    }

    /// `channel` only documents the expected result, the part picks the channel.
    fn read_single(&mut self, _channel: u8) -> Result<u32, SourceError> {
        if self.streaming {
            return self.read_data();
        }
        self.wait_ready(self.config.ready)?;
        let n = self.config.data_bytes.min(4);
        let mut buf = [0u8; 4];
        self.transact(COMMS_READ | self.config.data_register, &mut buf[..n])?;
        Ok(be_decode(&buf[..n]))
    }

    /// The first result is the one whose data-ready fired the trigger.
    fn read_all_active(&mut self, active: &[u8], out: &mut [u32]) -> Result<(), SourceError> {
        for (i, (&channel, slot)) in active.iter().zip(out.iter_mut()).enumerate() {
            if i > 0 && self.streaming {
                self.wait_ready(self.config.ready)?;
            }
            *slot = self.read_single(channel)?;
        }
        Ok(())
    }

    fn read_register(&mut self, addr: u32) -> Result<u32, SourceError> {
        if self.streaming {
            return Err(SourceError::Busy);
        }
        self.read_raw(addr)
    }

    fn write_register(&mut self, addr: u32, value: u32) -> Result<(), SourceError> {
        if self.streaming {
            return Err(SourceError::Busy);
        }
        self.write_raw(addr, value)
    }
}

/// Multiplexed SAR ADC with a two-deep configuration pipeline.
///
/// Every 16-bit frame loads the configuration of a later conversion while returning
/// the result of an earlier one, so the channel order comes from a [`Rotation`]. The
/// rising edge of chip select starts a conversion, and each frame is followed by the
/// acquisition time of the channel it configured.
pub struct Sequencer<SPI, CS, D> {
    spi: SPI,
    cs: CS,
    delay: D,
    /// Frame that selects a channel, already aligned to the 16-bit transfer.
    config_word: fn(u8) -> u16,
    /// Wait after the frame that configured a channel.
    acquisition_ns: fn(u8) -> u32,
    rotation: Option<Rotation>,
}

impl<SPI, CS, D> Sequencer<SPI, CS, D>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
    D: DelayNs,
{
    pub fn new(
        spi: SPI,
        cs: CS,
        delay: D,
        config_word: fn(u8) -> u16,
        acquisition_ns: fn(u8) -> u32,
    ) -> Self {
        Self {
            spi,
            cs,
            delay,
            config_word,
            acquisition_ns,
            rotation: None,
        }
    }

    pub fn free(self) -> (SPI, CS, D) {
        (self.spi, self.cs, self.delay)
    }

    pub fn rotation(&self) -> Option<&Rotation> {
        self.rotation.as_ref()
    }

    fn exchange(&mut self, channel: u8) -> Result<u16, SourceError> {
        let mut frame = (self.config_word)(channel).to_be_bytes();
        self.cs.set_low().map_err(pin_err)?;
        let res = self
            .spi
            .transfer_in_place(&mut frame)
            .and_then(|_| self.spi.flush())
            .map_err(spi_err);
        self.cs.set_high().map_err(pin_err)?;
        res?;
        self.delay.delay_ns((self.acquisition_ns)(channel));
        Ok(u16::from_be_bytes(frame))
    }
}

impl<SPI, CS, D> SampleSource for Sequencer<SPI, CS, D>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
    D: DelayNs,
{
    type Error = SourceError;

    fn start_conversion(&mut self, mask: u32) -> Result<(), SourceError> {
        let rotation = Rotation::from_mask(mask).ok_or(SourceError::Unsupported)?;

        // the first two results are stale, only the configurations matter
        self.exchange(rotation.first())?;
        if let Some(second) = rotation.second() {
            self.exchange(second)?;
        }
        self.rotation = Some(rotation);
        Ok(())
    }

    fn stop_conversion(&mut self) -> Result<(), SourceError> {
        self.rotation = None;
        Ok(())
    }

    fn read_single(&mut self, _channel: u8) -> Result<u32, SourceError> {
        let next = self
            .rotation
            .as_mut()
            .map(Rotation::next_channel)
            .ok_or(SourceError::Idle)?;
        self.exchange(next).map(u32::from)
    }

    fn read_register(&mut self, _addr: u32) -> Result<u32, SourceError> {
        Err(SourceError::Unsupported)
    }

    fn write_register(&mut self, _addr: u32, _value: u32) -> Result<(), SourceError> {
        Err(SourceError::Unsupported)
    }
}

/// Result shifted in MSB first on a data pin, one bit per clock pulse.
pub struct BitBang<CLK, DATA> {
    clk: CLK,
    data: DATA,
    bits: u8,
}

impl<CLK, DATA> BitBang<CLK, DATA>
where
    CLK: OutputPin,
    DATA: InputPin,
{
    pub fn new(clk: CLK, data: DATA, bits: u8) -> Self {
        Self {
            clk,
            data,
            bits: bits.min(32),
        }
    }

    pub fn free(self) -> (CLK, DATA) {
        (self.clk, self.data)
    }
}

impl<CLK, DATA> SampleSource for BitBang<CLK, DATA>
where
    CLK: OutputPin,
    DATA: InputPin,
{
    type Error = SourceError;

    fn start_conversion(&mut self, _mask: u32) -> Result<(), SourceError> {
        self.clk.set_low().map_err(pin_err)
    }

    fn stop_conversion(&mut self) -> Result<(), SourceError> {
        self.clk.set_low().map_err(pin_err)
    }

    fn read_single(&mut self, _channel: u8) -> Result<u32, SourceError> {
        let mut value = 0u32;
        for _ in 0..self.bits {
            self.clk.set_high().map_err(pin_err)?;
            let bit = self.data.is_high().map_err(pin_err)?;
            self.clk.set_low().map_err(pin_err)?;
            value = value << 1 | bit as u32;
        }
        Ok(value)
    }

    fn read_register(&mut self, _addr: u32) -> Result<u32, SourceError> {
        Err(SourceError::Unsupported)
    }

    fn write_register(&mut self, _addr: u32, _value: u32) -> Result<(), SourceError> {
        Err(SourceError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Op {
        Select,
        Release,
        Out(Vec<u8>),
        In(usize),
        Clock,
        Wait(u32),
    }

    type Log = Rc<RefCell<Vec<Op>>>;

    struct Bus {
        log: Log,
        replies: VecDeque<u8>,
    }

    impl Bus {
        fn fill(&mut self, words: &mut [u8]) {
            for w in words {
                *w = self.replies.pop_front().unwrap_or(0);
            }
        }
    }

    impl spi::ErrorType for Bus {
        type Error = Infallible;
    }

    impl SpiBus<u8> for Bus {
        fn read(&mut self, words: &mut [u8]) -> Result<(), Infallible> {
            self.log.borrow_mut().push(Op::In(words.len()));
            self.fill(words);
            Ok(())
        }

        fn write(&mut self, words: &[u8]) -> Result<(), Infallible> {
            self.log.borrow_mut().push(Op::Out(words.to_vec()));
            Ok(())
        }

        fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Infallible> {
            self.log.borrow_mut().push(Op::Out(write.to_vec()));
            self.fill(read);
            Ok(())
        }

        fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Infallible> {
            self.log.borrow_mut().push(Op::Out(words.to_vec()));
            self.fill(words);
            Ok(())
        }

        fn flush(&mut self) -> Result<(), Infallible> {
            Ok(())
        }
    }

    struct Cs(Log);

    impl digital::ErrorType for Cs {
        type Error = Infallible;
    }

    impl OutputPin for Cs {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.0.borrow_mut().push(Op::Select);
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            self.0.borrow_mut().push(Op::Release);
            Ok(())
        }
    }

    /// Goes low after `low_after` polls.
    struct Rdy {
        low_after: usize,
        polls: Rc<RefCell<usize>>,
    }

    impl digital::ErrorType for Rdy {
        type Error = Infallible;
    }

    impl InputPin for Rdy {
        fn is_high(&mut self) -> Result<bool, Infallible> {
            self.is_low().map(|low| !low)
        }

        fn is_low(&mut self) -> Result<bool, Infallible> {
            let mut polls = self.polls.borrow_mut();
            *polls += 1;
            Ok(*polls > self.low_after)
        }
    }

    fn register_bytes(addr: u8) -> usize {
        match addr {
            0x01 => 2,
            0x02 => 3,
            0x09..=0x0a => 2,
            _ => 1,
        }
    }

    const CONFIG: SpiAdcConfig = SpiAdcConfig {
        data_register: 0x02,
        data_bytes: 3,
        mode_register: 0x01,
        continuous_mode: 0x0880,
        standby_mode: 0x0088,
        channel_register: 0x09,
        channel_count: 2,
        channel_enable: 0x8000,
        register_bytes,
        ready: Budget::new(100),
        stop: Budget::new(50),
    };

    fn spi_adc(replies: &[u8], low_after: usize) -> (SpiAdc<Bus, Cs, Rdy>, Log, Rc<RefCell<usize>>) {
        let log = Log::default();
        let polls = Rc::new(RefCell::new(0));
        let bus = Bus {
            log: log.clone(),
            replies: replies.iter().copied().collect(),
        };
        let rdy = Rdy {
            low_after,
            polls: polls.clone(),
        };
        (SpiAdc::new(bus, Cs(log.clone()), rdy, CONFIG), log, polls)
    }

    #[test]
    fn register_read_is_big_endian() {
        let (mut adc, log, _) = spi_adc(&[0x12, 0x34], 0);
        assert_eq!(adc.read_register(0x01), Ok(0x1234));
        assert_eq!(
            *log.borrow(),
            [
                Op::Select,
                Op::Out(vec![0x41]),
                Op::Out(vec![0, 0]),
                Op::Release
            ]
        );
        assert_eq!(adc.read_register(0x40), Err(SourceError::Unsupported));
    }

    #[test]
    fn start_enables_masked_channels_and_holds_select() {
        // channel 0 setup reads back 0x0001, channel 1 reads back 0x8001
        let (mut adc, log, _) = spi_adc(&[0x00, 0x01, 0, 0, 0x80, 0x01], 0);
        adc.start_conversion(0b01).unwrap();
        assert!(adc.is_streaming());

        let log = log.borrow();
        assert!(log.contains(&Op::Out(vec![0x80, 0x01])));
        assert!(log.contains(&Op::Out(vec![0x00, 0x01])));
        assert!(log.contains(&Op::Out(vec![0x01])));
        assert!(log.contains(&Op::Out(vec![0x08, 0x80])));
        assert_eq!(log.last(), Some(&Op::Select));
    }

    #[test]
    fn streaming_read_has_no_command() {
        let (mut adc, log, _) = spi_adc(&[], 0);
        adc.start_conversion(0b11).unwrap();
        log.borrow_mut().clear();

        adc.spi.replies.extend([0xa1, 0xb2, 0xc3]);
        assert_eq!(adc.read_single(0), Ok(0x00a1_b2c3));
        assert_eq!(*log.borrow(), [Op::In(3)]);
        assert_eq!(adc.read_register(0x01), Err(SourceError::Busy));
    }

    #[test]
    fn stop_waits_for_ready_then_standby() {
        let (mut adc, log, polls) = spi_adc(&[], 3);
        adc.streaming = true;
        adc.stop_conversion().unwrap();
        assert!(!adc.is_streaming());
        assert_eq!(*polls.borrow(), 4);
        assert_eq!(
            *log.borrow(),
            [
                Op::Out(vec![0x42]),
                Op::Out(vec![0, 0, 0]),
                Op::Release,
                Op::Select,
                Op::Out(vec![0x01]),
                Op::Out(vec![0x00, 0x88]),
                Op::Release,
            ]
        );
    }

    #[test]
    fn stop_still_reaches_standby_on_timeout() {
        let (mut adc, log, polls) = spi_adc(&[], usize::MAX);
        adc.streaming = true;
        assert_eq!(adc.stop_conversion(), Err(SourceError::Timeout));
        assert_eq!(*polls.borrow(), 50);
        assert!(log.borrow().contains(&Op::Out(vec![0x00, 0x88])));
    }

    #[test]
    fn streaming_scan_waits_for_each_result() {
        let (mut adc, log, polls) = spi_adc(&[], 2);
        adc.start_conversion(0b11).unwrap();
        log.borrow_mut().clear();

        adc.spi.replies.extend([0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        let mut out = [0; 2];
        adc.read_all_active(&[0, 1], &mut out).unwrap();
        assert_eq!(out, [0x01_0203, 0x04_0506]);
        assert_eq!(*polls.borrow(), 3);
        assert_eq!(*log.borrow(), [Op::In(3), Op::In(3)]);
    }

    #[test]
    fn streaming_scan_stops_when_next_result_never_arrives() {
        let (mut adc, log, polls) = spi_adc(&[], usize::MAX);
        adc.start_conversion(0b11).unwrap();
        log.borrow_mut().clear();

        let mut out = [0; 2];
        assert_eq!(
            adc.read_all_active(&[0, 1], &mut out),
            Err(SourceError::Timeout)
        );
        assert_eq!(*polls.borrow(), 100);
        assert_eq!(*log.borrow(), [Op::In(3)]);
    }

    #[test]
    fn single_read_waits_for_ready() {
        let (mut adc, _, polls) = spi_adc(&[0, 0, 7], 5);
        assert_eq!(adc.read_single(0), Ok(7));
        assert_eq!(*polls.borrow(), 6);

        let (mut adc, _, _) = spi_adc(&[], usize::MAX);
        assert_eq!(adc.read_single(0), Err(SourceError::Timeout));
    }

    fn cfg(channel: u8) -> u16 {
        0x8000 | (channel as u16) << 8
    }

    /// Channel 3 stands in for the temperature sensor.
    fn acquisition(channel: u8) -> u32 {
        match channel {
            3 => 5_000,
            _ => 1_000,
        }
    }

    struct Delay(Log);

    impl DelayNs for Delay {
        fn delay_ns(&mut self, ns: u32) {
            self.0.borrow_mut().push(Op::Wait(ns));
        }
    }

    fn sequencer(replies: &[u8]) -> (Sequencer<Bus, Cs, Delay>, Log) {
        let log = Log::default();
        let bus = Bus {
            log: log.clone(),
            replies: replies.iter().copied().collect(),
        };
        let seq = Sequencer::new(bus, Cs(log.clone()), Delay(log.clone()), cfg, acquisition);
        (seq, log)
    }

    fn frames(log: &Log) -> Vec<u16> {
        log.borrow()
            .iter()
            .filter_map(|op| match op {
                Op::Out(b) if b.len() == 2 => Some(u16::from_be_bytes([b[0], b[1]])),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn sequencer_primes_first_and_second() {
        let (mut seq, log) = sequencer(&[]);
        seq.start_conversion(0b1101).unwrap();
        assert_eq!(frames(&log), [cfg(0), cfg(2)]);

        let mut out = [0; 3];
        seq.read_all_active(&[0, 2, 3], &mut out).unwrap();
        assert_eq!(frames(&log)[2..], [cfg(3), cfg(0), cfg(2)]);
    }

    #[test]
    fn sequencer_single_channel_primes_once() {
        let (mut seq, log) = sequencer(&[0, 0, 0x12, 0x34]);
        seq.start_conversion(0b100).unwrap();
        assert_eq!(frames(&log), [cfg(2)]);
        assert_eq!(seq.read_single(2), Ok(0x1234));
        assert_eq!(seq.read_single(2), Ok(0));
        assert_eq!(frames(&log), [cfg(2), cfg(2), cfg(2)]);
    }

    #[test]
    fn sequencer_waits_after_every_frame() {
        let (mut seq, log) = sequencer(&[]);
        seq.start_conversion(0b1001).unwrap();
        let mut out = [0; 2];
        seq.read_all_active(&[0, 3], &mut out).unwrap();

        let waits: Vec<_> = log
            .borrow()
            .iter()
            .filter_map(|op| match op {
                Op::Wait(ns) => Some(*ns),
                _ => None,
            })
            .collect();
        assert_eq!(waits, [1_000, 5_000, 1_000, 5_000]);
        assert_eq!(
            log.borrow()[..4],
            [
                Op::Select,
                Op::Out(cfg(0).to_be_bytes().to_vec()),
                Op::Release,
                Op::Wait(1_000)
            ]
        );
    }

    #[test]
    fn sequencer_needs_start() {
        let (mut seq, _) = sequencer(&[]);
        assert_eq!(seq.read_single(0), Err(SourceError::Idle));
        seq.start_conversion(1).unwrap();
        seq.stop_conversion().unwrap();
        assert!(seq.rotation().is_none());
    }

    struct Clk(Log);

    impl digital::ErrorType for Clk {
        type Error = Infallible;
    }

    impl OutputPin for Clk {
        fn set_low(&mut self) -> Result<(), Infallible> {
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            self.0.borrow_mut().push(Op::Clock);
            Ok(())
        }
    }

    struct Data(VecDeque<bool>);

    impl digital::ErrorType for Data {
        type Error = Infallible;
    }

    impl InputPin for Data {
        fn is_high(&mut self) -> Result<bool, Infallible> {
            Ok(self.0.pop_front().unwrap_or(false))
        }

        fn is_low(&mut self) -> Result<bool, Infallible> {
            self.is_high().map(|high| !high)
        }
    }

    #[test]
    fn bit_bang_msb_first() {
        let log = Log::default();
        let bits = [true, false, true, true, false, false, true, false];
        let mut src = BitBang::new(Clk(log.clone()), Data(bits.into_iter().collect()), 8);
        assert_eq!(src.read_single(0), Ok(0b1011_0010));
        assert_eq!(log.borrow().len(), 8);
        assert_eq!(src.read_register(0), Err(SourceError::Unsupported));
    }
}
