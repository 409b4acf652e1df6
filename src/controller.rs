//! Acquisition state machine.
//!
//! One [`AcquisitionController`] owns everything a logical ADC device needs during
//! capture: the sample source, the trigger, the channel set, the ring buffer and, for
//! TDM devices, the DMA wrapper. The host transport drives it through the lifecycle
//! hooks of [`Backend`].

use crate::channel::{ChannelSet, MAX_CHANNELS, MAX_SCAN_BYTES};
use crate::config::{Config, Mode};
use crate::error::{Error, ErrorCode};
use crate::ring::RingBuffer;
use crate::sampler::SampleSource;
use crate::tdm::{transfer_unit, NoDma, TdmCapture, TdmPort};
use crate::trigger::{TriggerBinding, TriggerSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    Idle,
    /// Prepared, waiting for the first trigger edge or the first burst request.
    Armed,
    /// Scans are arriving asynchronously, from trigger edges or DMA.
    Streaming,
    /// A burst request is being served or was served this session.
    Draining,
}

/// Bookkeeping of one prepare/end cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Session {
    bytes_per_scan: usize,
    /// Granule of ring buffer writes: one scan, or whole scans and whole DMA words.
    unit: usize,
    buf_size_updated: bool,
    scans: u32,
    bytes: usize,
}

impl Session {
    fn new(bytes_per_scan: usize, unit: usize) -> Self {
        Self {
            bytes_per_scan,
            unit,
            buf_size_updated: false,
            scans: 0,
            bytes: 0,
        }
    }

    /// Counts `bytes` of whole scans committed to the ring buffer. Both counters wrap.
    fn record(&mut self, bytes: usize) {
        self.bytes = self.bytes.wrapping_add(bytes);
        if let Some(scans) = bytes.checked_div(self.bytes_per_scan) {
            self.scans = self.scans.wrapping_add(scans as u32);
        }
    }

    pub fn bytes_per_scan(&self) -> usize {
        self.bytes_per_scan
    }

    pub fn buf_size_updated(&self) -> bool {
        self.buf_size_updated
    }

    pub fn scans(&self) -> u32 {
        self.scans
    }

    /// Bytes committed to the ring buffer this session, modulo `usize::MAX + 1`.
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

/// Static description reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceInfo {
    pub channels: u8,
    pub bytes_per_scan: u16,
    pub mode: Mode,
    pub state: State,
}

/// Hooks the host transport calls, one set per logical device.
pub trait Backend {
    fn pre_enable(&mut self, mask: u32) -> Result<(), ErrorCode>;

    /// Once per trigger edge, continuous mode only.
    fn trigger_handler(&mut self) -> Result<(), ErrorCode>;

    /// Captures `bytes` before returning, burst mode only. Bytes that have to leave the
    /// ring buffer before the request completes are handed to `sink`.
    fn submit(&mut self, bytes: u32, sink: &mut dyn FnMut(&[u8])) -> Result<(), ErrorCode>;

    fn post_disable(&mut self) -> Result<(), ErrorCode>;

    fn debug_reg_read(&mut self, addr: u32) -> Result<u32, ErrorCode>;

    fn debug_reg_write(&mut self, addr: u32, value: u32) -> Result<(), ErrorCode>;

    fn info(&self) -> DeviceInfo;
}

pub struct AcquisitionController<'a, S, T, P, const N: usize> {
    source: S,
    trigger: TriggerBinding<T>,
    channels: ChannelSet<N>,
    ring: RingBuffer<'a>,
    dma: Option<TdmCapture<'a, P>>,
    config: Config,
    state: State,
    session: Option<Session>,
    fault: Option<ErrorCode>,
}

/// Controller of a device captured without DMA.
pub type PolledController<'a, S, T, const N: usize> =
    AcquisitionController<'a, S, T, NoDma<<S as SampleSource>::Error>, N>;

impl<'a, S, T, const N: usize> AcquisitionController<'a, S, T, NoDma<S::Error>, N>
where
    S: SampleSource,
    T: TriggerSource,
{
    pub fn new(
        source: S,
        trigger: T,
        channels: ChannelSet<N>,
        ring: RingBuffer<'a>,
        config: Config,
    ) -> Self {
        Self::build(source, trigger, channels, ring, None, config)
    }
}

impl<'a, S, T, P, const N: usize> AcquisitionController<'a, S, T, P, N>
where
    S: SampleSource,
    T: TriggerSource,
    P: TdmPort<Error = S::Error>,
{
    /// Controller of a device whose samples arrive by DMA.
    pub fn with_dma(
        source: S,
        trigger: T,
        channels: ChannelSet<N>,
        ring: RingBuffer<'a>,
        dma: TdmCapture<'a, P>,
        config: Config,
    ) -> Self {
        Self::build(source, trigger, channels, ring, Some(dma), config)
    }

    fn build(
        source: S,
        trigger: T,
        channels: ChannelSet<N>,
        ring: RingBuffer<'a>,
        dma: Option<TdmCapture<'a, P>>,
        config: Config,
    ) -> Self {
        Self {
            source,
            trigger: TriggerBinding::new(trigger),
            channels,
            ring,
            dma,
            config,
            state: State::Idle,
            session: None,
            fault: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Replaces the capture configuration. Only possible between sessions.
    pub fn configure(&mut self, config: Config) -> Result<(), Error<S::Error>> {
        if self.state != State::Idle {
            return Err(Error::InvalidState);
        }
        self.config = config;
        Ok(())
    }

    pub fn channels(&self) -> &ChannelSet<N> {
        &self.channels
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn trigger(&self) -> &TriggerBinding<T> {
        &self.trigger
    }

    pub fn ring(&self) -> &RingBuffer<'a> {
        &self.ring
    }

    /// Bytes waiting for the host.
    pub fn available(&self) -> usize {
        self.ring.len()
    }

    /// Drains captured bytes for the host.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        self.ring.read(out)
    }

    /// Error code of the last failure raised from interrupt context.
    pub fn take_fault(&mut self) -> Option<ErrorCode> {
        self.fault.take()
    }

    /// Disables the trigger without leaving the current state. Interrupt handlers call
    /// this after an edge the controller refused, so the edge cannot fire again.
    pub fn disarm_trigger(&mut self) -> Result<(), Error<S::Error>> {
        self.trigger.disarm().map_err(|_| Error::Trigger)
    }

    fn unit_for(&self, bytes_per_scan: usize) -> usize {
        match self.dma {
            Some(_) => transfer_unit(bytes_per_scan, P::WORD_BYTES),
            None => bytes_per_scan,
        }
    }

    /// Selects the channels in `mask`, starts the device and arms the trigger.
    ///
    /// Continuous DMA capture starts streaming right away. Everything else waits in
    /// [`State::Armed`] for the first trigger edge or burst request.
    pub fn prepare_transfer(&mut self, mask: u32) -> Result<(), Error<S::Error>> {
        if self.state != State::Idle {
            return Err(Error::InvalidState);
        }
        let count = self.channels.apply_mask(mask)?;
        let bytes_per_scan = self.channels.bytes_per_scan();
        info!(
            "prepare: mask {=u32:#x}, {=usize} channels, {=usize} bytes per scan",
            mask,
            count,
            bytes_per_scan
        );

        self.ring.reset()?;
        self.fault = None;
        let mut session = Session::new(bytes_per_scan, self.unit_for(bytes_per_scan));
        self.source.start_conversion(mask).map_err(Error::Bus)?;

        let started = match (self.config.mode, self.dma.as_mut()) {
            (Mode::Continuous, Some(dma)) => dma.start(&mut self.ring, session.unit).map(|_| {
                session.buf_size_updated = true;
                State::Streaming
            }),
            _ => Ok(State::Armed),
        };
        let armed = started.and_then(|state| {
            self.trigger.arm().map_err(|_| Error::Trigger)?;
            Ok(state)
        });

        match armed {
            Ok(state) => {
                self.state = state;
                self.session = Some(session);
                Ok(())
            }
            Err(err) => {
                warn!("prepare failed: {=i32}", err.code());
                let _ = self.trigger.disarm();
                if let Some(dma) = self.dma.as_mut() {
                    let _ = dma.stop(&mut self.ring);
                }
                let _ = self.source.stop_conversion();
                Err(err)
            }
        }
    }

    /// Captures one scan. Runs in interrupt context on every trigger edge.
    ///
    /// The trigger is disabled across the bus transaction. When any step fails it
    /// stays disabled and nothing is written to the ring buffer.
    pub fn trigger_handler(&mut self) -> Result<(), Error<S::Error>> {
        if self.config.mode != Mode::Continuous || self.dma.is_some() {
            return Err(Error::InvalidState);
        }
        if !matches!(self.state, State::Armed | State::Streaming) {
            return Err(Error::InvalidState);
        }

        let res = self.capture_scan(true);
        if let Err(err) = &res {
            self.fault = Some(err.code());
            warn!("trigger handler failed: {=i32}", err.code());
        }
        res
    }

    fn capture_scan(&mut self, realign: bool) -> Result<(), Error<S::Error>> {
        let session = self.session.as_mut().ok_or(Error::InvalidState)?;
        let guard = self.trigger.suppress().map_err(|_| Error::Trigger)?;

        if realign && !session.buf_size_updated {
            let size = self.ring.resize_to_multiple(session.bytes_per_scan)?;
            session.buf_size_updated = true;
            self.state = State::Streaming;
            debug!("ring realigned to {=usize} bytes", size);
        }

        let mut active = [0u8; MAX_CHANNELS];
        let count = self.channels.active_indices(&mut active);
        let mut raw = [0u32; MAX_CHANNELS];
        self.source
            .read_all_active(&active[..count], &mut raw[..count])
            .map_err(Error::Bus)?;

        let mut scan = [0u8; MAX_SCAN_BYTES];
        let mut len = 0;
        for (ch, &code) in self.channels.active().zip(raw[..count].iter()) {
            len += ch.encode(code, &mut scan[len..]);
        }
        self.ring.write(&scan[..len])?;

        guard.rearm().map_err(|_| Error::Trigger)?;
        session.record(len);
        Ok(())
    }

    /// Captures `bytes`, rounded down to whole scans, before returning. Burst mode only.
    ///
    /// The first request of a session realigns the ring buffer to the request size, up
    /// to its capacity. Larger requests run in passes of one ring buffer's worth, and a
    /// pass that needs room drops the oldest unread bytes. Each scan waits for a
    /// data-ready edge within the configured budget; DMA devices wait for the port to
    /// report a full pass instead.
    pub fn submit(&mut self, bytes: u32) -> Result<(), Error<S::Error>> {
        self.submit_with(bytes, |_| {})
    }

    /// Like [`AcquisitionController::submit`], but unread bytes go to `sink` before a
    /// pass reuses their space. The last pass stays in the ring buffer.
    pub fn submit_with<F>(&mut self, bytes: u32, mut sink: F) -> Result<(), Error<S::Error>>
    where
        F: FnMut(&[u8]),
    {
        if self.config.mode != Mode::Burst {
            return Err(Error::InvalidState);
        }
        if !matches!(self.state, State::Armed | State::Draining) {
            return Err(Error::InvalidState);
        }

        let res = self.drain(bytes as usize, &mut sink);
        if let Err(err) = &res {
            warn!("submit failed: {=i32}", err.code());
        }
        res
    }

    fn drain(&mut self, bytes: usize, sink: &mut dyn FnMut(&[u8])) -> Result<(), Error<S::Error>> {
        let session = self.session.as_mut().ok_or(Error::InvalidState)?;
        let unit = session.unit;
        let mut remaining = bytes / unit * unit;
        if remaining == 0 {
            return Ok(());
        }
        self.state = State::Draining;

        if !session.buf_size_updated {
            let size = self.ring.resize_within(remaining, unit)?;
            session.buf_size_updated = true;
            debug!("ring realigned to {=usize} bytes", size);
        }

        while remaining > 0 {
            let pass = remaining.min(self.ring.size());
            if pass > self.ring.free() {
                self.make_room(pass, sink);
            }
            self.capture_pass(pass, unit)?;
            remaining -= pass;
        }
        Ok(())
    }

    /// Moves the oldest unread bytes to `sink` until `bytes` are free.
    fn make_room(&mut self, bytes: usize, sink: &mut dyn FnMut(&[u8])) {
        let mut chunk = [0u8; 64];
        let mut moved = 0;
        while self.ring.free() < bytes {
            let want = (bytes - self.ring.free()).min(chunk.len());
            let n = self.ring.read(&mut chunk[..want]);
            if n == 0 {
                break;
            }
            sink(&chunk[..n]);
            moved += n;
        }
        trace!("burst: {=usize} bytes moved out for the next pass", moved);
    }

    fn capture_pass(&mut self, bytes: usize, unit: usize) -> Result<(), Error<S::Error>> {
        if let Some(dma) = self.dma.as_mut() {
            let captured = dma.read_burst(&mut self.ring, bytes, unit, self.config.dma_budget)?;
            if let Some(session) = self.session.as_mut() {
                session.record(captured);
            }
            return Ok(());
        }

        let budget = self.config.data_ready_budget;
        for _ in 0..bytes / unit {
            let trigger = &mut self.trigger;
            budget.poll::<S::Error, _>(|| trigger.take_pending().map_err(|_| Error::Trigger))?;
            self.capture_scan(false)?;
        }
        Ok(())
    }

    /// Ends the session: disables the trigger, stops the DMA port and puts the device
    /// in standby. Safe to call in any state.
    pub fn end_transfer(&mut self) -> Result<(), Error<S::Error>> {
        let disarmed = self.trigger.disarm().map_err(|_| Error::Trigger);
        let dma_stopped = match self.dma.as_mut() {
            Some(dma) => dma.stop(&mut self.ring),
            None => Ok(()),
        };
        let stopped = match self.state {
            State::Idle => Ok(()),
            _ => self.source.stop_conversion().map_err(Error::Bus),
        };

        if let Some(session) = self.session.take() {
            info!(
                "end: {=u32} scans, {=usize} bytes",
                session.scans,
                session.bytes
            );
        }
        self.state = State::Idle;
        disarmed.and(dma_stopped).and(stopped)
    }

    /// DMA half-complete interrupt.
    pub fn on_dma_half_complete(&mut self) -> Result<(), Error<S::Error>> {
        let res = match self.dma.as_mut() {
            Some(dma) => dma.on_half_complete(&mut self.ring),
            None => Ok(0),
        };
        self.account_dma(res)
    }

    /// DMA full-complete interrupt.
    pub fn on_dma_full_complete(&mut self) -> Result<(), Error<S::Error>> {
        let res = match self.dma.as_mut() {
            Some(dma) => dma.on_full_complete(&mut self.ring),
            None => Ok(0),
        };
        self.account_dma(res)
    }

    fn account_dma(&mut self, res: Result<usize, Error<S::Error>>) -> Result<(), Error<S::Error>> {
        match res {
            Ok(committed) => {
                if let Some(session) = self.session.as_mut() {
                    session.record(committed);
                }
                Ok(())
            }
            Err(err) => {
                self.fault = Some(err.code());
                Err(err)
            }
        }
    }

    pub fn debug_reg_read(&mut self, addr: u32) -> Result<u32, Error<S::Error>> {
        self.source.read_register(addr).map_err(Error::Bus)
    }

    pub fn debug_reg_write(&mut self, addr: u32, value: u32) -> Result<(), Error<S::Error>> {
        self.source.write_register(addr, value).map_err(Error::Bus)
    }
}

impl<S, T, P, const N: usize> Backend for AcquisitionController<'_, S, T, P, N>
where
    S: SampleSource,
    T: TriggerSource,
    P: TdmPort<Error = S::Error>,
{
    fn pre_enable(&mut self, mask: u32) -> Result<(), ErrorCode> {
        self.prepare_transfer(mask).map_err(|err| err.code())
    }

    fn trigger_handler(&mut self) -> Result<(), ErrorCode> {
        AcquisitionController::trigger_handler(self).map_err(|err| err.code())
    }

    fn submit(&mut self, bytes: u32, sink: &mut dyn FnMut(&[u8])) -> Result<(), ErrorCode> {
        self.submit_with(bytes, sink).map_err(|err| err.code())
    }

    fn post_disable(&mut self) -> Result<(), ErrorCode> {
        self.end_transfer().map_err(|err| err.code())
    }

    fn debug_reg_read(&mut self, addr: u32) -> Result<u32, ErrorCode> {
        AcquisitionController::debug_reg_read(self, addr).map_err(|err| err.code())
    }

    fn debug_reg_write(&mut self, addr: u32, value: u32) -> Result<(), ErrorCode> {
        AcquisitionController::debug_reg_write(self, addr, value).map_err(|err| err.code())
    }

    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            channels: N as u8,
            bytes_per_scan: self.channels.bytes_per_scan() as u16,
            mode: self.config.mode,
            state: self.state,
        }
    }
}
