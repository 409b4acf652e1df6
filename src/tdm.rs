//! Double-buffered DMA capture from a TDM port into the ring buffer.
//!
//! Continuous capture runs linear DMA passes of two half windows. Only the half being
//! filled is reserved in the ring buffer: the half-complete interrupt commits it and
//! reserves the second half, the full-complete interrupt commits the second half and
//! restarts the port on the next pass. The ring buffer is realigned to whole passes so
//! a pass never straddles the wrap point.

use core::marker::PhantomData;

use crate::budget::Budget;
use crate::error::Error;
use crate::ring::{AsyncWindow, RingBuffer};
use crate::trigger::Latch;

/// DMA-driven serial port that fills memory in the background.
pub trait TdmPort {
    type Error;

    /// Size of one slot word as stored in memory.
    const WORD_BYTES: usize;

    /// Starts one linear pass of `len` bytes into `dst`. The port stops by itself at the
    /// end of the pass.
    ///
    /// # Safety
    ///
    /// `dst` must stay valid for writes of `len` bytes, and must not be accessed
    /// otherwise, until the pass completes or [`TdmPort::stop`] returns.
    unsafe fn start_read(&mut self, dst: *mut u8, len: usize) -> Result<(), Self::Error>;

    fn stop(&mut self) -> Result<(), Self::Error>;
}

/// Port for devices captured without DMA. Never moves any data.
pub struct NoDma<E>(PhantomData<fn() -> E>);

impl<E> NoDma<E> {
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<E> Default for NoDma<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> TdmPort for NoDma<E> {
    type Error = E;
    const WORD_BYTES: usize = 1;

    unsafe fn start_read(&mut self, _dst: *mut u8, _len: usize) -> Result<(), E> {
        Ok(())
    }

    fn stop(&mut self) -> Result<(), E> {
        Ok(())
    }
}

const fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Smallest transfer that holds whole scans and whole slot words.
pub const fn transfer_unit(bytes_per_scan: usize, word_bytes: usize) -> usize {
    if bytes_per_scan == 0 || word_bytes == 0 {
        return 0;
    }
    bytes_per_scan / gcd(bytes_per_scan, word_bytes) * word_bytes
}

pub struct TdmCapture<'f, P> {
    port: P,
    /// Raised on every full-complete interrupt.
    full: &'f Latch,
    half_len: usize,
    /// Half window length of the running session.
    half: usize,
    window: Option<AsyncWindow>,
    streaming: bool,
    second_half: bool,
}

impl<'f, P: TdmPort> TdmCapture<'f, P> {
    pub fn new(port: P, full: &'f Latch, half_len: usize) -> Self {
        Self {
            port,
            full,
            half_len,
            half: 0,
            window: None,
            streaming: false,
            second_half: false,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Whether a window is reserved for a pass in flight.
    pub fn is_busy(&self) -> bool {
        self.window.is_some()
    }

    pub fn half_window(&self) -> usize {
        self.half
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Starts continuous capture. `unit` is the [`transfer_unit`] of the session.
    ///
    /// Resets and realigns `ring` to a whole number of passes.
    pub fn start(&mut self, ring: &mut RingBuffer<'_>, unit: usize) -> Result<(), Error<P::Error>> {
        if self.streaming || self.window.is_some() {
            return Err(Error::InvalidState);
        }
        if unit == 0 {
            return Err(Error::ProtocolMisuse);
        }
        let half = self.half_len.min(ring.capacity() / 2) / unit * unit;
        if half == 0 {
            return Err(Error::Overflow);
        }
        let size = ring.resize_to_multiple(2 * half)?;
        debug!("tdm: half window {=usize}, ring {=usize}", half, size);

        self.half = half;
        self.second_half = false;
        self.full.clear();
        self.begin_pass(ring)?;
        self.streaming = true;
        Ok(())
    }

    fn begin_pass(&mut self, ring: &mut RingBuffer<'_>) -> Result<(), Error<P::Error>> {
        let pass = 2 * self.half;
        if ring.contiguous_free() < pass {
            return Err(Error::WouldOverflow);
        }
        let window = ring.prepare_async_write(self.half)?;
        let dst = ring.window_ptr(&window);
        // SAFETY: `pass` bytes from the write cursor are free and contiguous. Only the
        // port writes there until the windows are committed or the port is stopped.
        if let Err(err) = unsafe { self.port.start_read(dst, pass) } {
            ring.abort_async_write(window);
            return Err(Error::Bus(err));
        }
        self.window = Some(window);
        Ok(())
    }

    /// Half-complete interrupt. Returns the bytes committed.
    pub fn on_half_complete(&mut self, ring: &mut RingBuffer<'_>) -> Result<usize, Error<P::Error>> {
        if !self.streaming {
            return Ok(0);
        }
        if self.second_half {
            return Err(Error::ProtocolMisuse);
        }
        let window = self.window.take().ok_or(Error::ProtocolMisuse)?;
        let committed = ring.end_async_write(window);
        self.window = Some(ring.prepare_async_write(self.half)?);
        self.second_half = true;
        trace!("tdm: committed {=usize}", committed);
        Ok(committed)
    }

    /// Full-complete interrupt. Raises the full flag, and while streaming commits the
    /// pass and restarts the port. Returns the bytes committed.
    ///
    /// When the ring buffer has no room for another pass the port is stopped and
    /// [`Error::WouldOverflow`] is returned.
    pub fn on_full_complete(&mut self, ring: &mut RingBuffer<'_>) -> Result<usize, Error<P::Error>> {
        self.full.signal();
        if !self.streaming {
            return Ok(0);
        }

        let mut committed = 0;
        if !self.second_half {
            committed += self.on_half_complete(ring)?;
        }
        let window = self.window.take().ok_or(Error::ProtocolMisuse)?;
        committed += ring.end_async_write(window);
        self.second_half = false;

        if let Err(err) = self.begin_pass(ring) {
            self.streaming = false;
            // the port already stopped at the end of the pass
            let _ = self.port.stop();
            warn!("tdm: capture stopped, {=usize} bytes unread", ring.len());
            return Err(err);
        }
        trace!("tdm: committed {=usize}", committed);
        Ok(committed)
    }

    /// Captures `bytes`, rounded down to `unit`, one pass at a time, waiting on the full
    /// flag for each pass.
    ///
    /// On timeout the port keeps running and the window stays reserved until
    /// [`TdmCapture::stop`].
    pub fn read_burst(
        &mut self,
        ring: &mut RingBuffer<'_>,
        bytes: usize,
        unit: usize,
        budget: Budget,
    ) -> Result<usize, Error<P::Error>> {
        if self.streaming || self.window.is_some() {
            return Err(Error::InvalidState);
        }
        if unit == 0 {
            return Err(Error::ProtocolMisuse);
        }

        let bytes = bytes / unit * unit;
        let mut done = 0;
        while done < bytes {
            let len = (bytes - done).min(ring.contiguous_free()) / unit * unit;
            if len == 0 {
                return Err(Error::WouldOverflow);
            }
            let window = ring.prepare_async_write(len)?;
            let dst = ring.window_ptr(&window);
            self.full.clear();
            // SAFETY: the window is reserved, nothing else writes it before commit.
            if let Err(err) = unsafe { self.port.start_read(dst, window.len()) } {
                ring.abort_async_write(window);
                return Err(Error::Bus(err));
            }
            self.window = Some(window);

            let full = self.full;
            budget.poll::<P::Error, _>(|| Ok(full.take()))?;

            let window = self.window.take().ok_or(Error::ProtocolMisuse)?;
            done += ring.end_async_write(window);
            self.port.stop().map_err(Error::Bus)?;
        }
        Ok(done)
    }

    /// Stops the port and drops the window in flight without committing it.
    pub fn stop(&mut self, ring: &mut RingBuffer<'_>) -> Result<(), Error<P::Error>> {
        self.streaming = false;
        self.second_half = false;
        let res = self.port.stop();
        if let Some(window) = self.window.take() {
            ring.abort_async_write(window);
        }
        res.map_err(Error::Bus)
    }

    pub fn free(self) -> P {
        self.port
    }
}
