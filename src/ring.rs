//! Byte ring buffer shared by one producer (interrupt or DMA) and one consumer
//! (the host transport).
//!
//! Ordinary writes copy a whole scan at once. DMA capture goes through an async
//! window instead: [`RingBuffer::prepare_async_write`] reserves a contiguous region and
//! hands out an [`AsyncWindow`] token, the peripheral fills the region in the background,
//! and [`RingBuffer::end_async_write`] consumes the token to commit it.

use crate::error::RingError;

/// Reservation made by [`RingBuffer::prepare_async_write`].
///
/// The token is consumed by exactly one [`RingBuffer::end_async_write`] or
/// [`RingBuffer::abort_async_write`].
#[derive(Debug, PartialEq, Eq)]
#[must_use = "an async window must be committed or aborted"]
pub struct AsyncWindow {
    start: usize,
    len: usize,
    generation: u32,
}

impl AsyncWindow {
    /// Offset of the window in the backing storage.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Bytes reserved. May be less than requested when the end of the buffer is near.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Reservation {
    start: usize,
    len: usize,
    generation: u32,
}

pub struct RingBuffer<'a> {
    ring: &'a mut [u8],
    /// Usable part of `ring`, realigned to the scan stride every session.
    size: usize,
    head: usize,
    tail: usize,
    len: usize,
    reserved: Option<Reservation>,
    generation: u32,
}

impl<'a> RingBuffer<'a> {
    pub fn new(ring: &'a mut [u8]) -> Self {
        let size = ring.len();
        Self {
            ring,
            size,
            head: 0,
            tail: 0,
            len: 0,
            reserved: None,
            generation: 0,
        }
    }

    /// Size of the backing storage.
    pub fn capacity(&self) -> usize {
        self.ring.len()
    }

    /// Usable size after the last realignment.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Bytes waiting for the consumer.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn free(&self) -> usize {
        self.size - self.len
    }

    /// Largest free run that starts at the write cursor and does not wrap.
    pub fn contiguous_free(&self) -> usize {
        self.free().min(self.size - self.tail)
    }

    pub fn is_reserved(&self) -> bool {
        self.reserved.is_some()
    }

    /// Discards all content and rewinds the cursors.
    pub fn reset(&mut self) -> Result<(), RingError> {
        if self.reserved.is_some() {
            return Err(RingError::ProtocolMisuse);
        }
        self.head = 0;
        self.tail = 0;
        self.len = 0;
        Ok(())
    }

    /// Clamps the usable size to the largest multiple of `stride` that fits the
    /// backing storage, so scans never straddle the wrap point.
    pub fn resize_to_multiple(&mut self, stride: usize) -> Result<usize, RingError> {
        self.resize_within(self.capacity(), stride)
    }

    /// Like [`RingBuffer::resize_to_multiple`] but bounded by `limit` bytes.
    pub fn resize_within(&mut self, limit: usize, stride: usize) -> Result<usize, RingError> {
        if stride == 0 {
            return Err(RingError::ProtocolMisuse);
        }
        let limit = limit.min(self.capacity());
        let size = limit / stride * stride;
        if size == 0 {
            return Err(RingError::Overflow);
        }
        self.reset()?;
        self.size = size;
        Ok(size)
    }

    /// Appends `data` as one unit. Nothing is written unless all of it fits.
    pub fn write(&mut self, data: &[u8]) -> Result<(), RingError> {
        if self.reserved.is_some() {
            return Err(RingError::ProtocolMisuse);
        }
        if data.len() > self.free() {
            return Err(RingError::Overflow);
        }
        if data.is_empty() {
            return Ok(());
        }

        let first = data.len().min(self.size - self.tail);
        self.ring[self.tail..self.tail + first].copy_from_slice(&data[..first]);
        let rest = data.len() - first;
        self.ring[..rest].copy_from_slice(&data[first..]);

        self.tail = (self.tail + data.len()) % self.size;
        self.len += data.len();
        Ok(())
    }

    /// Moves up to `out.len()` bytes to the consumer. Returns the byte count.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.len);
        if n == 0 {
            return 0;
        }
        let first = n.min(self.size - self.head);
        out[..first].copy_from_slice(&self.ring[self.head..self.head + first]);
        let rest = n - first;
        out[first..n].copy_from_slice(&self.ring[..rest]);

        self.head = (self.head + n) % self.size;
        self.len -= n;
        n
    }

    /// Reserves the largest contiguous run of free space at the write cursor, up to
    /// `requested` bytes.
    pub fn prepare_async_write(&mut self, requested: usize) -> Result<AsyncWindow, RingError> {
        if self.reserved.is_some() {
            return Err(RingError::ProtocolMisuse);
        }
        let len = requested.min(self.contiguous_free());
        if len == 0 {
            return Err(RingError::WouldOverflow);
        }

        self.generation = self.generation.wrapping_add(1);
        let reservation = Reservation {
            start: self.tail,
            len,
            generation: self.generation,
        };
        self.reserved = Some(reservation);
        Ok(AsyncWindow {
            start: reservation.start,
            len,
            generation: reservation.generation,
        })
    }

    /// Storage behind `window`, for filling it from the CPU.
    pub fn window_mut(&mut self, window: &AsyncWindow) -> &mut [u8] {
        self.check(window);
        &mut self.ring[window.start..window.start + window.len]
    }

    /// Start address of `window`, for programming a DMA channel. The pointer is valid
    /// up to the end of the backing storage.
    pub fn window_ptr(&mut self, window: &AsyncWindow) -> *mut u8 {
        self.check(window);
        self.ring[window.start..].as_mut_ptr()
    }

    /// Commits the whole reserved window. Returns the bytes committed.
    ///
    /// # Panics
    ///
    /// If `window` is not the reservation currently open on this buffer.
    pub fn end_async_write(&mut self, window: AsyncWindow) -> usize {
        self.check(&window);
        self.reserved = None;
        self.tail = (self.tail + window.len) % self.size;
        self.len += window.len;
        window.len
    }

    /// Releases the reservation without committing anything.
    ///
    /// # Panics
    ///
    /// If `window` is not the reservation currently open on this buffer.
    pub fn abort_async_write(&mut self, window: AsyncWindow) {
        self.check(&window);
        self.reserved = None;
    }

    fn check(&self, window: &AsyncWindow) {
        let open = self.reserved.map_or(false, |r| {
            r.start == window.start && r.len == window.len && r.generation == window.generation
        });
        assert!(open, "async window is not the open reservation");
    }
}
