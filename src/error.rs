use core::fmt;

/// Negative errno value reported to the host transport.
pub type ErrorCode = i32;

pub const EIO: ErrorCode = 5;
pub const EAGAIN: ErrorCode = 11;
pub const EFAULT: ErrorCode = 14;
pub const EBUSY: ErrorCode = 16;
pub const EINVAL: ErrorCode = 22;
pub const ENOSPC: ErrorCode = 28;
pub const ETIMEDOUT: ErrorCode = 110;

/// Ring buffer failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RingError {
    /// The write does not fit into the free space.
    Overflow,
    /// No contiguous free space is left for an async window.
    WouldOverflow,
    /// The reserve/commit protocol was not followed.
    ProtocolMisuse,
}

/// Acquisition errors. `E` is the error type of the device's sample source and is
/// carried through unmodified in [`Error::Bus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
    /// A data-ready or DMA-complete wait used up its iteration budget.
    Timeout,
    /// The ring buffer cannot take another scan.
    Overflow,
    /// The ring buffer has no room for an async window.
    WouldOverflow,
    /// The channel mask selects no channel, or a channel the device does not have.
    InvalidChannelMask,
    /// The device bus (SPI, TDM, GPIO) failed.
    Bus(E),
    /// The trigger source could not be enabled, disabled or cleared.
    Trigger,
    /// The async window protocol was not followed.
    ProtocolMisuse,
    /// The hook has no meaning in the current state or capture mode.
    InvalidState,
}

impl<E> Error<E> {
    /// Errno code for the host transport.
    pub fn code(&self) -> ErrorCode {
        let errno = match self {
            Error::Timeout => ETIMEDOUT,
            Error::Overflow => ENOSPC,
            Error::WouldOverflow => EAGAIN,
            Error::InvalidChannelMask => EINVAL,
            Error::Bus(_) | Error::Trigger => EIO,
            Error::ProtocolMisuse => EFAULT,
            Error::InvalidState => EBUSY,
        };
        -errno
    }

    pub fn map_bus<F>(self, op: impl FnOnce(E) -> F) -> Error<F> {
        match self {
            Error::Timeout => Error::Timeout,
            Error::Overflow => Error::Overflow,
            Error::WouldOverflow => Error::WouldOverflow,
            Error::InvalidChannelMask => Error::InvalidChannelMask,
            Error::Bus(err) => Error::Bus(op(err)),
            Error::Trigger => Error::Trigger,
            Error::ProtocolMisuse => Error::ProtocolMisuse,
            Error::InvalidState => Error::InvalidState,
        }
    }
}

impl<E> From<RingError> for Error<E> {
    fn from(err: RingError) -> Self {
        match err {
            RingError::Overflow => Error::Overflow,
            RingError::WouldOverflow => Error::WouldOverflow,
            RingError::ProtocolMisuse => Error::ProtocolMisuse,
        }
    }
}

impl fmt::Display for RingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RingError::Overflow => f.write_str("ring buffer overflow"),
            RingError::WouldOverflow => f.write_str("no free window in ring buffer"),
            RingError::ProtocolMisuse => f.write_str("async window protocol misuse"),
        }
    }
}

impl<E: fmt::Debug> fmt::Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Timeout => f.write_str("timed out waiting for data"),
            Error::Overflow => f.write_str("ring buffer overflow"),
            Error::WouldOverflow => f.write_str("no free window in ring buffer"),
            Error::InvalidChannelMask => f.write_str("invalid channel mask"),
            Error::Bus(err) => write!(f, "bus error: {:?}", err),
            Error::Trigger => f.write_str("trigger source failure"),
            Error::ProtocolMisuse => f.write_str("async window protocol misuse"),
            Error::InvalidState => f.write_str("operation not valid in current state"),
        }
    }
}
