use crate::budget::Budget;

/// Ring buffer size used by the evaluation boards.
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// Default data-ready budget. Sized for the slowest output data rate of the
/// sigma-delta parts at a 100+ MHz core clock.
pub const DEFAULT_DATA_READY_BUDGET: u32 = 0x00ff_ffff;

/// Default DMA-complete budget for a full ring buffer pass.
pub const DEFAULT_DMA_BUDGET: u32 = 0xffff_ffff;

/// Default budget for the last conversion when leaving continuous read mode.
pub const DEFAULT_STOP_BUDGET: u32 = 10_000;

/// Default DMA half window, in bytes.
pub const DEFAULT_DMA_HALF_LEN: usize = 1024;

/// How samples reach the ring buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// Every trigger edge captures one scan from interrupt context while the host
    /// drains the ring buffer.
    Continuous,
    /// The host requests a fixed number of bytes and waits while they are captured.
    Burst,
}

/// Run-time capture configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub mode: Mode,
    /// Polls of the data-ready condition per scan in burst mode.
    pub data_ready_budget: Budget,
    /// Polls of the DMA "buffer full" flag per DMA pass.
    pub dma_budget: Budget,
    /// Polls of data-ready when a source leaves continuous read mode.
    pub stop_budget: Budget,
    /// Bytes per DMA half window in continuous TDM capture.
    pub dma_half_len: usize,
}

impl Config {
    pub const fn new(mode: Mode) -> Self {
        Self {
            mode,
            data_ready_budget: Budget::new(DEFAULT_DATA_READY_BUDGET),
            dma_budget: Budget::new(DEFAULT_DMA_BUDGET),
            stop_budget: Budget::new(DEFAULT_STOP_BUDGET),
            dma_half_len: DEFAULT_DMA_HALF_LEN,
        }
    }

    pub const fn data_ready_budget(mut self, iterations: u32) -> Self {
        self.data_ready_budget = Budget::new(iterations);
        self
    }

    pub const fn dma_budget(mut self, iterations: u32) -> Self {
        self.dma_budget = Budget::new(iterations);
        self
    }

    pub const fn stop_budget(mut self, iterations: u32) -> Self {
        self.stop_budget = Budget::new(iterations);
        self
    }

    pub const fn dma_half_len(mut self, bytes: usize) -> Self {
        self.dma_half_len = bytes;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(Mode::Continuous)
    }
}
