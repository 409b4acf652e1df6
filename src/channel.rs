use crate::error::Error;

/// Highest channel count a channel mask can address.
pub const MAX_CHANNELS: usize = 32;

/// Largest scan, in bytes: every channel active with 32-bit storage.
pub const MAX_SCAN_BYTES: usize = MAX_CHANNELS * 4;

/// Terminates a [`Rotation`] list.
pub const END_OF_CHANNELS: u8 = 0xff;

/// One ADC channel as seen by the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Channel {
    index: u8,
    storage_bits: u8,
    signed: bool,
    scale: f32,
    offset: f32,
    active: bool,
}

impl Channel {
    /// Unsigned channel with unit scale. `storage_bits` is 8, 16, 24 or 32.
    pub const fn new(index: u8, storage_bits: u8) -> Self {
        assert!(matches!(storage_bits, 8 | 16 | 24 | 32));
        Self {
            index,
            storage_bits,
            signed: false,
            scale: 1.0,
            offset: 0.0,
            active: false,
        }
    }

    /// Marks the channel as bipolar: raw codes are two's complement.
    pub const fn signed(mut self) -> Self {
        self.signed = true;
        self
    }

    /// Physical value = (raw + offset) * scale.
    pub const fn with_scale(mut self, scale: f32, offset: f32) -> Self {
        self.scale = scale;
        self.offset = offset;
        self
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn storage_bits(&self) -> u8 {
        self.storage_bits
    }

    pub fn storage_bytes(&self) -> usize {
        self.storage_bits as usize / 8
    }

    pub fn is_signed(&self) -> bool {
        self.signed
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn offset(&self) -> f32 {
        self.offset
    }

    /// Raw code as a signed value, sign-extended from the storage width for bipolar
    /// channels.
    pub fn sign_extend(&self, raw: u32) -> i64 {
        let shift = 32 - self.storage_bits as u32;
        if self.signed {
            (((raw << shift) as i32) >> shift) as i64
        } else {
            ((raw << shift) >> shift) as i64
        }
    }

    pub fn to_physical(&self, raw: u32) -> f32 {
        (self.sign_extend(raw) as f32 + self.offset) * self.scale
    }

    /// Stores `raw` little-endian in `storage_bytes` bytes. Returns the byte count.
    pub fn encode(&self, raw: u32, out: &mut [u8]) -> usize {
        let n = self.storage_bytes();
        out[..n].copy_from_slice(&raw.to_le_bytes()[..n]);
        n
    }
}

/// The rejected mask of a [`ChannelSet::apply_mask`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidChannelMask(pub u32);

impl<E> From<InvalidChannelMask> for Error<E> {
    fn from(_: InvalidChannelMask) -> Self {
        Error::InvalidChannelMask
    }
}

/// The channels of one device, in index order.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSet<const N: usize> {
    channels: [Channel; N],
}

impl<const N: usize> ChannelSet<N> {
    /// Panics if a channel's index differs from its position in `channels`.
    pub fn new(channels: [Channel; N]) -> Self {
        assert!(N <= MAX_CHANNELS);
        for (n, ch) in channels.iter().enumerate() {
            assert!(ch.index as usize == n, "channel index must match its position");
        }
        Self { channels }
    }

    pub fn len(&self) -> usize {
        N
    }

    pub fn is_empty(&self) -> bool {
        N == 0
    }

    pub fn get(&self, index: usize) -> Option<&Channel> {
        self.channels.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    pub fn active(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter().filter(|ch| ch.active)
    }

    pub fn active_count(&self) -> usize {
        self.active().count()
    }

    /// Sum of the storage bytes of the active channels.
    pub fn bytes_per_scan(&self) -> usize {
        self.active().map(Channel::storage_bytes).sum()
    }

    /// Bit `n` set for every active channel `n`.
    pub fn mask(&self) -> u32 {
        self.channels
            .iter()
            .enumerate()
            .filter(|(_, ch)| ch.active)
            .fold(0, |mask, (n, _)| mask | 1 << n)
    }

    /// Activates the channels selected by `mask` and deactivates the rest. The set is
    /// left untouched when `mask` is empty or names a channel beyond `N`.
    pub fn apply_mask(&mut self, mask: u32) -> Result<usize, InvalidChannelMask> {
        let out_of_range = N < MAX_CHANNELS && mask >> N != 0;
        if mask == 0 || out_of_range {
            return Err(InvalidChannelMask(mask));
        }
        for (n, ch) in self.channels.iter_mut().enumerate() {
            ch.active = mask >> n & 1 == 1;
        }
        Ok(mask.count_ones() as usize)
    }

    /// Writes the indices of the active channels into `out`, returns how many.
    pub fn active_indices(&self, out: &mut [u8; MAX_CHANNELS]) -> usize {
        let mut count = 0;
        for ch in self.active() {
            out[count] = ch.index;
            count += 1;
        }
        count
    }
}

/// Conversion order for sources that configure channel `n + 2` while reading the
/// result of channel `n`.
///
/// The first two active channels are primed before the session starts. The list then
/// holds the remaining active channels followed by the first and the second, and is
/// terminated by [`END_OF_CHANNELS`]. Walking off the end wraps to the start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rotation {
    first: u8,
    second: Option<u8>,
    list: [u8; MAX_CHANNELS + 1],
    cursor: usize,
}

impl Rotation {
    /// `None` for an empty mask.
    pub fn from_mask(mask: u32) -> Option<Self> {
        if mask == 0 {
            return None;
        }

        let mut list = [END_OF_CHANNELS; MAX_CHANNELS + 1];
        let mut first = 0;
        let mut second = None;
        let mut count = 0;
        for ch in 0..MAX_CHANNELS as u8 {
            if mask >> ch & 1 == 0 {
                continue;
            }
            match count {
                0 => first = ch,
                1 => second = Some(ch),
                n => list[n - 2] = ch,
            }
            count += 1;
        }

        match second {
            Some(second) => {
                list[count - 2] = first;
                list[count - 1] = second;
            }
            None => list[0] = first,
        }
        list[count] = END_OF_CHANNELS;

        Some(Self {
            first,
            second,
            list,
            cursor: 0,
        })
    }

    pub fn first(&self) -> u8 {
        self.first
    }

    pub fn second(&self) -> Option<u8> {
        self.second
    }

    /// The list up to, not including, the terminator.
    pub fn as_slice(&self) -> &[u8] {
        &self.list[..self.sentinel_index()]
    }

    pub fn sentinel_index(&self) -> usize {
        self.list
            .iter()
            .position(|&ch| ch == END_OF_CHANNELS)
            .unwrap_or(MAX_CHANNELS)
    }

    /// Channel to configure next.
    pub fn next_channel(&mut self) -> u8 {
        if self.list[self.cursor] == END_OF_CHANNELS {
            self.cursor = 0;
        }
        let ch = self.list[self.cursor];
        self.cursor += 1;
        ch
    }
}
