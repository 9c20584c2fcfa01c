//! Channel-interleaved placement of the shared vector
//!
//! The vector is cut into 64-byte strips and dealt round-robin over the
//! memory channels. Channel `c` holds strips `c, c + n, c + 2n, ...`
//! packed contiguously from `base + c · capacity`:
//!
//! ```text
//! source   | s0 | s1 | s2 | s3 | s4 | s5 | s6 |        n = 4
//! ch0      | s0 | s4 |
//! ch1      | s1 | s5 |
//! ch2      | s2 | s6 |
//! ch3      | s3 |
//! ```
//!
//! Index-valued data that points into the vector (CSR column indices) must
//! be rewritten with the same mapping, see [`IndexRemap`].

use crate::config::validate_channels;
use crate::error::{Result, SpmvError};
use crate::io::RegisterIo;
use spmv_chip::memory::hbm;
use tracing::debug;

/// Striping granularity in bytes
pub const STRIP_BYTES: u64 = hbm::STRIP_BYTES;

/// How a vector of `total_bytes` spreads over the channels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StripeLayout {
    total_bytes: u64,
    per_channel_strips: Vec<u64>,
}

impl StripeLayout {
    /// Distribute `total_bytes` over `channel_count` channels
    ///
    /// The quotient goes to every channel and the remainder to the first
    /// channels, so counts differ by at most one.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` unless `channel_count` is a power of two
    /// between 1 and 16.
    pub fn compute(total_bytes: u64, channel_count: u32) -> Result<Self> {
        if channel_count == 0 {
            return Err(SpmvError::configuration("striping needs at least one channel"));
        }
        validate_channels(channel_count)?;
        let strips = total_bytes.div_ceil(STRIP_BYTES);
        let n = u64::from(channel_count);
        let (base, remainder) = (strips / n, strips % n);
        let per_channel_strips = (0..n).map(|c| base + u64::from(c < remainder)).collect();
        Ok(Self {
            total_bytes,
            per_channel_strips,
        })
    }

    /// Number of channels
    pub fn channel_count(&self) -> u32 {
        self.per_channel_strips.len() as u32
    }

    /// Vector length in bytes
    pub const fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Strips in the whole vector
    pub fn strip_count(&self) -> u64 {
        self.per_channel_strips.iter().sum()
    }

    /// Strips held by each channel
    pub fn per_channel_strips(&self) -> &[u64] {
        &self.per_channel_strips
    }

    /// Bytes written to channel `channel`, padding included
    pub fn channel_bytes(&self, channel: usize) -> u64 {
        self.per_channel_strips.get(channel).map_or(0, |s| s * STRIP_BYTES)
    }

    /// Source strip indices that land on `channel`, in placement order
    pub fn source_strips(&self, channel: usize) -> impl Iterator<Item = u64> + '_ {
        let n = self.per_channel_strips.len() as u64;
        let count = self.per_channel_strips.get(channel).copied().unwrap_or(0);
        (0..count).map(move |j| channel as u64 + j * n)
    }

    /// Contents of `channel`'s region assembled from `source`
    ///
    /// A short final strip is zero-padded to the full strip size.
    pub fn gather(&self, channel: usize, source: &[u8]) -> Vec<u8> {
        let strip = STRIP_BYTES as usize;
        let mut out = vec![0u8; self.channel_bytes(channel) as usize];
        for (j, s) in self.source_strips(channel).enumerate() {
            let start = (s as usize * strip).min(source.len());
            let end = (start + strip).min(source.len());
            out[j * strip..j * strip + (end - start)].copy_from_slice(&source[start..end]);
        }
        out
    }

    /// Per-channel write plan: destination address and length
    pub fn write_plan(&self, base: u64, capacity: u64) -> Vec<(u64, u64)> {
        (0..self.per_channel_strips.len())
            .map(|c| (base + c as u64 * capacity, self.channel_bytes(c)))
            .collect()
    }
}

/// Rewrites flat element indices into striped placement indices
///
/// A channel count of 0 or 1 leaves indices untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRemap {
    channels: u64,
    elems_per_strip: u64,
    capacity_elems: u64,
}

impl IndexRemap {
    /// Remap for `element_size`-byte elements over `channels` channels of
    /// `capacity` bytes each
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for an invalid channel count or an element
    /// size that does not divide the strip.
    pub fn new(channels: u32, element_size: u64, capacity: u64) -> Result<Self> {
        validate_channels(channels)?;
        if element_size == 0 || STRIP_BYTES % element_size != 0 {
            return Err(SpmvError::configuration(format!(
                "element size {element_size} does not divide the {STRIP_BYTES}-byte strip"
            )));
        }
        Ok(Self {
            channels: u64::from(channels),
            elems_per_strip: STRIP_BYTES / element_size,
            capacity_elems: capacity / element_size,
        })
    }

    /// Whether the remap changes anything
    pub const fn is_identity(&self) -> bool {
        self.channels <= 1
    }

    /// Placement index of flat index `i`
    pub const fn remap(&self, i: u64) -> u64 {
        if self.is_identity() {
            return i;
        }
        let strip = i / self.elems_per_strip;
        let channel = strip % self.channels;
        let offset = strip / self.channels;
        channel * self.capacity_elems + offset * self.elems_per_strip + i % self.elems_per_strip
    }

    /// Flat index of placement index `j`
    pub const fn inverse(&self, j: u64) -> u64 {
        if self.is_identity() {
            return j;
        }
        let channel = j / self.capacity_elems;
        let within = j % self.capacity_elems;
        let strip = (within / self.elems_per_strip) * self.channels + channel;
        strip * self.elems_per_strip + within % self.elems_per_strip
    }

    /// Remap a buffer of 32-bit indices
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if a remapped index no longer fits 32 bits.
    pub fn remap_in_place(&self, indices: &mut [u32]) -> Result<()> {
        if self.is_identity() {
            return Ok(());
        }
        for idx in indices {
            let mapped = self.remap(u64::from(*idx));
            *idx = u32::try_from(mapped).map_err(|_| {
                SpmvError::configuration(format!("index {idx} remaps past 32 bits ({mapped:#x})"))
            })?;
        }
        Ok(())
    }
}

/// Places a vector over `channels` memory channels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HbmStriper {
    channels: u32,
    capacity: u64,
}

impl HbmStriper {
    /// Striper over `channels` channels of `capacity` bytes
    ///
    /// # Errors
    ///
    /// Returns `Configuration` unless `channels` is a power of two up to 16.
    pub fn new(channels: u32, capacity: u64) -> Result<Self> {
        if channels == 0 {
            return Err(SpmvError::configuration("striping needs at least one channel"));
        }
        validate_channels(channels)?;
        Ok(Self { channels, capacity })
    }

    /// Layout of a `total_bytes` vector, checked against channel capacity
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the vector exceeds the channels' capacity.
    pub fn layout(&self, total_bytes: u64) -> Result<StripeLayout> {
        let limit = u64::from(self.channels) * self.capacity;
        if total_bytes > limit {
            return Err(SpmvError::configuration(format!(
                "vector of {total_bytes} bytes exceeds {} channel(s) of {} bytes",
                self.channels, self.capacity
            )));
        }
        StripeLayout::compute(total_bytes, self.channels)
    }

    /// Index remap matching this placement for 4-byte elements
    ///
    /// # Errors
    ///
    /// Never fails for a striper built by [`HbmStriper::new`].
    pub fn index_remap(&self) -> Result<IndexRemap> {
        IndexRemap::new(self.channels, 4, self.capacity)
    }

    /// Write `data` striped from `base`
    ///
    /// # Errors
    ///
    /// Returns `Configuration` on capacity overflow, `RegisterIo` on
    /// transport failure.
    pub fn write(&self, io: &mut dyn RegisterIo, base: u64, data: &[u8]) -> Result<StripeLayout> {
        let layout = self.layout(data.len() as u64)?;
        for (c, (address, len)) in layout.write_plan(base, self.capacity).into_iter().enumerate() {
            if len == 0 {
                continue;
            }
            io.write(address, &layout.gather(c, data))?;
            debug!("Striped {len} bytes to channel {c} at {address:#x}");
        }
        Ok(layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::simulated::SimulatedDevice;

    const CAP: u64 = hbm::CHANNEL_CAPACITY;

    #[test]
    fn reference_layout() {
        let layout = StripeLayout::compute(1000, 4).unwrap();
        assert_eq!(layout.strip_count(), 16);
        assert_eq!(layout.per_channel_strips(), &[4, 4, 4, 4]);
    }

    #[test]
    fn three_channels_rejected() {
        assert!(StripeLayout::compute(1000, 3).unwrap_err().is_configuration());
        assert!(HbmStriper::new(3, CAP).unwrap_err().is_configuration());
        assert!(IndexRemap::new(3, 4, CAP).unwrap_err().is_configuration());
    }

    #[test]
    fn counts_are_balanced() {
        for channels in [1u32, 2, 4, 8, 16] {
            for total in [0u64, 1, 63, 64, 65, 1000, 4097, 1 << 20, 12_345_678] {
                let layout = StripeLayout::compute(total, channels).unwrap();
                assert_eq!(layout.strip_count(), total.div_ceil(STRIP_BYTES));
                let max = layout.per_channel_strips().iter().max().unwrap();
                let min = layout.per_channel_strips().iter().min().unwrap();
                assert!(max - min <= 1);
            }
        }
    }

    #[test]
    fn remainder_goes_to_first_channels() {
        // 7 strips over 4 channels
        let layout = StripeLayout::compute(7 * 64 - 10, 4).unwrap();
        assert_eq!(layout.per_channel_strips(), &[2, 2, 2, 1]);
        assert_eq!(layout.source_strips(1).collect::<Vec<_>>(), vec![1, 5]);
    }

    #[test]
    fn remap_round_trips() {
        for channels in [1u32, 2, 4, 8, 16] {
            let remap = IndexRemap::new(channels, 4, CAP).unwrap();
            for i in (0..5000).chain([1 << 20, (1 << 24) + 17]) {
                assert_eq!(remap.inverse(remap.remap(i)), i);
            }
        }
    }

    #[test]
    fn remap_is_injective_on_a_range() {
        let remap = IndexRemap::new(4, 4, CAP).unwrap();
        let mut seen: Vec<u64> = (0..4096).map(|i| remap.remap(i)).collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 4096);
    }

    #[test]
    fn remap_matches_placement() {
        // Element 20 sits in strip 1 -> channel 1, first strip there, lane 4
        let remap = IndexRemap::new(4, 4, CAP).unwrap();
        assert_eq!(remap.remap(20), CAP / 4 + 4);
        assert_eq!(remap.remap(70), 16 + 6); // strip 4 -> channel 0, second strip
    }

    #[test]
    fn zero_and_one_channel_are_identity() {
        for channels in [0, 1] {
            let remap = IndexRemap::new(channels, 4, CAP).unwrap();
            let mut idx = vec![0u32, 17, 999_999];
            remap.remap_in_place(&mut idx).unwrap();
            assert_eq!(idx, vec![0, 17, 999_999]);
        }
    }

    #[test]
    fn capacity_enforced() {
        let striper = HbmStriper::new(2, 128).unwrap();
        assert!(striper.layout(256).is_ok());
        assert!(striper.layout(257).unwrap_err().is_configuration());
    }

    #[test]
    fn striped_write_places_strips() {
        let mut dev = SimulatedDevice::reference();
        let striper = HbmStriper::new(2, CAP).unwrap();
        let data: Vec<u8> = (0..200u32).map(|b| b as u8).collect();
        let layout = striper.write(&mut dev, 0, &data).unwrap();
        assert_eq!(layout.per_channel_strips(), &[2, 2]);

        // Channel 1 holds strips 1 and 3; strip 3 is 8 bytes of data then padding
        let ch1 = dev.read(CAP, 128).unwrap();
        assert_eq!(&ch1[..64], &data[64..128]);
        assert_eq!(&ch1[64..72], &data[192..200]);
        assert!(ch1[72..].iter().all(|&b| b == 0));
        assert_eq!(dev.read(64, 64).unwrap(), &data[128..192]);
    }
}
