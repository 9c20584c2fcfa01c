//! Run configuration and platform address map
//!
//! Nothing in the driver reads a process-wide address: every physical
//! location comes from a [`PlatformMap`] carried by the [`RunConfig`].

use crate::dma::EngineId;
use crate::error::{Result, SpmvError};
use spmv_chip::memory::{self, blocks, ddr, hbm, DmaClass, StreamKind};
use spmv_chip::profiler::{HardwareProfile, ProfilerMap};
use spmv_chip::regs::{BusyPolarity, ControlLayout};

/// Physical addresses of every block the host touches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformMap {
    /// Register base of each compute unit
    pub compute_bases: Vec<u64>,
    /// Register bases of each unit's engines, indexed by stream slot
    pub engine_bases: Vec<[u64; 4]>,
    /// Device buffers of each unit, indexed by stream slot
    pub buffer_bases: Vec<[u64; 4]>,
    /// Bytes one stream of one unit may occupy
    pub buffer_capacity: u64,
    /// Where the shared vector starts
    pub vector_base: u64,
    /// Bytes available to a contiguous vector
    pub vector_capacity: u64,
    /// Capacity of one memory channel when the vector is striped
    pub channel_capacity: u64,
    /// Profiler base for bitstreams with at most four request handlers
    pub profiler_base: u64,
    /// Profiler base for bitstreams with more request handlers
    pub profiler_base_wide: u64,
}

impl PlatformMap {
    /// Reference FPGA layout: four units, DDR buffers, HBM vector
    pub fn reference() -> Self {
        let units = 0..memory::MAX_UNITS;
        Self {
            compute_bases: units.clone().map(memory::compute_base).collect(),
            engine_bases: units
                .clone()
                .map(|u| StreamKind::ALL.map(|s| memory::engine_base(u, s)))
                .collect(),
            buffer_bases: units
                .map(|u| StreamKind::ALL.map(|s| memory::buffer_base(u, s)))
                .collect(),
            buffer_capacity: ddr::UNIT_STRIDE,
            vector_base: hbm::BASE,
            vector_capacity: hbm::TOTAL_CAPACITY,
            channel_capacity: hbm::CHANNEL_CAPACITY,
            profiler_base: blocks::PROFILER_BASE,
            profiler_base_wide: blocks::PROFILER_BASE_WIDE,
        }
    }

    /// Compute units present
    pub fn unit_count(&self) -> usize {
        self.compute_bases.len()
    }

    /// Register base of `unit`
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the unit does not exist.
    pub fn compute_base(&self, unit: usize) -> Result<u64> {
        self.compute_bases
            .get(unit)
            .copied()
            .ok_or_else(|| no_such_unit(unit, self.unit_count()))
    }

    /// Register base of `engine`
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the unit does not exist.
    pub fn engine_base(&self, engine: EngineId) -> Result<u64> {
        self.engine_bases
            .get(engine.unit)
            .map(|slots| slots[slot(engine.stream)])
            .ok_or_else(|| no_such_unit(engine.unit, self.engine_bases.len()))
    }

    /// Device buffer holding `stream` of `unit`
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the unit does not exist.
    pub fn buffer_base(&self, unit: usize, stream: StreamKind) -> Result<u64> {
        self.buffer_bases
            .get(unit)
            .map(|slots| slots[slot(stream)])
            .ok_or_else(|| no_such_unit(unit, self.buffer_bases.len()))
    }

    /// Profiler base for `map`
    pub fn profiler_base_for(&self, map: &ProfilerMap) -> u64 {
        if map.request_handlers <= 4 {
            self.profiler_base
        } else {
            self.profiler_base_wide
        }
    }
}

impl Default for PlatformMap {
    fn default() -> Self {
        Self::reference()
    }
}

fn slot(stream: StreamKind) -> usize {
    stream.engine_slot() as usize
}

fn no_such_unit(unit: usize, count: usize) -> SpmvError {
    SpmvError::configuration(format!("compute unit {unit} does not exist ({count} present)"))
}

/// Cache setup applied before a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Cache on, effective size divided by `2^divider`
    Enabled {
        /// Cache divider
        divider: u32,
    },
    /// Cache bypassed
    Disabled,
}

impl Default for CacheMode {
    fn default() -> Self {
        Self::Enabled { divider: 0 }
    }
}

/// Configuration of one accelerator run
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Compute units used, starting at unit 0
    pub units: usize,
    /// DMA engine class bounding one descriptor
    pub dma_class: DmaClass,
    /// Memory channels the vector is striped over; 0 keeps it contiguous
    pub channels: u32,
    /// Bitstream flavour
    pub profile: HardwareProfile,
    /// Compute-unit register layout
    pub layout: ControlLayout,
    /// DMA status convention
    pub polarity: BusyPolarity,
    /// Abort a wait phase after this many poll iterations
    pub poll_limit: Option<u64>,
    /// Cache setup applied before the run
    pub cache: CacheMode,
    /// MSHR divider (hashed and traditional flavours)
    pub mshr_divider: u32,
    /// Sample the profiler once per poll iteration
    pub sample_runtime_log: bool,
    /// Samples the runtime log keeps
    pub runtime_log_capacity: usize,
    /// Physical address map
    pub platform: PlatformMap,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            units: memory::MAX_UNITS,
            dma_class: DmaClass::Ddr,
            channels: 0,
            profile: HardwareProfile::HashedMshr,
            layout: ControlLayout::Split,
            polarity: BusyPolarity::IdleBitsClear,
            poll_limit: None,
            cache: CacheMode::default(),
            mshr_divider: 0,
            sample_runtime_log: false,
            runtime_log_capacity: 10_000,
            platform: PlatformMap::reference(),
        }
    }
}

impl RunConfig {
    /// Set the number of compute units
    pub fn with_units(mut self, units: usize) -> Self {
        self.units = units;
        self
    }

    /// Set the DMA engine class
    pub fn with_dma_class(mut self, class: DmaClass) -> Self {
        self.dma_class = class;
        self
    }

    /// Set the memory channel count (0 = contiguous vector)
    pub fn with_channels(mut self, channels: u32) -> Self {
        self.channels = channels;
        self
    }

    /// Set the bitstream flavour
    pub fn with_profile(mut self, profile: HardwareProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Set the compute-unit register layout
    pub fn with_layout(mut self, layout: ControlLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Set the DMA busy polarity
    pub fn with_polarity(mut self, polarity: BusyPolarity) -> Self {
        self.polarity = polarity;
        self
    }

    /// Cap every wait phase at `limit` poll iterations
    pub fn with_poll_limit(mut self, limit: u64) -> Self {
        self.poll_limit = Some(limit);
        self
    }

    /// Set the cache setup
    pub fn with_cache(mut self, cache: CacheMode) -> Self {
        self.cache = cache;
        self
    }

    /// Set the MSHR divider
    pub fn with_mshr_divider(mut self, divider: u32) -> Self {
        self.mshr_divider = divider;
        self
    }

    /// Sample the runtime log, keeping at most `capacity` samples
    pub fn with_runtime_log(mut self, capacity: usize) -> Self {
        self.sample_runtime_log = true;
        self.runtime_log_capacity = capacity;
        self
    }

    /// Replace the address map
    pub fn with_platform(mut self, platform: PlatformMap) -> Self {
        self.platform = platform;
        self
    }

    /// Largest descriptor length
    pub fn max_chunk(&self) -> u32 {
        self.dma_class.max_chunk()
    }

    /// Check everything that can be checked without the device
    ///
    /// # Errors
    ///
    /// Returns `Configuration` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        let available = self.platform.unit_count();
        if self.units == 0 || self.units > available {
            return Err(SpmvError::configuration(format!(
                "unit count {} outside 1..={available}",
                self.units
            )));
        }
        if self.platform.engine_bases.len() < self.units
            || self.platform.buffer_bases.len() < self.units
        {
            return Err(SpmvError::configuration(
                "platform map lists fewer engine groups than compute units",
            ));
        }
        validate_channels(self.channels)?;
        if self.max_chunk() == 0 {
            return Err(SpmvError::configuration("max chunk must be non-zero"));
        }
        if self.sample_runtime_log && self.runtime_log_capacity == 0 {
            return Err(SpmvError::configuration("runtime log capacity must be non-zero"));
        }
        if let (Some(map), CacheMode::Enabled { divider }) = (self.profile.profiler_map(), self.cache) {
            if divider >= map.cache_divider_values() {
                return Err(SpmvError::configuration(format!(
                    "cache divider {divider} outside 0..{}",
                    map.cache_divider_values()
                )));
            }
        }
        match self.profile.profiler_map().filter(|m| m.mshr_divider_reg.is_some()) {
            Some(map) => {
                subentry_rows(map, self.mshr_divider)?;
            }
            None if self.mshr_divider != 0 => {
                return Err(SpmvError::configuration(format!(
                    "MSHR divider {} set but {:?} has no MSHR divider register",
                    self.mshr_divider, self.profile
                )));
            }
            None => {}
        }
        if self.sample_runtime_log && self.profile.profiler_map().is_none() {
            return Err(SpmvError::configuration(
                "runtime log requested but the bitstream has no profiler",
            ));
        }
        Ok(())
    }
}

/// Subentry rows per request handler under MSHR divider `divider`
///
/// # Errors
///
/// Returns `Configuration` if the divider leaves no rows.
pub(crate) fn subentry_rows(map: &ProfilerMap, divider: u32) -> Result<u64> {
    let per_handler = map.mshr_count / map.request_handlers.max(1);
    per_handler
        .checked_shr(divider)
        .filter(|&rows| rows > 0)
        .ok_or_else(|| {
            SpmvError::configuration(format!(
                "MSHR divider {divider} leaves no subentry rows ({per_handler} MSHRs per handler)"
            ))
        })
}

/// Check a memory channel count: 0 (contiguous) or a power of two up to 16
///
/// # Errors
///
/// Returns `Configuration` for any other value.
pub fn validate_channels(channels: u32) -> Result<()> {
    if channels == 0 || (channels.is_power_of_two() && channels <= hbm::MAX_CHANNELS) {
        Ok(())
    } else {
        Err(SpmvError::configuration(format!(
            "channel count {channels} must be a power of two no greater than {}",
            hbm::MAX_CHANNELS
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        RunConfig::default().validate().unwrap();
    }

    #[test]
    fn reference_map_matches_bitstream() {
        let map = PlatformMap::reference();
        assert_eq!(map.unit_count(), 4);
        assert_eq!(map.compute_base(0).unwrap(), 0x1_0001_0000);
        assert_eq!(
            map.engine_base(EngineId::new(3, StreamKind::Output)).unwrap(),
            0x1_0014_0000
        );
        assert_eq!(map.buffer_base(1, StreamKind::ColIdx).unwrap(), 0x2_a000_0000);
        assert!(map.compute_base(4).unwrap_err().is_configuration());
    }

    #[test]
    fn channel_counts() {
        for ok in [0, 1, 2, 4, 8, 16] {
            validate_channels(ok).unwrap();
        }
        for bad in [3, 5, 12, 32] {
            assert!(validate_channels(bad).unwrap_err().is_configuration());
        }
        let err = RunConfig::default().with_channels(3).validate().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn unit_count_bounds() {
        assert!(RunConfig::default().with_units(0).validate().is_err());
        assert!(RunConfig::default().with_units(5).validate().is_err());
        RunConfig::default().with_units(1).validate().unwrap();
    }

    #[test]
    fn cache_divider_bounds() {
        let cfg = RunConfig::default().with_cache(CacheMode::Enabled { divider: 8 });
        assert!(cfg.validate().is_err());
        let cfg = RunConfig::default().with_cache(CacheMode::Enabled { divider: 7 });
        cfg.validate().unwrap();
    }

    #[test]
    fn mshr_divider_bounds() {
        // 4096 MSHRs per handler on the hashed bitstream
        RunConfig::default().with_mshr_divider(12).validate().unwrap();
        assert_eq!(subentry_rows(&spmv_chip::profiler::HASHED, 12).unwrap(), 1);
        for bad in [13, 63, 64, u32::MAX] {
            let err = RunConfig::default().with_mshr_divider(bad).validate().unwrap_err();
            assert!(err.is_configuration(), "divider {bad}");
        }
        let inclusive = RunConfig::default()
            .with_profile(HardwareProfile::MshrInclusive)
            .with_mshr_divider(1);
        assert!(inclusive.validate().unwrap_err().is_configuration());
    }

    #[test]
    fn runtime_log_needs_profiler() {
        let cfg = RunConfig::default()
            .with_profile(HardwareProfile::NoAccelerator)
            .with_runtime_log(16);
        assert!(cfg.validate().is_err());
        assert!(RunConfig::default().with_runtime_log(0).validate().is_err());
    }
}
