//! Reference address map of the SpMV platform.
//!
//! One 64-bit byte-addressed space behind the host transport:
//!
//! ```text
//! Range                        Contents
//! ──────────────────────────── ─────────────────────────────────────────────
//! 0x0_0000_0000 .. 0x1_0000_0000  HBM, 16 pseudo-channels × 256 MB
//! 0x1_0000_0000                   Cache/MSHR profiler (≤ 4 request handlers)
//! 0x1_0001_0000 + 0x1_0000·u      Compute unit u (u < 4)
//! 0x1_0005_0000 + 0x4_0000·u      DMA engines of unit u: row, col, val, out
//! 0x1_0016_0000                   Profiler (> 4 request handlers)
//! 0x2_0000_0000 ..                DDR: row ptr | col idx | values | outputs
//! ```
//!
//! Inside each 2 GB DDR region, units are spaced 512 MB apart.

/// Bytes in one kibibyte.
pub const KB: u64 = 1024;
/// Bytes in one mebibyte.
pub const MB: u64 = 1024 * KB;
/// Bytes in one gibibyte.
pub const GB: u64 = 1024 * MB;

/// Compute units on the reference bitstream.
pub const MAX_UNITS: usize = 4;

/// HBM geometry.
pub mod hbm {
    use super::MB;

    /// HBM base address.
    pub const BASE: u64 = 0x0;
    /// Capacity of one pseudo-channel.
    pub const CHANNEL_CAPACITY: u64 = 256 * MB;
    /// Pseudo-channels available.
    pub const MAX_CHANNELS: u32 = 16;
    /// Whole HBM span.
    pub const TOTAL_CAPACITY: u64 = CHANNEL_CAPACITY * MAX_CHANNELS as u64;
    /// Striping granularity (one cache line).
    pub const STRIP_BYTES: u64 = 64;
}

/// DDR buffer regions.
pub mod ddr {
    use super::{GB, MB};

    /// DDR base address.
    pub const BASE: u64 = 0x2_0000_0000;
    /// Row-pointer region.
    pub const ROW_PTR: u64 = BASE;
    /// Column-index region.
    pub const COL_IDX: u64 = BASE + 2 * GB;
    /// Value region.
    pub const VALUES: u64 = BASE + 4 * GB;
    /// Output region.
    pub const OUTPUT: u64 = BASE + 6 * GB;
    /// Spacing between units inside one region.
    pub const UNIT_STRIDE: u64 = 512 * MB;
}

/// Register block bases.
pub mod blocks {
    /// First compute unit.
    pub const COMPUTE_BASE: u64 = 0x1_0001_0000;
    /// Spacing between compute units.
    pub const COMPUTE_STRIDE: u64 = 0x1_0000;
    /// First DMA engine of unit 0.
    pub const DMA_BASE: u64 = 0x1_0005_0000;
    /// Spacing between the engine groups of consecutive units.
    pub const DMA_UNIT_STRIDE: u64 = 0x4_0000;
    /// Spacing between the engines of one unit.
    pub const DMA_ENGINE_STRIDE: u64 = 0x1_0000;
    /// Profiler when the bitstream has at most four request handlers.
    pub const PROFILER_BASE: u64 = 0x1_0000_0000;
    /// Profiler when the bitstream has more request handlers.
    pub const PROFILER_BASE_WIDE: u64 = 0x1_0016_0000;
}

/// The four operand streams each compute unit consumes or produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// CSR row pointers (u32).
    RowPtr,
    /// CSR column indices (u32), remapped when the vector is striped.
    ColIdx,
    /// Non-zero values (f32).
    Values,
    /// Result vector (f32).
    Output,
}

impl StreamKind {
    /// All streams in engine order.
    pub const ALL: [Self; 4] = [Self::RowPtr, Self::ColIdx, Self::Values, Self::Output];

    /// Engine slot inside a unit's engine group.
    #[must_use]
    pub const fn engine_slot(self) -> u64 {
        match self {
            Self::RowPtr => 0,
            Self::ColIdx => 1,
            Self::Values => 2,
            Self::Output => 3,
        }
    }

    /// Base of this stream's DDR region.
    #[must_use]
    pub const fn ddr_region(self) -> u64 {
        match self {
            Self::RowPtr => ddr::ROW_PTR,
            Self::ColIdx => ddr::COL_IDX,
            Self::Values => ddr::VALUES,
            Self::Output => ddr::OUTPUT,
        }
    }

    /// Short label used in logs.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::RowPtr => "rowptr",
            Self::ColIdx => "col",
            Self::Values => "val",
            Self::Output => "output",
        }
    }
}

/// DMA engine class, which bounds a single transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DmaClass {
    /// 26-bit length register, 64-byte aligned bursts.
    #[default]
    Ddr,
    /// 14-bit length register, 8-byte aligned bursts.
    Hbm,
    /// Explicit limit.
    Custom(u32),
}

impl DmaClass {
    /// Largest length one descriptor may carry.
    #[must_use]
    pub const fn max_chunk(self) -> u32 {
        match self {
            Self::Ddr => (1 << 26) - 64,
            Self::Hbm => (1 << 14) - 8,
            Self::Custom(n) => n,
        }
    }
}

/// Compute-unit register base for unit `unit`.
#[must_use]
pub const fn compute_base(unit: usize) -> u64 {
    blocks::COMPUTE_BASE + blocks::COMPUTE_STRIDE * unit as u64
}

/// DMA engine register base for `stream` of unit `unit`.
#[must_use]
pub const fn engine_base(unit: usize, stream: StreamKind) -> u64 {
    blocks::DMA_BASE
        + blocks::DMA_UNIT_STRIDE * unit as u64
        + blocks::DMA_ENGINE_STRIDE * stream.engine_slot()
}

/// DDR buffer for `stream` of unit `unit`.
#[must_use]
pub const fn buffer_base(unit: usize, stream: StreamKind) -> u64 {
    stream.ddr_region() + ddr::UNIT_STRIDE * unit as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_engine_bases() {
        // Unit 2 engines per the bitstream address editor
        assert_eq!(engine_base(2, StreamKind::RowPtr), 0x1_000d_0000);
        assert_eq!(engine_base(2, StreamKind::ColIdx), 0x1_000e_0000);
        assert_eq!(engine_base(2, StreamKind::Values), 0x1_000f_0000);
        assert_eq!(engine_base(2, StreamKind::Output), 0x1_0010_0000);
        assert_eq!(compute_base(3), 0x1_0004_0000);
    }

    #[test]
    fn ddr_buffers() {
        assert_eq!(buffer_base(1, StreamKind::RowPtr), ddr::BASE + 512 * MB);
        assert_eq!(buffer_base(3, StreamKind::Output), ddr::BASE + 7 * GB + 512 * MB);
    }

    #[test]
    fn hbm_fits_below_register_space() {
        let end = hbm::BASE + u64::from(hbm::MAX_CHANNELS) * hbm::CHANNEL_CAPACITY;
        assert!(end <= blocks::PROFILER_BASE);
    }

    #[test]
    fn dma_class_limits() {
        assert_eq!(DmaClass::Ddr.max_chunk(), 67_108_800);
        assert_eq!(DmaClass::Hbm.max_chunk(), 16_376);
        assert_eq!(DmaClass::Custom(64).max_chunk(), 64);
    }
}
